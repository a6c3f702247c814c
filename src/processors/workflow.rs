//! Workflow Processor — drives one engine job end-to-end.

use super::{JobOutcome, Processors};
use crate::job::Job;
use futures_util::stream::{self, StreamExt};
use serde_json::Value;

pub async fn process(ctx: &Processors, job: &Job) -> JobOutcome {
    let Some(graph_obj) = job.wf_json.as_object() else {
        return JobOutcome::Failed { message: "job has no wf_json graph".into() };
    };
    let mut graph = graph_obj.clone();

    let engine_base = crate::config::engine_base_url(&job.workflow_name);
    let client = ctx.engines.get_or_create(&job.workflow_name).await;

    if !client.check_health().await {
        println!("⚠ engine unavailable for workflow '{}' (health probe failed)", job.workflow_name);
        return JobOutcome::Unavailable;
    }

    let lora = ctx.lora_service_for(&engine_base).await;
    lora.fix_workflow_loras(&mut graph).await;

    let (urls, occurrences) = crate::nodes::collect_remote_inputs(&graph);
    if !urls.is_empty() {
        let downloaded = ctx.fetcher.download_batch(&urls).await;
        let missing: Vec<&String> = urls.iter().filter(|u| !downloaded.contains_key(*u)).collect();
        if !missing.is_empty() {
            let message = format!("failed to download input(s): {missing:?}");
            ctx.status.send_failed(job, &message).await;
            return JobOutcome::Failed { message };
        }
        crate::nodes::rewrite_local_paths(&mut graph, &downloaded, &occurrences);
    }

    ctx.status.send_processing(job).await;

    let graph_value = Value::Object(graph.clone());
    let prompt_id = match client.submit(&graph_value).await {
        Ok(id) => id,
        Err(e) => return handle_engine_error(ctx, job, &job.workflow_name, e).await,
    };

    let status = ctx.status.clone();
    let job_for_progress = job.clone();
    let wait_result = client
        .wait_for_completion(&prompt_id, *crate::config::CONSUMER_TIMEOUT, move |value, max| {
            let status = status.clone();
            let job = job_for_progress.clone();
            tokio::spawn(async move {
                status.send_progress(&job, value, max, "processing").await;
            });
        })
        .await;

    if let Err(e) = wait_result {
        return handle_engine_error(ctx, job, &job.workflow_name, e).await;
    }

    let history = match client.history(&prompt_id).await {
        Ok(h) => h,
        Err(e) => {
            let message = e.to_string();
            ctx.status.send_failed(job, &message).await;
            return JobOutcome::Failed { message };
        }
    };

    let outputs = history
        .get(&prompt_id)
        .and_then(|v| v.get("outputs"))
        .and_then(|v| v.as_object())
        .cloned()
        .unwrap_or_default();

    let date_str = chrono::Utc::now().format("%Y%m%d").to_string();
    let tasks = crate::nodes::harvest_upload_tasks(&graph, &outputs, &job.task_id, &date_str);
    let task_count = tasks.len();

    if task_count == 0 {
        let message = "No results generated.".to_string();
        ctx.status.send_failed(job, &message).await;
        return JobOutcome::Failed { message };
    }

    let results: Vec<Option<(usize, String)>> = stream::iter(tasks.into_iter().enumerate())
        .map(|(index, task)| {
            let client = client.clone();
            async move {
                let bytes = match client
                    .view(&task.engine_filename, &task.engine_subfolder, &task.engine_folder_type)
                    .await
                {
                    Ok(b) => b,
                    Err(e) => {
                        println!("⚠ failed to fetch artifact '{}': {e}", task.engine_filename);
                        return None;
                    }
                };
                match ctx.storage.upload_binary(bytes, &task.destination_path, None).await {
                    Ok(url) => Some((index, url)),
                    Err(e) => {
                        println!("⚠ upload failed for '{}': {e}", task.destination_path);
                        None
                    }
                }
            }
        })
        .buffer_unordered(*crate::config::UPLOAD_CONCURRENCY)
        .collect()
        .await;

    let mut ordered: Vec<Option<String>> = vec![None; task_count];
    for (index, url) in results.into_iter().flatten() {
        ordered[index] = Some(url);
    }
    let urls: Vec<String> = ordered.into_iter().flatten().collect();

    if urls.is_empty() {
        let message = "No results generated.".to_string();
        ctx.status.send_failed(job, &message).await;
        return JobOutcome::Failed { message };
    }

    ctx.status.send_completed(job, &urls).await;
    JobOutcome::Completed { urls }
}

/// Classify an engine-interaction failure as `UNAVAILABLE` (connection
/// related — evict the cached client, no status update) or durable
/// `FAILED`.
async fn handle_engine_error(ctx: &Processors, job: &Job, workflow_name: &str, e: crate::error::AgentError) -> JobOutcome {
    let message = e.to_string();
    if crate::error::looks_like_connection_error(&message) {
        ctx.engines.evict(workflow_name).await;
        return JobOutcome::Unavailable;
    }
    ctx.status.send_failed(job, &message).await;
    JobOutcome::Failed { message }
}
