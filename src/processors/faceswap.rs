//! Face-Swap Processor — delegates to a co-located HTTP service.

use super::{JobOutcome, Processors};
use crate::job::Job;
use crate::retry::backoff_delay;
use serde_json::Value;

struct FaceSwapRequest<'a> {
    source_url: &'a str,
    target_url: &'a str,
    resolution: &'a str,
    model: &'a str,
}

fn is_http_url(s: &str) -> bool {
    s.starts_with("http://") || s.starts_with("https://")
}

pub async fn process(ctx: &Processors, job: &Job) -> JobOutcome {
    let params = &job.wf_json;

    let source_url = params.get("source_url").and_then(|v| v.as_str()).unwrap_or("");
    let target_url = params.get("target_url").and_then(|v| v.as_str()).unwrap_or("");
    if !is_http_url(source_url) || !is_http_url(target_url) {
        let message = "source_url and target_url are both required http(s) URLs".to_string();
        ctx.status.send_failed(job, &message).await;
        return JobOutcome::Failed { message };
    }

    let resolution = params.get("resolution").and_then(|v| v.as_str()).unwrap_or("1024x1024");
    let model = params.get("model").and_then(|v| v.as_str()).unwrap_or("inswapper_128_fp16");

    let base_url = crate::config::FACESWAP_SERVICE_URL.as_str();

    let healthy = ctx
        .faceswap_client
        .get(format!("{base_url}/health"))
        .timeout(std::time::Duration::from_secs(5))
        .send()
        .await
        .map(|r| r.status().is_success())
        .unwrap_or(false);
    if !healthy {
        println!("⚠ face-swap service unavailable at {base_url}");
        return JobOutcome::Unavailable;
    }

    ctx.status.send_processing(job).await;

    let request = FaceSwapRequest { source_url, target_url, resolution, model };
    let response = match submit_with_retry(ctx, base_url, &request).await {
        Ok(r) => r,
        Err(e) => {
            let message = e.to_string();
            ctx.status.send_failed(job, &message).await;
            return JobOutcome::Failed { message };
        }
    };

    if response.get("status").and_then(|v| v.as_str()) != Some("success") {
        let message = response
            .get("error")
            .and_then(|v| v.as_str())
            .unwrap_or("face-swap service reported failure")
            .to_string();
        ctx.status.send_failed(job, &message).await;
        return JobOutcome::Failed { message };
    }

    let Some(output_path) = response.get("output_path").and_then(|v| v.as_str()) else {
        let message = "face-swap response missing output_path".to_string();
        ctx.status.send_failed(job, &message).await;
        return JobOutcome::Failed { message };
    };

    let mut artifact_paths = vec![output_path.to_string()];
    if let Some(metadata) = response.get("metadata").and_then(|v| v.as_object()) {
        for (key, value) in metadata {
            if !key.ends_with("_url") {
                continue;
            }
            if let Some(path) = value.as_str() {
                artifact_paths.push(path.to_string());
            }
        }
    }

    let mut urls = Vec::with_capacity(artifact_paths.len());
    for path in &artifact_paths {
        let fetch_url = if is_http_url(path) { path.clone() } else { format!("{base_url}{path}") };
        let bytes = match ctx.faceswap_client.get(&fetch_url).send().await {
            Ok(resp) if resp.status().is_success() => match resp.bytes().await {
                Ok(b) => b.to_vec(),
                Err(e) => {
                    let message = format!("failed reading face-swap artifact '{path}': {e}");
                    ctx.status.send_failed(job, &message).await;
                    return JobOutcome::Failed { message };
                }
            },
            Ok(resp) => {
                let message = format!("fetching face-swap artifact '{path}' returned {}", resp.status());
                ctx.status.send_failed(job, &message).await;
                return JobOutcome::Failed { message };
            }
            Err(e) => {
                let message = format!("failed fetching face-swap artifact '{path}': {e}");
                ctx.status.send_failed(job, &message).await;
                return JobOutcome::Failed { message };
            }
        };

        let date_str = chrono::Utc::now().format("%Y%m%d").to_string();
        let sequence = urls.len();
        let ext = path.rsplit_once('.').map(|(_, e)| e).unwrap_or("bin");
        let destination = format!("{date_str}/{}_{sequence}.{ext}", job.task_id);
        match ctx.storage.upload_binary(bytes, &destination, None).await {
            Ok(url) => urls.push(url),
            Err(e) => {
                let message = format!("upload failed for '{destination}': {e}");
                ctx.status.send_failed(job, &message).await;
                return JobOutcome::Failed { message };
            }
        }
    }

    ctx.status.send_completed(job, &urls).await;
    JobOutcome::Completed { urls }
}

async fn submit_with_retry(
    ctx: &Processors,
    base_url: &str,
    request: &FaceSwapRequest<'_>,
) -> Result<Value, crate::error::AgentError> {
    let url = format!("{base_url}/process");
    let body = serde_json::json!({
        "source_url": request.source_url,
        "target_url": request.target_url,
        "resolution": request.resolution,
        "model": request.model,
    });

    let mut last_err = None;
    for attempt in 0..3u32 {
        match ctx.faceswap_client.post(&url).json(&body).send().await {
            Ok(resp) if resp.status().is_success() => return Ok(resp.json().await?),
            Ok(resp) => {
                let status = resp.status().as_u16();
                last_err = Some(crate::error::AgentError::MalformedEngineResponse(format!(
                    "face-swap /process returned {status}"
                )));
                if !crate::error::is_retryable_status(status) {
                    break;
                }
            }
            Err(e) => last_err = Some(crate::error::AgentError::Http(e)),
        }
        if attempt < 2 {
            tokio::time::sleep(backoff_delay(attempt)).await;
        }
    }
    Err(last_err.unwrap_or_else(|| crate::error::AgentError::MalformedEngineResponse("face-swap request exhausted retries".into())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_http_urls() {
        assert!(is_http_url("https://x.test/a.jpg"));
        assert!(!is_http_url("/local/a.jpg"));
    }
}
