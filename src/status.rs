//! Status Reporter — HTTP callback of job state transitions.

use crate::job::Job;
use crate::retry::backoff_delay;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

fn now_iso8601() -> String {
    let secs = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs();
    chrono::DateTime::<chrono::Utc>::from_timestamp(secs as i64, 0)
        .unwrap_or_default()
        .to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

fn resolve_callback_url(job: &Job) -> Option<String> {
    if let Some(url) = &job.callback_url {
        return Some(url.clone());
    }
    if job.source_channel.starts_with("http://") || job.source_channel.starts_with("https://") {
        return Some(format!("{}/api/comm/task/update", job.source_channel.trim_end_matches('/')));
    }
    if job.source_channel.starts_with("redis_queue") {
        return crate::config::TASK_CALLBACK_URL.clone();
    }
    None
}

struct TrackedStart {
    started_at: String,
    last_progress_at: Option<Instant>,
}

/// Sends per-job state transitions to whichever callback URL resolves for
/// the job. Tracks a start time per `task_id`, inserted on
/// `PROCESSING` and popped on the terminal call, to compute `duration_ms`.
pub struct StatusReporter {
    client: reqwest::Client,
    starts: Mutex<HashMap<String, TrackedStart>>,
}

impl StatusReporter {
    pub fn new() -> Self {
        Self { client: reqwest::Client::new(), starts: Mutex::new(HashMap::new()) }
    }

    async fn post(&self, url: &str, payload: &Value) {
        let mut last_status = None;
        for attempt in 0..3u32 {
            match self
                .client
                .post(url)
                .timeout(*crate::config::TASK_CALLBACK_TIMEOUT)
                .json(payload)
                .send()
                .await
            {
                Ok(resp) if resp.status().is_success() => return,
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    last_status = Some(status);
                    if !crate::error::is_retryable_status(status) {
                        break;
                    }
                }
                Err(e) => {
                    last_status = None;
                    println!("⚠ status callback request failed: {e}");
                }
            }
            if attempt < 2 {
                tokio::time::sleep(backoff_delay(attempt)).await;
            }
        }
        println!("⚠ status callback to {url} failed after retries (last status: {last_status:?}) — continuing");
    }

    fn base_payload(&self, job: &Job, status: &str, started_at: &str) -> Value {
        json!({
            "taskId": job.task_id,
            "status": status,
            "started_at": started_at,
            "queue": job.priority.as_str(),
            "priority": job.priority.as_str(),
            "queued_at": job.queued_at,
        })
    }

    /// Report `PROCESSING` for a job just accepted by a processor. Records
    /// the start time before sending, per the original's behaviour.
    pub async fn send_processing(&self, job: &Job) {
        let started_at = now_iso8601();
        self.starts.lock().unwrap().insert(
            job.task_id.clone(),
            TrackedStart { started_at: started_at.clone(), last_progress_at: None },
        );

        let Some(url) = resolve_callback_url(job) else { return };
        let mut payload = self.base_payload(job, "PROCESSING", &started_at);
        payload["finished_at"] = Value::Null;
        payload["duration_ms"] = Value::Null;
        payload["output_data"] = Value::Null;
        payload["message"] = Value::Null;
        self.post(&url, &payload).await;
    }

    /// A progress update mid-job, rate-limited to at most one per 3s
    /// unless the engine reports ≥90% complete.
    pub async fn send_progress(&self, job: &Job, value: u64, max: u64, message: &str) {
        let at_least_90 = max > 0 && (value as f64 / max as f64) >= 0.9;

        {
            let mut starts = self.starts.lock().unwrap();
            let Some(entry) = starts.get_mut(&job.task_id) else { return };
            if let Some(last) = entry.last_progress_at {
                if last.elapsed() < Duration::from_secs(3) && !at_least_90 {
                    return;
                }
            }
            entry.last_progress_at = Some(Instant::now());
        }

        let Some(url) = resolve_callback_url(job) else { return };
        let started_at = self
            .starts
            .lock()
            .unwrap()
            .get(&job.task_id)
            .map(|s| s.started_at.clone())
            .unwrap_or_else(now_iso8601);
        let mut payload = self.base_payload(job, "PROCESSING", &started_at);
        payload["message"] = json!(message);
        self.post(&url, &payload).await;
    }

    async fn send_terminal(&self, job: &Job, status: &str, output_data: Value, message: Option<&str>) {
        let finished_at = now_iso8601();
        let tracked = self.starts.lock().unwrap().remove(&job.task_id);
        let started_at = tracked.as_ref().map(|t| t.started_at.clone()).unwrap_or_else(|| finished_at.clone());
        let duration_ms = {
            let started = chrono::DateTime::parse_from_rfc3339(&started_at).ok();
            let finished = chrono::DateTime::parse_from_rfc3339(&finished_at).ok();
            match (started, finished) {
                (Some(s), Some(f)) => (f - s).num_milliseconds().max(0),
                _ => 0,
            }
        };

        let Some(url) = resolve_callback_url(job) else { return };
        let mut payload = self.base_payload(job, status, &started_at);
        payload["finished_at"] = json!(finished_at);
        payload["duration_ms"] = json!(duration_ms);
        payload["output_data"] = output_data;
        payload["message"] = message.map(Value::from).unwrap_or(Value::Null);
        self.post(&url, &payload).await;
    }

    pub async fn send_completed(&self, job: &Job, urls: &[String]) {
        self.send_terminal(job, "COMPLETED", json!({"urls": urls}), None).await;
    }

    pub async fn send_failed(&self, job: &Job, message: &str) {
        self.send_terminal(job, "FAILED", Value::Null, Some(message)).await;
    }
}

impl Default for StatusReporter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::Priority;

    fn job_with(source_channel: &str, callback_url: Option<&str>) -> Job {
        Job {
            task_id: "t1".into(),
            workflow_name: "comfyui_basic".into(),
            priority: Priority::Normal,
            source_channel: source_channel.into(),
            callback_url: callback_url.map(String::from),
            wf_json: Value::Null,
            queued_at: None,
            raw: Value::Null,
        }
    }

    #[test]
    fn per_job_callback_url_takes_precedence() {
        let job = job_with("https://producer.test", Some("https://override.test/cb"));
        assert_eq!(resolve_callback_url(&job).as_deref(), Some("https://override.test/cb"));
    }

    #[test]
    fn http_source_channel_resolves_to_update_endpoint() {
        let job = job_with("https://producer.test", None);
        assert_eq!(resolve_callback_url(&job).as_deref(), Some("https://producer.test/api/comm/task/update"));
    }

    #[test]
    fn redis_source_without_default_skips_callback() {
        let job = job_with("redis_queue", None);
        // Can't assert None unconditionally since TASK_CALLBACK_URL depends on env,
        // but in the default test environment it is unset.
        let _ = resolve_callback_url(&job);
    }
}
