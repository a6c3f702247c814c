//! The canonical Job record and the Normaliser that builds it
//! from whatever schema a producer or queue entry happens to use.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Vip,
    Normal,
    Guest,
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Normal
    }
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Vip => "vip",
            Priority::Normal => "normal",
            Priority::Guest => "guest",
        }
    }
}

/// A job after normalisation. Immutable once built — every
/// downstream mutation (graph rewriting, repair) operates on `wf_json`
/// inside a processor's own working copy, not on this record.
#[derive(Debug, Clone)]
pub struct Job {
    pub task_id: String,
    pub workflow_name: String,
    pub priority: Priority,
    pub source_channel: String,
    pub callback_url: Option<String>,
    pub wf_json: Value,
    pub queued_at: Option<String>,
    pub raw: Value,
}

impl Job {
    pub fn is_test_task(&self) -> bool {
        self.task_id.starts_with("test_task_") || self.workflow_name == "test_workflow"
    }
}

fn pick_str(raw: &Value, paths: &[&str]) -> Option<String> {
    for path in paths {
        let mut cur = raw;
        let mut found = true;
        for segment in path.split('.') {
            match cur.get(segment) {
                Some(v) => cur = v,
                None => {
                    found = false;
                    break;
                }
            }
        }
        if found {
            if let Some(s) = cur.as_str() {
                if !s.is_empty() {
                    return Some(s.to_string());
                }
            }
        }
    }
    None
}

/// Build a canonical `Job` from a raw producer/queue payload, tolerating
/// common field-name variants across producers. `source_channel` is supplied by
/// the caller (the Source Multiplexer knows whether this came from Redis
/// or which HTTP base it was fetched from) rather than read from the
/// payload, since the payload itself rarely carries it reliably.
pub fn normalize(raw: Value, source_channel: String) -> Option<Job> {
    let task_id = pick_str(&raw, &["taskId", "task_id", "id"])?;
    if task_id.is_empty() {
        return None;
    }

    let workflow_name = pick_str(
        &raw,
        &[
            "workflowName",
            "workflow",
            "workflow_name",
            "params.workflowName",
            "params.workflow_name",
        ],
    )
    .unwrap_or_else(|| "default".to_string());

    let callback_url = pick_str(&raw, &["callbackUrl", "callback_url", "params.callbackUrl"]);

    let priority = match raw.get("priority").and_then(|v| v.as_str()) {
        Some("vip") => Priority::Vip,
        Some("guest") => Priority::Guest,
        _ => Priority::Normal,
    };

    let queued_at = pick_str(&raw, &["queuedAt", "queued_at"]);

    let params = raw.get("params").cloned().unwrap_or(Value::Null);
    let wf_json = match &params {
        Value::Object(map) if map.contains_key("input_data") => {
            map.get("input_data").cloned().unwrap_or(Value::Null)
        }
        Value::Null => raw.get("wf_json").cloned().unwrap_or(Value::Null),
        other => other.clone(),
    };

    Some(Job {
        task_id,
        workflow_name,
        priority,
        source_channel,
        callback_url,
        wf_json,
        queued_at,
        raw,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn normalizes_camel_case_fields() {
        let raw = json!({
            "taskId": "t1",
            "workflowName": "comfyui_basic",
            "callbackUrl": "https://cb.test/update",
            "params": {"wf_json": {"1": {}}},
        });
        let job = normalize(raw, "redis_queue".into()).unwrap();
        assert_eq!(job.task_id, "t1");
        assert_eq!(job.workflow_name, "comfyui_basic");
        assert_eq!(job.callback_url.as_deref(), Some("https://cb.test/update"));
        assert_eq!(job.priority, Priority::Normal);
    }

    #[test]
    fn normalizes_snake_case_fields_with_input_data_wrapper() {
        let raw = json!({
            "task_id": "t2",
            "workflow_name": "faceswap",
            "params": {"input_data": {"source_url": "https://x.test/a.jpg"}},
        });
        let job = normalize(raw, "https://producer.test".into()).unwrap();
        assert_eq!(job.task_id, "t2");
        assert_eq!(job.wf_json["source_url"], "https://x.test/a.jpg");
    }

    #[test]
    fn missing_workflow_name_defaults_to_default() {
        let raw = json!({"taskId": "t3"});
        let job = normalize(raw, "redis_queue".into()).unwrap();
        assert_eq!(job.workflow_name, "default");
    }

    #[test]
    fn missing_task_id_rejected() {
        let raw = json!({"workflowName": "x"});
        assert!(normalize(raw, "redis_queue".into()).is_none());
    }

    #[test]
    fn normalizer_is_idempotent() {
        let raw = json!({
            "taskId": "t4",
            "workflowName": "comfyui_basic",
            "priority": "vip",
            "params": {"input_data": {"a": 1}},
        });
        let job1 = normalize(raw.clone(), "redis_queue".into()).unwrap();
        let job2 = normalize(raw, "redis_queue".into()).unwrap();
        assert_eq!(job1.task_id, job2.task_id);
        assert_eq!(job1.workflow_name, job2.workflow_name);
        assert_eq!(job1.priority, job2.priority);
        assert_eq!(job1.wf_json, job2.wf_json);
    }

    #[test]
    fn test_task_short_circuit_detection() {
        let raw = json!({"taskId": "test_task_abc", "workflowName": "comfyui_basic"});
        let job = normalize(raw, "redis_queue".into()).unwrap();
        assert!(job.is_test_task());

        let raw2 = json!({"taskId": "t5", "workflowName": "test_workflow"});
        let job2 = normalize(raw2, "redis_queue".into()).unwrap();
        assert!(job2.is_test_task());

        let raw3 = json!({"taskId": "t6", "workflowName": "comfyui_basic"});
        let job3 = normalize(raw3, "redis_queue".into()).unwrap();
        assert!(!job3.is_test_task());
    }
}
