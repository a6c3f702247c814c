//! HTTP-poll source — pulls tasks from one or more
//! business-side producer endpoints in order.

use crate::filter::WorkflowFilter;
use serde_json::Value;

#[derive(serde::Deserialize)]
struct FetchEnvelope {
    #[serde(default)]
    success: Option<bool>,
    #[serde(default)]
    code: Option<u16>,
    #[serde(default)]
    data: Option<Value>,
}

pub struct HttpSource {
    client: reqwest::Client,
    base_urls: Vec<String>,
}

impl HttpSource {
    pub fn new(base_urls: Vec<String>) -> Self {
        Self { client: reqwest::Client::new(), base_urls }
    }

    /// Try each producer in order, returning the first task offered along
    /// with the base URL it came from (needed to route the job's status
    /// callbacks back to the producer that issued it).
    pub async fn pop_task(&self, filter: &WorkflowFilter) -> Option<(Value, String)> {
        for base in &self.base_urls {
            let mut request = self.client.get(format!("{}/api/comm/task/fetch", base.trim_end_matches('/')));
            if !filter.allows_all() {
                let names = filter.allowed_workflows();
                request = request.query(&names.iter().map(|n| ("workflowNames", n.as_str())).collect::<Vec<_>>());
            }

            let response = match request.send().await {
                Ok(r) => r,
                Err(e) => {
                    println!("⚠ task fetch from '{base}' failed: {e}");
                    continue;
                }
            };

            let status_code = response.status().as_u16();
            let envelope: FetchEnvelope = match response.json().await {
                Ok(e) => e,
                Err(e) => {
                    println!("⚠ malformed fetch response from '{base}': {e}");
                    continue;
                }
            };

            let ok = envelope.success.unwrap_or(status_code == 200);
            if !ok {
                continue;
            }
            match envelope.data {
                Some(Value::Null) | None => continue,
                Some(data) => return Some((data, base.clone())),
            }
        }
        None
    }
}
