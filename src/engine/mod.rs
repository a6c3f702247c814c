//! Engine Client — one client per workflow name, holding an HTTP
//! client plus a lazily-established WebSocket subscription.

use crate::error::{AgentError, AgentResult};
use crate::retry::{backoff_delay, flat_engine_boot_delay};
use futures_util::StreamExt;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use uuid::Uuid;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone, PartialEq)]
enum EngineEvent {
    Terminal { prompt_id: String },
    Progress { value: u64, max: u64 },
    Other,
}

/// Parse one WebSocket text frame into the subset of event types the core
/// consumes; anything else (or unparsable) is `Other`, logged and
/// ignored by the caller.
fn parse_event(text: &str) -> Option<EngineEvent> {
    let v: Value = serde_json::from_str(text).ok()?;
    let ty = v.get("type")?.as_str()?;
    let data = v.get("data")?;
    match ty {
        "executing" => {
            let prompt_id = data.get("prompt_id")?.as_str()?.to_string();
            if data.get("node").map(|n| n.is_null()).unwrap_or(false) {
                Some(EngineEvent::Terminal { prompt_id })
            } else {
                Some(EngineEvent::Other)
            }
        }
        "progress" => {
            let value = data.get("value").and_then(|v| v.as_u64())?;
            let max = data.get("max").and_then(|v| v.as_u64())?;
            Some(EngineEvent::Progress { value, max })
        }
        _ => Some(EngineEvent::Other),
    }
}

/// One client per workflow name. Holds the stable `client_id` used
/// for both submit and the WebSocket subscription, and the WebSocket
/// connection itself once established — reused across jobs serialised
/// through this client, never pinged to validate.
pub struct EngineClient {
    base_url: String,
    client_id: String,
    http: reqwest::Client,
    ws: Mutex<Option<WsStream>>,
}

impl EngineClient {
    pub fn new(base_url: String) -> Self {
        Self {
            base_url,
            client_id: Uuid::new_v4().to_string(),
            http: reqwest::Client::new(),
            ws: Mutex::new(None),
        }
    }

    pub async fn check_health(&self) -> bool {
        let url = format!("{}/system_stats", self.base_url);
        match self.http.get(&url).timeout(Duration::from_secs(2)).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }

    fn ws_url(&self) -> String {
        let base = self
            .base_url
            .replacen("https://", "wss://", 1)
            .replacen("http://", "ws://", 1);
        format!("{base}/ws?clientId={}", self.client_id)
    }

    async fn connect(&self) -> AgentResult<WsStream> {
        let url = self.ws_url();
        let (stream, _) = tokio::time::timeout(Duration::from_secs(10), connect_async(&url))
            .await
            .map_err(|_| AgentError::MalformedEngineResponse("websocket handshake timed out".into()))?
            .map_err(AgentError::WebSocket)?;
        Ok(stream)
    }

    async fn ensure_connected(&self) -> AgentResult<()> {
        let mut guard = self.ws.lock().await;
        if guard.is_some() {
            return Ok(());
        }
        *guard = Some(self.connect().await?);
        Ok(())
    }

    /// Submit a graph. Retries up to 3 times; connection-refused uses the
    /// flat engine-boot delay instead of the growing backoff.
    pub async fn submit(&self, graph: &Value) -> AgentResult<String> {
        let url = format!("{}/prompt", self.base_url);
        let body = serde_json::json!({"prompt": graph, "client_id": self.client_id});

        let mut last_err = None;
        for attempt in 0..3u32 {
            match self.http.post(&url).json(&body).send().await {
                Ok(resp) if resp.status().is_success() => {
                    let parsed: Value = resp.json().await?;
                    let prompt_id = parsed
                        .get("prompt_id")
                        .and_then(|v| v.as_str())
                        .ok_or_else(|| AgentError::MalformedEngineResponse("submit response missing prompt_id".into()))?;
                    return Ok(prompt_id.to_string());
                }
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    let retryable = crate::error::is_retryable_status(status);
                    last_err = Some(AgentError::MalformedEngineResponse(format!("submit returned {status}")));
                    if !retryable {
                        break;
                    }
                    if attempt < 2 {
                        tokio::time::sleep(backoff_delay(attempt)).await;
                    }
                }
                Err(e) => {
                    let delay = if e.is_connect() { flat_engine_boot_delay() } else { backoff_delay(attempt) };
                    last_err = Some(AgentError::Http(e));
                    if attempt < 2 {
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }
        Err(last_err.unwrap_or_else(|| AgentError::MalformedEngineResponse("submit exhausted retries".into())))
    }

    pub async fn history(&self, prompt_id: &str) -> AgentResult<Value> {
        let url = format!("{}/history/{prompt_id}", self.base_url);
        let resp = self.http.get(&url).send().await?;
        Ok(resp.json().await?)
    }

    pub async fn view(&self, filename: &str, subfolder: &str, folder_type: &str) -> AgentResult<Vec<u8>> {
        let url = format!("{}/view", self.base_url);
        let resp = self
            .http
            .get(&url)
            .query(&[("filename", filename), ("subfolder", subfolder), ("type", folder_type)])
            .send()
            .await?;
        Ok(resp.bytes().await?.to_vec())
    }

    pub async fn object_info(&self, node_type: &str) -> AgentResult<Value> {
        let url = format!("{}/object_info/{node_type}", self.base_url);
        let resp = self.http.get(&url).send().await?;
        Ok(resp.json().await?)
    }

    /// Consume WebSocket events until the terminal marker for `prompt_id`
    /// arrives or `deadline` elapses. One reconnect attempt is made on a
    /// `recv` error; a second failure propagates.
    pub async fn wait_for_completion(
        &self,
        prompt_id: &str,
        deadline: Duration,
        mut on_progress: impl FnMut(u64, u64),
    ) -> AgentResult<()> {
        self.ensure_connected().await?;
        let start = tokio::time::Instant::now();
        let mut reconnected_once = false;

        loop {
            let elapsed = start.elapsed();
            if elapsed >= deadline {
                return Err(AgentError::MalformedEngineResponse(format!(
                    "timed out waiting for prompt {prompt_id} after {deadline:?}"
                )));
            }
            let poll_window = (deadline - elapsed).min(Duration::from_secs(5));

            let next = {
                let mut guard = self.ws.lock().await;
                let stream = guard
                    .as_mut()
                    .ok_or_else(|| AgentError::MalformedEngineResponse("websocket not connected".into()))?;
                tokio::time::timeout(poll_window, stream.next()).await
            };

            match next {
                Ok(Some(Ok(Message::Text(text)))) => match parse_event(&text) {
                    Some(EngineEvent::Terminal { prompt_id: pid }) if pid == prompt_id => return Ok(()),
                    Some(EngineEvent::Progress { value, max }) => on_progress(value, max),
                    _ => {}
                },
                Ok(Some(Ok(_))) => {}
                Ok(Some(Err(_))) | Ok(None) => {
                    if reconnected_once {
                        return Err(AgentError::MalformedEngineResponse(
                            "websocket recv failed after reconnect".into(),
                        ));
                    }
                    reconnected_once = true;
                    *self.ws.lock().await = None;
                    self.ensure_connected().await?;
                }
                Err(_) => {} // poll window elapsed, loop back and recheck the overall deadline
            }
        }
    }
}

/// Per-workflow-name cache of Engine Clients. Entries are
/// created on demand and evicted whenever a connection-related failure is
/// observed for that workflow.
pub struct EngineClientCache {
    clients: Mutex<HashMap<String, Arc<EngineClient>>>,
}

impl EngineClientCache {
    pub fn new() -> Self {
        Self { clients: Mutex::new(HashMap::new()) }
    }

    pub async fn get_or_create(&self, workflow_name: &str) -> Arc<EngineClient> {
        let mut guard = self.clients.lock().await;
        if let Some(existing) = guard.get(workflow_name) {
            return existing.clone();
        }
        let base_url = crate::config::engine_base_url(workflow_name);
        let client = Arc::new(EngineClient::new(base_url));
        guard.insert(workflow_name.to_string(), client.clone());
        client
    }

    pub async fn evict(&self, workflow_name: &str) {
        self.clients.lock().await.remove(workflow_name);
    }
}

impl Default for EngineClientCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn terminal_marker_requires_null_node() {
        let text = json!({"type": "executing", "data": {"prompt_id": "P", "node": null}}).to_string();
        assert_eq!(parse_event(&text), Some(EngineEvent::Terminal { prompt_id: "P".to_string() }));
    }

    #[test]
    fn executing_with_node_is_not_terminal() {
        let text = json!({"type": "executing", "data": {"prompt_id": "P", "node": "3"}}).to_string();
        assert_eq!(parse_event(&text), Some(EngineEvent::Other));
    }

    #[test]
    fn progress_event_parses_value_and_max() {
        let text = json!({"type": "progress", "data": {"value": 50, "max": 100}}).to_string();
        assert_eq!(parse_event(&text), Some(EngineEvent::Progress { value: 50, max: 100 }));
    }

    #[test]
    fn unknown_event_type_is_other() {
        let text = json!({"type": "status", "data": {}}).to_string();
        assert_eq!(parse_event(&text), Some(EngineEvent::Other));
    }

    #[tokio::test]
    async fn cache_returns_same_client_for_same_workflow() {
        let cache = EngineClientCache::new();
        let a = cache.get_or_create("comfyui_basic").await;
        let b = cache.get_or_create("comfyui_basic").await;
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn evict_forces_a_fresh_client() {
        let cache = EngineClientCache::new();
        let a = cache.get_or_create("comfyui_basic").await;
        cache.evict("comfyui_basic").await;
        let b = cache.get_or_create("comfyui_basic").await;
        assert!(!Arc::ptr_eq(&a, &b));
    }
}
