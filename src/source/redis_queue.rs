//! Redis priority-queue source — three ordered lists
//! drained `vip` then `normal` then `guest`, each an atomic right-pop.

use serde_json::Value;

const LANES: &[(&str, &str)] =
    &[("vip", "gpu:tasks:vip"), ("normal", "gpu:tasks:normal"), ("guest", "gpu:tasks:guest")];

pub struct RedisSource {
    client: redis::Client,
}

impl RedisSource {
    pub fn new(url: &str) -> redis::RedisResult<Self> {
        Ok(Self { client: redis::Client::open(url)? })
    }

    pub async fn is_available(&self) -> bool {
        let Ok(mut con) = self.client.get_multiplexed_async_connection().await else {
            return false;
        };
        redis::cmd("PING").query_async::<String>(&mut con).await.is_ok()
    }

    /// Pop the next task, trying each lane in priority order. Returns the
    /// raw JSON payload plus the lane it came from (used to derive
    /// `priority`). Connection/parse errors are logged and treated as "no
    /// job from this lane", never terminate the caller's loop.
    pub async fn pop_task(&self) -> Option<(Value, &'static str)> {
        let mut con = match self.client.get_multiplexed_async_connection().await {
            Ok(c) => c,
            Err(e) => {
                println!("⚠ redis connection failed: {e}");
                return None;
            }
        };

        for (lane, list) in LANES {
            let result: redis::RedisResult<Option<String>> =
                redis::cmd("RPOP").arg(*list).query_async(&mut con).await;
            match result {
                Ok(Some(raw)) => match serde_json::from_str(&raw) {
                    Ok(v) => return Some((v, lane)),
                    Err(e) => {
                        println!("⚠ malformed redis task payload on '{list}': {e}");
                        continue;
                    }
                },
                Ok(None) => continue,
                Err(e) => {
                    println!("⚠ redis RPOP on '{list}' failed: {e}");
                    continue;
                }
            }
        }
        None
    }

    /// Diagnostic/test helper: push a job onto a named lane.
    pub async fn push_task(&self, lane: &str, payload: &Value) -> redis::RedisResult<()> {
        let Some((_, list)) = LANES.iter().find(|(l, _)| *l == lane) else {
            return Ok(());
        };
        let mut con = self.client.get_multiplexed_async_connection().await?;
        let body = serde_json::to_string(payload).unwrap_or_default();
        redis::cmd("LPUSH").arg(*list).arg(body).query_async(&mut con).await
    }

    pub async fn queue_lengths(&self) -> Vec<(&'static str, u64)> {
        let mut lengths = Vec::new();
        let Ok(mut con) = self.client.get_multiplexed_async_connection().await else {
            return lengths;
        };
        for (lane, list) in LANES {
            let len: u64 = redis::cmd("LLEN").arg(*list).query_async(&mut con).await.unwrap_or(0);
            lengths.push((*lane, len));
        }
        lengths
    }
}
