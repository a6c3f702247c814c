//! Source Multiplexer — picks a task producer (Redis priority
//! queues or HTTP polling) and hands back a raw payload plus the
//! `source_channel` string the Normaliser and Status Reporter need.

pub mod http_source;
pub mod redis_queue;

use crate::filter::WorkflowFilter;
use http_source::HttpSource;
use redis_queue::RedisSource;
use serde_json::Value;

enum Backend {
    Redis(RedisSource),
    Http(HttpSource),
}

/// Wraps whichever backend is active. Redis and HTTP modes are mutually
/// exclusive at any given moment — if Redis mode is requested but the
/// server isn't reachable at startup, falls back to HTTP polling rather
/// than refusing to start, provided at least one producer URL is
/// configured.
pub struct TaskSource {
    backend: Backend,
}

impl TaskSource {
    pub async fn from_config() -> Option<Self> {
        match crate::config::CONSUMER_MODE.as_str() {
            "redis_queue" => {
                let redis = match RedisSource::new(&crate::config::REDIS_URL) {
                    Ok(r) => r,
                    Err(e) => {
                        println!("⚠ redis client construction failed: {e}");
                        return Self::http_fallback();
                    }
                };
                if redis.is_available().await {
                    println!("📡 task source: redis queue at {}", *crate::config::REDIS_URL);
                    Some(Self { backend: Backend::Redis(redis) })
                } else {
                    println!("⚠ redis queue unavailable at startup, falling back to http polling");
                    Self::http_fallback()
                }
            }
            _ => Self::http_fallback(),
        }
    }

    fn http_fallback() -> Option<Self> {
        let urls = crate::config::TASK_API_URLS.clone();
        if urls.is_empty() {
            println!("✗ no task source available: redis unreachable and TASK_API_URL unset");
            return None;
        }
        println!("📡 task source: http polling {urls:?}");
        Some(Self { backend: Backend::Http(HttpSource::new(urls)) })
    }

    /// Pop the next raw task payload along with its `source_channel`, or
    /// `None` if nothing is available right now.
    pub async fn pop_task(&self, filter: &WorkflowFilter) -> Option<(Value, String)> {
        match &self.backend {
            Backend::Redis(redis) => {
                let (payload, lane) = redis.pop_task().await?;
                Some((payload, format!("redis_queue:{lane}")))
            }
            Backend::Http(http) => http.pop_task(filter).await,
        }
    }
}
