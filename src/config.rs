//! Process configuration, read once from the environment.
//!
//! The teacher worker reads env vars ad hoc at point of use via
//! `std::env::var` + `once_cell::sync::Lazy`. This crate has a much larger
//! configuration surface (consumer mode, multiple producer sources, three
//! storage backends), so it centralises the same mechanism here rather than
//! scattering it, but does not introduce a config-file crate to do it.

use once_cell::sync::Lazy;
use std::time::Duration;

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(default)
}

/// `http` or `redis_queue`.
pub static CONSUMER_MODE: Lazy<String> = Lazy::new(|| env_string("CONSUMER_MODE", "http"));

/// Comma-separated list of producer base URLs, e.g. `https://a.test,https://b.test`.
pub static TASK_API_URLS: Lazy<Vec<String>> = Lazy::new(|| {
    env_string("TASK_API_URL", "")
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
});

pub static REDIS_URL: Lazy<String> =
    Lazy::new(|| env_string("REDIS_URL", "redis://127.0.0.1/"));

pub static COMFYUI_URL: Lazy<String> =
    Lazy::new(|| env_string("COMFYUI_URL", "http://127.0.0.1:3002"));

pub static FACESWAP_SERVICE_URL: Lazy<String> =
    Lazy::new(|| env_string("FACESWAP_SERVICE_URL", "http://127.0.0.1:3003"));

pub static STORAGE_PROVIDER: Lazy<String> = Lazy::new(|| env_string("STORAGE_PROVIDER", "gcs"));

pub static GCS_BUCKET_NAME: Lazy<Option<String>> = Lazy::new(|| env_opt("GCS_BUCKET_NAME"));
pub static GCS_BUCKET_REGION: Lazy<Option<String>> = Lazy::new(|| env_opt("GCS_BUCKET_REGION"));
pub static CDN_URL: Lazy<Option<String>> = Lazy::new(|| env_opt("CDN_URL"));

pub static R2_BUCKET_NAME: Lazy<Option<String>> = Lazy::new(|| env_opt("R2_BUCKET_NAME"));
pub static R2_ACCOUNT_ID: Lazy<Option<String>> = Lazy::new(|| env_opt("R2_ACCOUNT_ID"));
pub static R2_ACCESS_KEY: Lazy<Option<String>> = Lazy::new(|| env_opt("R2_ACCESS_KEY"));
pub static R2_SECRET_KEY: Lazy<Option<String>> = Lazy::new(|| env_opt("R2_SECRET_KEY"));
pub static R2_PUBLIC_DOMAIN: Lazy<Option<String>> = Lazy::new(|| env_opt("R2_PUBLIC_DOMAIN"));

pub static CF_IMAGES_ACCOUNT_ID: Lazy<Option<String>> =
    Lazy::new(|| env_opt("CF_IMAGES_ACCOUNT_ID"));
pub static CF_IMAGES_API_TOKEN: Lazy<Option<String>> =
    Lazy::new(|| env_opt("CF_IMAGES_API_TOKEN"));
pub static CF_IMAGES_DELIVERY_DOMAIN: Lazy<Option<String>> =
    Lazy::new(|| env_opt("CF_IMAGES_DELIVERY_DOMAIN"));

pub static ALLOWED_WORKFLOWS: Lazy<String> = Lazy::new(|| env_string("ALLOWED_WORKFLOWS", ""));
pub static LOG_FILTERED_TASKS: Lazy<bool> = Lazy::new(|| env_bool("LOG_FILTERED_TASKS", false));

pub static TASK_CALLBACK_URL: Lazy<Option<String>> = Lazy::new(|| env_opt("TASK_CALLBACK_URL"));
pub static TASK_CALLBACK_TIMEOUT: Lazy<Duration> =
    Lazy::new(|| Duration::from_secs(env_u64("TASK_CALLBACK_TIMEOUT", 10)));

/// Per-job overall deadline waiting on the engine WebSocket.
pub static CONSUMER_TIMEOUT: Lazy<Duration> =
    Lazy::new(|| Duration::from_secs(env_u64("CONSUMER_TIMEOUT", 150)));

pub static COMFYUI_READY_TIMEOUT: Lazy<Duration> =
    Lazy::new(|| Duration::from_millis(env_u64("COMFYUI_READY_TIMEOUT", 1000)));
pub static COMFYUI_READY_INTERVAL: Lazy<Duration> =
    Lazy::new(|| Duration::from_secs(env_u64("COMFYUI_READY_INTERVAL", 5)));
pub static COMFYUI_READY_RETRIES: Lazy<u64> =
    Lazy::new(|| env_u64("COMFYUI_READY_RETRIES", 200));

pub static ENABLE_TEST_TASKS: Lazy<bool> = Lazy::new(|| env_bool("ENABLE_TEST_TASKS", true));

pub static DOWNLOAD_CONCURRENCY: Lazy<usize> =
    Lazy::new(|| env_u64("DOWNLOAD_CONCURRENCY", 10) as usize);
pub static UPLOAD_CONCURRENCY: Lazy<usize> =
    Lazy::new(|| env_u64("UPLOAD_CONCURRENCY", 4) as usize);

pub static COMFYUI_INPUT_DIR: Lazy<String> =
    Lazy::new(|| env_string("COMFYUI_INPUT_DIR", "/workspace/ComfyUI/input"));

/// Resolve the TCP port an engine instance for a given workflow name is
/// listening on. The original system maps this through an environment
/// registry keyed by workflow name; here a single `COMFYUI_URL` covers the
/// default case and `ENGINE_PORT_<WORKFLOW_NAME>` (uppercased, non-alnum
/// replaced with `_`) overrides per workflow when present.
pub fn engine_base_url(workflow_name: &str) -> String {
    let key = format!(
        "ENGINE_PORT_{}",
        workflow_name
            .to_ascii_uppercase()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect::<String>()
    );
    match std::env::var(&key).ok() {
        Some(port) => {
            let base = COMFYUI_URL.rsplit_once(':').map(|(h, _)| h).unwrap_or(&COMFYUI_URL);
            format!("{base}:{port}")
        }
        None => COMFYUI_URL.clone(),
    }
}
