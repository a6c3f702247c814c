//! Media Fetcher — concurrent, retried download of remote URLs into
//! the engine's input directory.

use crate::error::{is_retryable_status, AgentError, AgentResult};
use crate::retry::backoff_delay;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::Semaphore;

pub fn is_remote(s: &str) -> bool {
    s.starts_with("http://") || s.starts_with("https://")
}

/// Derive a unique local filename for a download. Mirrors the upstream
/// system's scheme: parse the URL's basename, default to
/// `image_<unix_seconds>.png` if it has no name or no extension, then
/// always append a millisecond timestamp so repeated downloads of the same
/// URL never collide.
fn unique_filename(url: &str) -> String {
    let now_secs = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs();
    let now_ms = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_millis();

    let basename = url
        .split('?')
        .next()
        .unwrap_or(url)
        .rsplit('/')
        .next()
        .unwrap_or("");

    let (name, ext) = match basename.rsplit_once('.') {
        Some((n, e)) if !n.is_empty() && !e.is_empty() => (n.to_string(), format!(".{e}")),
        _ => (format!("image_{now_secs}"), ".png".to_string()),
    };

    format!("{name}_{now_ms}{ext}")
}

pub struct MediaFetcher {
    client: reqwest::Client,
    input_dir: PathBuf,
    concurrency: usize,
}

impl MediaFetcher {
    pub fn new(input_dir: impl Into<PathBuf>, concurrency: usize) -> Self {
        Self {
            client: reqwest::Client::new(),
            input_dir: input_dir.into(),
            concurrency,
        }
    }

    pub fn from_config() -> Self {
        Self::new(crate::config::COMFYUI_INPUT_DIR.clone(), *crate::config::DOWNLOAD_CONCURRENCY)
    }

    /// Download one URL, retrying transient failures up to 3 times with
    /// exponential backoff starting at 0.5s. Returns the local filename
    /// (relative to the input directory).
    pub async fn download(&self, url: &str) -> AgentResult<String> {
        tokio::fs::create_dir_all(&self.input_dir).await?;
        let filename = unique_filename(url);
        let dest = self.input_dir.join(&filename);
        let tmp = self.input_dir.join(format!("{filename}.part"));

        let mut last_err: Option<AgentError> = None;
        for attempt in 0..3u32 {
            match self.try_download(url, &tmp).await {
                Ok(()) => {
                    tokio::fs::rename(&tmp, &dest).await?;
                    return Ok(filename);
                }
                Err(DownloadError::NonRetryable(e)) => return Err(e),
                Err(DownloadError::Retryable(e)) => {
                    last_err = Some(e);
                    if attempt < 2 {
                        tokio::time::sleep(backoff_delay(attempt)).await;
                    }
                }
            }
        }
        Err(last_err.unwrap_or_else(|| AgentError::MalformedEngineResponse(url.to_string())))
    }

    async fn try_download(&self, url: &str, tmp: &Path) -> Result<(), DownloadError> {
        let response = self
            .client
            .get(url)
            .header("User-Agent", "gpu-dispatch-agent/0.1")
            .timeout(std::time::Duration::from_secs(30))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() || e.is_connect() {
                    DownloadError::Retryable(AgentError::Http(e))
                } else {
                    DownloadError::NonRetryable(AgentError::Http(e))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let code = status.as_u16();
            let err = AgentError::MalformedEngineResponse(format!(
                "GET {url} returned {code}"
            ));
            return if is_retryable_status(code) {
                Err(DownloadError::Retryable(err))
            } else {
                Err(DownloadError::NonRetryable(err))
            };
        }

        if let Some(ct) = response.headers().get(reqwest::header::CONTENT_TYPE) {
            if let Ok(ct) = ct.to_str() {
                if !ct.starts_with("image/") && !ct.starts_with("video/") && !ct.starts_with("audio/") {
                    println!("⚠ unexpected content-type '{ct}' downloading {url}");
                }
            }
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| DownloadError::Retryable(AgentError::Http(e)))?;
        tokio::fs::write(tmp, &bytes)
            .await
            .map_err(|e| DownloadError::NonRetryable(AgentError::Io(e)))?;
        Ok(())
    }

    /// Download a batch of URLs concurrently (bounded by `concurrency`).
    /// Failed URLs are simply absent from the returned map — callers must
    /// detect the gap themselves.
    pub async fn download_batch(&self, urls: &[String]) -> HashMap<String, String> {
        let semaphore = Arc::new(Semaphore::new(self.concurrency.max(1)));
        let mut handles = Vec::with_capacity(urls.len());

        for url in urls {
            let url = url.clone();
            let semaphore = semaphore.clone();
            let client = self.client.clone();
            let input_dir = self.input_dir.clone();
            let concurrency = self.concurrency;
            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await.unwrap();
                let fetcher = MediaFetcher { client, input_dir, concurrency };
                let result = fetcher.download(&url).await;
                (url, result)
            }));
        }

        let mut results = HashMap::with_capacity(urls.len());
        let mut failed = Vec::new();
        for handle in handles {
            if let Ok((url, result)) = handle.await {
                match result {
                    Ok(filename) => {
                        results.insert(url, filename);
                    }
                    Err(e) => failed.push((url, e)),
                }
            }
        }

        if !failed.is_empty() {
            println!(
                "⚠ batch download: {} succeeded, {} failed: {:?}",
                results.len(),
                failed.len(),
                failed.iter().map(|(u, _)| u).collect::<Vec<_>>()
            );
        }

        results
    }
}

enum DownloadError {
    Retryable(AgentError),
    NonRetryable(AgentError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_remote_urls() {
        assert!(is_remote("http://x.test/a.png"));
        assert!(is_remote("https://x.test/a.png"));
        assert!(!is_remote("/local/path.png"));
        assert!(!is_remote("a.png"));
    }

    #[test]
    fn unique_filename_preserves_extension_and_adds_timestamp() {
        let name = unique_filename("https://x.test/photos/a.png?sig=123");
        assert!(name.starts_with("a_"));
        assert!(name.ends_with(".png"));
    }

    #[test]
    fn unique_filename_defaults_extension_when_missing() {
        let name = unique_filename("https://x.test/download");
        assert!(name.ends_with(".png"));
    }

    #[test]
    fn unique_filename_differs_across_calls() {
        let a = unique_filename("https://x.test/a.png");
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = unique_filename("https://x.test/a.png");
        assert_ne!(a, b);
    }
}
