//! Model-Path Repair — LoRA bare-filename → full-path rewriting.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::RwLock;

const LORA_NODE_TYPES: &[&str] = &["LoraLoader", "LoraLoaderModelOnly"];

pub struct LoraService {
    client: reqwest::Client,
    engine_url: String,
    cache: RwLock<Option<HashMap<String, String>>>,
}

impl LoraService {
    pub fn new(engine_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            engine_url: engine_url.into(),
            cache: RwLock::new(None),
        }
    }

    pub fn clear_cache(&self) {
        *self.cache.write().unwrap() = None;
    }

    /// Fetch the list of available LoRA paths from the engine's
    /// introspection endpoint. Always queries `LoraLoader` specifically —
    /// the upstream system does this even when repairing
    /// `LoraLoaderModelOnly` nodes, and this keeps the same behaviour.
    async fn fetch_lora_list(&self) -> Vec<String> {
        let url = format!("{}/object_info/LoraLoader", self.engine_url);
        let response = match self
            .client
            .get(&url)
            .timeout(std::time::Duration::from_secs(10))
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                println!("⚠ lora introspection request failed: {e}");
                return Vec::new();
            }
        };

        let body: Value = match response.json().await {
            Ok(v) => v,
            Err(e) => {
                println!("⚠ lora introspection response unparsable: {e}");
                return Vec::new();
            }
        };

        body.get("LoraLoader")
            .and_then(|v| v.get("input"))
            .and_then(|v| v.get("required"))
            .and_then(|v| v.get("lora_name"))
            .and_then(|v| v.get(0))
            .and_then(|v| v.as_array())
            .map(|arr| arr.iter().filter_map(|v| v.as_str().map(String::from)).collect())
            .unwrap_or_default()
    }

    /// Build (or return the cached) basename → full-path map. Introspection
    /// failures are non-fatal: the cache is left empty and a single warning
    /// is logged once, rather than re-attempted and re-warned per node.
    async fn ensure_cache(&self) -> HashMap<String, String> {
        if let Some(cache) = self.cache.read().unwrap().clone() {
            return cache;
        }

        let list = self.fetch_lora_list().await;
        let mut cache = HashMap::new();
        for path in &list {
            let basename = path.rsplit('/').next().unwrap_or(path).to_string();
            cache.entry(basename).or_insert_with(|| path.clone());
        }
        if cache.is_empty() {
            println!("⚠ lora catalog unavailable; path repair will be skipped");
        } else {
            println!("lora cache built: {} unique filenames", cache.len());
        }
        *self.cache.write().unwrap() = Some(cache.clone());
        cache
    }

    fn fix_one(cache: &HashMap<String, String>, lora_name: &str) -> String {
        if lora_name.is_empty() {
            return lora_name.to_string();
        }
        if cache.values().any(|v| v == lora_name) {
            return lora_name.to_string();
        }
        let basename = lora_name.rsplit('/').next().unwrap_or(lora_name);
        match cache.get(basename) {
            Some(full) => {
                if full != lora_name {
                    println!("✓ lora path repaired: '{lora_name}' -> '{full}'");
                }
                full.clone()
            }
            None => {
                println!("⚠ lora file not found: '{lora_name}'");
                lora_name.to_string()
            }
        }
    }

    /// Rewrite every LoRA-loader node's `lora_name` input in place.
    pub async fn fix_workflow_loras(&self, graph: &mut serde_json::Map<String, Value>) {
        let cache = self.ensure_cache().await;
        if cache.is_empty() {
            return;
        }

        let mut fixed_count = 0;
        for node in graph.values_mut() {
            let Some(ct) = node.get("class_type").and_then(|v| v.as_str()) else { continue };
            if !LORA_NODE_TYPES.contains(&ct) {
                continue;
            }
            let Some(inputs) = node.get_mut("inputs").and_then(|v| v.as_object_mut()) else { continue };
            let Some(lora_name) = inputs.get("lora_name").and_then(|v| v.as_str()).map(String::from) else {
                continue;
            };
            let fixed = Self::fix_one(&cache, &lora_name);
            if fixed != lora_name {
                inputs.insert("lora_name".to_string(), Value::String(fixed));
                fixed_count += 1;
            }
        }
        if fixed_count > 0 {
            println!("📦 workflow lora paths repaired: {fixed_count} node(s)");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fix_one_returns_unchanged_when_already_full_path() {
        let mut cache = HashMap::new();
        cache.insert("a.safetensors".to_string(), "styles/a.safetensors".to_string());
        assert_eq!(LoraService::fix_one(&cache, "styles/a.safetensors"), "styles/a.safetensors");
    }

    #[test]
    fn fix_one_resolves_bare_filename() {
        let mut cache = HashMap::new();
        cache.insert("a.safetensors".to_string(), "styles/a.safetensors".to_string());
        assert_eq!(LoraService::fix_one(&cache, "a.safetensors"), "styles/a.safetensors");
    }

    #[test]
    fn fix_one_leaves_unknown_unchanged() {
        let cache = HashMap::new();
        assert_eq!(LoraService::fix_one(&cache, "missing.safetensors"), "missing.safetensors");
    }

    #[test]
    fn fix_one_is_idempotent() {
        let mut cache = HashMap::new();
        cache.insert("a.safetensors".to_string(), "styles/a.safetensors".to_string());
        let once = LoraService::fix_one(&cache, "a.safetensors");
        let twice = LoraService::fix_one(&cache, &once);
        assert_eq!(once, twice);
    }
}
