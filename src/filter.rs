//! Workflow Filter — per-worker admission policy over workflow names.

use glob::Pattern;
use std::sync::RwLock;

pub struct WorkflowFilter {
    allowed: RwLock<Vec<String>>,
    log_filtered: bool,
}

fn parse_workflow_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|w| w.trim().to_string())
        .filter(|w| !w.is_empty())
        .collect()
}

impl WorkflowFilter {
    pub fn new(allowed_workflows: &str, log_filtered: bool) -> Self {
        let allowed = parse_workflow_list(allowed_workflows);
        println!(
            "🔒 workflow filter initialised: allowed={} log_filtered={}",
            if allowed.is_empty() || allowed.iter().any(|w| w == "*") {
                "all".to_string()
            } else {
                format!("{allowed:?}")
            },
            log_filtered
        );
        Self {
            allowed: RwLock::new(allowed),
            log_filtered,
        }
    }

    pub fn from_config() -> Self {
        Self::new(&crate::config::ALLOWED_WORKFLOWS, *crate::config::LOG_FILTERED_TASKS)
    }

    pub fn allows(&self, workflow_name: &str) -> bool {
        let name = if workflow_name.is_empty() { "default" } else { workflow_name };
        let allowed = self.allowed.read().unwrap();

        let ok = if allowed.is_empty() || allowed.iter().any(|p| p == "*") {
            true
        } else {
            allowed.iter().any(|pattern| {
                Pattern::new(pattern)
                    .map(|p| p.matches(name))
                    .unwrap_or_else(|_| pattern == name)
            })
        };

        if !ok && self.log_filtered {
            println!("🚫 workflow '{name}' not in allow-list, filtered");
        }
        ok
    }

    pub fn allowed_workflows(&self) -> Vec<String> {
        self.allowed.read().unwrap().clone()
    }

    /// True when the filter imposes no restriction (empty list, or `*`
    /// present) — used by the Source Multiplexer to decide whether to send
    /// a `workflowNames` query parameter to HTTP producers at all.
    pub fn allows_all(&self) -> bool {
        let allowed = self.allowed.read().unwrap();
        allowed.is_empty() || allowed.iter().any(|p| p == "*")
    }

    pub fn stats(&self) -> (usize, bool) {
        let allowed = self.allowed.read().unwrap();
        (allowed.len(), allowed.iter().any(|p| p == "*"))
    }

    pub fn reload(&self, allowed_workflows: &str) {
        *self.allowed.write().unwrap() = parse_workflow_list(allowed_workflows);
        println!("♻️  workflow filter configuration reloaded");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_allow_list_allows_all() {
        let f = WorkflowFilter::new("", false);
        assert!(f.allows("anything"));
        assert!(f.allows(""));
    }

    #[test]
    fn wildcard_allows_all_including_empty() {
        let f = WorkflowFilter::new("*", false);
        assert!(f.allows(""));
        assert!(f.allows("comfyui_basic"));
    }

    #[test]
    fn exact_match() {
        let f = WorkflowFilter::new("comfyui_basic,faceswap", false);
        assert!(f.allows("comfyui_basic"));
        assert!(f.allows("faceswap"));
        assert!(!f.allows("text_to_image"));
    }

    #[test]
    fn glob_match() {
        let f = WorkflowFilter::new("comfyui_*", false);
        assert!(f.allows("comfyui_basic"));
        assert!(f.allows("comfyui_anything"));
        assert!(!f.allows("faceswap"));
    }

    #[test]
    fn empty_workflow_name_maps_to_default() {
        let f = WorkflowFilter::new("default", false);
        assert!(f.allows(""));
        assert!(!f.allows("comfyui_basic"));
    }

    #[test]
    fn reload_replaces_allow_list() {
        let f = WorkflowFilter::new("comfyui_basic", false);
        assert!(!f.allows("faceswap"));
        f.reload("faceswap");
        assert!(f.allows("faceswap"));
        assert!(!f.allows("comfyui_basic"));
    }
}
