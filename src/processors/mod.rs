//! Processor Registry and the job-level outcome type.

pub mod faceswap;
pub mod workflow;

use crate::job::Job;

/// A finished job's result. Kept distinct from `AgentError`/`Result`: an
/// engine that's still booting is a normal, frequent branch, not a fault
/// — collapsing it into `Err` would make the happy path and genuine
/// faults indistinguishable at call sites.
#[derive(Debug, Clone)]
pub enum JobOutcome {
    /// Engine/service unreachable; job released without a status update.
    Unavailable,
    Completed { urls: Vec<String> },
    Failed { message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessorKind {
    Workflow,
    FaceSwap,
}

const BUILTIN_WORKFLOW_NAMES: &[&str] =
    &["basic_generation", "text_to_image", "image_to_image", "inpainting"];

/// Map a workflow name to the processor that handles it.
pub fn resolve(workflow_name: &str) -> ProcessorKind {
    match workflow_name {
        "faceswap" | "face_swap" => ProcessorKind::FaceSwap,
        name if name.starts_with("comfyui_") || BUILTIN_WORKFLOW_NAMES.contains(&name) => {
            ProcessorKind::Workflow
        }
        "" => {
            println!("⚠ empty workflow_name, routing to Workflow Processor");
            ProcessorKind::Workflow
        }
        other => {
            println!("⚠ unrecognised workflow_name '{other}', routing to Workflow Processor");
            ProcessorKind::Workflow
        }
    }
}

pub struct Processors {
    pub engines: crate::engine::EngineClientCache,
    pub storage: crate::storage::StorageManager,
    pub lora_by_engine: tokio::sync::Mutex<std::collections::HashMap<String, std::sync::Arc<crate::lora::LoraService>>>,
    pub fetcher: crate::fetcher::MediaFetcher,
    pub faceswap_client: reqwest::Client,
    pub status: std::sync::Arc<crate::status::StatusReporter>,
}

impl Processors {
    pub fn from_config() -> Self {
        Self {
            engines: crate::engine::EngineClientCache::new(),
            storage: crate::storage::StorageManager::from_config(),
            lora_by_engine: tokio::sync::Mutex::new(std::collections::HashMap::new()),
            fetcher: crate::fetcher::MediaFetcher::from_config(),
            faceswap_client: reqwest::Client::new(),
            status: std::sync::Arc::new(crate::status::StatusReporter::new()),
        }
    }

    async fn lora_service_for(&self, engine_base_url: &str) -> std::sync::Arc<crate::lora::LoraService> {
        let mut guard = self.lora_by_engine.lock().await;
        if let Some(existing) = guard.get(engine_base_url) {
            return existing.clone();
        }
        let service = std::sync::Arc::new(crate::lora::LoraService::new(engine_base_url.to_string()));
        guard.insert(engine_base_url.to_string(), service.clone());
        service
    }

    /// Route and run `job` to completion, per the Processor Registry rule.
    pub async fn process(&self, job: &Job) -> JobOutcome {
        match resolve(&job.workflow_name) {
            ProcessorKind::Workflow => workflow::process(self, job).await,
            ProcessorKind::FaceSwap => faceswap::process(self, job).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn faceswap_routes_both_spellings() {
        assert_eq!(resolve("faceswap"), ProcessorKind::FaceSwap);
        assert_eq!(resolve("face_swap"), ProcessorKind::FaceSwap);
    }

    #[test]
    fn comfyui_prefix_and_builtins_route_to_workflow() {
        assert_eq!(resolve("comfyui_anything"), ProcessorKind::Workflow);
        assert_eq!(resolve("text_to_image"), ProcessorKind::Workflow);
        assert_eq!(resolve("basic_generation"), ProcessorKind::Workflow);
    }

    #[test]
    fn unknown_and_empty_fall_back_to_workflow() {
        assert_eq!(resolve("something_else"), ProcessorKind::Workflow);
        assert_eq!(resolve(""), ProcessorKind::Workflow);
    }
}
