//! The consume loop: pop a task, normalise it, admit or skip it, hand it
//! to the Processor Registry, and requeue on UNAVAILABLE.

use crate::filter::WorkflowFilter;
use crate::job::{self, Job};
use crate::processors::{JobOutcome, Processors};
use crate::source::TaskSource;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

const IDLE_POLL_INTERVAL: std::time::Duration = std::time::Duration::from_secs(1);
const UNAVAILABLE_BACKOFF: std::time::Duration = std::time::Duration::from_secs(5);

pub struct Dispatcher {
    source: TaskSource,
    filter: WorkflowFilter,
    processors: Processors,
}

impl Dispatcher {
    pub async fn from_config() -> Option<Self> {
        let source = TaskSource::from_config().await?;
        Some(Self {
            source,
            filter: WorkflowFilter::from_config(),
            processors: Processors::from_config(),
        })
    }

    pub fn storage_ready(&self) -> bool {
        self.processors.storage.is_initialized()
    }

    /// Run until `shutdown` is set. Finishes whichever job is currently
    /// in flight before returning — the flag is only checked between jobs.
    pub async fn run(&self, shutdown: Arc<AtomicBool>) {
        loop {
            if shutdown.load(Ordering::Relaxed) {
                println!("🛑 dispatcher stopping");
                return;
            }

            let Some((raw, source_channel)) = self.source.pop_task(&self.filter).await else {
                tokio::time::sleep(IDLE_POLL_INTERVAL).await;
                continue;
            };

            let Some(job) = job::normalize(raw, source_channel) else {
                println!("⚠ dropping task: could not normalise payload");
                continue;
            };

            if !self.filter.allows(&job.workflow_name) {
                continue;
            }

            if job.is_test_task() {
                self.handle_test_task(&job).await;
                continue;
            }

            self.run_job(job).await;
        }
    }

    async fn handle_test_task(&self, job: &Job) {
        if !*crate::config::ENABLE_TEST_TASKS {
            println!("🧪 test task '{}' received but ENABLE_TEST_TASKS is off, skipping", job.task_id);
            return;
        }
        println!("🧪 short-circuiting test task '{}'", job.task_id);
        self.processors.status.send_processing(job).await;
        self.processors.status.send_completed(job, &["test://ok".to_string()]).await;
    }

    async fn run_job(&self, job: Job) {
        match self.processors.process(&job).await {
            JobOutcome::Completed { urls } => {
                println!("✅ task '{}' completed with {} artifact(s)", job.task_id, urls.len());
            }
            JobOutcome::Failed { message } => {
                println!("✗ task '{}' failed: {message}", job.task_id);
            }
            JobOutcome::Unavailable => {
                println!("⏳ engine unavailable for task '{}', backing off before retry", job.task_id);
                tokio::time::sleep(UNAVAILABLE_BACKOFF).await;
            }
        }
    }
}
