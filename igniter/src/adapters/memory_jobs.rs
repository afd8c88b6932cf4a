//! In-process jobs for development, tests, and single-node deployments

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use super::jobs::{JobHandler, JobOptions, JobTrigger, Jobs};
use crate::error::{Error, Result};

/// Jobs adapter backed by Tokio tasks.
///
/// Work runs on the local runtime with retry and backoff; nothing persists,
/// so a crash loses queued jobs. Cron triggers need a real backend and are
/// rejected here.
#[derive(Default)]
pub struct MemoryJobs {
    handlers: DashMap<(String, String), JobHandler>,
}

impl MemoryJobs {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap in an `Arc`, the shape the builder consumes.
    #[must_use]
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn handler_for(&self, queue: &str, task: &str) -> Result<JobHandler> {
        self.handlers
            .get(&(queue.to_string(), task.to_string()))
            .map(|h| h.clone())
            .ok_or_else(|| {
                Error::config_invalid(format!("no handler registered for {queue}/{task}"))
            })
    }
}

#[async_trait]
impl Jobs for Arc<MemoryJobs> {
    async fn enqueue(
        &self,
        queue: &str,
        task: &str,
        input: Value,
        options: Option<JobOptions>,
    ) -> Result<String> {
        let handler = self.handler_for(queue, task)?;
        let id = job_id();
        let job = id.clone();
        let queue = queue.to_string();
        let task = task.to_string();
        tokio::spawn(async move {
            run_with_retries(&queue, &task, &job, handler, input, options).await;
        });
        Ok(id)
    }

    fn on_job(&self, queue: &str, task: &str, handler: JobHandler) -> Result<()> {
        if self
            .handlers
            .insert((queue.to_string(), task.to_string()), handler)
            .is_some()
        {
            tracing::warn!(queue, task, "job handler replaced");
        }
        Ok(())
    }

    async fn schedule(
        &self,
        queue: &str,
        task: &str,
        input: Value,
        trigger: JobTrigger,
        options: Option<JobOptions>,
    ) -> Result<String> {
        let delay = match trigger {
            JobTrigger::DelayMs(ms) => Duration::from_millis(ms),
            JobTrigger::Cron { .. } => {
                return Err(Error::config_invalid(
                    "cron schedules need a persistent jobs backend",
                ));
            }
        };
        let handler = self.handler_for(queue, task)?;
        let id = job_id();
        let job = id.clone();
        let queue = queue.to_string();
        let task = task.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            run_with_retries(&queue, &task, &job, handler, input, options).await;
        });
        Ok(id)
    }
}

fn job_id() -> String {
    format!("job_{}", uuid::Uuid::now_v7().simple())
}

async fn run_with_retries(
    queue: &str,
    task: &str,
    job: &str,
    handler: JobHandler,
    input: Value,
    options: Option<JobOptions>,
) {
    let options = options.unwrap_or_default();
    let attempts = options.attempts.unwrap_or(1).max(1);
    let backoff = Duration::from_millis(options.backoff_ms.unwrap_or(0));
    for attempt in 1..=attempts {
        match handler(input.clone()).await {
            Ok(()) => {
                tracing::debug!(queue, task, job, attempt, "job finished");
                return;
            }
            Err(e) => {
                tracing::warn!(queue, task, job, attempt, "job attempt failed: {e}");
                if attempt < attempts {
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }
    tracing::error!(queue, task, job, attempts, "job dead-lettered");
}
