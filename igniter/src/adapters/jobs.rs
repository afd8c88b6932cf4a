//! Jobs adapter contract

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::Value;
use std::sync::Arc;

use crate::error::{Error, Result};

/// Handler registered for a `(queue, task)` pair.
pub type JobHandler = Arc<dyn Fn(Value) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Per-enqueue options.
#[derive(Debug, Clone, Default)]
pub struct JobOptions {
    /// Retry attempts before the job is dead-lettered
    pub attempts: Option<u32>,
    /// Backoff between attempts, in milliseconds
    pub backoff_ms: Option<u64>,
}

/// When a scheduled job fires.
#[derive(Debug, Clone)]
pub enum JobTrigger {
    /// Run once after a delay, in milliseconds
    DelayMs(u64),
    /// Run on a cron expression
    Cron {
        /// Standard 5-field cron expression
        expr: String,
        /// IANA timezone name; adapter default when absent
        timezone: Option<String>,
    },
}

/// Background job contract.
#[async_trait]
pub trait Jobs: Send + Sync {
    /// Enqueue a task for immediate processing; returns the job id.
    async fn enqueue(
        &self,
        queue: &str,
        task: &str,
        input: Value,
        options: Option<JobOptions>,
    ) -> Result<String>;

    /// Register a handler for a task on a queue.
    fn on_job(&self, queue: &str, task: &str, handler: JobHandler) -> Result<()>;

    /// Schedule a task for later or recurring execution; returns the job id.
    async fn schedule(
        &self,
        queue: &str,
        task: &str,
        input: Value,
        trigger: JobTrigger,
        options: Option<JobOptions>,
    ) -> Result<String>;
}

/// Default installed when no Jobs adapter is configured.
///
/// Registration is tolerated (so shared controller code can load), but any
/// attempt to actually enqueue work fails fast.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopJobs;

#[async_trait]
impl Jobs for NoopJobs {
    async fn enqueue(
        &self,
        queue: &str,
        task: &str,
        _input: Value,
        _options: Option<JobOptions>,
    ) -> Result<String> {
        tracing::error!(queue, task, "enqueue called without a jobs adapter");
        Err(Error::JobsNotConfigured)
    }

    fn on_job(&self, queue: &str, task: &str, _handler: JobHandler) -> Result<()> {
        tracing::warn!(
            queue,
            task,
            "job handler registered without a jobs adapter; it will never run"
        );
        Ok(())
    }

    async fn schedule(
        &self,
        queue: &str,
        task: &str,
        _input: Value,
        _trigger: JobTrigger,
        _options: Option<JobOptions>,
    ) -> Result<String> {
        tracing::error!(queue, task, "schedule called without a jobs adapter");
        Err(Error::JobsNotConfigured)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_noop_jobs_rejects_enqueue() {
        let jobs = NoopJobs;
        let err = jobs
            .enqueue("emails", "send-welcome", json!({}), None)
            .await
            .unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::JobsNotConfigured);
        assert_eq!(err.status(), http::StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_noop_jobs_rejects_schedule() {
        let jobs = NoopJobs;
        let err = jobs
            .schedule(
                "emails",
                "digest",
                json!({}),
                JobTrigger::Cron {
                    expr: "0 9 * * *".into(),
                    timezone: None,
                },
                None,
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::JobsNotConfigured);
    }

    #[test]
    fn test_noop_jobs_tolerates_registration() {
        let jobs = NoopJobs;
        assert!(jobs
            .on_job("emails", "send-welcome", Arc::new(|_| Box::pin(async { Ok(()) })))
            .is_ok());
    }
}
