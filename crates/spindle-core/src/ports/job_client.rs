//! JobClient port - handler から job を完了・失敗させるための capability
//!
//! Handler は `(JobClientRef, ActivatedJob)` を受け取り、
//! 必要に応じて complete / fail / throw_error を呼ぶ。

use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::{EngineError, JobKey};

/// Commands a handler can send about the job it was given.
#[async_trait]
pub trait JobClient: Send + Sync {
    /// Complete the job, merging `variables` into the process instance.
    async fn complete(&self, job_key: JobKey, variables: serde_json::Value)
        -> Result<(), EngineError>;

    /// Fail the job; the engine retries it while `retries > 0`.
    async fn fail(&self, job_key: JobKey, retries: u32, message: String)
        -> Result<(), EngineError>;

    /// Raise a business error that the process model may catch.
    async fn throw_error(
        &self,
        job_key: JobKey,
        error_code: String,
        message: String,
    ) -> Result<(), EngineError>;
}

/// Shared job client handed to handlers.
pub type JobClientRef = Arc<dyn JobClient>;
