//! Errors - registry / engine / handler のエラー型
//!
//! 分類:
//! - `EngineError`: engine client が返すエラー（subscribe 拒否、close 失敗など）
//! - `HandlerError`: ユーザー handler の失敗。engine 側で job の fail に変換される
//! - `RegistryError`: registry の起動・登録エラー（起動時は致命的）

use thiserror::Error;

use super::ids::{JobKey, WorkerId};
use super::job_type::JobType;

/// Errors reported by the engine client port.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("subscription for job type '{job_type}' rejected: {reason}")]
    SubscriptionRejected { job_type: JobType, reason: String },

    #[error("engine unavailable: {0}")]
    Unavailable(String),

    #[error("job {0} not found")]
    JobNotFound(JobKey),

    #[error("job {0} is not activated")]
    JobNotActivated(JobKey),

    #[error("failed to close {worker}: {reason}")]
    CloseFailed { worker: WorkerId, reason: String },
}

/// Failure raised by a job handler.
///
/// The engine client turns this into a failed job (retries - 1).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct HandlerError {
    message: String,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<EngineError> for HandlerError {
    fn from(err: EngineError) -> Self {
        Self::new(err.to_string())
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(err: serde_json::Error) -> Self {
        Self::new(format!("json decode: {err}"))
    }
}

/// Errors raised while registering workers.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("worker registry is closed")]
    Closed,

    #[error("invalid job handler {component}#{method}: {reason}")]
    InvalidHandler {
        component: &'static str,
        method: &'static str,
        reason: String,
    },

    #[error("failed to subscribe {component}#{method} to job type '{job_type}'")]
    Subscription {
        component: &'static str,
        method: &'static str,
        job_type: JobType,
        #[source]
        source: EngineError,
    },

    #[error("registration task aborted: {0}")]
    Aborted(String),
}
