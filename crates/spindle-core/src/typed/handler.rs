//! Handler trait - engine の poll loop から呼ばれる job handler
//!
//! # 二層構造
//! - **表層**: `Fn(A, B) -> Future` の普通の関数・クロージャ
//! - **内部**: `JobHandler` (object-safe)。`FnHandler<A, B, F>` で型消去する
//!
//! 引数の型 `A`, `B` は `HandlerParam` で「何の引数か」を申告する。
//! registry はこの申告 (`ParamKind`) を見て `(JobClient, ActivatedJob)` の
//! 形になっているかを検証する。

use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::{ActivatedJob, HandlerError};
use crate::ports::JobClientRef;

/// Object-safe job handler, invoked once per activated job.
///
/// # 使用例
/// ```ignore
/// struct Greeter;
///
/// #[async_trait]
/// impl JobHandler for Greeter {
///     async fn handle(&self, client: JobClientRef, job: ActivatedJob) -> Result<(), HandlerError> {
///         client.complete(job.key(), serde_json::json!({})).await?;
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, client: JobClientRef, job: ActivatedJob) -> Result<(), HandlerError>;
}

/// Declared kind of a handler parameter.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ParamKind {
    JobClient,
    ActivatedJob,
    Other(&'static str),
}

impl fmt::Display for ParamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamKind::JobClient => f.write_str("JobClient"),
            ParamKind::ActivatedJob => f.write_str("ActivatedJob"),
            ParamKind::Other(name) => f.write_str(name),
        }
    }
}

/// A type that may appear as a handler parameter.
///
/// `supply` returns `None` when an invocation cannot provide the value.
pub trait HandlerParam: Sized + Send + 'static {
    fn kind() -> ParamKind;

    fn supply(client: &JobClientRef, job: &ActivatedJob) -> Option<Self>;
}

impl HandlerParam for JobClientRef {
    fn kind() -> ParamKind {
        ParamKind::JobClient
    }

    fn supply(client: &JobClientRef, _job: &ActivatedJob) -> Option<Self> {
        Some(Arc::clone(client))
    }
}

impl HandlerParam for ActivatedJob {
    fn kind() -> ParamKind {
        ParamKind::ActivatedJob
    }

    fn supply(_client: &JobClientRef, job: &ActivatedJob) -> Option<Self> {
        Some(job.clone())
    }
}

impl HandlerParam for String {
    fn kind() -> ParamKind {
        ParamKind::Other("String")
    }

    fn supply(_client: &JobClientRef, _job: &ActivatedJob) -> Option<Self> {
        None
    }
}

impl HandlerParam for serde_json::Value {
    fn kind() -> ParamKind {
        ParamKind::Other("serde_json::Value")
    }

    fn supply(_client: &JobClientRef, _job: &ActivatedJob) -> Option<Self> {
        None
    }
}

/// Adapter from a two-argument async function to `JobHandler`.
pub struct FnHandler<A, B, F> {
    f: F,
    _marker: PhantomData<fn(A, B)>,
}

impl<A, B, F> FnHandler<A, B, F>
where
    A: HandlerParam,
    B: HandlerParam,
{
    pub fn new<Fut>(f: F) -> Self
    where
        F: Fn(A, B) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        Self {
            f,
            _marker: PhantomData,
        }
    }

    /// Parameter kinds in declaration order.
    pub fn params() -> Vec<ParamKind> {
        vec![A::kind(), B::kind()]
    }
}

#[async_trait]
impl<A, B, F, Fut> JobHandler for FnHandler<A, B, F>
where
    A: HandlerParam,
    B: HandlerParam,
    F: Fn(A, B) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    async fn handle(&self, client: JobClientRef, job: ActivatedJob) -> Result<(), HandlerError> {
        let first = A::supply(&client, &job)
            .ok_or_else(|| unsupported_param(A::kind()))?;
        let second = B::supply(&client, &job)
            .ok_or_else(|| unsupported_param(B::kind()))?;
        (self.f)(first, second).await
    }
}

fn unsupported_param(kind: ParamKind) -> HandlerError {
    HandlerError::new(format!("parameter of type {kind} cannot be supplied to a job handler"))
}
