//! HandlerDescriptor - registry に渡す handler の申告
//!
//! Component は起動時に自分の handler を `HandlerDescriptor` の一覧として
//! 明示的に返す。registry はそれを検証してから engine に subscribe する。
//!
//! # 使用例
//! ```ignore
//! impl Component for Greeter {
//!     fn handlers(self: Arc<Self>) -> Vec<HandlerDescriptor> {
//!         vec![
//!             HandlerDescriptor::method(&self, "say_hello", Greeter::say_hello)
//!                 .job_type("say-hello"),
//!         ]
//!     }
//! }
//! ```

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::config::WorkerOptions;
use crate::domain::{HandlerError, InvalidJobType, JobType};

use super::handler::{FnHandler, HandlerParam, JobHandler, ParamKind};

/// An application component that owns job handlers.
pub trait Component: Send + Sync + 'static {
    fn handlers(self: Arc<Self>) -> Vec<HandlerDescriptor>;
}

/// Why a descriptor was not registered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    SignatureMismatch { found: Vec<ParamKind> },
    MissingJobType,
    InvalidJobType(InvalidJobType),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::SignatureMismatch { found } => {
                let found: Vec<String> = found.iter().map(ToString::to_string).collect();
                write!(
                    f,
                    "expected parameters (JobClient, ActivatedJob), found ({})",
                    found.join(", ")
                )
            }
            SkipReason::MissingJobType => f.write_str("no job type declared"),
            SkipReason::InvalidJobType(err) => fmt::Display::fmt(err, f),
        }
    }
}

#[derive(Debug, Clone, Default)]
struct WorkerOverrides {
    name: Option<String>,
    max_jobs_active: Option<u32>,
    timeout: Option<Duration>,
    poll_interval: Option<Duration>,
    fetch_variables: Option<Vec<String>>,
}

/// One declared job handler: where it lives, what it subscribes to, and
/// how to call it.
#[derive(Clone)]
pub struct HandlerDescriptor {
    component: &'static str,
    method: &'static str,
    job_type: Option<String>,
    params: Vec<ParamKind>,
    handler: Arc<dyn JobHandler>,
    overrides: WorkerOverrides,
}

impl HandlerDescriptor {
    /// Describe a free-standing async function or closure.
    pub fn from_fn<A, B, F, Fut>(component: &'static str, method: &'static str, f: F) -> Self
    where
        A: HandlerParam,
        B: HandlerParam,
        F: Fn(A, B) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        Self {
            component,
            method,
            job_type: None,
            params: FnHandler::<A, B, F>::params(),
            handler: Arc::new(FnHandler::new(f)),
            overrides: WorkerOverrides::default(),
        }
    }

    /// Describe a method bound to its owning component instance.
    pub fn method<C, A, B, F, Fut>(instance: &Arc<C>, method: &'static str, f: F) -> Self
    where
        C: Send + Sync + 'static,
        A: HandlerParam,
        B: HandlerParam,
        F: Fn(Arc<C>, A, B) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        let instance = Arc::clone(instance);
        let bound = move |first: A, second: B| f(Arc::clone(&instance), first, second);
        Self::from_fn(std::any::type_name::<C>(), method, bound)
    }

    /// Describe a struct that implements `JobHandler` directly.
    pub fn handler<H>(component: &'static str, method: &'static str, handler: H) -> Self
    where
        H: JobHandler + 'static,
    {
        Self {
            component,
            method,
            job_type: None,
            params: vec![ParamKind::JobClient, ParamKind::ActivatedJob],
            handler: Arc::new(handler),
            overrides: WorkerOverrides::default(),
        }
    }

    pub fn job_type(mut self, job_type: impl Into<String>) -> Self {
        self.job_type = Some(job_type.into());
        self
    }

    pub fn worker_name(mut self, name: impl Into<String>) -> Self {
        self.overrides.name = Some(name.into());
        self
    }

    pub fn max_jobs_active(mut self, max_jobs_active: u32) -> Self {
        self.overrides.max_jobs_active = Some(max_jobs_active);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.overrides.timeout = Some(timeout);
        self
    }

    pub fn poll_interval(mut self, poll_interval: Duration) -> Self {
        self.overrides.poll_interval = Some(poll_interval);
        self
    }

    pub fn fetch_variables(mut self, names: &[&str]) -> Self {
        self.overrides.fetch_variables = Some(names.iter().map(|n| n.to_string()).collect());
        self
    }

    pub fn component(&self) -> &'static str {
        self.component
    }

    pub fn method_name(&self) -> &'static str {
        self.method
    }

    pub fn declared_job_type(&self) -> Option<&str> {
        self.job_type.as_deref()
    }

    pub(crate) fn invoker(&self) -> Arc<dyn JobHandler> {
        Arc::clone(&self.handler)
    }

    /// Check the call shape, then the declared job type.
    pub fn validate(&self) -> Result<JobType, SkipReason> {
        if self.params != [ParamKind::JobClient, ParamKind::ActivatedJob] {
            return Err(SkipReason::SignatureMismatch {
                found: self.params.clone(),
            });
        }
        let raw = self.job_type.as_deref().ok_or(SkipReason::MissingJobType)?;
        JobType::parse(raw).map_err(SkipReason::InvalidJobType)
    }

    /// Worker options for this handler: `defaults` with per-handler overrides.
    pub fn worker_options(&self, defaults: &WorkerOptions) -> WorkerOptions {
        let mut options = defaults.clone();
        if let Some(name) = &self.overrides.name {
            options.name = name.clone();
        }
        if let Some(max) = self.overrides.max_jobs_active {
            options.max_jobs_active = max;
        }
        if let Some(timeout) = self.overrides.timeout {
            options.timeout_ms = duration_ms(timeout);
        }
        if let Some(interval) = self.overrides.poll_interval {
            options.poll_interval_ms = duration_ms(interval);
        }
        if let Some(vars) = &self.overrides.fetch_variables {
            options.fetch_variables = vars.clone();
        }
        options
    }
}

impl fmt::Debug for HandlerDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerDescriptor")
            .field("component", &self.component)
            .field("method", &self.method)
            .field("job_type", &self.job_type)
            .field("params", &self.params)
            .field("overrides", &self.overrides)
            .finish_non_exhaustive()
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
