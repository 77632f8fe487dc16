//! Test doubles for the engine ports.
//!
//! `RecordingEngine` records every `open_worker` call and can be told to
//! reject a job type, to open slowly, or to make a handle's `close` fail or hang.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::domain::{ActivatedJob, EngineError, HandlerError, JobKey, JobType, WorkerId};
use crate::ports::{EngineClient, JobClient, JobClientRef, Subscription, WorkerHandle};
use crate::typed::JobHandler;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CloseBehavior {
    Ok,
    Fail,
    Hang,
}

#[derive(Default)]
pub struct RecordingEngine {
    handles: Mutex<Vec<Arc<RecordingHandle>>>,
    rejected: HashSet<String>,
    failing_close: HashSet<String>,
    hanging_close: HashSet<String>,
    open_delay: Option<Duration>,
}

impl RecordingEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rejecting(mut self, job_type: &str) -> Self {
        self.rejected.insert(job_type.to_string());
        self
    }

    pub fn failing_close(mut self, job_type: &str) -> Self {
        self.failing_close.insert(job_type.to_string());
        self
    }

    pub fn hanging_close(mut self, job_type: &str) -> Self {
        self.hanging_close.insert(job_type.to_string());
        self
    }

    /// Sleep for `delay` inside every `open_worker` call.
    pub fn slow_open(mut self, delay: Duration) -> Self {
        self.open_delay = Some(delay);
        self
    }

    /// Successfully opened handles, in open order.
    pub fn handles(&self) -> Vec<Arc<RecordingHandle>> {
        self.handles.lock().unwrap().clone()
    }

    /// Job types of successfully opened handles, sorted.
    pub fn opened_job_types(&self) -> Vec<String> {
        let mut job_types: Vec<String> = self
            .handles()
            .iter()
            .map(|h| h.job_type().to_string())
            .collect();
        job_types.sort();
        job_types
    }
}

#[async_trait]
impl EngineClient for RecordingEngine {
    async fn open_worker(
        &self,
        subscription: Subscription,
    ) -> Result<Arc<dyn WorkerHandle>, EngineError> {
        if let Some(delay) = self.open_delay {
            tokio::time::sleep(delay).await;
        }
        let name = subscription.job_type.as_str();
        if self.rejected.contains(name) {
            return Err(EngineError::SubscriptionRejected {
                job_type: subscription.job_type,
                reason: "rejected by test engine".to_string(),
            });
        }

        let close_behavior = if self.failing_close.contains(name) {
            CloseBehavior::Fail
        } else if self.hanging_close.contains(name) {
            CloseBehavior::Hang
        } else {
            CloseBehavior::Ok
        };

        let handle = Arc::new(RecordingHandle {
            id: WorkerId::generate(),
            job_type: subscription.job_type,
            handler: subscription.handler,
            closed: AtomicBool::new(false),
            close_calls: AtomicUsize::new(0),
            close_behavior,
        });
        self.handles.lock().unwrap().push(Arc::clone(&handle));
        Ok(handle)
    }
}

pub struct RecordingHandle {
    id: WorkerId,
    job_type: JobType,
    handler: Arc<dyn JobHandler>,
    closed: AtomicBool,
    close_calls: AtomicUsize,
    close_behavior: CloseBehavior,
}

impl RecordingHandle {
    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    /// Call the subscribed adapter the way an engine poll loop would.
    pub async fn invoke(&self, client: JobClientRef, job: ActivatedJob) -> Result<(), HandlerError> {
        self.handler.handle(client, job).await
    }
}

#[async_trait]
impl WorkerHandle for RecordingHandle {
    fn id(&self) -> WorkerId {
        self.id
    }

    fn job_type(&self) -> &JobType {
        &self.job_type
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<(), EngineError> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        match self.close_behavior {
            CloseBehavior::Ok => {
                self.closed.store(true, Ordering::SeqCst);
                Ok(())
            }
            CloseBehavior::Fail => Err(EngineError::CloseFailed {
                worker: self.id,
                reason: "close failed in test engine".to_string(),
            }),
            CloseBehavior::Hang => std::future::pending().await,
        }
    }
}

/// Job client that records the commands it receives.
#[derive(Default)]
pub struct RecordingJobClient {
    completed: Mutex<Vec<JobKey>>,
    failed: Mutex<Vec<(JobKey, u32, String)>>,
    thrown: Mutex<Vec<(JobKey, String)>>,
}

impl RecordingJobClient {
    pub fn completed(&self) -> Vec<JobKey> {
        self.completed.lock().unwrap().clone()
    }

    pub fn failed(&self) -> Vec<(JobKey, u32, String)> {
        self.failed.lock().unwrap().clone()
    }

    pub fn thrown(&self) -> Vec<(JobKey, String)> {
        self.thrown.lock().unwrap().clone()
    }
}

#[async_trait]
impl JobClient for RecordingJobClient {
    async fn complete(
        &self,
        job_key: JobKey,
        _variables: serde_json::Value,
    ) -> Result<(), EngineError> {
        self.completed.lock().unwrap().push(job_key);
        Ok(())
    }

    async fn fail(&self, job_key: JobKey, retries: u32, message: String) -> Result<(), EngineError> {
        self.failed.lock().unwrap().push((job_key, retries, message));
        Ok(())
    }

    async fn throw_error(
        &self,
        job_key: JobKey,
        error_code: String,
        _message: String,
    ) -> Result<(), EngineError> {
        self.thrown.lock().unwrap().push((job_key, error_code));
        Ok(())
    }
}
