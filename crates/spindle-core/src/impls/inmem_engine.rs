//! InMemoryEngine - 開発用・テスト用の engine
//!
//! 外部 engine の代わりにプロセス内で job を保持し、worker ごとに poll loop を回す。
//!
//! # 状態遷移
//! ```text
//! Activatable --activate--> Activated --complete--> Completed
//!      ^                        |  |----fail(retries > 0)----> Activatable
//!      |                        |  |----fail(retries = 0)----> Failed
//!      +----lease expired-------+  +----throw_error----------> ErrorThrown
//! ```
//!
//! # 実装詳細
//! - job は `BTreeMap<JobKey, JobRecord>` に作成順で保持（key は単調増加）
//! - 状態変化のたびに `Notify::notify_waiters` で待機側を起こす
//! - worker handle の close は watch channel で loop を止め、in-flight の
//!   handler が終わるまで待つ

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, Notify, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::WorkerOptions;
use crate::domain::{ActivatedJob, EngineError, JobKey, JobType, WorkerId};
use crate::ports::{EngineClient, JobClient, JobClientRef, Subscription, WorkerHandle};
use crate::typed::JobHandler;

/// Lifecycle state of a job held by the in-memory engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobState {
    Activatable,
    Activated,
    Completed,
    /// Failed with no retries left (an incident on a real engine).
    Failed,
    ErrorThrown,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Failed | JobState::ErrorThrown
        )
    }
}

/// A job to be created on the in-memory engine.
#[derive(Debug, Clone)]
pub struct NewJob {
    job_type: JobType,
    variables: serde_json::Value,
    retries: u32,
    process_instance_key: i64,
    bpmn_process_id: String,
    element_id: String,
    custom_headers: HashMap<String, String>,
}

impl NewJob {
    pub fn new(job_type: JobType) -> Self {
        Self {
            job_type,
            variables: serde_json::json!({}),
            retries: 3,
            process_instance_key: 0,
            bpmn_process_id: String::new(),
            element_id: String::new(),
            custom_headers: HashMap::new(),
        }
    }

    pub fn variables(mut self, variables: serde_json::Value) -> Self {
        self.variables = variables;
        self
    }

    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn process(
        mut self,
        process_instance_key: i64,
        bpmn_process_id: impl Into<String>,
        element_id: impl Into<String>,
    ) -> Self {
        self.process_instance_key = process_instance_key;
        self.bpmn_process_id = bpmn_process_id.into();
        self.element_id = element_id.into();
        self
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.custom_headers.insert(key.into(), value.into());
        self
    }
}

/// Snapshot of a job as seen by the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct JobSnapshot {
    pub key: JobKey,
    pub job_type: JobType,
    pub state: JobState,
    pub retries: u32,
    pub variables: serde_json::Value,
    pub worker: Option<String>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
}

struct JobRecord {
    key: JobKey,
    definition: NewJob,
    state: JobState,
    retries: u32,
    worker: Option<String>,
    lease_expires_at: Option<Instant>,
    error_code: Option<String>,
    error_message: Option<String>,
}

impl JobRecord {
    fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            key: self.key,
            job_type: self.definition.job_type.clone(),
            state: self.state,
            retries: self.retries,
            variables: self.definition.variables.clone(),
            worker: self.worker.clone(),
            error_code: self.error_code.clone(),
            error_message: self.error_message.clone(),
        }
    }

    fn lease_expired(&self, now: Instant) -> bool {
        self.state == JobState::Activated && self.lease_expires_at.is_some_and(|at| at <= now)
    }

    fn to_activated(&self, options: &WorkerOptions, deadline: DateTime<Utc>) -> ActivatedJob {
        let variables = select_variables(&self.definition.variables, &options.fetch_variables);
        let mut job = ActivatedJob::new(self.key, self.definition.job_type.clone(), variables)
            .with_process(
                self.definition.process_instance_key,
                self.definition.bpmn_process_id.clone(),
                self.definition.element_id.clone(),
            )
            .with_retries(self.retries)
            .with_lease(options.name.clone(), deadline);
        for (key, value) in &self.definition.custom_headers {
            job = job.with_header(key.clone(), value.clone());
        }
        job
    }

    fn ensure_activated(&self) -> Result<(), EngineError> {
        if self.state == JobState::Activated {
            Ok(())
        } else {
            Err(EngineError::JobNotActivated(self.key))
        }
    }
}

/// Keep only `names` when the worker restricts the fetched variables.
fn select_variables(variables: &serde_json::Value, names: &[String]) -> serde_json::Value {
    if names.is_empty() {
        return variables.clone();
    }
    match variables {
        serde_json::Value::Object(map) => serde_json::Value::Object(
            map.iter()
                .filter(|(key, _)| names.iter().any(|name| name == *key))
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn merge_variables(target: &mut serde_json::Value, update: serde_json::Value) {
    match (target, update) {
        (serde_json::Value::Object(target), serde_json::Value::Object(update)) => {
            target.extend(update);
        }
        (_, serde_json::Value::Null) => {}
        (target, update) => *target = update,
    }
}

struct EngineState {
    jobs: BTreeMap<JobKey, JobRecord>,
    next_key: i64,
}

impl EngineState {
    fn allocate_key(&mut self) -> JobKey {
        let key = JobKey::new(self.next_key);
        self.next_key += 1;
        key
    }

    fn record_mut(&mut self, key: JobKey) -> Result<&mut JobRecord, EngineError> {
        self.jobs.get_mut(&key).ok_or(EngineError::JobNotFound(key))
    }
}

struct Shared {
    state: Mutex<EngineState>,
    notify: Notify,
}

impl Shared {
    /// Activate up to `limit` jobs of `job_type`, reclaiming expired leases first.
    async fn activate(
        &self,
        job_type: &JobType,
        options: &WorkerOptions,
        limit: usize,
    ) -> Vec<ActivatedJob> {
        if limit == 0 {
            return Vec::new();
        }
        let now = Instant::now();
        let lease = options.timeout();
        let deadline = lease_deadline(lease);

        let mut state = self.state.lock().await;
        let mut activated = Vec::new();
        for record in state.jobs.values_mut() {
            if activated.len() >= limit {
                break;
            }
            if record.definition.job_type != *job_type {
                continue;
            }
            if record.lease_expired(now) {
                debug!(job_key = %record.key, job_type = %job_type, "job lease expired");
                record.state = JobState::Activatable;
            }
            if record.state != JobState::Activatable {
                continue;
            }
            record.state = JobState::Activated;
            record.worker = Some(options.name.clone());
            record.lease_expires_at = Some(now + lease);
            activated.push(record.to_activated(options, deadline));
        }
        activated
    }

    async fn complete(&self, key: JobKey, variables: serde_json::Value) -> Result<(), EngineError> {
        {
            let mut state = self.state.lock().await;
            let record = state.record_mut(key)?;
            record.ensure_activated()?;
            merge_variables(&mut record.definition.variables, variables);
            record.state = JobState::Completed;
            record.lease_expires_at = None;
        }
        debug!(job_key = %key, "job completed");
        self.notify.notify_waiters();
        Ok(())
    }

    async fn fail(&self, key: JobKey, retries: u32, message: String) -> Result<(), EngineError> {
        let next = {
            let mut state = self.state.lock().await;
            let record = state.record_mut(key)?;
            record.ensure_activated()?;
            record.retries = retries;
            record.error_message = Some(message);
            record.lease_expires_at = None;
            record.state = if retries > 0 {
                JobState::Activatable
            } else {
                JobState::Failed
            };
            record.state
        };
        if next == JobState::Failed {
            warn!(job_key = %key, "job failed with no retries left");
        } else {
            debug!(job_key = %key, retries, "job failed, will be retried");
        }
        self.notify.notify_waiters();
        Ok(())
    }

    async fn throw_error(
        &self,
        key: JobKey,
        error_code: String,
        message: String,
    ) -> Result<(), EngineError> {
        {
            let mut state = self.state.lock().await;
            let record = state.record_mut(key)?;
            record.ensure_activated()?;
            record.error_code = Some(error_code);
            record.error_message = Some(message);
            record.state = JobState::ErrorThrown;
            record.lease_expires_at = None;
        }
        debug!(job_key = %key, "job error thrown");
        self.notify.notify_waiters();
        Ok(())
    }
}

fn lease_deadline(lease: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(lease)
        .ok()
        .and_then(|lease| Utc::now().checked_add_signed(lease))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// In-process engine: holds jobs and runs one poll loop per opened worker.
///
/// # 使用例
/// ```ignore
/// let engine = Arc::new(InMemoryEngine::new());
/// let key = engine.create_job(NewJob::new(JobType::parse("say-hello")?)).await;
/// engine.wait_for_state(key, JobState::Completed, Duration::from_secs(1)).await?;
/// ```
pub struct InMemoryEngine {
    shared: Arc<Shared>,
}

impl InMemoryEngine {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(EngineState {
                    jobs: BTreeMap::new(),
                    next_key: 1,
                }),
                notify: Notify::new(),
            }),
        }
    }

    /// Enqueue an activatable job.
    pub async fn create_job(&self, job: NewJob) -> JobKey {
        let key = {
            let mut state = self.shared.state.lock().await;
            let key = state.allocate_key();
            let retries = job.retries;
            state.jobs.insert(
                key,
                JobRecord {
                    key,
                    definition: job,
                    state: JobState::Activatable,
                    retries,
                    worker: None,
                    lease_expires_at: None,
                    error_code: None,
                    error_message: None,
                },
            );
            key
        };
        debug!(job_key = %key, "job created");
        self.shared.notify.notify_waiters();
        key
    }

    pub async fn job_state(&self, key: JobKey) -> Option<JobState> {
        self.shared
            .state
            .lock()
            .await
            .jobs
            .get(&key)
            .map(|record| record.state)
    }

    pub async fn job(&self, key: JobKey) -> Option<JobSnapshot> {
        self.shared
            .state
            .lock()
            .await
            .jobs
            .get(&key)
            .map(JobRecord::snapshot)
    }

    /// Wait until job `key` is in `expected`.
    ///
    /// Returns `Ok(false)` when `timeout` passes first, or when the job ends
    /// in a different terminal state.
    pub async fn wait_for_state(
        &self,
        key: JobKey,
        expected: JobState,
        timeout: Duration,
    ) -> Result<bool, EngineError> {
        let deadline = Instant::now() + timeout;
        loop {
            let notified = self.shared.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match self.job_state(key).await {
                None => return Err(EngineError::JobNotFound(key)),
                Some(state) if state == expected => return Ok(true),
                Some(state) if state.is_terminal() => return Ok(false),
                Some(_) => {}
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(false);
            }
        }
    }

    /// A job client bound to this engine.
    pub fn job_client(&self) -> JobClientRef {
        Arc::new(InMemoryJobClient {
            shared: Arc::clone(&self.shared),
        })
    }
}

impl Default for InMemoryEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EngineClient for InMemoryEngine {
    async fn open_worker(
        &self,
        subscription: Subscription,
    ) -> Result<Arc<dyn WorkerHandle>, EngineError> {
        let Subscription {
            job_type,
            options,
            handler,
        } = subscription;
        let id = WorkerId::generate();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let poll = PollLoop {
            worker_id: id,
            job_type: job_type.clone(),
            options,
            handler,
            shared: Arc::clone(&self.shared),
            client: self.job_client(),
        };
        let join = tokio::spawn(poll.run(shutdown_rx));
        debug!(worker_id = %id, job_type = %job_type, "in-memory worker opened");

        Ok(Arc::new(InMemoryWorkerHandle {
            id,
            job_type,
            shutdown_tx,
            join: Mutex::new(Some(join)),
            closed: AtomicBool::new(false),
        }))
    }
}

#[async_trait]
impl JobClient for InMemoryEngine {
    async fn complete(&self, job_key: JobKey, variables: serde_json::Value) -> Result<(), EngineError> {
        self.shared.complete(job_key, variables).await
    }

    async fn fail(&self, job_key: JobKey, retries: u32, message: String) -> Result<(), EngineError> {
        self.shared.fail(job_key, retries, message).await
    }

    async fn throw_error(
        &self,
        job_key: JobKey,
        error_code: String,
        message: String,
    ) -> Result<(), EngineError> {
        self.shared.throw_error(job_key, error_code, message).await
    }
}

/// Job client handed to handlers invoked by the in-memory poll loops.
pub struct InMemoryJobClient {
    shared: Arc<Shared>,
}

#[async_trait]
impl JobClient for InMemoryJobClient {
    async fn complete(&self, job_key: JobKey, variables: serde_json::Value) -> Result<(), EngineError> {
        self.shared.complete(job_key, variables).await
    }

    async fn fail(&self, job_key: JobKey, retries: u32, message: String) -> Result<(), EngineError> {
        self.shared.fail(job_key, retries, message).await
    }

    async fn throw_error(
        &self,
        job_key: JobKey,
        error_code: String,
        message: String,
    ) -> Result<(), EngineError> {
        self.shared.throw_error(job_key, error_code, message).await
    }
}

struct PollLoop {
    worker_id: WorkerId,
    job_type: JobType,
    options: WorkerOptions,
    handler: Arc<dyn JobHandler>,
    shared: Arc<Shared>,
    client: JobClientRef,
}

impl PollLoop {
    async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        let max_active = usize::try_from(self.options.max_jobs_active).unwrap_or(usize::MAX);
        let mut in_flight = JoinSet::new();

        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            // 起こされ損ねないよう、activate の前に notified を登録しておく
            let notified = self.shared.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let capacity = max_active.saturating_sub(in_flight.len());
            for job in self.shared.activate(&self.job_type, &self.options, capacity).await {
                debug!(worker_id = %self.worker_id, job_key = %job.key(), "job activated");
                in_flight.spawn(invoke(
                    Arc::clone(&self.handler),
                    Arc::clone(&self.client),
                    job,
                ));
            }

            tokio::select! {
                changed = shutdown_rx.changed() => {
                    // handle dropped without close
                    if changed.is_err() {
                        break;
                    }
                }
                _ = &mut notified => {}
                _ = tokio::time::sleep(self.options.poll_interval()) => {}
                Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                    if let Err(err) = joined {
                        warn!(worker_id = %self.worker_id, error = %err, "job handler task aborted");
                    }
                }
            }
        }

        // 新規 activate は止め、実行中の handler は最後まで走らせる
        while let Some(joined) = in_flight.join_next().await {
            if let Err(err) = joined {
                warn!(worker_id = %self.worker_id, error = %err, "job handler task aborted");
            }
        }
        debug!(worker_id = %self.worker_id, job_type = %self.job_type, "in-memory worker stopped");
    }
}

/// Run one handler; a handler error fails the job with one retry fewer.
async fn invoke(handler: Arc<dyn JobHandler>, client: JobClientRef, job: ActivatedJob) {
    let key = job.key();
    let retries = job.retries().saturating_sub(1);
    if let Err(err) = handler.handle(Arc::clone(&client), job).await {
        warn!(job_key = %key, retries, error = %err, "job handler failed");
        if let Err(fail_err) = client.fail(key, retries, err.message().to_string()).await {
            warn!(job_key = %key, error = %fail_err, "could not fail job");
        }
    }
}

/// Handle for one in-memory poll loop.
pub struct InMemoryWorkerHandle {
    id: WorkerId,
    job_type: JobType,
    shutdown_tx: watch::Sender<bool>,
    join: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

#[async_trait]
impl WorkerHandle for InMemoryWorkerHandle {
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
        let mut join = self.join.lock().await;
        let Some(handle) = join.as_mut() else {
            return Ok(());
        };
        // receivers may already be gone if the loop ended on its own
        let _ = self.shutdown_tx.send(true);
        // the join handle stays in place until the loop has ended, so a close
        // abandoned at a deadline can be retried
        let result = handle.await.map_err(|err| EngineError::CloseFailed {
            worker: self.id,
            reason: err.to_string(),
        });
        *join = None;
        self.closed.store(true, Ordering::SeqCst);
        result
    }
}
