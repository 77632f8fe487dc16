//! WorkerRegistry - handler の登録と worker handle のライフサイクル管理
//!
//! # フロー
//! 1. descriptor を検証する（形・job type）。検証は副作用なし
//! 2. 有効な descriptor ごとに `EngineClient::open_worker` を並行に呼ぶ
//! 3. 1 件でも open に失敗したら同じバッチで開いた worker を閉じてエラー
//! 4. 返ってきた handle を handle set に追加する
//!
//! # 状態
//! - `Open`: 登録を受け付ける
//! - `Closed`: close 開始後。以降の登録は `RegistryError::Closed`
//!
//! Open → Closed の一方向のみ。

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::config::{DiscoveryPolicy, RegistryConfig};
use crate::domain::{JobType, RegistryError, WorkerId};
use crate::ports::{EngineClient, Subscription, WorkerHandle};
use crate::typed::{Component, HandlerDescriptor, SkipReason};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryState {
    Open,
    Closed,
}

/// One successfully opened subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub worker_id: WorkerId,
    pub job_type: JobType,
    pub component: &'static str,
    pub method: &'static str,
}

/// A descriptor that was not registered under `DiscoveryPolicy::WarnAndSkip`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedHandler {
    pub component: &'static str,
    pub method: &'static str,
    pub reason: SkipReason,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistrationReport {
    pub registered: Vec<Registration>,
    pub skipped: Vec<SkippedHandler>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseFailure {
    /// `None` when the close task itself panicked.
    pub worker_id: Option<WorkerId>,
    pub reason: String,
}

/// Outcome of closing a set of worker handles.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    pub closed: usize,
    pub failed: Vec<CloseFailure>,
    pub timed_out: Vec<WorkerId>,
}

impl ShutdownReport {
    pub fn attempted(&self) -> usize {
        self.closed + self.failed.len() + self.timed_out.len()
    }

    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && self.timed_out.is_empty()
    }
}

struct Candidate {
    component: &'static str,
    method: &'static str,
    subscription: Subscription,
}

struct HandleSet {
    state: RegistryState,
    handles: Vec<Arc<dyn WorkerHandle>>,
}

/// Registry of open worker subscriptions.
pub struct WorkerRegistry {
    engine: Arc<dyn EngineClient>,
    config: RegistryConfig,
    inner: Mutex<HandleSet>,
}

impl WorkerRegistry {
    pub fn new(engine: Arc<dyn EngineClient>, config: RegistryConfig) -> Self {
        Self {
            engine,
            config,
            inner: Mutex::new(HandleSet {
                state: RegistryState::Open,
                handles: Vec::new(),
            }),
        }
    }

    /// Register every handler declared by `components`.
    pub async fn register_all<I>(&self, components: I) -> Result<RegistrationReport, RegistryError>
    where
        I: IntoIterator<Item = Arc<dyn Component>>,
    {
        let descriptors: Vec<HandlerDescriptor> = components
            .into_iter()
            .flat_map(|component| component.handlers())
            .collect();
        self.register_descriptors(descriptors).await
    }

    /// Register a single handler. `Ok(None)` means it was skipped.
    pub async fn register_handler(
        &self,
        descriptor: HandlerDescriptor,
    ) -> Result<Option<Registration>, RegistryError> {
        let report = self.register_descriptors(vec![descriptor]).await?;
        Ok(report.registered.into_iter().next())
    }

    /// Validate `descriptors` and open one subscription per valid one.
    ///
    /// Either every valid descriptor ends up subscribed, or none of this
    /// batch does and the first error is returned.
    pub async fn register_descriptors(
        &self,
        descriptors: Vec<HandlerDescriptor>,
    ) -> Result<RegistrationReport, RegistryError> {
        self.ensure_open().await?;

        let (candidates, skipped) = self.plan(descriptors)?;
        let mut report = RegistrationReport {
            registered: Vec::new(),
            skipped,
        };

        let (opened, failure) = self.open_all(candidates).await;
        if let Some(err) = failure {
            self.roll_back(opened).await;
            return Err(err);
        }

        {
            let mut inner = self.inner.lock().await;
            if inner.state == RegistryState::Closed {
                drop(inner);
                self.roll_back(opened).await;
                return Err(RegistryError::Closed);
            }
            inner
                .handles
                .extend(opened.iter().map(|(_, handle)| Arc::clone(handle)));
        }

        for (registration, _) in opened {
            info!(
                component = registration.component,
                method = registration.method,
                job_type = %registration.job_type,
                worker_id = %registration.worker_id,
                "job worker subscribed"
            );
            report.registered.push(registration);
        }
        Ok(report)
    }

    /// Close every worker using the configured shutdown deadline.
    pub async fn close(&self) -> ShutdownReport {
        self.close_within(self.config.shutdown_timeout()).await
    }

    /// Close every worker, waiting at most `timeout` for the close calls.
    ///
    /// Only the first call closes anything; later calls return an empty report.
    pub async fn close_within(&self, timeout: Duration) -> ShutdownReport {
        let handles = {
            let mut inner = self.inner.lock().await;
            if inner.state == RegistryState::Closed {
                debug!("worker registry already closed");
                return ShutdownReport::default();
            }
            inner.state = RegistryState::Closed;
            inner.handles.clone()
        };

        info!(workers = handles.len(), "closing job workers");
        let report = close_handles(handles, timeout).await;
        info!(
            closed = report.closed,
            failed = report.failed.len(),
            timed_out = report.timed_out.len(),
            "job workers closed"
        );
        report
    }

    pub async fn state(&self) -> RegistryState {
        self.inner.lock().await.state
    }

    pub async fn is_closed(&self) -> bool {
        self.state().await == RegistryState::Closed
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.handles.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Job types of all handles, sorted.
    pub async fn job_types(&self) -> Vec<JobType> {
        let inner = self.inner.lock().await;
        let mut job_types: Vec<JobType> =
            inner.handles.iter().map(|h| h.job_type().clone()).collect();
        job_types.sort();
        job_types
    }

    async fn ensure_open(&self) -> Result<(), RegistryError> {
        match self.state().await {
            RegistryState::Open => Ok(()),
            RegistryState::Closed => Err(RegistryError::Closed),
        }
    }

    fn plan(
        &self,
        descriptors: Vec<HandlerDescriptor>,
    ) -> Result<(Vec<Candidate>, Vec<SkippedHandler>), RegistryError> {
        let mut candidates = Vec::new();
        let mut skipped = Vec::new();

        for descriptor in descriptors {
            let component = descriptor.component();
            let method = descriptor.method_name();
            match descriptor.validate() {
                Ok(job_type) => candidates.push(Candidate {
                    component,
                    method,
                    subscription: Subscription {
                        job_type,
                        options: descriptor.worker_options(&self.config.worker),
                        handler: descriptor.invoker(),
                    },
                }),
                Err(reason) => match self.config.discovery {
                    DiscoveryPolicy::FailFast => {
                        return Err(RegistryError::InvalidHandler {
                            component,
                            method,
                            reason: reason.to_string(),
                        });
                    }
                    DiscoveryPolicy::WarnAndSkip => {
                        warn!(component, method, %reason, "skipping job handler");
                        skipped.push(SkippedHandler {
                            component,
                            method,
                            reason,
                        });
                    }
                },
            }
        }

        Ok((candidates, skipped))
    }

    /// Open all candidates concurrently and wait for every attempt.
    async fn open_all(
        &self,
        candidates: Vec<Candidate>,
    ) -> (Vec<(Registration, Arc<dyn WorkerHandle>)>, Option<RegistryError>) {
        let mut tasks = JoinSet::new();
        for candidate in candidates {
            let engine = Arc::clone(&self.engine);
            tasks.spawn(async move {
                let Candidate {
                    component,
                    method,
                    subscription,
                } = candidate;
                let job_type = subscription.job_type.clone();
                let result = engine.open_worker(subscription).await;
                (component, method, job_type, result)
            });
        }

        let mut opened = Vec::new();
        let mut failure = None;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((component, method, job_type, Ok(handle))) => {
                    let registration = Registration {
                        worker_id: handle.id(),
                        job_type,
                        component,
                        method,
                    };
                    opened.push((registration, handle));
                }
                Ok((component, method, job_type, Err(source))) => {
                    warn!(component, method, job_type = %job_type, error = %source, "job worker subscription failed");
                    if failure.is_none() {
                        failure = Some(RegistryError::Subscription {
                            component,
                            method,
                            job_type,
                            source,
                        });
                    }
                }
                Err(err) => {
                    if failure.is_none() {
                        failure = Some(RegistryError::Aborted(err.to_string()));
                    }
                }
            }
        }
        (opened, failure)
    }

    async fn roll_back(&self, opened: Vec<(Registration, Arc<dyn WorkerHandle>)>) {
        if opened.is_empty() {
            return;
        }
        let handles: Vec<Arc<dyn WorkerHandle>> =
            opened.into_iter().map(|(_, handle)| handle).collect();
        warn!(workers = handles.len(), "closing workers opened by a failed registration");
        close_handles(handles, self.config.shutdown_timeout()).await;
    }
}

/// Close `handles` concurrently; overdue closes are abandoned at the deadline.
async fn close_handles(handles: Vec<Arc<dyn WorkerHandle>>, timeout: Duration) -> ShutdownReport {
    let deadline = tokio::time::Instant::now() + timeout;
    let mut tasks = JoinSet::new();
    for handle in handles {
        tasks.spawn(async move {
            let worker_id = handle.id();
            let job_type = handle.job_type().clone();
            let outcome = tokio::time::timeout_at(deadline, handle.close()).await;
            (worker_id, job_type, outcome)
        });
    }

    let mut report = ShutdownReport::default();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((_, _, Ok(Ok(())))) => report.closed += 1,
            Ok((worker_id, job_type, Ok(Err(err)))) => {
                warn!(worker_id = %worker_id, job_type = %job_type, error = %err, "failed to close job worker");
                report.failed.push(CloseFailure {
                    worker_id: Some(worker_id),
                    reason: err.to_string(),
                });
            }
            Ok((worker_id, job_type, Err(_elapsed))) => {
                warn!(worker_id = %worker_id, job_type = %job_type, "job worker did not close before the shutdown deadline");
                report.timed_out.push(worker_id);
            }
            Err(err) => {
                warn!(error = %err, "job worker close task aborted");
                report.failed.push(CloseFailure {
                    worker_id: None,
                    reason: err.to_string(),
                });
            }
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ActivatedJob, HandlerError, JobKey};
    use crate::ports::JobClientRef;
    use crate::testing::{RecordingEngine, RecordingJobClient};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Greeter {
        greeted: AtomicUsize,
    }

    impl Greeter {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                greeted: AtomicUsize::new(0),
            })
        }

        async fn say_hello(
            self: Arc<Self>,
            client: JobClientRef,
            job: ActivatedJob,
        ) -> Result<(), HandlerError> {
            self.greeted.fetch_add(1, Ordering::SeqCst);
            client.complete(job.key(), serde_json::json!({})).await?;
            Ok(())
        }

        async fn say_goodbye(
            self: Arc<Self>,
            client: JobClientRef,
            job: ActivatedJob,
        ) -> Result<(), HandlerError> {
            client.complete(job.key(), serde_json::json!({})).await?;
            Ok(())
        }

        async fn greet_by_name(
            self: Arc<Self>,
            _client: JobClientRef,
            _name: String,
        ) -> Result<(), HandlerError> {
            Ok(())
        }
    }

    impl Component for Greeter {
        fn handlers(self: Arc<Self>) -> Vec<HandlerDescriptor> {
            vec![
                HandlerDescriptor::method(&self, "say_hello", Greeter::say_hello)
                    .job_type("say-hello"),
                HandlerDescriptor::method(&self, "say_goodbye", Greeter::say_goodbye)
                    .job_type("say-goodbye"),
            ]
        }
    }

    fn registry(engine: &Arc<RecordingEngine>, config: RegistryConfig) -> WorkerRegistry {
        let engine: Arc<dyn EngineClient> = engine.clone();
        WorkerRegistry::new(engine, config)
    }

    fn hello(greeter: &Arc<Greeter>) -> HandlerDescriptor {
        HandlerDescriptor::method(greeter, "say_hello", Greeter::say_hello).job_type("say-hello")
    }

    fn mismatched(greeter: &Arc<Greeter>) -> HandlerDescriptor {
        HandlerDescriptor::method(greeter, "greet_by_name", Greeter::greet_by_name)
            .job_type("say-hello")
    }

    #[tokio::test]
    async fn single_valid_handler_opens_one_subscription() {
        let engine = Arc::new(RecordingEngine::new());
        let registry = registry(&engine, RegistryConfig::default());

        let registration = registry
            .register_handler(hello(&Greeter::new()))
            .await
            .unwrap()
            .expect("say-hello should be registered");

        assert_eq!(registration.job_type.as_str(), "say-hello");
        assert_eq!(registration.method, "say_hello");
        assert_eq!(engine.opened_job_types(), vec!["say-hello".to_string()]);
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn mismatched_signature_is_skipped_without_error() {
        let engine = Arc::new(RecordingEngine::new());
        let registry = registry(&engine, RegistryConfig::default());

        let registration = registry
            .register_handler(mismatched(&Greeter::new()))
            .await
            .unwrap();

        assert!(registration.is_none());
        assert!(engine.opened_job_types().is_empty());
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn skipped_handlers_are_reported() {
        let engine = Arc::new(RecordingEngine::new());
        let registry = registry(&engine, RegistryConfig::default());
        let greeter = Greeter::new();

        let report = registry
            .register_descriptors(vec![
                hello(&greeter),
                mismatched(&greeter),
                HandlerDescriptor::method(&greeter, "say_goodbye", Greeter::say_goodbye),
            ])
            .await
            .unwrap();

        assert_eq!(report.registered.len(), 1);
        assert_eq!(report.skipped.len(), 2);
        assert!(matches!(
            report.skipped[0].reason,
            SkipReason::SignatureMismatch { .. }
        ));
        assert_eq!(report.skipped[1].reason, SkipReason::MissingJobType);
        assert_eq!(report.skipped[1].method, "say_goodbye");
    }

    #[tokio::test]
    async fn fail_fast_rejects_mismatch_before_opening_anything() {
        let engine = Arc::new(RecordingEngine::new());
        let config = RegistryConfig::default().with_discovery(DiscoveryPolicy::FailFast);
        let registry = registry(&engine, config);
        let greeter = Greeter::new();

        let err = registry
            .register_descriptors(vec![hello(&greeter), mismatched(&greeter)])
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            RegistryError::InvalidHandler { method: "greet_by_name", .. }
        ));
        assert!(engine.opened_job_types().is_empty());
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn register_all_opens_one_worker_per_handler() {
        let engine = Arc::new(RecordingEngine::new());
        let registry = registry(&engine, RegistryConfig::default());
        let greeter: Arc<dyn Component> = Greeter::new();

        let report = registry.register_all(vec![greeter]).await.unwrap();

        assert_eq!(report.registered.len(), 2);
        assert_eq!(
            engine.opened_job_types(),
            vec!["say-goodbye".to_string(), "say-hello".to_string()]
        );
        let job_types: Vec<String> = registry
            .job_types()
            .await
            .into_iter()
            .map(String::from)
            .collect();
        assert_eq!(job_types, vec!["say-goodbye", "say-hello"]);
    }

    #[tokio::test]
    async fn many_handlers_yield_exactly_as_many_handles() {
        let engine = Arc::new(RecordingEngine::new());
        let registry = registry(&engine, RegistryConfig::default());
        let greeter = Greeter::new();

        let descriptors: Vec<HandlerDescriptor> = (0..25)
            .map(|i| {
                HandlerDescriptor::method(&greeter, "say_hello", Greeter::say_hello)
                    .job_type(format!("job-{i}"))
            })
            .collect();

        let report = registry.register_descriptors(descriptors).await.unwrap();
        assert_eq!(report.registered.len(), 25);
        assert_eq!(registry.len().await, 25);
        assert_eq!(engine.handles().len(), 25);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_registrations_keep_every_handle() {
        let engine = Arc::new(RecordingEngine::new());
        let registry = Arc::new(registry(&engine, RegistryConfig::default()));
        let greeter = Greeter::new();

        let mut tasks = JoinSet::new();
        for i in 0..20 {
            let registry = Arc::clone(&registry);
            let descriptor = HandlerDescriptor::method(&greeter, "say_hello", Greeter::say_hello)
                .job_type(format!("job-{i:02}"));
            tasks.spawn(async move { registry.register_handler(descriptor).await });
        }
        while let Some(joined) = tasks.join_next().await {
            assert!(joined.unwrap().unwrap().is_some());
        }

        let expected: Vec<String> = (0..20).map(|i| format!("job-{i:02}")).collect();
        let job_types: Vec<String> = registry
            .job_types()
            .await
            .into_iter()
            .map(String::from)
            .collect();
        assert_eq!(registry.len().await, 20);
        assert_eq!(job_types, expected);
        assert_eq!(engine.opened_job_types(), expected);
    }

    #[tokio::test]
    async fn registration_racing_close_closes_its_new_handles() {
        let engine = Arc::new(RecordingEngine::new().slow_open(Duration::from_millis(100)));
        let registry = Arc::new(registry(&engine, RegistryConfig::default()));
        let greeter = Greeter::new();

        let pending = tokio::spawn({
            let registry = Arc::clone(&registry);
            let descriptors = vec![hello(&greeter)];
            async move { registry.register_descriptors(descriptors).await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        // the open is still in flight, so there is nothing to close yet
        let report = registry.close().await;
        assert_eq!(report.attempted(), 0);

        let err = pending.await.unwrap().unwrap_err();
        assert!(matches!(err, RegistryError::Closed));
        assert!(registry.is_empty().await);
        let handles = engine.handles();
        assert_eq!(handles.len(), 1);
        assert!(handles.iter().all(|h| h.is_closed()));
    }

    #[tokio::test]
    async fn subscription_failure_is_fatal_and_rolls_back_the_batch() {
        let engine = Arc::new(RecordingEngine::new().rejecting("say-goodbye"));
        let registry = registry(&engine, RegistryConfig::default());
        let greeter: Arc<dyn Component> = Greeter::new();

        let err = registry.register_all(vec![greeter]).await.unwrap_err();

        assert!(matches!(
            err,
            RegistryError::Subscription { ref job_type, .. } if job_type.as_str() == "say-goodbye"
        ));
        assert!(registry.is_empty().await);
        for handle in engine.handles() {
            assert!(handle.is_closed(), "{} should be rolled back", handle.job_type());
        }
    }

    #[tokio::test]
    async fn adapter_forwards_to_the_bound_component() {
        let engine = Arc::new(RecordingEngine::new());
        let registry = registry(&engine, RegistryConfig::default());
        let greeter = Greeter::new();
        registry.register_handler(hello(&greeter)).await.unwrap();

        let recorder = Arc::new(RecordingJobClient::default());
        let client: JobClientRef = recorder.clone();
        let job = ActivatedJob::new(
            JobKey::new(7),
            JobType::parse("say-hello").unwrap(),
            serde_json::json!({}),
        );
        engine.handles()[0].invoke(client, job).await.unwrap();

        assert_eq!(greeter.greeted.load(Ordering::SeqCst), 1);
        assert_eq!(recorder.completed(), vec![JobKey::new(7)]);
    }

    #[tokio::test]
    async fn closing_closes_every_handle() {
        let engine = Arc::new(RecordingEngine::new());
        let registry = registry(&engine, RegistryConfig::default());
        let greeter: Arc<dyn Component> = Greeter::new();
        registry.register_all(vec![greeter]).await.unwrap();

        let report = registry.close().await;

        assert_eq!(report.closed, 2);
        assert!(report.is_clean());
        assert!(registry.is_closed().await);
        for handle in engine.handles() {
            assert!(handle.is_closed());
            assert_eq!(handle.close_calls(), 1);
        }
        // handles stay in the set after close
        assert_eq!(registry.len().await, 2);
    }

    #[tokio::test]
    async fn one_failing_close_does_not_stop_the_others() {
        let engine = Arc::new(RecordingEngine::new().failing_close("say-hello"));
        let registry = registry(&engine, RegistryConfig::default());
        let greeter = Greeter::new();
        let descriptors = vec![
            hello(&greeter),
            HandlerDescriptor::method(&greeter, "say_goodbye", Greeter::say_goodbye)
                .job_type("say-goodbye"),
            HandlerDescriptor::method(&greeter, "say_goodbye", Greeter::say_goodbye)
                .job_type("say-farewell"),
        ];
        registry.register_descriptors(descriptors).await.unwrap();

        let report = registry.close().await;

        assert_eq!(report.attempted(), 3);
        assert_eq!(report.closed, 2);
        assert_eq!(report.failed.len(), 1);
        assert!(engine.handles().iter().all(|h| h.close_calls() == 1));
    }

    #[tokio::test]
    async fn second_close_is_a_no_op() {
        let engine = Arc::new(RecordingEngine::new());
        let registry = registry(&engine, RegistryConfig::default());
        registry.register_handler(hello(&Greeter::new())).await.unwrap();

        let first = registry.close().await;
        let second = registry.close().await;

        assert_eq!(first.closed, 1);
        assert_eq!(second, ShutdownReport::default());
        assert_eq!(engine.handles()[0].close_calls(), 1);
    }

    #[tokio::test]
    async fn registration_after_close_is_refused() {
        let engine = Arc::new(RecordingEngine::new());
        let registry = registry(&engine, RegistryConfig::default());
        registry.close().await;

        let err = registry
            .register_handler(hello(&Greeter::new()))
            .await
            .unwrap_err();

        assert!(matches!(err, RegistryError::Closed));
        assert!(engine.opened_job_types().is_empty());
    }

    #[tokio::test]
    async fn overdue_close_is_reported_as_timed_out() {
        let engine = Arc::new(RecordingEngine::new().hanging_close("say-hello"));
        let registry = registry(&engine, RegistryConfig::default());
        let greeter: Arc<dyn Component> = Greeter::new();
        registry.register_all(vec![greeter]).await.unwrap();

        let report = registry.close_within(Duration::from_millis(50)).await;

        assert_eq!(report.closed, 1);
        assert_eq!(report.timed_out.len(), 1);
        assert!(!report.is_clean());
    }
}
