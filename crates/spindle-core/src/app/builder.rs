//! AppBuilder - handler の宣言と registry のワイヤリング
//!
//! # フロー
//! - `build()`: descriptor を集めて「期待する job type ⊆ 宣言済み job type」を検証
//! - `App::start()`: registry に全 descriptor を登録（失敗は起動エラー）
//! - `RunningApp::shutdown()`: 設定された期限内で全 worker を close

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;

use tracing::info;

use crate::config::{ConfigError, RegistryConfig};
use crate::domain::RegistryError;
use crate::ports::EngineClient;
use crate::typed::{Component, HandlerDescriptor};

use super::registry::{RegistrationReport, ShutdownReport, WorkerRegistry};

/// Builds an `App` from components and loose handler descriptors.
///
/// # 使用例
/// ```ignore
/// let app = AppBuilder::new(engine)
///     .config(RegistryConfig::from_env()?)
///     .component(Arc::new(Greeter::default()))
///     .expect_job_types(&["say-hello", "say-goodbye"])
///     .build()?;
/// let running = app.start().await?;
/// running.run_until(tokio::signal::ctrl_c()).await;
/// ```
pub struct AppBuilder {
    engine: Arc<dyn EngineClient>,
    config: RegistryConfig,
    components: Vec<Arc<dyn Component>>,
    descriptors: Vec<HandlerDescriptor>,
    expected_job_types: Option<Vec<String>>,
}

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("Missing job types: {0:?}. These job types were expected but no handler declares them.")]
    MissingJobTypes(Vec<String>),

    #[error(transparent)]
    InvalidConfig(#[from] ConfigError),
}

impl AppBuilder {
    pub fn new(engine: Arc<dyn EngineClient>) -> Self {
        Self {
            engine,
            config: RegistryConfig::default(),
            components: Vec::new(),
            descriptors: Vec::new(),
            expected_job_types: None,
        }
    }

    pub fn config(mut self, config: RegistryConfig) -> Self {
        self.config = config;
        self
    }

    pub fn component<C: Component>(mut self, component: Arc<C>) -> Self {
        self.components.push(component);
        self
    }

    /// Add a handler that does not belong to a component.
    pub fn handler(mut self, descriptor: HandlerDescriptor) -> Self {
        self.descriptors.push(descriptor);
        self
    }

    pub fn expect_job_types(mut self, job_types: &[&str]) -> Self {
        self.expected_job_types = Some(job_types.iter().map(|t| t.to_string()).collect());
        self
    }

    pub fn build(self) -> Result<App, BuildError> {
        self.config.validate()?;

        let mut descriptors: Vec<HandlerDescriptor> = self
            .components
            .into_iter()
            .flat_map(|component| component.handlers())
            .collect();
        descriptors.extend(self.descriptors);

        if let Some(expected) = &self.expected_job_types {
            let declared: BTreeSet<&str> = descriptors
                .iter()
                .filter_map(HandlerDescriptor::declared_job_type)
                .collect();
            let missing: Vec<String> = expected
                .iter()
                .filter(|job_type| !declared.contains(job_type.as_str()))
                .cloned()
                .collect();
            if !missing.is_empty() {
                return Err(BuildError::MissingJobTypes(missing));
            }
        }

        Ok(App {
            registry: Arc::new(WorkerRegistry::new(self.engine, self.config)),
            descriptors,
        })
    }
}

/// A built application that has not subscribed anything yet.
pub struct App {
    registry: Arc<WorkerRegistry>,
    descriptors: Vec<HandlerDescriptor>,
}

impl App {
    pub fn descriptors(&self) -> &[HandlerDescriptor] {
        &self.descriptors
    }

    /// Subscribe every declared handler.
    pub async fn start(self) -> Result<RunningApp, RegistryError> {
        let report = self.registry.register_descriptors(self.descriptors).await?;
        info!(
            registered = report.registered.len(),
            skipped = report.skipped.len(),
            "job workers started"
        );
        Ok(RunningApp {
            registry: self.registry,
            report,
        })
    }
}

pub struct RunningApp {
    registry: Arc<WorkerRegistry>,
    report: RegistrationReport,
}

impl RunningApp {
    pub fn registry(&self) -> &Arc<WorkerRegistry> {
        &self.registry
    }

    pub fn report(&self) -> &RegistrationReport {
        &self.report
    }

    pub async fn shutdown(self) -> ShutdownReport {
        self.registry.close().await
    }

    /// Wait for `signal`, then shut down.
    pub async fn run_until<F>(self, signal: F) -> ShutdownReport
    where
        F: Future,
    {
        signal.await;
        info!("shutdown requested");
        self.shutdown().await
    }
}
