use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::{Context, bail};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{info, warn};

use spindle_core::app::AppBuilder;
use spindle_core::config::RegistryConfig;
use spindle_core::domain::{ActivatedJob, HandlerError, JobType};
use spindle_core::impls::{InMemoryEngine, JobState, NewJob};
use spindle_core::ports::JobClientRef;
use spindle_core::typed::{Component, HandlerDescriptor, JobHandler};

const JOB_WAIT: Duration = Duration::from_secs(5);

#[derive(Debug, Deserialize)]
struct GreetingVars {
    name: String,
}

/// Component owning the greeting handlers.
#[derive(Default)]
struct Greeter {
    greeted: AtomicUsize,
}

impl Greeter {
    async fn say_hello(
        self: Arc<Self>,
        client: JobClientRef,
        job: ActivatedJob,
    ) -> Result<(), HandlerError> {
        let vars: GreetingVars = job.variables_as()?;
        let count = self.greeted.fetch_add(1, Ordering::Relaxed) + 1;
        info!(job_key = %job.key(), count, "Hello, {}!", vars.name);
        client
            .complete(
                job.key(),
                serde_json::json!({ "greeting": format!("Hello, {}!", vars.name) }),
            )
            .await?;
        Ok(())
    }

    // wrong shape: skipped at startup with a warning
    async fn greet_by_name(
        self: Arc<Self>,
        _client: JobClientRef,
        name: String,
    ) -> Result<(), HandlerError> {
        info!("Hello, {name}!");
        Ok(())
    }
}

impl Component for Greeter {
    fn handlers(self: Arc<Self>) -> Vec<HandlerDescriptor> {
        vec![
            HandlerDescriptor::method(&self, "say_hello", Greeter::say_hello)
                .job_type("say-hello")
                .worker_name("greeter"),
            HandlerDescriptor::method(&self, "greet_by_name", Greeter::greet_by_name)
                .job_type("greet-by-name"),
        ]
    }
}

struct Farewell;

#[async_trait]
impl JobHandler for Farewell {
    async fn handle(&self, client: JobClientRef, job: ActivatedJob) -> Result<(), HandlerError> {
        let vars: GreetingVars = job.variables_as()?;
        info!(job_key = %job.key(), "Goodbye, {}!", vars.name);
        client
            .complete(
                job.key(),
                serde_json::json!({ "farewell": format!("Goodbye, {}!", vars.name) }),
            )
            .await?;
        Ok(())
    }
}

/// Settings for the demo binary.
///
/// Everything `RegistryConfig::from_env` reads, plus:
/// - SPINDLE_DEMO_WAIT (`1`/`true`): wait for ctrl-c before shutting down
struct DemoConfig {
    registry: RegistryConfig,
    wait_for_signal: bool,
}

impl DemoConfig {
    fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let registry = RegistryConfig::from_lookup(&lookup).context("loading configuration")?;
        let wait_for_signal = match lookup("SPINDLE_DEMO_WAIT").as_deref().map(str::trim) {
            None | Some("") | Some("0") | Some("false") => false,
            Some("1") | Some("true") => true,
            Some(other) => bail!("invalid value '{other}' for SPINDLE_DEMO_WAIT: expected 1 or 0"),
        };
        Ok(Self {
            registry,
            wait_for_signal,
        })
    }
}

async fn run_job(engine: &InMemoryEngine, job_type: &str, name: &str) -> anyhow::Result<()> {
    let job_type = JobType::parse(job_type)?;
    let key = engine
        .create_job(NewJob::new(job_type.clone()).variables(serde_json::json!({ "name": name })))
        .await;
    info!(job_key = %key, job_type = %job_type, "job created");

    let completed = engine
        .wait_for_state(key, JobState::Completed, JOB_WAIT)
        .await
        .with_context(|| format!("waiting for job {key}"))?;
    if !completed {
        bail!("job {key} ({job_type}) did not complete within {JOB_WAIT:?}");
    }

    if let Some(job) = engine.job(key).await {
        info!(job_key = %key, variables = %job.variables, "job completed");
    }
    Ok(())
}

async fn wait_for_ctrl_c() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to listen for ctrl-c");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "spindle_core=info,spindle_cli=info".into()),
        )
        .init();

    let config = DemoConfig::from_env()?;
    let engine = Arc::new(InMemoryEngine::new());

    let app = AppBuilder::new(engine.clone())
        .config(config.registry)
        .component(Arc::new(Greeter::default()))
        .handler(HandlerDescriptor::handler("Farewell", "handle", Farewell).job_type("say-goodbye"))
        .expect_job_types(&["say-hello", "say-goodbye"])
        .build()?;
    let running = app.start().await?;

    for skipped in &running.report().skipped {
        info!(
            component = skipped.component,
            method = skipped.method,
            reason = %skipped.reason,
            "handler not registered"
        );
    }

    run_job(&engine, "say-hello", "spindle").await?;
    run_job(&engine, "say-goodbye", "spindle").await?;

    let report = if config.wait_for_signal {
        info!("waiting for ctrl-c");
        running.run_until(wait_for_ctrl_c()).await
    } else {
        running.shutdown().await
    };

    if !report.is_clean() {
        warn!(
            failed = report.failed.len(),
            timed_out = report.timed_out.len(),
            "some job workers did not close cleanly"
        );
    }
    Ok(())
}
