//! EngineClient port - 外部 workflow engine の client
//!
//! registry が使う外部呼び出しはこの 2 つだけ:
//! - `EngineClient::open_worker`: job type ごとに subscription を開く
//! - `WorkerHandle::close`: subscription を閉じる
//!
//! polling / lease / retry などの中身は engine client 側の責務。

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::WorkerOptions;
use crate::domain::{EngineError, JobType, WorkerId};
use crate::typed::JobHandler;

/// Everything the engine client needs to open one worker.
pub struct Subscription {
    pub job_type: JobType,
    pub options: WorkerOptions,
    pub handler: Arc<dyn JobHandler>,
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("job_type", &self.job_type)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

/// A live worker subscription owned by the engine client.
///
/// `close` must tolerate being called more than once.
#[async_trait]
pub trait WorkerHandle: Send + Sync {
    fn id(&self) -> WorkerId;

    fn job_type(&self) -> &JobType;

    fn is_closed(&self) -> bool;

    async fn close(&self) -> Result<(), EngineError>;
}

/// Client of the workflow engine.
#[async_trait]
pub trait EngineClient: Send + Sync {
    async fn open_worker(
        &self,
        subscription: Subscription,
    ) -> Result<Arc<dyn WorkerHandle>, EngineError>;
}
