//! Ports - 外部 engine client への抽象化レイヤー
//!
//! 本番の engine client は別クレートで実装し、この trait を満たす。
//! 開発・テスト用には `impls::InMemoryEngine` がある。

pub mod engine;
pub mod job_client;

pub use self::engine::{EngineClient, Subscription, WorkerHandle};
pub use self::job_client::{JobClient, JobClientRef};
