//! Impls - ports の実装（開発用・テスト用）
//!
//! # 含まれる実装
//! - **InMemoryEngine**: プロセス内で job を保持し、worker ごとに poll loop を回す engine
//!
//! 本番用の engine client は別クレートで `EngineClient` / `JobClient` を実装する。

pub mod inmem_engine;

// 主要な型を再エクスポート
pub use self::inmem_engine::{
    InMemoryEngine, InMemoryJobClient, InMemoryWorkerHandle, JobSnapshot, JobState, NewJob,
};
