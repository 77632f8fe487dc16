//! App - アプリケーション層
//!
//! # 主要コンポーネント
//! - **WorkerRegistry**: handler の検証・subscribe と worker handle の close
//! - **AppBuilder**: component の収集、起動時検証、start/shutdown フック

pub mod builder;
pub mod registry;

// 主要な型を再エクスポート
pub use self::builder::{App, AppBuilder, BuildError, RunningApp};
pub use self::registry::{
    CloseFailure, Registration, RegistrationReport, RegistryState, ShutdownReport, SkippedHandler,
    WorkerRegistry,
};
