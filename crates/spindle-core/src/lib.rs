//! spindle-core
//!
//! Core building blocks for registering job workers against a workflow engine.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, job_type, job, errors）
//! - **config**: registry / worker の設定（env 読み込みと検証）
//! - **ports**: 抽象化レイヤー（EngineClient, WorkerHandle, JobClient）
//! - **typed**: handler の宣言（Component, HandlerDescriptor, JobHandler）
//! - **app**: アプリケーションロジック（WorkerRegistry, AppBuilder）
//! - **impls**: 実装（InMemoryEngine など開発用）

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod ports;
pub mod typed;

#[cfg(test)]
pub(crate) mod testing;
