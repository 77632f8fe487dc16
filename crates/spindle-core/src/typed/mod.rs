//! Typed - handler の宣言と型消去
//!
//! - **表層**: `HandlerDescriptor::method` / `from_fn` / `handler` で handler を宣言
//! - **内部**: `JobHandler` (object-safe) を engine client に渡す
//!
//! 引数の形は型 (`HandlerParam`) から申告され、registry が検証する。

pub mod descriptor;
pub mod handler;

pub use self::descriptor::{Component, HandlerDescriptor, SkipReason};
pub use self::handler::{FnHandler, HandlerParam, JobHandler, ParamKind};
