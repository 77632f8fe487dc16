//! Identifiers used by the registry and the engine port.
//!
//! - `JobKey`: engine が採番する job のキー（i64）
//! - `WorkerId`: open された worker subscription ごとの ULID

use serde::{Deserialize, Serialize};
use std::fmt;
use ulid::Ulid;

/// Key of a single job as assigned by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobKey(i64);

impl JobKey {
    pub fn new(value: i64) -> Self {
        Self(value)
    }
}

impl From<i64> for JobKey {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl fmt::Display for JobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Identifier of one opened worker subscription.
///
/// ULID なので生成順にソートでき、ログ上で open の順序を追える。
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorkerId(Ulid);

impl WorkerId {
    pub fn generate() -> Self {
        Self(Ulid::new())
    }

    pub fn from_ulid(ulid: Ulid) -> Self {
        Self(ulid)
    }

    pub fn as_ulid(&self) -> Ulid {
        self.0
    }
}

impl From<Ulid> for WorkerId {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid)
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "worker-{}", self.0)
    }
}
