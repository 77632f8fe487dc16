//! JobType - worker が subscribe する job の種類
//!
//! Engine 側の job type は任意の文字列だが、空文字や空白入りは
//! 設定ミスなので parse 時点で弾く。

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A validated job type name, e.g. `say-hello`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct JobType(String);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid job type '{value}': {reason}")]
pub struct InvalidJobType {
    pub value: String,
    pub reason: &'static str,
}

impl JobType {
    pub fn parse(value: impl Into<String>) -> Result<Self, InvalidJobType> {
        let value = value.into();
        if value.is_empty() {
            return Err(InvalidJobType {
                value,
                reason: "must not be empty",
            });
        }
        if value.chars().any(char::is_whitespace) {
            return Err(InvalidJobType {
                value,
                reason: "must not contain whitespace",
            });
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for JobType {
    type Err = InvalidJobType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for JobType {
    type Error = InvalidJobType;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<JobType> for String {
    fn from(job_type: JobType) -> Self {
        job_type.0
    }
}

impl AsRef<str> for JobType {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}
