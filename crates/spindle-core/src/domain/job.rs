//! Activated job payload handed to job handlers.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::ids::JobKey;
use super::job_type::JobType;

/// A job that the engine activated for one worker.
///
/// The worker holds a lease on the job until `deadline`; after that the
/// engine may hand it to another worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivatedJob {
    key: JobKey,
    job_type: JobType,
    process_instance_key: i64,
    bpmn_process_id: String,
    element_id: String,
    retries: u32,
    deadline: DateTime<Utc>,
    worker: String,
    #[serde(default)]
    variables: serde_json::Value,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    custom_headers: HashMap<String, String>,
}

impl ActivatedJob {
    pub fn new(key: JobKey, job_type: JobType, variables: serde_json::Value) -> Self {
        Self {
            key,
            job_type,
            process_instance_key: 0,
            bpmn_process_id: String::new(),
            element_id: String::new(),
            retries: 3,
            deadline: Utc::now(),
            worker: String::new(),
            variables,
            custom_headers: HashMap::new(),
        }
    }

    pub fn with_process(
        mut self,
        process_instance_key: i64,
        bpmn_process_id: impl Into<String>,
        element_id: impl Into<String>,
    ) -> Self {
        self.process_instance_key = process_instance_key;
        self.bpmn_process_id = bpmn_process_id.into();
        self.element_id = element_id.into();
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_lease(mut self, worker: impl Into<String>, deadline: DateTime<Utc>) -> Self {
        self.worker = worker.into();
        self.deadline = deadline;
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.custom_headers.insert(key.into(), value.into());
        self
    }

    pub fn key(&self) -> JobKey {
        self.key
    }

    pub fn job_type(&self) -> &JobType {
        &self.job_type
    }

    pub fn process_instance_key(&self) -> i64 {
        self.process_instance_key
    }

    pub fn bpmn_process_id(&self) -> &str {
        &self.bpmn_process_id
    }

    pub fn element_id(&self) -> &str {
        &self.element_id
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    pub fn deadline(&self) -> DateTime<Utc> {
        self.deadline
    }

    pub fn worker(&self) -> &str {
        &self.worker
    }

    pub fn variables(&self) -> &serde_json::Value {
        &self.variables
    }

    /// Decode the job variables into a typed struct.
    pub fn variables_as<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.variables.clone())
    }

    pub fn custom_headers(&self) -> &HashMap<String, String> {
        &self.custom_headers
    }
}
