//! Domain model (job types, activated jobs, identifiers, errors).

pub mod errors;
pub mod ids;
pub mod job;
pub mod job_type;

pub use self::errors::{EngineError, HandlerError, RegistryError};
pub use self::ids::{JobKey, WorkerId};
pub use self::job::ActivatedJob;
pub use self::job_type::{InvalidJobType, JobType};
