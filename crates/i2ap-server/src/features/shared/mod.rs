//! Shared utilities for feature modules
//!
//! - **jobs**: creating tracked jobs and the 202 response body
//! - **validation**: request parameter checks

pub mod jobs;
pub mod validation;

pub use jobs::{accepted, start_job, JobAccepted};
pub use validation::{parse_disposition, require_param, validate_job_id, ParamError};
