//! Request parameter validation

use std::str::FromStr;
use thiserror::Error;

use crate::warehouse::Disposition;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParamError {
    #[error("{0} is required")]
    Required(&'static str),

    #[error("Invalid disposition: {0}")]
    InvalidDisposition(String),

    #[error("Invalid job id: {0}")]
    InvalidJobId(String),
}

/// The trimmed value of a required parameter
pub fn require_param(value: Option<&str>, name: &'static str) -> Result<String, ParamError> {
    match value.map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v.to_string()),
        _ => Err(ParamError::Required(name)),
    }
}

/// Parse an optional disposition, falling back to `default`
pub fn parse_disposition(
    value: Option<&str>,
    default: Disposition,
) -> Result<Disposition, ParamError> {
    match value.map(str::trim) {
        None | Some("") => Ok(default),
        Some(v) => Disposition::from_str(v).map_err(|_| ParamError::InvalidDisposition(v.to_string())),
    }
}

/// Job ids become object keys, so they must stay a single path segment
pub fn validate_job_id(job_id: &str) -> Result<(), ParamError> {
    let id = job_id.trim();
    if id.is_empty() || id.contains('/') || id.contains('\\') || id.contains("..") {
        return Err(ParamError::InvalidJobId(job_id.to_string()));
    }
    Ok(())
}
