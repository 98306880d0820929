//! i2ap Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Types shared between the i2ap server and the `i2ap` command-line client.
//!
//! # Overview
//!
//! - **Error Handling**: [`I2apError`] and the [`Result`] alias
//! - **Job Status**: the [`JobStatus`] lifecycle and the JSON bodies the status
//!   endpoints return
//! - **Logging**: process-wide `tracing` bootstrap
//!
//! # Example
//!
//! ```no_run
//! use i2ap_common::{JobStatus, Result};
//!
//! fn is_done(raw: &str) -> Result<bool> {
//!     let status: JobStatus = raw.parse()?;
//!     Ok(status.is_terminal())
//! }
//! ```

pub mod error;
pub mod logging;
pub mod status;

// Re-export commonly used types
pub use error::{I2apError, Result};
pub use status::{ChildStatus, JobAcceptedResponse, JobStatus, JobStatusResponse};
