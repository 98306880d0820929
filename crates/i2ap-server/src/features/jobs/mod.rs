//! Job status feature
//!
//! Every service answers `GET /{Service}/{job-id}` from the job's state
//! record.

pub mod queries;
pub mod routes;

pub use routes::jobs_routes;
