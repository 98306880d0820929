//! i2ap Server Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! HTTP services that move data into a SQL data mart and track every run as
//! a job whose state lives in an object store.
//!
//! # Overview
//!
//! - **Sync**: mirror Salesforce objects into the mart, in full or incrementally
//! - **DbToDb**: run a parameterised SQL template and load the result
//! - **FileToDb**: load a staged CSV (optionally gzipped) and archive it
//! - **Replicate**: copy a table between datasets or projects
//! - **Job state**: one JSON record per job, with parent/child aggregation
//!
//! # Architecture
//!
//! Requests are handled by feature slices (`features/`). Each one validates
//! its command, creates an INPROGRESS job record, hands the work to
//! [`state::JobRunner`] and answers `202 Accepted` straight away. Clients
//! poll `GET /{Service}/{job-id}` until the job is COMPLETE or ERROR.
//!
//! The flows in [`etl`] and [`salesforce`] work against two seams:
//!
//! - [`storage::ObjectStore`]: S3-compatible buckets, FTP, local disk or memory
//! - [`warehouse::Warehouse`]: Postgres, or an in-memory mart for tests
//!
//! # Example
//!
//! ```no_run
//! use i2ap_server::config::Config;
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = Config::load()?;
//!     println!("listening on {}:{}", config.server.host, config.server.port);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod etl;
pub mod events;
pub mod features;
pub mod middleware;
pub mod salesforce;
pub mod state;
pub mod storage;
pub mod warehouse;

pub use config::Config;
pub use error::AppError;
