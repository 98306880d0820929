//! Salesforce sync feature
//!
//! `POST /Sync` mirrors one Salesforce object, or every object in the
//! manifest, into the data mart.

pub mod commands;
pub mod routes;

pub use routes::sync_routes;
