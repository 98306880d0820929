//! Replicate feature
//!
//! `GET /Replicate` copies a table between datasets or projects.

pub mod commands;
pub mod routes;

pub use routes::replicate_routes;
