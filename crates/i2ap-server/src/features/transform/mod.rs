//! Transform feature
//!
//! - `POST /DbToDb` runs a SQL template and loads its result
//! - `GET /FileToDb` loads a staged CSV file

pub mod commands;
pub mod routes;

pub use routes::transform_routes;
