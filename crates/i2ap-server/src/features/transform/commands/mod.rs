pub mod db_to_db;
pub mod file_to_db;

pub use db_to_db::{RunDbToDbCommand, RunDbToDbError};
pub use file_to_db::{LoadFileCommand, LoadFileError};
