pub mod replicate_table;

pub use replicate_table::{ReplicateTableCommand, ReplicateTableError};
