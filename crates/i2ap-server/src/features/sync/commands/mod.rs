pub mod start_sync;

pub use start_sync::{LoadType, StartSyncCommand, StartSyncError};
