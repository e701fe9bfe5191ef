pub mod config;
pub mod core;
pub mod error;
pub mod logging;
pub mod storage;

pub use config::{BackendConfig, CliArgs, SyncConfig};
pub use core::{Ledger, RunOutcome, SyncEngine, SyncReport, UploadRecord};
pub use error::{SnapshotError, SyncError};
pub use storage::{create_storage, Storage};
