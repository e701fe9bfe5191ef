pub mod engine;
pub mod ledger;
pub mod scanner;
pub mod uploader;

pub use engine::{RunOutcome, RunPhase, SyncEngine, SyncReport};
pub use ledger::{dedup_key, Ledger, UploadRecord};
pub use scanner::{FileScanner, ScanConfig, ScanSummary};
pub use uploader::{remote_key, TransferStats, Uploader};
