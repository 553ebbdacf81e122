pub mod config;
pub mod error;
pub mod processor;
pub mod readiness;
pub mod sink;
pub mod sweep;
pub mod transform;
pub mod watch;

pub use config::Config;
pub use error::{IngestError, Result};
pub use processor::{Discovery, FileProcessor, Outcome, PendingFile, ProcessReport, ProcessSummary, RetryPolicy};
