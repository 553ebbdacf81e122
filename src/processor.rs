//! Per-file processing: wait for the writer to let go, transform, insert,
//! then get the file out of the watched folder.
//!
//! Each file runs through a small state machine:
//!
//! ```text
//! CheckingReadiness -> Processing -> Succeeded
//!        ^                 |    \--> Rejected   (document can never be stored)
//!        |                 v
//!        +------------- Retrying --> Exhausted  (attempt budget spent)
//! ```
//!
//! Lock contention and retryable insert failures share one attempt budget and
//! one fixed delay. Whatever the terminal state, the file is disposed of.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::error::{IngestError, Result};
use crate::readiness::{check_readiness, Readiness};
use crate::sink::DocumentSink;
use crate::transform::transform;

/// How many times a file is tried and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            delay: Duration::from_secs(5),
        }
    }
}

/// Where a pending file was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Discovery {
    /// Already in the folder when the process started
    Startup,
    /// Reported by a live creation event
    Live,
    /// Picked up by a sweep after the watcher dropped events
    Rescan,
}

impl fmt::Display for Discovery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Discovery::Startup => "startup",
            Discovery::Live => "live",
            Discovery::Rescan => "rescan",
        };
        f.write_str(name)
    }
}

/// A `.json` file waiting to be processed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingFile {
    pub path: PathBuf,
    pub source: Discovery,
}

impl PendingFile {
    pub fn new(path: impl Into<PathBuf>, source: Discovery) -> Self {
        Self {
            path: path.into(),
            source,
        }
    }
}

/// Terminal result of processing one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Inserted into `collection`
    Succeeded { collection: String },
    /// Attempt budget spent on locks or insert failures
    Exhausted { last_error: Option<String> },
    /// The document can never be stored (bad JSON, no routing key, ...)
    Rejected { reason: String },
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Succeeded { .. })
    }
}

/// What happened to the file on disk afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposal {
    Deleted,
    Quarantined(PathBuf),
    Failed(String),
}

#[derive(Debug)]
pub struct ProcessReport {
    pub file: PendingFile,
    pub outcome: Outcome,
    /// Readiness checks performed, the first one included
    pub attempts: u32,
    pub disposal: Disposal,
}

/// Counts per terminal state over many files.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ProcessSummary {
    pub succeeded: usize,
    pub exhausted: usize,
    pub rejected: usize,
}

impl ProcessSummary {
    pub fn record(&mut self, report: &ProcessReport) {
        match report.outcome {
            Outcome::Succeeded { .. } => self.succeeded += 1,
            Outcome::Exhausted { .. } => self.exhausted += 1,
            Outcome::Rejected { .. } => self.rejected += 1,
        }
    }

    pub fn merge(&mut self, other: ProcessSummary) {
        self.succeeded += other.succeeded;
        self.exhausted += other.exhausted;
        self.rejected += other.rejected;
    }

    pub fn total(&self) -> usize {
        self.succeeded + self.exhausted + self.rejected
    }

    pub fn all_succeeded(&self) -> bool {
        self.exhausted == 0 && self.rejected == 0
    }
}

#[derive(Debug)]
enum FileState {
    CheckingReadiness,
    Processing,
    Retrying,
    Succeeded(String),
    Exhausted,
    Rejected(IngestError),
}

impl FileState {
    fn is_terminal(&self) -> bool {
        matches!(
            self,
            FileState::Succeeded(_) | FileState::Exhausted | FileState::Rejected(_)
        )
    }
}

/// Bookkeeping for one run of the state machine.
struct Attempt<'a> {
    path: &'a Path,
    checks: u32,
    failures: u32,
    last_error: Option<String>,
}

/// Drives files through the state machine and disposes of them.
pub struct FileProcessor {
    sink: Arc<dyn DocumentSink>,
    policy: RetryPolicy,
    reject_dir: Option<PathBuf>,
}

impl FileProcessor {
    pub fn new(sink: Arc<dyn DocumentSink>, policy: RetryPolicy) -> Self {
        Self {
            sink,
            policy,
            reject_dir: None,
        }
    }

    /// Move exhausted and rejected files here instead of deleting them.
    pub fn with_reject_dir(mut self, reject_dir: Option<PathBuf>) -> Self {
        self.reject_dir = reject_dir;
        self
    }

    /// Run `file` to a terminal state, then delete or quarantine it.
    ///
    /// Never returns early: retries (and their delays) happen inside this call.
    pub async fn process(&self, file: PendingFile) -> ProcessReport {
        log::debug!("Processing {} ({})", file.path.display(), file.source);

        let mut attempt = Attempt {
            path: &file.path,
            checks: 0,
            failures: 0,
            last_error: None,
        };
        let mut state = FileState::CheckingReadiness;
        while !state.is_terminal() {
            state = self.step(state, &mut attempt).await;
        }

        let outcome = match state {
            FileState::Succeeded(collection) => {
                log::info!("{} UPLOADED", file.path.display());
                Outcome::Succeeded { collection }
            }
            FileState::Rejected(err) => {
                log::warn!("{} rejected: {}", file.path.display(), err);
                Outcome::Rejected {
                    reason: err.to_string(),
                }
            }
            _ => {
                log::warn!(
                    "Maximum process retries ({}) reached for {}",
                    self.policy.max_attempts,
                    file.path.display()
                );
                Outcome::Exhausted {
                    last_error: attempt.last_error.take(),
                }
            }
        };

        let attempts = attempt.checks;
        let disposal = self.dispose(&file.path, &outcome);
        ProcessReport {
            file,
            outcome,
            attempts,
            disposal,
        }
    }

    async fn step(&self, state: FileState, attempt: &mut Attempt<'_>) -> FileState {
        match state {
            FileState::CheckingReadiness => {
                attempt.checks += 1;
                match check_readiness(attempt.path) {
                    Readiness::Ready => FileState::Processing,
                    Readiness::Locked => {
                        log::debug!("{} is still held by another process", attempt.path.display());
                        attempt.last_error = Some("file is locked by another process".to_string());
                        FileState::Retrying
                    }
                    Readiness::Unavailable(kind) => {
                        log::debug!("{} cannot be opened: {:?}", attempt.path.display(), kind);
                        attempt.last_error = Some(format!("file cannot be opened: {:?}", kind));
                        FileState::Retrying
                    }
                }
            }
            FileState::Processing => match self.ingest(attempt.path).await {
                Ok(collection) => FileState::Succeeded(collection),
                Err(e) if e.is_retryable() => {
                    log::warn!("{}: {}", attempt.path.display(), e);
                    attempt.last_error = Some(e.to_string());
                    FileState::Retrying
                }
                Err(e) => FileState::Rejected(e),
            },
            FileState::Retrying => {
                attempt.failures += 1;
                if attempt.failures >= self.policy.max_attempts {
                    return FileState::Exhausted;
                }
                log::debug!(
                    "Retry {}/{} for {} in {:?}",
                    attempt.failures,
                    self.policy.max_attempts - 1,
                    attempt.path.display(),
                    self.policy.delay
                );
                tokio::time::sleep(self.policy.delay).await;
                FileState::CheckingReadiness
            }
            terminal => terminal,
        }
    }

    /// Read, transform and insert the file; returns the collection used.
    async fn ingest(&self, path: &Path) -> Result<String> {
        let content = tokio::fs::read_to_string(path).await?;
        let doc = transform(&content)?;
        self.sink.insert(&doc.collection, doc.body).await?;
        Ok(doc.collection)
    }

    fn dispose(&self, path: &Path, outcome: &Outcome) -> Disposal {
        if let (Some(reject_dir), false) = (&self.reject_dir, outcome.is_success()) {
            return match quarantine(path, reject_dir) {
                Ok(dest) => {
                    log::info!("{} QUARANTINED -> {}", path.display(), dest.display());
                    Disposal::Quarantined(dest)
                }
                Err(e) => {
                    log::error!("Failed to quarantine {}: {}", path.display(), e);
                    Disposal::Failed(e.to_string())
                }
            };
        }

        match std::fs::remove_file(path) {
            Ok(()) => {
                log::info!("{} DELETED", path.display());
                Disposal::Deleted
            }
            Err(e) => {
                log::error!("Failed to delete {}: {}", path.display(), e);
                Disposal::Failed(e.to_string())
            }
        }
    }
}

/// Move `path` into `reject_dir`, never overwriting an earlier reject.
fn quarantine(path: &Path, reject_dir: &Path) -> Result<PathBuf> {
    let file_name = path
        .file_name()
        .ok_or_else(|| IngestError::InvalidDocument(format!("no file name in {}", path.display())))?;

    let mut dest = reject_dir.join(file_name);
    let mut n = 1;
    while dest.exists() {
        dest = reject_dir.join(format!("{}.{}", file_name.to_string_lossy(), n));
        n += 1;
    }

    match std::fs::rename(path, &dest) {
        Ok(()) => {}
        Err(e) if is_cross_device(&e) => {
            std::fs::copy(path, &dest)?;
            if let Err(e) = std::fs::remove_file(path) {
                // Leave exactly one copy behind: the one still in the watched folder
                let _ = std::fs::remove_file(&dest);
                return Err(e.into());
            }
        }
        Err(e) => return Err(e.into()),
    }
    Ok(dest)
}

#[cfg(unix)]
fn is_cross_device(err: &std::io::Error) -> bool {
    err.raw_os_error() == Some(nix::errno::Errno::EXDEV as i32)
}

#[cfg(windows)]
fn is_cross_device(err: &std::io::Error) -> bool {
    const ERROR_NOT_SAME_DEVICE: i32 = 17;
    err.raw_os_error() == Some(ERROR_NOT_SAME_DEVICE)
}

#[cfg(not(any(unix, windows)))]
fn is_cross_device(_err: &std::io::Error) -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::MemorySink;
    use std::fs;
    use std::time::Instant;
    use tempfile::TempDir;

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 5,
            delay: Duration::from_millis(10),
        }
    }

    fn setup() -> (TempDir, Arc<MemorySink>, FileProcessor) {
        let dir = TempDir::new().unwrap();
        let sink = Arc::new(MemorySink::new());
        let processor = FileProcessor::new(sink.clone(), fast_policy());
        (dir, sink, processor)
    }

    fn write(dir: &TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, content).unwrap();
        path
    }

    #[tokio::test]
    async fn test_valid_document_is_uploaded_and_deleted() {
        let (dir, sink, processor) = setup();
        let path = write(
            &dir,
            "order.json",
            r#"{"Action": "Orders", "CreatedAt": "2024-01-01T00:00:00Z", "Total": 12}"#,
        );

        let report = processor.process(PendingFile::new(&path, Discovery::Live)).await;

        assert_eq!(
            report.outcome,
            Outcome::Succeeded {
                collection: "Orders".to_string()
            }
        );
        assert_eq!(report.attempts, 1);
        assert_eq!(report.disposal, Disposal::Deleted);
        assert!(!path.exists());

        let stored = sink.documents("Orders");
        assert_eq!(stored.len(), 1);
        assert_eq!(
            stored[0].get_datetime("CreatedAt").unwrap().timestamp_millis(),
            1_704_067_200_000
        );
        assert_eq!(stored[0].get_i32("Total").unwrap(), 12);
    }

    #[tokio::test]
    async fn test_document_without_created_at_stored_without_it() {
        let (dir, sink, processor) = setup();
        let path = write(&dir, "signup.json", r#"{"Action": "Signups", "User": "ada"}"#);

        let report = processor.process(PendingFile::new(&path, Discovery::Startup)).await;

        assert!(report.outcome.is_success());
        let stored = sink.documents("Signups");
        assert!(!stored[0].contains_key("CreatedAt"));
        assert_eq!(stored[0].get_str("User").unwrap(), "ada");
    }

    #[tokio::test]
    async fn test_missing_action_is_rejected_without_retry() {
        let (dir, sink, processor) = setup();
        let path = write(&dir, "orphan.json", r#"{"CreatedAt": "2024-01-01T00:00:00Z"}"#);

        let started = Instant::now();
        let report = processor.process(PendingFile::new(&path, Discovery::Live)).await;

        assert!(matches!(report.outcome, Outcome::Rejected { .. }));
        assert_eq!(report.attempts, 1);
        assert_eq!(report.disposal, Disposal::Deleted);
        assert!(!path.exists());
        assert_eq!(sink.calls(), 0);
        // No retry delay was spent
        assert!(started.elapsed() < fast_policy().delay * 4);
    }

    #[tokio::test]
    async fn test_malformed_json_is_rejected() {
        let (dir, sink, processor) = setup();
        let path = write(&dir, "broken.json", r#"{"Action": "Orders""#);

        let report = processor.process(PendingFile::new(&path, Discovery::Live)).await;

        match report.outcome {
            Outcome::Rejected { reason } => assert!(reason.contains("Parse error")),
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert!(!path.exists());
        assert!(sink.is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_locked_file_exhausts_after_max_attempts() {
        let (dir, sink, processor) = setup();
        let path = write(&dir, "busy.json", r#"{"Action": "Orders"}"#);
        let writer = crate::readiness::hold_exclusive(&path);

        let started = Instant::now();
        let report = processor.process(PendingFile::new(&path, Discovery::Live)).await;
        drop(writer);

        assert!(matches!(report.outcome, Outcome::Exhausted { .. }));
        assert_eq!(report.attempts, 5);
        assert!(started.elapsed() >= fast_policy().delay * 4);
        assert_eq!(report.disposal, Disposal::Deleted);
        assert!(!path.exists());
        assert_eq!(sink.calls(), 0);
    }

    #[cfg(any(unix, windows))]
    #[tokio::test]
    async fn test_lock_released_during_retries_succeeds() {
        let dir = TempDir::new().unwrap();
        let sink = Arc::new(MemorySink::new());
        let processor = FileProcessor::new(
            sink.clone(),
            RetryPolicy {
                max_attempts: 10,
                delay: Duration::from_millis(25),
            },
        );
        let path = write(&dir, "slow.json", r#"{"Action": "Orders"}"#);
        let writer = crate::readiness::hold_exclusive(&path);

        let releaser = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(60));
            drop(writer);
        });
        let report = processor.process(PendingFile::new(&path, Discovery::Live)).await;
        releaser.join().unwrap();

        assert!(report.outcome.is_success());
        assert!(report.attempts >= 2);
        assert_eq!(sink.documents("Orders").len(), 1);
    }

    #[tokio::test]
    async fn test_database_errors_are_retried_then_succeed() {
        let (dir, sink, processor) = setup();
        sink.fail_next(IngestError::Database("connection refused".into()));
        sink.fail_next(IngestError::Timeout(Duration::from_millis(5)));
        let path = write(&dir, "retry.json", r#"{"Action": "Orders"}"#);

        let report = processor.process(PendingFile::new(&path, Discovery::Live)).await;

        assert!(report.outcome.is_success());
        assert_eq!(report.attempts, 3);
        assert_eq!(sink.calls(), 3);
        assert_eq!(sink.len(), 1);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_sustained_database_outage_is_bounded() {
        let (dir, sink, processor) = setup();
        for _ in 0..10 {
            sink.fail_next(IngestError::Database("no primary".into()));
        }
        let path = write(&dir, "outage.json", r#"{"Action": "Orders"}"#);

        let report = processor.process(PendingFile::new(&path, Discovery::Live)).await;

        match report.outcome {
            Outcome::Exhausted { last_error } => {
                assert!(last_error.unwrap().contains("no primary"));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(sink.calls(), 5);
        assert!(sink.is_empty());
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_missing_file_is_retried_like_a_lock() {
        let (dir, sink, processor) = setup();
        let path = dir.path().join("gone.json");

        let report = processor.process(PendingFile::new(&path, Discovery::Live)).await;

        assert!(matches!(report.outcome, Outcome::Exhausted { .. }));
        assert_eq!(report.attempts, 5);
        assert!(matches!(report.disposal, Disposal::Failed(_)));
        assert_eq!(sink.calls(), 0);
    }

    #[tokio::test]
    async fn test_same_content_twice_gives_two_records() {
        let (dir, sink, processor) = setup();
        let content = r#"{"Action": "Orders", "Id": 1}"#;

        for _ in 0..2 {
            let path = write(&dir, "dup.json", content);
            let report = processor.process(PendingFile::new(&path, Discovery::Live)).await;
            assert!(report.outcome.is_success());
        }

        let stored = sink.documents("Orders");
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0], stored[1]);
    }

    #[tokio::test]
    async fn test_rejected_file_is_quarantined_when_configured() {
        let dir = TempDir::new().unwrap();
        let rejects = TempDir::new().unwrap();
        let sink = Arc::new(MemorySink::new());
        let processor = FileProcessor::new(sink.clone(), fast_policy())
            .with_reject_dir(Some(rejects.path().to_path_buf()));

        let bad = write(&dir, "bad.json", r#"{"NoAction": true}"#);
        let report = processor.process(PendingFile::new(&bad, Discovery::Live)).await;
        let dest = rejects.path().join("bad.json");
        assert_eq!(report.disposal, Disposal::Quarantined(dest.clone()));
        assert!(!bad.exists());
        assert_eq!(fs::read_to_string(&dest).unwrap(), r#"{"NoAction": true}"#);

        // A second reject with the same name does not overwrite the first
        let bad = write(&dir, "bad.json", "not json");
        let report = processor.process(PendingFile::new(&bad, Discovery::Live)).await;
        assert_eq!(
            report.disposal,
            Disposal::Quarantined(rejects.path().join("bad.json.1"))
        );

        // Successful files are still deleted
        let good = write(&dir, "good.json", r#"{"Action": "Orders"}"#);
        let report = processor.process(PendingFile::new(&good, Discovery::Live)).await;
        assert_eq!(report.disposal, Disposal::Deleted);
        assert_eq!(fs::read_dir(rejects.path()).unwrap().count(), 2);
    }

    #[tokio::test]
    async fn test_exhausted_file_is_quarantined_when_configured() {
        let dir = TempDir::new().unwrap();
        let rejects = TempDir::new().unwrap();
        let sink = Arc::new(MemorySink::new());
        for _ in 0..5 {
            sink.fail_next(IngestError::Database("no primary".into()));
        }
        let processor = FileProcessor::new(sink.clone(), fast_policy())
            .with_reject_dir(Some(rejects.path().to_path_buf()));
        let path = write(&dir, "stuck.json", r#"{"Action": "Orders"}"#);

        let report = processor.process(PendingFile::new(&path, Discovery::Live)).await;

        assert!(matches!(report.outcome, Outcome::Exhausted { .. }));
        let dest = rejects.path().join("stuck.json");
        assert_eq!(report.disposal, Disposal::Quarantined(dest.clone()));
        assert!(!path.exists());
        assert_eq!(fs::read_to_string(&dest).unwrap(), r#"{"Action": "Orders"}"#);
        assert_eq!(sink.calls(), 5);
        assert!(sink.is_empty());
    }

    #[tokio::test]
    async fn test_failed_quarantine_leaves_single_copy() {
        let dir = TempDir::new().unwrap();
        let rejects = TempDir::new().unwrap();
        let missing_dir = rejects.path().join("absent");
        let processor = FileProcessor::new(Arc::new(MemorySink::new()), fast_policy())
            .with_reject_dir(Some(missing_dir.clone()));
        let path = write(&dir, "bad.json", "not json");

        let report = processor.process(PendingFile::new(&path, Discovery::Live)).await;

        assert!(matches!(report.outcome, Outcome::Rejected { .. }));
        assert!(matches!(report.disposal, Disposal::Failed(_)));
        // The file stays where it was and nothing half-moved is left around
        assert!(path.exists());
        assert!(!missing_dir.exists());
        assert_eq!(fs::read_dir(rejects.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_only_cross_device_renames_fall_back_to_copy() {
        assert!(!is_cross_device(&std::io::Error::from(std::io::ErrorKind::NotFound)));
        assert!(!is_cross_device(&std::io::Error::from(
            std::io::ErrorKind::PermissionDenied
        )));
        #[cfg(unix)]
        assert!(is_cross_device(&std::io::Error::from_raw_os_error(
            nix::errno::Errno::EXDEV as i32
        )));
        #[cfg(windows)]
        assert!(is_cross_device(&std::io::Error::from_raw_os_error(17)));
    }
}
