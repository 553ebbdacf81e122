//! Startup sweep: drain `*.json` files that were dropped into the folder while
//! nothing was watching.

use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::processor::{Discovery, FileProcessor, PendingFile, ProcessSummary};

/// Extension (case-insensitive) of the files this crate ingests.
pub const JSON_EXTENSION: &str = "json";

/// Whether `path` names a file we ingest, judged by extension only.
pub fn is_json_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case(JSON_EXTENSION))
        .unwrap_or(false)
}

/// List `*.json` regular files directly inside `folder`, in directory order.
///
/// Entries that cannot be read are logged and skipped.
pub fn list_pending(folder: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for entry in WalkDir::new(folder).min_depth(1).max_depth(1) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                log::warn!("sweep: skipping unreadable entry in {}: {}", folder.display(), e);
                continue;
            }
        };

        if entry.file_type().is_file() && is_json_file(entry.path()) {
            files.push(entry.into_path());
        }
    }

    files
}

/// Run every pending file in `folder` through `processor`, one at a time.
///
/// Returns the summary plus the paths handled, so a caller can recognise
/// late notifications for files the sweep already disposed of.
pub async fn run_sweep(
    processor: &FileProcessor,
    folder: &Path,
    source: Discovery,
) -> (ProcessSummary, Vec<PathBuf>) {
    let files = list_pending(folder);
    let mut summary = ProcessSummary::default();

    if files.is_empty() {
        log::debug!("sweep: nothing pending in {}", folder.display());
        return (summary, files);
    }

    log::info!(
        "Start uploading {} file(s) left in {}",
        files.len(),
        folder.display()
    );
    for path in &files {
        let report = processor.process(PendingFile::new(path, source)).await;
        summary.record(&report);
    }
    log::info!(
        "sweep: {} uploaded, {} exhausted, {} rejected",
        summary.succeeded,
        summary.exhausted,
        summary.rejected
    );

    (summary, files)
}
