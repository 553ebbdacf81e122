//! notify glue: arm a non-recursive watcher and turn raw notifications into
//! [`WatchEvent`]s on a tokio channel.

use std::path::{Path, PathBuf};

use notify::event::{CreateKind, ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc::UnboundedSender;

use crate::error::{IngestError, Result};
use crate::sweep::is_json_file;

/// What the dispatcher needs to know about a notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    /// A `.json` file appeared in the folder
    Created(PathBuf),
    /// The OS dropped notifications; the folder must be rescanned
    Overflow,
    /// Watcher-internal failure
    Error(String),
}

/// Map one notify event to zero or more [`WatchEvent`]s.
///
/// Files renamed into the folder count as created: writers that finish a
/// temp file and rename it into place never produce a plain create.
pub fn classify_event(event: &Event) -> Vec<WatchEvent> {
    if event.need_rescan() {
        return vec![WatchEvent::Overflow];
    }

    match &event.kind {
        EventKind::Create(CreateKind::File | CreateKind::Any | CreateKind::Other) => {
            json_paths(&event.paths)
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => json_paths(&event.paths),
        // Backends that cannot tell source from destination report both
        // paths; only the one that exists now is new.
        EventKind::Modify(ModifyKind::Name(RenameMode::Any)) => {
            let present: Vec<PathBuf> = event.paths.iter().filter(|p| p.exists()).cloned().collect();
            json_paths(&present)
        }
        // inotify follows `Both` with a separate `To` for the destination
        _ => Vec::new(),
    }
}

fn json_paths(paths: &[PathBuf]) -> Vec<WatchEvent> {
    paths
        .iter()
        .filter(|p| is_json_file(p))
        .map(|p| WatchEvent::Created(p.clone()))
        .collect()
}

/// Arm a watcher on `folder` that forwards events into `tx`.
///
/// The watcher stops when the returned handle is dropped.
pub fn start_watcher(folder: &Path, tx: UnboundedSender<WatchEvent>) -> Result<RecommendedWatcher> {
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
        let events = match res {
            Ok(event) => classify_event(&event),
            Err(e) => vec![WatchEvent::Error(e.to_string())],
        };
        for event in events {
            // Receiver gone means the dispatcher has stopped
            let _ = tx.send(event);
        }
    })
    .map_err(|e| IngestError::Watcher(e.to_string()))?;

    watcher
        .watch(folder, RecursiveMode::NonRecursive)
        .map_err(|e| IngestError::Watcher(format!("{}: {}", folder.display(), e)))?;

    Ok(watcher)
}
