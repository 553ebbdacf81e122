//! Watch dispatcher: feed newly created `.json` files to the processor.
//!
//! notify delivers events on its own thread; a single async loop consumes them
//! and awaits each file's processing before taking the next event, so files
//! are handled strictly one after another in arrival order.

mod watcher;

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use tokio::sync::{mpsc, watch};

use crate::error::Result;
use crate::processor::{Discovery, FileProcessor, PendingFile, ProcessSummary};
use crate::sweep::run_sweep;

pub use watcher::{classify_event, start_watcher, WatchEvent};

/// Dispatcher switches.
#[derive(Debug, Clone, Copy)]
pub struct WatchOptions {
    /// Drain files already in the folder before consuming live events
    pub startup_sweep: bool,
    /// Sweep again when the OS reports dropped notifications
    pub rescan_on_overflow: bool,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            startup_sweep: true,
            rescan_on_overflow: true,
        }
    }
}

/// Watch `folder` until `shutdown` flips to true (or its sender is dropped).
///
/// The watcher is armed before the startup sweep, so files created while the
/// sweep runs are not missed. Shutdown is only observed between files.
pub async fn run_watcher(
    processor: &FileProcessor,
    folder: &Path,
    options: WatchOptions,
    shutdown: watch::Receiver<bool>,
) -> Result<ProcessSummary> {
    let folder = folder.canonicalize()?;
    let (tx, rx) = mpsc::unbounded_channel();
    let _watcher = start_watcher(&folder, tx)?;
    log::info!("Watching {} for *.json files", folder.display());

    let mut summary = ProcessSummary::default();
    let mut swept = HashSet::new();
    if options.startup_sweep {
        let (sweep_summary, handled) = run_sweep(processor, &folder, Discovery::Startup).await;
        summary.merge(sweep_summary);
        swept.extend(handled);
    }

    let live = dispatch_events(processor, &folder, rx, swept, options, shutdown).await;
    summary.merge(live);
    Ok(summary)
}

/// Consume events until the channel closes or shutdown is requested.
///
/// `swept` holds paths a sweep (startup or overflow rescan) already disposed
/// of; a late creation event for one of them is dropped when the file is gone.
pub async fn dispatch_events(
    processor: &FileProcessor,
    folder: &Path,
    mut events: mpsc::UnboundedReceiver<WatchEvent>,
    mut swept: HashSet<PathBuf>,
    options: WatchOptions,
    mut shutdown: watch::Receiver<bool>,
) -> ProcessSummary {
    let mut summary = ProcessSummary::default();

    loop {
        let event = tokio::select! {
            biased;
            _ = shutdown.changed() => {
                log::info!("Shutdown requested, stopping watcher");
                break;
            }
            event = events.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };

        match event {
            WatchEvent::Created(path) => {
                if swept.remove(&path) && !path.exists() {
                    log::debug!("{} already handled by an earlier sweep", path.display());
                    continue;
                }
                let report = processor.process(PendingFile::new(path, Discovery::Live)).await;
                summary.record(&report);
            }
            WatchEvent::Overflow => {
                log::warn!(
                    "The file system watcher experienced an internal buffer overflow; events may have been dropped"
                );
                if options.rescan_on_overflow {
                    let (rescan, handled) = run_sweep(processor, folder, Discovery::Rescan).await;
                    summary.merge(rescan);
                    swept.extend(handled);
                }
            }
            WatchEvent::Error(msg) => {
                log::error!("The file system watcher has detected an error: {}", msg);
            }
        }
    }

    summary
}
