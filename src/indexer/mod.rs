//! Indexer (§4.4): a background scheduler that walks configured sync paths,
//! deduplicates against the catalog, coordinates metadata-reader and
//! analyzer plugins, and keeps the catalog referentially clean.
//!
//! State machine and control contract grounded on musikcube's
//! `core/library/Indexer.h`/`.cpp` (`status` int, `GetStatus()`'s localized
//! strings, `RestartSync`, mutex-guarded progress counters, the dedicated
//! worker thread joined at destruction). The wait/restart signaling uses
//! `std::sync::Condvar` rather than musikcube's `boost::condition_variable`
//! since both are the same primitive in their respective standard libraries.

pub mod scan;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use tokio::sync::broadcast;

use crate::catalog::Catalog;
use crate::plugin_host::PluginHost;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IndexerStatus {
    #[default]
    Idle,
    CountingFiles,
    IndexingFiles,
    RemovingMissing,
    Cleanup,
    Optimizing,
    AnalyzingAudio,
}

#[derive(Debug, Clone, Default)]
pub struct IndexerProgress {
    pub status: IndexerStatus,
    pub overall_progress: f64,
    pub current_progress: f64,
    pub files_counted: u64,
}

impl IndexerProgress {
    /// Mirrors musikcube's `Indexer::GetStatus()` formatting.
    pub fn localized(&self) -> String {
        match self.status {
            IndexerStatus::Idle => "idle".to_string(),
            IndexerStatus::CountingFiles => format!("counting... {}", self.files_counted),
            IndexerStatus::IndexingFiles => {
                format!("indexing... {:.2}%", self.overall_progress * 100.0)
            }
            IndexerStatus::RemovingMissing => {
                format!("removing... {:.2}%", self.overall_progress * 100.0)
            }
            IndexerStatus::Cleanup => "cleaning...".to_string(),
            IndexerStatus::Optimizing => "optimizing...".to_string(),
            IndexerStatus::AnalyzingAudio => format!(
                "running analyzers...: {:.2}% (current {:.1}%)",
                self.overall_progress * 100.0,
                self.current_progress * 100.0
            ),
        }
    }
}

#[derive(Debug, Clone)]
pub enum IndexerSignal {
    Started,
    Progress(u64),
    Finished(u64),
    PathsUpdated,
    TrackRefreshed,
}

pub(crate) enum PathOp {
    Add(PathBuf),
    Remove(PathBuf),
}

pub(crate) struct Shared {
    progress: Mutex<IndexerProgress>,
    pub(crate) pending_ops: Mutex<Vec<PathOp>>,
    restart: AtomicBool,
    stop: AtomicBool,
    wake_mutex: Mutex<()>,
    wake_cond: Condvar,
    pub(crate) signals: broadcast::Sender<IndexerSignal>,
}

impl Shared {
    pub(crate) fn should_abort(&self) -> bool {
        self.restart.load(Ordering::Acquire) || self.stop.load(Ordering::Acquire)
    }

    pub(crate) fn set_status(&self, status: IndexerStatus) {
        let mut progress = self.progress.lock().unwrap();
        progress.status = status;
        progress.overall_progress = 0.0;
        progress.current_progress = 0.0;
    }

    pub(crate) fn set_overall_progress(&self, value: f64) {
        self.progress.lock().unwrap().overall_progress = value;
    }

    pub(crate) fn set_current_progress(&self, value: f64) {
        self.progress.lock().unwrap().current_progress = value;
    }

    pub(crate) fn set_files_counted(&self, value: u64) {
        self.progress.lock().unwrap().files_counted = value;
    }
}

/// A cheaply-cloneable handle callers use to control and observe a running
/// Indexer thread.
#[derive(Clone)]
pub struct IndexerHandle {
    shared: Arc<Shared>,
}

impl IndexerHandle {
    pub fn add_path(&self, path: impl Into<PathBuf>) {
        self.shared.pending_ops.lock().unwrap().push(PathOp::Add(path.into()));
        self.restart_sync(true);
    }

    pub fn remove_path(&self, path: impl Into<PathBuf>) {
        self.shared.pending_ops.lock().unwrap().push(PathOp::Remove(path.into()));
        self.restart_sync(true);
    }

    pub fn restart_sync(&self, restart: bool) {
        self.shared.restart.store(restart, Ordering::Release);
        if restart {
            let _guard = self.shared.wake_mutex.lock().unwrap();
            self.shared.wake_cond.notify_all();
        }
    }

    pub fn stop(&self) {
        self.shared.stop.store(true, Ordering::Release);
        self.restart_sync(true);
    }

    pub fn get_status(&self) -> IndexerProgress {
        self.shared.progress.lock().unwrap().clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<IndexerSignal> {
        self.shared.signals.subscribe()
    }
}

/// Spawns the Indexer on its own OS thread. Must be called from within a
/// running tokio runtime; the thread bridges back into it via
/// `tokio::runtime::Handle::block_on` (§4.4 "Implementation note").
pub fn spawn(
    catalog: Catalog,
    library_path: PathBuf,
    sync_timeout_seconds: u64,
    plugin_host: Arc<PluginHost>,
) -> (IndexerHandle, JoinHandle<()>) {
    let (signals, _rx) = broadcast::channel(256);
    let shared = Arc::new(Shared {
        progress: Mutex::new(IndexerProgress::default()),
        pending_ops: Mutex::new(Vec::new()),
        restart: AtomicBool::new(false),
        stop: AtomicBool::new(false),
        wake_mutex: Mutex::new(()),
        wake_cond: Condvar::new(),
        signals,
    });

    let thread_shared = Arc::clone(&shared);
    let rt = tokio::runtime::Handle::current();

    let join = std::thread::Builder::new()
        .name("indexer".to_string())
        .spawn(move || run_loop(thread_shared, rt, catalog, library_path, sync_timeout_seconds, plugin_host))
        .expect("failed to spawn indexer thread");

    (IndexerHandle { shared }, join)
}

fn run_loop(
    shared: Arc<Shared>,
    rt: tokio::runtime::Handle,
    catalog: Catalog,
    library_path: PathBuf,
    sync_timeout_seconds: u64,
    plugin_host: Arc<PluginHost>,
) {
    loop {
        if shared.stop.load(Ordering::Acquire) {
            break;
        }
        shared.restart.store(false, Ordering::Release);
        let _ = shared.signals.send(IndexerSignal::Started);

        match rt.block_on(scan::run_scan(&shared, &catalog, &library_path, &plugin_host)) {
            Ok(count) => {
                let _ = shared.signals.send(IndexerSignal::Finished(count));
            }
            Err(e) => {
                tracing::warn!(error = %e, "indexer scan aborted with an error");
            }
        }
        shared.set_status(IndexerStatus::Idle);

        if shared.stop.load(Ordering::Acquire) {
            break;
        }

        let guard = shared.wake_mutex.lock().unwrap();
        let wake_ready = |_: &mut ()| !shared.restart.load(Ordering::Acquire) && !shared.stop.load(Ordering::Acquire);
        if sync_timeout_seconds == 0 {
            let _ = shared.wake_cond.wait_while(guard, wake_ready);
        } else {
            let _ = shared
                .wake_cond
                .wait_timeout_while(guard, Duration::from_secs(sync_timeout_seconds), wake_ready);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn localized_status_matches_expected_shapes() {
        let mut progress = IndexerProgress { status: IndexerStatus::CountingFiles, files_counted: 42, ..Default::default() };
        assert_eq!(progress.localized(), "counting... 42");
        progress.status = IndexerStatus::Cleanup;
        assert_eq!(progress.localized(), "cleaning...");
    }

    #[test]
    fn set_status_resets_progress() {
        let shared = Shared {
            progress: Mutex::new(IndexerProgress { overall_progress: 0.5, current_progress: 0.5, ..Default::default() }),
            pending_ops: Mutex::new(Vec::new()),
            restart: AtomicBool::new(false),
            stop: AtomicBool::new(false),
            wake_mutex: Mutex::new(()),
            wake_cond: Condvar::new(),
            signals: broadcast::channel(1).0,
        };
        shared.set_status(IndexerStatus::Optimizing);
        let progress = shared.progress.lock().unwrap();
        assert_eq!(progress.overall_progress, 0.0);
        assert_eq!(progress.status, IndexerStatus::Optimizing);
    }
}
