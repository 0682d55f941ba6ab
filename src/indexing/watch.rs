use crate::core::error::{Error, Result};
use notify_debouncer_full::notify::{
    self,
    event::{ModifyKind, RenameMode},
    EventKind, RecommendedWatcher, RecursiveMode, Watcher,
};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Upper bound on paths tracked by the debouncer at once
pub const MAX_PENDING_PATHS: usize = 1024;

/// Receiver of accepted change events
pub trait ReindexSink: Send + Sync {
    /// Re-index a changed file, returning the number of documents written
    fn reindex(&self, path: &Path) -> Result<usize>;

    /// Forget a deleted file, returning the number of documents removed
    fn remove(&self, path: &Path) -> Result<usize>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Modified,
    Removed,
}

/// Per-path debounce state. Paths absent from the table are idle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathState {
    Idle,
    PendingDebounce { accepted_at: Instant },
    Reindexing,
}

/// Leading-edge debouncer over a bounded per-path table.
///
/// The first event for a path is accepted; further events arriving within
/// `window` of the last accepted one are dropped.
#[derive(Debug)]
pub struct Debouncer {
    window: Duration,
    capacity: usize,
    paths: HashMap<PathBuf, PathState>,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self::with_capacity(window, MAX_PENDING_PATHS)
    }

    pub fn with_capacity(window: Duration, capacity: usize) -> Self {
        Self {
            window,
            capacity: capacity.max(1),
            paths: HashMap::new(),
        }
    }

    pub fn state(&self, path: &Path) -> PathState {
        self.paths.get(path).copied().unwrap_or(PathState::Idle)
    }

    pub fn pending(&self) -> usize {
        self.paths.len()
    }

    /// Try to move `path` into `Reindexing`. `false` means drop the event.
    pub fn begin(&mut self, path: &Path, now: Instant) -> bool {
        match self.state(path) {
            PathState::PendingDebounce { accepted_at }
                if now.saturating_duration_since(accepted_at) < self.window =>
            {
                tracing::debug!(path = %path.display(), "debounced");
                return false;
            }
            PathState::Reindexing => return false,
            _ => {}
        }

        if !self.paths.contains_key(path) && self.paths.len() >= self.capacity {
            self.prune(now);
            if self.paths.len() >= self.capacity {
                tracing::warn!(path = %path.display(), "debounce table full, dropping event");
                return false;
            }
        }

        self.paths.insert(path.to_path_buf(), PathState::Reindexing);
        true
    }

    /// Leave `Reindexing`; the debounce window counts from `accepted_at`
    pub fn finish(&mut self, path: &Path, accepted_at: Instant) {
        if let Some(state) = self.paths.get_mut(path) {
            *state = PathState::PendingDebounce { accepted_at };
        }
    }

    /// Stop tracking `path` entirely
    pub fn forget(&mut self, path: &Path) {
        self.paths.remove(path);
    }

    /// Return paths whose window has passed to `Idle`
    pub fn prune(&mut self, now: Instant) {
        let window = self.window;
        self.paths.retain(|_, state| match state {
            PathState::PendingDebounce { accepted_at } => {
                now.saturating_duration_since(*accepted_at) < window
            }
            _ => true,
        });
    }
}

/// Applies debounced change events to a sink.
pub struct WatchWorker<S: ReindexSink> {
    debouncer: Debouncer,
    sink: Arc<S>,
}

impl<S: ReindexSink> WatchWorker<S> {
    pub fn new(sink: Arc<S>, window: Duration) -> Self {
        Self {
            debouncer: Debouncer::new(window),
            sink,
        }
    }

    pub fn debouncer(&self) -> &Debouncer {
        &self.debouncer
    }

    /// Handle one change. Sink errors are logged, never returned.
    pub fn handle_event(&mut self, path: &Path, kind: ChangeKind, now: Instant) {
        match kind {
            ChangeKind::Removed => {
                self.debouncer.forget(path);
                match self.sink.remove(path) {
                    Ok(0) => {}
                    Ok(removed) => tracing::info!(path = %path.display(), removed, "removed deleted file"),
                    Err(e) => tracing::error!(path = %path.display(), error = %e, "failed to remove file"),
                }
            }
            ChangeKind::Modified => {
                if !self.debouncer.begin(path, now) {
                    return;
                }
                tracing::info!(path = %path.display(), "file changed");
                match self.sink.reindex(path) {
                    Ok(0) => {}
                    Ok(added) => tracing::info!(path = %path.display(), added, "reindexed"),
                    Err(e) => tracing::error!(path = %path.display(), error = %e, "error reindexing"),
                }
                self.debouncer.finish(path, now);
            }
        }
    }

    pub fn tick(&mut self, now: Instant) {
        self.debouncer.prune(now);
    }
}

/// Watches roots for file-system changes and feeds them to a [`WatchWorker`]
/// on one background thread.
pub struct ChangeWatcher<S: ReindexSink + 'static> {
    roots: Vec<PathBuf>,
    window: Duration,
    sink: Arc<S>,
}

/// Running watcher. Dropping the handle without [`WatchHandle::stop`] leaves
/// the worker running until the process exits.
pub struct WatchHandle {
    watcher: RecommendedWatcher,
    worker: JoinHandle<()>,
}

impl WatchHandle {
    /// Block until the worker exits
    pub fn join(self) {
        let WatchHandle { watcher, worker } = self;
        let _watcher = watcher;
        if worker.join().is_err() {
            tracing::error!("watch worker panicked");
        }
    }

    /// Stop receiving events and wait for the worker to drain
    pub fn stop(self) {
        drop(self.watcher);
        if self.worker.join().is_err() {
            tracing::error!("watch worker panicked");
        }
    }
}

impl<S: ReindexSink + 'static> ChangeWatcher<S> {
    pub fn new(roots: Vec<PathBuf>, window: Duration, sink: Arc<S>) -> Self {
        Self { roots, window, sink }
    }

    pub fn spawn(self) -> Result<WatchHandle> {
        let (tx, rx) = mpsc::channel::<notify::Result<notify::Event>>();

        let mut watcher = notify::recommended_watcher(tx)
            .map_err(|e| Error::Io(std::io::Error::other(format!("Failed to create file watcher: {}", e))))?;

        let mut watched = 0;
        for root in &self.roots {
            if !root.is_dir() {
                tracing::warn!(dir = %root.display(), "watch directory does not exist");
                continue;
            }
            watcher
                .watch(root, RecursiveMode::Recursive)
                .map_err(|e| Error::Io(std::io::Error::other(format!("Failed to watch {}: {}", root.display(), e))))?;
            tracing::info!(dir = %root.display(), "watching");
            watched += 1;
        }
        if watched == 0 {
            return Err(Error::Config("No existing directories to watch".to_string()));
        }

        let mut worker = WatchWorker::new(self.sink, self.window);
        let poll = self.window.max(Duration::from_millis(250));
        let worker = std::thread::Builder::new()
            .name("tierdex-watch".to_string())
            .spawn(move || loop {
                match rx.recv_timeout(poll) {
                    Ok(Ok(event)) => {
                        let now = Instant::now();
                        for (path, kind) in classify_event(&event) {
                            worker.handle_event(&path, kind, now);
                        }
                    }
                    Ok(Err(e)) => tracing::warn!(error = %e, "watch error"),
                    Err(RecvTimeoutError::Timeout) => worker.tick(Instant::now()),
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            })?;

        Ok(WatchHandle { watcher, worker })
    }
}

/// Map a raw notification to per-path changes
fn classify_event(event: &notify::Event) -> Vec<(PathBuf, ChangeKind)> {
    match event.kind {
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) if event.paths.len() == 2 => vec![
            (event.paths[0].clone(), ChangeKind::Removed),
            (event.paths[1].clone(), ChangeKind::Modified),
        ],
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) | EventKind::Remove(_) => event
            .paths
            .iter()
            .map(|p| (p.clone(), ChangeKind::Removed))
            .collect(),
        EventKind::Modify(ModifyKind::Metadata(_)) => Vec::new(),
        EventKind::Create(_) | EventKind::Modify(_) => event
            .paths
            .iter()
            .map(|p| (p.clone(), ChangeKind::Modified))
            .collect(),
        _ => Vec::new(),
    }
}
