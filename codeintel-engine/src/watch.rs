//! File watcher: debounced incremental re-ingestion triggered by filesystem
//! change events.
//!
//! Adapted from the teacher's `watch.rs` (a `notify::RecommendedWatcher`
//! feeding a debounce loop on a dedicated thread). The repo-ownership
//! dispatch there collapses here to a single workspace root; the debounce
//! window and event-kind filtering are kept as-is.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::mpsc;
use std::time::{Duration, Instant};

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, warn};

/// Debounce window: wait this long after the last event before processing a
/// path, so a burst of saves collapses into one incremental pass.
const DEBOUNCE_MS: u64 = 500;

/// Owns the `notify` watcher handle and the debounce thread. Dropping it
/// stops both.
pub struct FileWatcher {
    _watcher: RecommendedWatcher,
    stop: std::sync::Arc<std::sync::atomic::AtomicBool>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl FileWatcher {
    /// Subscribes to every change under `root` and invokes `on_changed` with
    /// the debounced, deduplicated set of changed absolute paths. `on_changed`
    /// runs on the debounce thread, not the caller's.
    pub fn start(
        root: &std::path::Path,
        on_changed: impl Fn(Vec<PathBuf>) + Send + 'static,
    ) -> Result<Self, notify::Error> {
        let (tx, rx) = mpsc::channel::<Event>();

        let mut watcher = RecommendedWatcher::new(
            move |res: Result<Event, notify::Error>| {
                if let Ok(event) = res {
                    let _ = tx.send(event);
                }
            },
            notify::Config::default(),
        )?;
        watcher.watch(root, RecursiveMode::Recursive)?;

        let stop = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        let stop_clone = stop.clone();
        let thread = std::thread::spawn(move || debounce_loop(rx, stop_clone, on_changed));

        Ok(Self { _watcher: watcher, stop, thread: Some(thread) })
    }

    /// Stops the debounce thread. Idempotent; also runs on `Drop`.
    pub fn stop(&mut self) {
        self.stop.store(true, std::sync::atomic::Ordering::SeqCst);
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for FileWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

fn debounce_loop(
    rx: mpsc::Receiver<Event>,
    stop: std::sync::Arc<std::sync::atomic::AtomicBool>,
    on_changed: impl Fn(Vec<PathBuf>),
) {
    let mut pending: HashMap<PathBuf, Instant> = HashMap::new();

    loop {
        if stop.load(std::sync::atomic::Ordering::SeqCst) {
            return;
        }
        match rx.recv_timeout(Duration::from_millis(100)) {
            Ok(event) => {
                let relevant =
                    matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_));
                if relevant {
                    let now = Instant::now();
                    for path in event.paths {
                        pending.insert(path, now);
                    }
                }
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {
                if pending.is_empty() {
                    continue;
                }
                let cutoff = Instant::now() - Duration::from_millis(DEBOUNCE_MS);
                let ready: Vec<PathBuf> =
                    pending.iter().filter(|(_, t)| **t <= cutoff).map(|(p, _)| p.clone()).collect();
                if ready.is_empty() {
                    continue;
                }
                for path in &ready {
                    pending.remove(path);
                }
                debug!(count = ready.len(), "dispatching debounced file changes");
                on_changed(ready);
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                warn!("file watcher channel disconnected");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn detects_file_creation() {
        let dir = tempfile::tempdir().unwrap();
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_clone = seen.clone();

        let mut watcher =
            FileWatcher::start(dir.path(), move |paths| {
                if !paths.is_empty() {
                    seen_clone.fetch_add(1, Ordering::SeqCst);
                }
            })
            .unwrap();

        std::thread::sleep(Duration::from_millis(50));
        std::fs::write(dir.path().join("new_file.rs"), "fn x() {}\n").unwrap();
        std::thread::sleep(Duration::from_millis(800));

        assert!(seen.load(Ordering::SeqCst) > 0);
        watcher.stop();
    }
}
