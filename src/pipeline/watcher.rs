//! Debounced recursive file watching over the configured root.
//!
//! Filesystem events are debounced (default window 10 s) so save bursts
//! collapse into one emission per path, then filtered (extension whitelist,
//! excluded components, editor temp suffixes) and fed into the priority
//! queue at NORMAL priority. Emission order does not matter — the queue
//! dedups.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::RecursiveMode;
use notify_debouncer_full::{DebounceEventResult, new_debouncer};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::config::{EXCLUDED_COMPONENTS, TEMP_FILE_SUFFIXES, is_supported_extension};
use crate::error::{EngineError, EngineResult};
use crate::types::Priority;

use super::queue::IngestQueue;

type Debouncer = notify_debouncer_full::Debouncer<
    notify::RecommendedWatcher,
    notify_debouncer_full::RecommendedCache,
>;

pub struct WatchService {
    root: PathBuf,
    debounce_ms: u64,
    queue: Arc<IngestQueue>,
    handle: Mutex<Option<Debouncer>>,
}

impl WatchService {
    pub fn new(root: PathBuf, debounce_ms: u64, queue: Arc<IngestQueue>) -> Self {
        Self {
            root,
            debounce_ms,
            queue,
            handle: Mutex::new(None),
        }
    }

    pub fn start(&self) -> EngineResult<()> {
        let mut handle = self.handle.lock();
        if handle.is_some() {
            return Ok(());
        }

        let root = dunce::canonicalize(&self.root)?;
        let queue = self.queue.clone();
        let event_root = root.clone();

        let mut debouncer = new_debouncer(
            Duration::from_millis(self.debounce_ms),
            None,
            move |result: DebounceEventResult| match result {
                Ok(events) => {
                    for event in &events {
                        if !is_relevant_kind(&event.kind) {
                            continue;
                        }
                        for path in &event.paths {
                            if let Some(key) = watchable_key(&event_root, path) {
                                debug!(path = %key, "watcher emitting debounced change");
                                queue.enqueue(&key, Priority::Normal, false);
                            }
                        }
                    }
                }
                Err(errors) => {
                    for e in errors {
                        warn!("file watcher error: {e:?}");
                    }
                }
            },
        )
        .map_err(|e| EngineError::Internal(anyhow::anyhow!("watcher init failed: {e}")))?;

        debouncer
            .watch(root.as_path(), RecursiveMode::Recursive)
            .map_err(|e| EngineError::Internal(anyhow::anyhow!("watch failed: {e}")))?;

        *handle = Some(debouncer);
        info!(root = %root.display(), debounce_ms = self.debounce_ms, "file watcher started");
        Ok(())
    }

    pub fn stop(&self) {
        if self.handle.lock().take().is_some() {
            info!("file watcher stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.lock().is_some()
    }
}

fn is_relevant_kind(kind: &notify::EventKind) -> bool {
    use notify::EventKind;
    matches!(
        kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    )
}

/// Filter an event path and convert it to a root-relative canonical key.
/// Returns None for excluded directories, temp files, unsupported
/// extensions, and paths outside the root.
pub fn watchable_key(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;

    for component in rel.components() {
        if let std::path::Component::Normal(name) = component {
            let name = name.to_string_lossy();
            if EXCLUDED_COMPONENTS.contains(&name.as_ref()) || name.starts_with('.') {
                return None;
            }
        }
    }

    let file_name = path.file_name()?.to_string_lossy().to_lowercase();
    if TEMP_FILE_SUFFIXES.iter().any(|s| file_name.ends_with(s)) {
        return None;
    }

    let ext = path
        .extension()
        .unwrap_or_default()
        .to_string_lossy()
        .to_lowercase();
    if !is_supported_extension(&ext) {
        return None;
    }

    Some(rel.to_string_lossy().replace('\\', "/"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filters_excluded_and_temp_paths() {
        let root = Path::new("/ws");
        assert_eq!(
            watchable_key(root, Path::new("/ws/docs/note.md")).as_deref(),
            Some("docs/note.md")
        );
        assert!(watchable_key(root, Path::new("/ws/.git/config.md")).is_none());
        assert!(watchable_key(root, Path::new("/ws/node_modules/a/b.js")).is_none());
        assert!(
            watchable_key(root, Path::new("/ws/.lodestone-quarantine/x.md")).is_none()
        );
        assert!(watchable_key(root, Path::new("/ws/a/file.md.swp")).is_none());
        assert!(watchable_key(root, Path::new("/ws/a/file.md~")).is_none());
        assert!(watchable_key(root, Path::new("/ws/a/binary.exe")).is_none());
        assert!(watchable_key(root, Path::new("/other/file.md")).is_none());
    }

    #[test]
    fn watcher_feeds_queue_after_debounce() {
        let dir = tempfile::tempdir().unwrap();
        let queue = Arc::new(IngestQueue::new(64));
        let watcher = WatchService::new(dir.path().to_path_buf(), 100, queue.clone());
        watcher.start().unwrap();

        std::fs::write(dir.path().join("hello.md"), "# hi").unwrap();

        // debounce window (100ms) + slack for the notify backend
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while queue.size() == 0 && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(50));
        }
        watcher.stop();

        assert!(queue.contains("hello.md"), "expected hello.md in queue");
    }
}
