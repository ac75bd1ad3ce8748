//! Drop-directory watcher.
//!
//! Wraps a debounced notifier scoped to one directory (non-recursive) and
//! turns creation and move-in notifications into [`IngestEvent`]s on a tokio
//! channel. A single consumer drains the channel, so files are handled one
//! at a time in arrival order.

use crate::models::{IngestEvent, IngestEventKind};
use notify::event::{CreateKind, ModifyKind, RenameMode};
use notify::{EventKind, RecommendedWatcher, RecursiveMode};
use notify_debouncer_full::{
    new_debouncer, DebounceEventResult, DebouncedEvent, Debouncer, RecommendedCache,
};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

const SYNC_SENTINELS: [&str; 2] = ["desktop.ini", "thumbs.db"];
const PARTIAL_SUFFIXES: [&str; 3] = [".tmp", ".crdownload", ".part"];

/// Hidden files, sync-client placeholders and partial downloads.
pub fn is_ignored(path: &Path) -> bool {
    let Some(name) = path.file_name().map(|name| name.to_string_lossy().to_lowercase()) else {
        return true;
    };

    name.starts_with('.')
        || name.starts_with("~$")
        || SYNC_SENTINELS.contains(&name.as_str())
        || PARTIAL_SUFFIXES.iter().any(|suffix| name.ends_with(suffix))
}

pub struct DropWatcher {
    debouncer: Debouncer<RecommendedWatcher, RecommendedCache>,
    drop_dir: PathBuf,
}

impl DropWatcher {
    pub fn new(
        drop_dir: impl Into<PathBuf>,
        debounce: Duration,
        event_tx: mpsc::Sender<IngestEvent>,
    ) -> Result<Self, notify::Error> {
        let drop_dir = drop_dir.into();
        // Notifiers such as FSEvents report resolved paths.
        let watched = drop_dir.canonicalize().map_err(notify::Error::io)?;

        let debouncer = new_debouncer(debounce, None, move |result: DebounceEventResult| {
            handle_debounced_events(result, &watched, &event_tx);
        })?;

        Ok(Self {
            debouncer,
            drop_dir,
        })
    }

    pub fn watch(&mut self) -> Result<(), notify::Error> {
        debug!(path = %self.drop_dir.display(), "starting to watch drop directory");
        self.debouncer
            .watch(&self.drop_dir, RecursiveMode::NonRecursive)
    }

    pub fn unwatch(&mut self) -> Result<(), notify::Error> {
        debug!(path = %self.drop_dir.display(), "stopping watch");
        self.debouncer.unwatch(&self.drop_dir)
    }
}

fn handle_debounced_events(
    result: DebounceEventResult,
    drop_dir: &Path,
    event_tx: &mpsc::Sender<IngestEvent>,
) {
    match result {
        Ok(events) => {
            for event in events {
                if let Some(ingest_event) = convert_event(&event, drop_dir) {
                    // Runs on the notifier's own thread, outside the runtime.
                    if event_tx.blocking_send(ingest_event).is_err() {
                        warn!("ingest channel closed");
                        break;
                    }
                }
            }
        }
        Err(errors) => {
            for error in errors {
                error!("watch error: {error}");
            }
        }
    }
}

pub(crate) fn convert_event(event: &DebouncedEvent, drop_dir: &Path) -> Option<IngestEvent> {
    let (path, kind) = match &event.kind {
        EventKind::Create(CreateKind::Folder) => return None,
        EventKind::Create(_) => (event.paths.first()?.clone(), IngestEventKind::Created),
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
            (event.paths.first()?.clone(), IngestEventKind::MovedIn)
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            (event.paths.get(1)?.clone(), IngestEventKind::MovedIn)
        }
        // Some backends cannot tell the two halves of a rename apart.
        EventKind::Modify(ModifyKind::Name(RenameMode::Any)) => {
            let path = event.paths.first()?.clone();
            if !path.exists() {
                return None;
            }
            (path, IngestEventKind::MovedIn)
        }
        _ => return None,
    };

    if !in_drop_dir(&path, drop_dir) || is_ignored(&path) || path.is_dir() {
        return None;
    }

    Some(IngestEvent::new(path, kind))
}

/// True when `path` sits directly in `drop_dir`, after resolving symlinks
/// and relative components on both sides.
fn in_drop_dir(path: &Path, drop_dir: &Path) -> bool {
    let Some(parent) = path.parent() else {
        return false;
    };
    if parent == drop_dir {
        return true;
    }
    match (parent.canonicalize(), drop_dir.canonicalize()) {
        (Ok(parent), Ok(drop_dir)) => parent == drop_dir,
        _ => false,
    }
}

/// Remembers recently admitted paths so a create and a move-in for the same
/// arrival trigger one pipeline run.
#[derive(Debug)]
pub struct RecentPaths {
    window: Duration,
    seen: HashMap<PathBuf, Instant>,
}

impl RecentPaths {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            seen: HashMap::new(),
        }
    }

    /// Returns false when `path` was already admitted within the window.
    pub fn admit(&mut self, path: &Path, now: Instant) -> bool {
        let window = self.window;
        self.seen
            .retain(|_, admitted| now.saturating_duration_since(*admitted) < window);

        if self.seen.contains_key(path) {
            return false;
        }

        self.seen.insert(path.to_path_buf(), now);
        true
    }

    /// Lets the next event for `path` through, e.g. once its file has left.
    pub fn forget(&mut self, path: &Path) {
        self.seen.remove(path);
    }
}
