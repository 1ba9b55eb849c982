//! File watching for tracked working copies.
//!
//! [`FileWatcher`] runs the platform watcher behind `notify-debouncer-full`.
//! The debouncer holds events for the settle delay, stitches the halves of a
//! rename together and drops superseded events, so the consumer sees the end
//! state of an editor's save-by-rename instead of each step. What comes out
//! is mapped to [`WatchEvent`]s by [`translate`] and sent down a tokio
//! channel.
//!
//! The watcher observes each tracked file's parent directory, because renames
//! are reported on directories and a watch placed on the file itself does not
//! survive the file being replaced.

use crate::{VcError, VcResult};
use docvault_util::path::normalize;
use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode};
use notify_debouncer_full::{new_debouncer, DebounceEventResult, Debouncer, RecommendedCache};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

/// Settled events as delivered by [`FileWatcher`].
pub type WatchEvents = mpsc::UnboundedReceiver<WatchEvent>;

/// A filesystem change affecting a watched path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    /// A file moved from `old` to `new`.
    Renamed { old: PathBuf, new: PathBuf },
    /// A file disappeared.
    Deleted { path: PathBuf },
}

impl WatchEvent {
    /// The path the event is keyed by: the previous path of a rename.
    pub fn subject(&self) -> &Path {
        match self {
            Self::Renamed { old, .. } => old,
            Self::Deleted { path } => path,
        }
    }
}

/// Registration returned by [`FileWatcher::watch`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WatchHandle {
    path: PathBuf,
}

impl WatchHandle {
    /// The watched file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

struct Registry {
    debouncer: Debouncer<RecommendedWatcher, RecommendedCache>,
    /// Watched files.
    files: HashSet<PathBuf>,
    /// Parent directories with the number of watched files in each.
    dirs: HashMap<PathBuf, usize>,
}

/// OS-level watcher over the working copies of tracked documents.
///
/// Registration is guarded by a plain mutex; it never blocks on event
/// delivery, which happens on the watcher's own thread.
pub struct FileWatcher {
    registry: Mutex<Registry>,
}

impl std::fmt::Debug for FileWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileWatcher")
            .field("watched", &self.watched().len())
            .finish()
    }
}

impl FileWatcher {
    /// Start the OS watcher. Events are held for `settle` before delivery.
    /// Returns the watcher and the receiving end of its event stream.
    pub fn new(settle: Duration) -> VcResult<(Self, WatchEvents)> {
        let (tx, rx) = mpsc::unbounded_channel();

        let debouncer = new_debouncer(settle, None, move |result: DebounceEventResult| {
            match result {
                Ok(events) => {
                    for event in translate(events.iter().map(|e| &e.event)) {
                        trace!(?event, "File event");
                        // Receiver gone means the reconciler stopped
                        let _ = tx.send(event);
                    }
                }
                Err(errors) => {
                    for e in errors {
                        warn!(error = %e, "File watcher error");
                    }
                }
            }
        })?;

        Ok((
            Self {
                registry: Mutex::new(Registry {
                    debouncer,
                    files: HashSet::new(),
                    dirs: HashMap::new(),
                }),
            },
            rx,
        ))
    }

    /// Start watching a file. Watching an already watched file is a no-op.
    pub fn watch(&self, path: &Path) -> VcResult<WatchHandle> {
        let path = normalize(path);
        let dir = parent_dir(&path)?;
        let mut registry = self.lock();

        if registry.files.contains(&path) {
            return Ok(WatchHandle { path });
        }

        if !registry.dirs.contains_key(&dir) {
            registry
                .debouncer
                .watch(&dir, RecursiveMode::NonRecursive)
                .map_err(|e| VcError::Watch(format!("{}: {e}", dir.display())))?;
            debug!(dir = %dir.display(), "Watching directory");
        }
        *registry.dirs.entry(dir).or_insert(0) += 1;
        registry.files.insert(path.clone());

        debug!(path = %path.display(), "Watching file");
        Ok(WatchHandle { path })
    }

    /// Stop watching the file behind `handle`.
    pub fn unwatch(&self, handle: &WatchHandle) {
        self.unwatch_path(&handle.path);
    }

    /// Stop watching a file. Unknown paths are ignored.
    pub fn unwatch_path(&self, path: &Path) {
        let path = normalize(path);
        let mut registry = self.lock();

        if !registry.files.remove(&path) {
            return;
        }
        debug!(path = %path.display(), "Stopped watching file");

        let Ok(dir) = parent_dir(&path) else { return };
        let remaining = match registry.dirs.get_mut(&dir) {
            Some(count) => {
                *count = count.saturating_sub(1);
                *count
            }
            None => return,
        };

        if remaining == 0 {
            registry.dirs.remove(&dir);
            // The directory may already be gone, which also ends the watch
            if let Err(e) = registry.debouncer.unwatch(&dir) {
                debug!(dir = %dir.display(), error = %e, "Directory unwatch failed");
            }
        }
    }

    /// Whether `path` is currently watched.
    pub fn is_watched(&self, path: &Path) -> bool {
        self.lock().files.contains(&normalize(path))
    }

    /// All watched files.
    pub fn watched(&self) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = self.lock().files.iter().cloned().collect();
        files.sort();
        files
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn parent_dir(path: &Path) -> VcResult<PathBuf> {
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => Ok(dir.to_path_buf()),
        _ => Err(VcError::InvalidPath {
            path: path.to_path_buf(),
            reason: "path has no parent directory".to_string(),
        }),
    }
}

/// Map debounced `notify` events to [`WatchEvent`]s.
///
/// A stitched rename becomes [`WatchEvent::Renamed`]. A rename source the
/// debouncer could not pair, or a removal, becomes [`WatchEvent::Deleted`].
/// Rename targets without a source and content changes are dropped, as are
/// repeats of an event already in the batch.
pub fn translate<'a>(events: impl IntoIterator<Item = &'a Event>) -> Vec<WatchEvent> {
    let mut out: Vec<WatchEvent> = Vec::new();
    let mut push = |event: WatchEvent| {
        if !out.contains(&event) {
            out.push(event);
        }
    };

    for event in events {
        match event.kind {
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
                if let [old, new, ..] = event.paths.as_slice() {
                    push(WatchEvent::Renamed {
                        old: normalize(old),
                        new: normalize(new),
                    });
                }
            }
            EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {}
            EventKind::Modify(ModifyKind::Name(_)) | EventKind::Remove(_) => {
                for path in &event.paths {
                    push(WatchEvent::Deleted {
                        path: normalize(path),
                    });
                }
            }
            _ => {}
        }
    }

    out
}
