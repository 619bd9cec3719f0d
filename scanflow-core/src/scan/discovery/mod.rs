//! Breadth-first discovery of files under a library's content locations.
//!
//! [`DiscoveryTraversal`] is a lazy, forward-only iterator driven by an
//! explicit queue of pending directories, so memory grows with the width of
//! the tree rather than the call stack growing with its depth. Roots are
//! processed one after another; within a root, every file of a directory is
//! yielded before that directory's subdirectories are queued.
//!
//! A directory that cannot be listed is logged, skipped and remembered, so
//! callers can tell "not found" apart from "not looked at". Cancellation is
//! checked whenever a directory is dequeued and before every yielded entry.

pub mod fs;

use std::collections::VecDeque;
use std::iter::FusedIterator;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use scanflow_model::DiscoveredEntry;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub use fs::{EntryKind, FileSystem, FsEntry, InMemoryFs, RealFs};

/// Reusable description of what to traverse. Every call to
/// [`DiscoveryPlan::traverse`] yields a fresh, single-use traversal.
#[derive(Debug, Clone)]
pub struct DiscoveryPlan {
    pub roots: Vec<PathBuf>,
    pub include_hidden: bool,
}

impl DiscoveryPlan {
    pub fn new(roots: Vec<PathBuf>, include_hidden: bool) -> Self {
        Self {
            roots,
            include_hidden,
        }
    }

    pub fn traverse(
        &self,
        fs: Arc<dyn FileSystem>,
        cancel: CancellationToken,
    ) -> DiscoveryTraversal {
        DiscoveryTraversal::new(
            fs,
            self.roots.iter().cloned(),
            self.include_hidden,
            cancel,
        )
    }
}

/// Counters describing what a traversal did so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TraversalStats {
    pub directories_visited: usize,
    pub directories_skipped: usize,
    pub hidden_skipped: usize,
    pub files_yielded: usize,
}

struct PendingDir {
    path: PathBuf,
    depth: usize,
}

pub struct DiscoveryTraversal {
    fs: Arc<dyn FileSystem>,
    roots: VecDeque<PathBuf>,
    include_hidden: bool,
    cancel: CancellationToken,
    current_root: PathBuf,
    pending: VecDeque<PendingDir>,
    ready: VecDeque<DiscoveredEntry>,
    stats: TraversalStats,
    skipped: Vec<PathBuf>,
    done: bool,
    cancelled: bool,
}

impl std::fmt::Debug for DiscoveryTraversal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscoveryTraversal")
            .field("remaining_roots", &self.roots.len())
            .field("current_root", &self.current_root)
            .field("pending_dirs", &self.pending.len())
            .field("buffered", &self.ready.len())
            .field("include_hidden", &self.include_hidden)
            .field("stats", &self.stats)
            .field("skipped", &self.skipped)
            .field("done", &self.done)
            .field("cancelled", &self.cancelled)
            .finish()
    }
}

impl DiscoveryTraversal {
    pub fn new(
        fs: Arc<dyn FileSystem>,
        roots: impl IntoIterator<Item = PathBuf>,
        include_hidden: bool,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            fs,
            roots: roots.into_iter().collect(),
            include_hidden,
            cancel,
            current_root: PathBuf::new(),
            pending: VecDeque::new(),
            ready: VecDeque::new(),
            stats: TraversalStats::default(),
            skipped: Vec::new(),
            done: false,
            cancelled: false,
        }
    }

    pub fn stats(&self) -> TraversalStats {
        self.stats
    }

    /// Directories (roots included) that could not be listed so far.
    pub fn skipped_directories(&self) -> &[PathBuf] {
        &self.skipped
    }

    pub fn into_skipped_directories(self) -> Vec<PathBuf> {
        self.skipped
    }

    /// True once the traversal stopped because the token fired.
    pub fn was_cancelled(&self) -> bool {
        self.cancelled
    }

    fn stop_cancelled(&mut self) {
        if !self.cancelled {
            debug!(
                target: "scan::discovery",
                yielded = self.stats.files_yielded,
                pending_dirs = self.pending.len(),
                "traversal cancelled"
            );
        }
        self.cancelled = true;
        self.done = true;
        self.pending.clear();
        self.ready.clear();
        self.roots.clear();
    }

    fn visit(&mut self, dir: PendingDir) {
        let listing = match self.fs.read_dir(&dir.path) {
            Ok(listing) => listing,
            Err(e) => {
                self.stats.directories_skipped += 1;
                warn!(
                    target: "scan::discovery",
                    path = %dir.path.display(),
                    error = %e,
                    "skipping unreadable directory"
                );
                self.skipped.push(dir.path);
                return;
            }
        };
        self.stats.directories_visited += 1;

        let mut subdirs = Vec::new();
        for entry in listing {
            if entry.hidden && !self.include_hidden {
                self.stats.hidden_skipped += 1;
                continue;
            }
            match entry.kind {
                EntryKind::File => {
                    let discovered = self.to_discovered(entry, dir.depth);
                    self.ready.push_back(discovered);
                }
                EntryKind::Dir => subdirs.push(PendingDir {
                    path: entry.path,
                    depth: dir.depth + 1,
                }),
            }
        }
        self.pending.extend(subdirs);
    }

    fn to_discovered(&self, entry: FsEntry, depth: usize) -> DiscoveredEntry {
        DiscoveredEntry {
            path: entry.path,
            file_name: entry.name,
            size: entry.len,
            modified: entry.modified.map(DateTime::<Utc>::from),
            hidden: entry.hidden,
            root: self.current_root.clone(),
            depth,
        }
    }

    fn start_root(&mut self, root: PathBuf) {
        debug!(target: "scan::discovery", root = %root.display(), "traversing content location");
        self.pending.push_back(PendingDir {
            path: root.clone(),
            depth: 0,
        });
        self.current_root = root;
    }

    /// Root currently being traversed.
    pub fn current_root(&self) -> &Path {
        &self.current_root
    }
}

impl Iterator for DiscoveryTraversal {
    type Item = DiscoveredEntry;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.done {
                return None;
            }
            if self.cancel.is_cancelled() {
                self.stop_cancelled();
                return None;
            }

            if let Some(entry) = self.ready.pop_front() {
                self.stats.files_yielded += 1;
                return Some(entry);
            }

            if let Some(dir) = self.pending.pop_front() {
                self.visit(dir);
                continue;
            }

            match self.roots.pop_front() {
                Some(root) => self.start_root(root),
                None => {
                    self.done = true;
                    return None;
                }
            }
        }
    }
}

impl FusedIterator for DiscoveryTraversal {}
