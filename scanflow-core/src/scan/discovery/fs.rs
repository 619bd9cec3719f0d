use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tracing::{debug, warn};

/// Minimal, synchronous filesystem abstraction used by the discovery
/// traversal. Listings return only the immediate children of `path`.
pub trait FileSystem: Send + Sync {
    fn read_dir(&self, path: &Path) -> io::Result<Vec<FsEntry>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Dir,
}

/// Lightweight metadata for one directory child.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FsEntry {
    pub path: PathBuf,
    pub name: String,
    pub kind: EntryKind,
    pub len: u64,
    pub modified: Option<SystemTime>,
    pub hidden: bool,
}

impl FsEntry {
    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Dir
    }

    pub fn is_file(&self) -> bool {
        self.kind == EntryKind::File
    }
}

/// Dotfiles are hidden everywhere; Windows additionally honours the hidden
/// attribute.
fn is_hidden(name: &str, _metadata: &std::fs::Metadata) -> bool {
    if name.starts_with('.') {
        return true;
    }

    #[cfg(windows)]
    {
        use std::os::windows::fs::MetadataExt;
        const FILE_ATTRIBUTE_HIDDEN: u32 = 0x2;
        if _metadata.file_attributes() & FILE_ATTRIBUTE_HIDDEN != 0 {
            return true;
        }
    }

    false
}

/// Real filesystem implementation backed by `std::fs`.
///
/// Listings are sorted by name so traversal order is stable across
/// platforms. Symlinked directories are not followed.
#[derive(Debug, Default, Clone, Copy)]
pub struct RealFs;

impl RealFs {
    pub fn new() -> Self {
        Self
    }
}

impl FileSystem for RealFs {
    fn read_dir(&self, path: &Path) -> io::Result<Vec<FsEntry>> {
        let mut entries = Vec::new();

        for entry_res in std::fs::read_dir(path)? {
            let entry = match entry_res {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(target: "scan::discovery", path = %path.display(), error = %e, "skipping unreadable directory entry");
                    continue;
                }
            };

            let name = entry.file_name().to_string_lossy().to_string();
            let entry_path = entry.path();

            let file_type = match entry.file_type() {
                Ok(file_type) => file_type,
                Err(e) => {
                    warn!(target: "scan::discovery", entry = %name, path = %path.display(), error = %e, "skipping entry due to file type error");
                    continue;
                }
            };

            // Symlinks resolve to their target for files only.
            let metadata = if file_type.is_symlink() {
                match std::fs::metadata(&entry_path) {
                    Ok(md) if md.is_dir() => {
                        debug!(target: "scan::discovery", path = %entry_path.display(), "not following symlinked directory");
                        continue;
                    }
                    Ok(md) => md,
                    Err(e) => {
                        warn!(target: "scan::discovery", path = %entry_path.display(), error = %e, "skipping dangling symlink");
                        continue;
                    }
                }
            } else {
                match entry.metadata() {
                    Ok(md) => md,
                    Err(e) => {
                        warn!(target: "scan::discovery", entry = %name, path = %path.display(), error = %e, "skipping entry due to metadata error");
                        continue;
                    }
                }
            };

            let kind = if metadata.is_dir() {
                EntryKind::Dir
            } else if metadata.is_file() {
                EntryKind::File
            } else {
                // sockets, fifos, devices
                continue;
            };

            entries.push(FsEntry {
                hidden: is_hidden(&name, &metadata),
                path: entry_path,
                name,
                kind,
                len: if kind == EntryKind::File { metadata.len() } else { 0 },
                modified: metadata.modified().ok(),
            });
        }

        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }
}

/// In-memory filesystem for tests.
/// Note: Paths are treated literally; callers should use consistent absolute paths.
#[derive(Debug, Default, Clone)]
pub struct InMemoryFs {
    nodes: HashMap<PathBuf, Node>,
    denied: HashSet<PathBuf>,
}

#[derive(Debug, Clone)]
enum Node {
    Dir { children: Vec<PathBuf> },
    File { len: u64, modified: Option<SystemTime> },
}

impl InMemoryFs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_dir<P: Into<PathBuf>>(&mut self, path: P) {
        let path = path.into();
        if self.nodes.contains_key(&path) {
            return;
        }
        self.ensure_parent_link(&path);
        self.nodes.insert(
            path,
            Node::Dir {
                children: Vec::new(),
            },
        );
    }

    pub fn add_file<P: Into<PathBuf>>(&mut self, path: P, len: u64) {
        self.add_file_modified(path, len, None);
    }

    pub fn add_file_modified<P: Into<PathBuf>>(
        &mut self,
        path: P,
        len: u64,
        modified: Option<SystemTime>,
    ) {
        let path = path.into();
        self.ensure_parent_link(&path);
        self.nodes.insert(path, Node::File { len, modified });
    }

    /// Make `read_dir` on `path` fail with `PermissionDenied`.
    pub fn deny<P: Into<PathBuf>>(&mut self, path: P) {
        self.denied.insert(path.into());
    }

    fn ensure_parent_link(&mut self, path: &Path) {
        if let Some(parent) = path.parent() {
            if !self.nodes.contains_key(parent) {
                self.nodes.insert(
                    parent.to_path_buf(),
                    Node::Dir {
                        children: Vec::new(),
                    },
                );
                self.ensure_parent_link(parent);
            }
            if let Some(Node::Dir { children }) = self.nodes.get_mut(parent)
                && !children.iter().any(|p| p.as_path() == path)
            {
                children.push(path.to_path_buf());
            }
        }
    }
}

impl FileSystem for InMemoryFs {
    fn read_dir(&self, path: &Path) -> io::Result<Vec<FsEntry>> {
        if self.denied.contains(path) {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                format!("read_dir denied: {}", path.display()),
            ));
        }

        let children = match self.nodes.get(path) {
            Some(Node::Dir { children }) => children,
            Some(Node::File { .. }) => {
                return Err(io::Error::new(
                    io::ErrorKind::NotADirectory,
                    format!("read_dir on file: {}", path.display()),
                ));
            }
            None => {
                return Err(io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("read_dir on missing path: {}", path.display()),
                ));
            }
        };

        Ok(children
            .iter()
            .filter_map(|child| {
                let name = child.file_name()?.to_string_lossy().to_string();
                let (kind, len, modified) = match self.nodes.get(child)? {
                    Node::Dir { .. } => (EntryKind::Dir, 0, None),
                    Node::File { len, modified } => {
                        (EntryKind::File, *len, *modified)
                    }
                };
                Some(FsEntry {
                    path: child.clone(),
                    hidden: name.starts_with('.'),
                    name,
                    kind,
                    len,
                    modified,
                })
            })
            .collect())
    }
}
