use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use scanflow_model::{
    IndexedFile, LibraryAggregate, LibraryId, LibraryRecord, ScanDelta,
};
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{Result, ScanError};

/// Narrow persistence contract consumed by the scan pipeline.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LibraryRepository: Send + Sync {
    /// `Ok(None)` when no library has this id.
    async fn get_by_id(
        &self,
        library_id: LibraryId,
    ) -> Result<Option<LibraryRecord>>;

    async fn save_scan_results(
        &self,
        library_id: LibraryId,
        delta: ScanDelta,
    ) -> Result<()>;
}

/// Fetch a library and convert it into its validated domain form.
pub async fn resolve_library(
    repository: &dyn LibraryRepository,
    library_id: LibraryId,
) -> Result<LibraryAggregate> {
    let record = repository
        .get_by_id(library_id)
        .await?
        .ok_or_else(|| ScanError::LibraryNotFound(library_id.to_string()))?;

    LibraryAggregate::try_from(record)
        .map_err(|err| ScanError::LibraryUnconvertible(err.to_string()))
}

/// Repository backed by a map; applies saved deltas to the stored index so a
/// following scan sees the updated state.
#[derive(Debug, Default, Clone)]
pub struct InMemoryLibraryRepository {
    libraries: Arc<RwLock<HashMap<LibraryId, LibraryRecord>>>,
    saved: Arc<RwLock<Vec<(LibraryId, ScanDelta)>>>,
}

impl InMemoryLibraryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, record: LibraryRecord) {
        let mut guard = self.libraries.write().await;
        guard.insert(record.id, record);
    }

    pub async fn remove(&self, library_id: LibraryId) -> Option<LibraryRecord> {
        let mut guard = self.libraries.write().await;
        guard.remove(&library_id)
    }

    /// Every delta saved so far, oldest first.
    pub async fn saved_deltas(&self) -> Vec<(LibraryId, ScanDelta)> {
        self.saved.read().await.clone()
    }
}

#[async_trait]
impl LibraryRepository for InMemoryLibraryRepository {
    async fn get_by_id(
        &self,
        library_id: LibraryId,
    ) -> Result<Option<LibraryRecord>> {
        let guard = self.libraries.read().await;
        Ok(guard.get(&library_id).cloned())
    }

    async fn save_scan_results(
        &self,
        library_id: LibraryId,
        delta: ScanDelta,
    ) -> Result<()> {
        {
            let mut guard = self.libraries.write().await;
            let record = guard.get_mut(&library_id).ok_or_else(|| {
                ScanError::LibraryNotFound(library_id.to_string())
            })?;

            let removals: HashSet<&Path> =
                delta.removals.iter().map(PathBuf::as_path).collect();
            record
                .indexed_files
                .retain(|file| !removals.contains(file.path.as_path()));

            let mut positions: HashMap<PathBuf, usize> = record
                .indexed_files
                .iter()
                .enumerate()
                .map(|(i, file)| (file.path.clone(), i))
                .collect();
            for upsert in &delta.upserts {
                match positions.get(&upsert.path) {
                    Some(&i) => record.indexed_files[i].signature = upsert.signature,
                    None => {
                        positions.insert(upsert.path.clone(), record.indexed_files.len());
                        record.indexed_files.push(IndexedFile {
                            path: upsert.path.clone(),
                            signature: upsert.signature,
                        });
                    }
                }
            }
        }

        debug!(
            target: "scan::jobs",
            library_id = %library_id,
            upserts = delta.upserts.len(),
            removals = delta.removals.len(),
            "saved scan results"
        );
        self.saved.write().await.push((library_id, delta));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scanflow_model::{FileRecord, FileSignature};
    use std::path::PathBuf;

    fn record(locations: Vec<String>) -> LibraryRecord {
        LibraryRecord {
            id: LibraryId::new(),
            name: "Shows".into(),
            content_locations: locations,
            indexed_files: vec![IndexedFile {
                path: PathBuf::from("/shows/old.mkv"),
                signature: FileSignature {
                    size: 1,
                    modified: None,
                },
            }],
        }
    }

    #[tokio::test]
    async fn resolve_reports_missing_library() {
        let repo = InMemoryLibraryRepository::new();
        let err = resolve_library(&repo, LibraryId::new()).await.unwrap_err();
        assert!(matches!(err, ScanError::LibraryNotFound(_)));
    }

    #[tokio::test]
    async fn resolve_reports_unconvertible_library() {
        let repo = InMemoryLibraryRepository::new();
        let record = record(vec!["relative/path".into()]);
        let id = record.id;
        repo.insert(record).await;

        let err = resolve_library(&repo, id).await.unwrap_err();
        assert!(matches!(err, ScanError::LibraryUnconvertible(_)));
    }

    #[tokio::test]
    async fn save_applies_delta_to_index() {
        let repo = InMemoryLibraryRepository::new();
        let record = record(vec!["/shows".into()]);
        let id = record.id;
        repo.insert(record).await;

        let delta = ScanDelta {
            upserts: vec![FileRecord {
                path: PathBuf::from("/shows/new.mkv"),
                location_index: 0,
                signature: FileSignature {
                    size: 42,
                    modified: None,
                },
            }],
            removals: vec![PathBuf::from("/shows/old.mkv")],
        };
        repo.save_scan_results(id, delta.clone()).await.unwrap();

        let stored = repo.get_by_id(id).await.unwrap().unwrap();
        assert_eq!(stored.indexed_files.len(), 1);
        assert_eq!(stored.indexed_files[0].path, PathBuf::from("/shows/new.mkv"));
        assert_eq!(repo.saved_deltas().await, vec![(id, delta)]);
    }

    #[tokio::test]
    async fn large_deltas_update_in_place() {
        const FILES: usize = 20_000;
        let repo = InMemoryLibraryRepository::new();
        let mut library = record(vec!["/shows".into()]);
        library.indexed_files = (0..FILES)
            .map(|i| IndexedFile {
                path: PathBuf::from(format!("/shows/{i:05}.mkv")),
                signature: FileSignature {
                    size: 1,
                    modified: None,
                },
            })
            .collect();
        let id = library.id;
        repo.insert(library).await;

        let upserts = (0..FILES)
            .step_by(2)
            .map(|i| FileRecord {
                path: PathBuf::from(format!("/shows/{i:05}.mkv")),
                location_index: 0,
                signature: FileSignature {
                    size: 2,
                    modified: None,
                },
            })
            .chain(std::iter::once(FileRecord {
                path: PathBuf::from("/shows/extra.mkv"),
                location_index: 0,
                signature: FileSignature {
                    size: 3,
                    modified: None,
                },
            }))
            .collect();
        let removals = (1..FILES)
            .step_by(2)
            .map(|i| PathBuf::from(format!("/shows/{i:05}.mkv")))
            .collect();

        let started = std::time::Instant::now();
        repo.save_scan_results(id, ScanDelta { upserts, removals })
            .await
            .unwrap();
        assert!(started.elapsed() < std::time::Duration::from_secs(5));

        let stored = repo.get_by_id(id).await.unwrap().unwrap();
        assert_eq!(stored.indexed_files.len(), FILES / 2 + 1);
        assert!(stored
            .indexed_files
            .iter()
            .all(|file| file.signature.size >= 2));
    }
}
