use std::path::{Path, PathBuf};

use crate::entry::FileSignature;
use crate::error::{ModelError, Result};
use crate::ids::LibraryId;

/// Persistence-shaped library row as handed out by a repository.
///
/// Content locations are kept as raw strings; [`LibraryAggregate`] is the
/// validated domain view.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LibraryRecord {
    pub id: LibraryId,
    pub name: String,
    pub content_locations: Vec<String>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub indexed_files: Vec<IndexedFile>,
}

/// A file the library already knows about from a previous scan.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct IndexedFile {
    pub path: PathBuf,
    pub signature: FileSignature,
}

/// One root path configured on a library.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ContentLocation {
    pub index: usize,
    pub root: PathBuf,
}

/// Validated library: every content location is an absolute path and there is
/// at least one of them.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LibraryAggregate {
    pub id: LibraryId,
    pub name: String,
    pub content_locations: Vec<ContentLocation>,
    pub indexed_files: Vec<IndexedFile>,
}

impl LibraryAggregate {
    pub fn roots(&self) -> impl Iterator<Item = &Path> + '_ {
        self.content_locations.iter().map(|loc| loc.root.as_path())
    }

    /// Content location containing `path`; the deepest root wins when
    /// locations are nested.
    pub fn locate(&self, path: &Path) -> Option<&ContentLocation> {
        self.content_locations
            .iter()
            .filter(|loc| path.starts_with(&loc.root))
            .max_by_key(|loc| loc.root.components().count())
    }
}

impl TryFrom<LibraryRecord> for LibraryAggregate {
    type Error = ModelError;

    fn try_from(record: LibraryRecord) -> Result<Self> {
        if record.content_locations.is_empty() {
            return Err(ModelError::InvalidLibrary(format!(
                "library {} has no content locations",
                record.id
            )));
        }

        let mut content_locations =
            Vec::with_capacity(record.content_locations.len());
        for (index, raw) in record.content_locations.iter().enumerate() {
            let trimmed = raw.trim();
            if trimmed.is_empty() {
                return Err(ModelError::InvalidLibrary(format!(
                    "library {} has an empty content location",
                    record.id
                )));
            }
            let root = PathBuf::from(trimmed);
            if !root.is_absolute() {
                return Err(ModelError::InvalidLibrary(format!(
                    "content location {trimmed:?} of library {} is not absolute",
                    record.id
                )));
            }
            content_locations.push(ContentLocation { index, root });
        }

        Ok(Self {
            id: record.id,
            name: record.name,
            content_locations,
            indexed_files: record.indexed_files,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(paths: &[&str]) -> LibraryRecord {
        LibraryRecord {
            id: LibraryId::new(),
            name: "Movies".into(),
            content_locations: paths.iter().map(|p| p.to_string()).collect(),
            indexed_files: Vec::new(),
        }
    }

    #[test]
    fn converts_absolute_locations() {
        let aggregate =
            LibraryAggregate::try_from(record(&["/media/a", "/media/b"]))
                .unwrap();
        let roots: Vec<_> = aggregate.roots().collect();
        assert_eq!(roots, vec![Path::new("/media/a"), Path::new("/media/b")]);
        assert_eq!(aggregate.content_locations[1].index, 1);
    }

    #[test]
    fn rejects_library_without_locations() {
        let err = LibraryAggregate::try_from(record(&[])).unwrap_err();
        assert!(matches!(err, ModelError::InvalidLibrary(_)));
    }

    #[test]
    fn rejects_relative_location() {
        assert!(LibraryAggregate::try_from(record(&["media/a"])).is_err());
        assert!(LibraryAggregate::try_from(record(&["  "])).is_err());
    }

    #[test]
    fn locate_prefers_deepest_root() {
        let aggregate = LibraryAggregate::try_from(record(&[
            "/media",
            "/media/movies",
        ]))
        .unwrap();

        let hit = aggregate
            .locate(Path::new("/media/movies/film.mkv"))
            .unwrap();
        assert_eq!(hit.index, 1);

        let hit = aggregate.locate(Path::new("/media/music/song.flac")).unwrap();
        assert_eq!(hit.index, 0);

        assert!(aggregate.locate(Path::new("/elsewhere/file")).is_none());
    }
}
