//! Request-scoped storage of uploaded images.
//!
//! Uploads are written through an `ArtifactStore` into a `StagedArtifacts`
//! guard. Dropping the guard deletes every staged file, so cleanup happens on
//! every exit path of a request, including early returns and panics.

use crate::types::{DocumentRole, Upload};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Filename marker of the primary ID document image.
pub const ID_MARKER: &str = "_id";
/// Filename marker of the live capture image.
pub const LIVE_MARKER: &str = "_live";

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("failed to create upload directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to delete {path}: {source}")]
    Delete {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Where uploads live for the duration of a request.
pub trait ArtifactStore: Send + Sync + 'static {
    fn save(&self, upload: &Upload) -> Result<PathBuf, StorageError>;
    fn delete(&self, path: &Path) -> Result<(), StorageError>;
}

/// Stores uploads as uniquely-named files in one directory.
#[derive(Debug, Clone)]
pub struct DiskStore {
    root: PathBuf,
}

impl DiskStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(|source| StorageError::CreateDir {
            path: root.clone(),
            source,
        })?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

/// Keep only the final path component so a client name cannot escape the root.
fn file_name_of(original: &str) -> String {
    let name = original
        .rsplit(&['/', '\\'][..])
        .next()
        .unwrap_or_default()
        .trim();
    if name.is_empty() || name == "." || name == ".." {
        "upload".to_string()
    } else {
        name.to_string()
    }
}

impl ArtifactStore for DiskStore {
    fn save(&self, upload: &Upload) -> Result<PathBuf, StorageError> {
        let file_name = format!(
            "{}-{}",
            uuid::Uuid::new_v4().simple(),
            file_name_of(&upload.original_name)
        );
        let path = self.root.join(file_name);
        std::fs::write(&path, &upload.bytes).map_err(|source| StorageError::Write {
            path: path.clone(),
            source,
        })?;
        tracing::debug!(path = %path.display(), bytes = upload.bytes.len(), "upload staged");
        Ok(path)
    }

    fn delete(&self, path: &Path) -> Result<(), StorageError> {
        match std::fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StorageError::Delete {
                path: path.to_path_buf(),
                source,
            }),
        }
    }
}

/// One upload written to the store.
#[derive(Debug, Clone)]
pub struct StagedArtifact {
    pub original_name: String,
    pub path: PathBuf,
}

/// Indices of the ID document and live capture among `names`.
///
/// The ID document is the first name containing `_id`, falling back to the
/// first upload; the live capture is the first name containing `_live`.
pub fn assign_roles<S: AsRef<str>>(names: &[S]) -> (Option<usize>, Option<usize>) {
    let id = names
        .iter()
        .position(|n| n.as_ref().contains(ID_MARKER))
        .or(if names.is_empty() { None } else { Some(0) });
    let live = names.iter().position(|n| n.as_ref().contains(LIVE_MARKER));
    (id, live)
}

/// Uploads of one request; deleted from the store on drop.
pub struct StagedArtifacts<'a, S: ArtifactStore> {
    store: &'a S,
    artifacts: Vec<StagedArtifact>,
    id_index: Option<usize>,
    live_index: Option<usize>,
}

impl<'a, S: ArtifactStore> StagedArtifacts<'a, S> {
    /// Write every upload to `store`. If one write fails, the ones already
    /// written are deleted before the error is returned.
    pub fn stage(store: &'a S, uploads: &[Upload]) -> Result<Self, StorageError> {
        let names: Vec<&str> = uploads.iter().map(|u| u.original_name.as_str()).collect();
        let (id_index, live_index) = assign_roles(&names);
        let mut staged = Self {
            store,
            artifacts: Vec::with_capacity(uploads.len()),
            id_index,
            live_index,
        };
        for upload in uploads {
            let path = store.save(upload)?;
            staged.artifacts.push(StagedArtifact {
                original_name: upload.original_name.clone(),
                path,
            });
        }
        Ok(staged)
    }

    pub fn len(&self) -> usize {
        self.artifacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &StagedArtifact> {
        self.artifacts.iter()
    }

    pub fn id_document(&self) -> Option<&StagedArtifact> {
        self.id_index.and_then(|i| self.artifacts.get(i))
    }

    pub fn live_capture(&self) -> Option<&StagedArtifact> {
        self.live_index.and_then(|i| self.artifacts.get(i))
    }

    /// Primary role of the artifact at `index`.
    pub fn role(&self, index: usize) -> DocumentRole {
        if Some(index) == self.id_index {
            DocumentRole::IdDocument
        } else if Some(index) == self.live_index {
            DocumentRole::LiveCapture
        } else {
            DocumentRole::SupportingDocument
        }
    }
}

impl<S: ArtifactStore> Drop for StagedArtifacts<'_, S> {
    fn drop(&mut self) {
        for artifact in self.artifacts.drain(..) {
            if let Err(e) = self.store.delete(&artifact.path) {
                tracing::warn!(error = %e, "could not delete staged upload");
            }
        }
    }
}
