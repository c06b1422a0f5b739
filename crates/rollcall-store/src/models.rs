//! Single-slot store for the current model artifact.
//!
//! Publishing writes a uniquely named temp file in the target directory,
//! syncs it, and renames it over the current artifact. Readers see either
//! the previous artifact or the new one, never a partial file.

use rollcall_core::{ArtifactHeader, ModelArtifact, ModelHandle};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum ModelStoreError {
    #[error("model not trained yet")]
    NotTrained,
    #[error("model store I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("model artifact at {path} is unreadable: {source}")]
    Serde {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// File-backed store holding one artifact of model type `M`.
pub struct ModelStore<M> {
    path: PathBuf,
    _model: PhantomData<fn() -> M>,
}

impl<M> ModelStore<M>
where
    M: Serialize + DeserializeOwned,
{
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            _model: PhantomData,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open_current(&self) -> Result<Option<BufReader<File>>, ModelStoreError> {
        match File::open(&self.path) {
            Ok(file) => Ok(Some(BufReader::new(file))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(ModelStoreError::Io {
                path: self.path.clone(),
                source,
            }),
        }
    }

    /// Load the current artifact. Absence is [`ModelStoreError::NotTrained`].
    pub fn load_current(&self) -> Result<ModelHandle<M>, ModelStoreError> {
        let reader = self.open_current()?.ok_or(ModelStoreError::NotTrained)?;
        let artifact: ModelArtifact<M> =
            serde_json::from_reader(reader).map_err(|source| ModelStoreError::Serde {
                path: self.path.clone(),
                source,
            })?;
        tracing::debug!(
            path = %self.path.display(),
            version = artifact.version,
            identities = artifact.identity_count(),
            "loaded model artifact"
        );
        Ok(Arc::new(artifact))
    }

    /// Version and digest of the current artifact, if any.
    pub fn header(&self) -> Result<Option<ArtifactHeader>, ModelStoreError> {
        let Some(reader) = self.open_current()? else {
            return Ok(None);
        };
        serde_json::from_reader(reader)
            .map(Some)
            .map_err(|source| ModelStoreError::Serde {
                path: self.path.clone(),
                source,
            })
    }

    /// Version of the current artifact, or `None` before the first training.
    pub fn current_version(&self) -> Result<Option<u64>, ModelStoreError> {
        Ok(self.header()?.map(|header| header.version))
    }

    /// Atomically replace the current artifact.
    pub fn save(&self, artifact: &ModelArtifact<M>) -> Result<(), ModelStoreError> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir).map_err(|source| ModelStoreError::Io {
            path: dir.clone(),
            source,
        })?;

        let file_name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "model".to_string());
        let tmp = dir.join(format!(".{file_name}.tmp-{}", Uuid::new_v4().simple()));

        if let Err(e) = write_synced(&tmp, artifact) {
            let _ = fs::remove_file(&tmp);
            return Err(e);
        }
        if let Err(source) = fs::rename(&tmp, &self.path) {
            let _ = fs::remove_file(&tmp);
            return Err(ModelStoreError::Io {
                path: self.path.clone(),
                source,
            });
        }

        tracing::info!(
            path = %self.path.display(),
            version = artifact.version,
            images = artifact.image_count,
            identities = artifact.identity_count(),
            "published model artifact"
        );
        Ok(())
    }
}

fn write_synced<T: Serialize>(path: &Path, value: &T) -> Result<(), ModelStoreError> {
    let io_err = |source| ModelStoreError::Io {
        path: path.to_path_buf(),
        source,
    };
    let file = File::create(path).map_err(io_err)?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer(&mut writer, value).map_err(|source| ModelStoreError::Serde {
        path: path.to_path_buf(),
        source,
    })?;
    writer.flush().map_err(io_err)?;
    let file = writer.into_inner().map_err(|e| io_err(e.into_error()))?;
    file.sync_all().map_err(io_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rollcall_core::{Identity, LabelMapping, ARTIFACT_FORMAT};

    fn artifact(version: u64, names: &[&str]) -> ModelArtifact<Vec<u32>> {
        ModelArtifact {
            format: ARTIFACT_FORMAT,
            version,
            digest: format!("digest-{version}"),
            classifier: "stub".into(),
            face_size: 8,
            trained_at: Utc::now(),
            image_count: names.len(),
            mapping: LabelMapping::compute(names.iter().map(|n| Identity::new(*n).unwrap())),
            model: vec![1, 2, 3],
        }
    }

    #[test]
    fn test_load_before_save_is_not_trained() {
        let dir = tempfile::tempdir().unwrap();
        let store: ModelStore<Vec<u32>> = ModelStore::new(dir.path().join("model.json"));
        assert!(matches!(store.load_current(), Err(ModelStoreError::NotTrained)));
        assert!(store.header().unwrap().is_none());
        assert_eq!(store.current_version().unwrap(), None);
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = ModelStore::new(dir.path().join("nested/model.json"));
        store.save(&artifact(1, &["alice"])).unwrap();

        let loaded = store.load_current().unwrap();
        assert_eq!(loaded.version, 1);
        assert_eq!(loaded.model, vec![1, 2, 3]);
        assert_eq!(loaded.identity_count(), 1);

        let header = store.header().unwrap().unwrap();
        assert_eq!(header.digest, "digest-1");
        assert_eq!(store.current_version().unwrap(), Some(1));
    }

    #[test]
    fn test_save_replaces_and_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = ModelStore::new(dir.path().join("model.json"));
        store.save(&artifact(1, &["alice"])).unwrap();
        store.save(&artifact(2, &["alice", "bob"])).unwrap();

        assert_eq!(store.load_current().unwrap().version, 2);
        let entries: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1, "temp files must be renamed away");
    }

    #[test]
    fn test_handles_outlive_replacement() {
        let dir = tempfile::tempdir().unwrap();
        let store = ModelStore::new(dir.path().join("model.json"));
        store.save(&artifact(1, &["alice"])).unwrap();
        let held = store.load_current().unwrap();
        store.save(&artifact(2, &["alice", "bob"])).unwrap();

        assert_eq!(held.version, 1);
        assert_eq!(held.identity_count(), 1);
    }

    #[test]
    fn test_corrupt_artifact_is_an_error_not_untrained() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");
        fs::write(&path, b"{ truncated").unwrap();
        let store: ModelStore<Vec<u32>> = ModelStore::new(&path);
        assert!(matches!(store.load_current(), Err(ModelStoreError::Serde { .. })));
    }
}
