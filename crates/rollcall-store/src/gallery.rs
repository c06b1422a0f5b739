//! Per-identity enrollment image gallery on the filesystem.
//!
//! Layout: `<root>/<identity>/<label>_<suffix>.<ext>`. Images are written to
//! a hidden temp file and renamed into place, so listings never include a
//! partially written image. Hidden files are ignored when listing.

use rollcall_core::Identity;
use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use uuid::Uuid;

const DEFAULT_CAPTURE_LABEL: &str = "capture";
const MAX_LABEL_LEN: usize = 32;
const SUFFIX_LEN: usize = 8;
const MAX_NAME_ATTEMPTS: usize = 8;

#[derive(Error, Debug)]
pub enum GalleryError {
    #[error("gallery I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid image filename: {0:?}")]
    InvalidFilename(String),
    #[error("could not allocate a unique filename in {0}")]
    NameExhausted(PathBuf),
}

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> GalleryError + '_ {
    move |source| GalleryError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Reference to one stored enrollment image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRef {
    pub identity: Identity,
    pub filename: String,
    pub path: PathBuf,
}

/// Filesystem-backed gallery rooted at a directory.
#[derive(Debug, Clone)]
pub struct GalleryStore {
    root: PathBuf,
}

impl GalleryStore {
    /// Open (and create if missing) a gallery rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, GalleryError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(io_err(&root))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn identity_dir(&self, identity: &Identity) -> PathBuf {
        self.root.join(identity.as_str())
    }

    /// Store `bytes` under `identity`, returning the generated filename.
    ///
    /// Does not retrain; callers are responsible for that.
    pub fn add_image(
        &self,
        identity: &Identity,
        bytes: &[u8],
        label_hint: &str,
    ) -> Result<String, GalleryError> {
        let dir = self.identity_dir(identity);
        fs::create_dir_all(&dir).map_err(io_err(&dir))?;

        let label = sanitize_label(label_hint);
        let ext = image::guess_format(bytes)
            .ok()
            .and_then(|format| format.extensions_str().first().copied())
            .unwrap_or("jpg");

        let filename = (0..MAX_NAME_ATTEMPTS)
            .map(|_| format!("{label}_{}.{ext}", short_suffix()))
            .find(|name| !dir.join(name).exists())
            .ok_or_else(|| GalleryError::NameExhausted(dir.clone()))?;

        let target = dir.join(&filename);
        let tmp = dir.join(format!(".{filename}.part"));
        fs::write(&tmp, bytes).map_err(io_err(&tmp))?;
        if let Err(e) = fs::rename(&tmp, &target) {
            let _ = fs::remove_file(&tmp);
            return Err(GalleryError::Io {
                path: target,
                source: e,
            });
        }

        tracing::debug!(
            identity = %identity,
            file = %filename,
            bytes = bytes.len(),
            "stored enrollment image"
        );
        Ok(filename)
    }

    /// All identities with a gallery directory, in ascending order.
    ///
    /// Directory names that are not valid identities are skipped.
    pub fn list_identities(&self) -> Result<BTreeSet<Identity>, GalleryError> {
        let mut identities = BTreeSet::new();
        for entry in fs::read_dir(&self.root).map_err(io_err(&self.root))? {
            let entry = entry.map_err(io_err(&self.root))?;
            let file_type = entry.file_type().map_err(io_err(&entry.path()))?;
            if !file_type.is_dir() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
                continue;
            };
            match Identity::new(name) {
                Ok(identity) => {
                    identities.insert(identity);
                }
                Err(e) => {
                    tracing::debug!(
                        path = %entry.path().display(),
                        error = %e,
                        "ignoring gallery entry"
                    );
                }
            }
        }
        Ok(identities)
    }

    /// Stored images for `identity`, sorted by filename. Empty if none.
    pub fn list_images(&self, identity: &Identity) -> Result<Vec<ImageRef>, GalleryError> {
        let dir = self.identity_dir(identity);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_err(&dir)(e)),
        };

        let mut images = Vec::new();
        for entry in entries {
            let entry = entry.map_err(io_err(&dir))?;
            let file_type = entry.file_type().map_err(io_err(&entry.path()))?;
            if !file_type.is_file() {
                continue;
            }
            let Some(filename) = entry.file_name().to_str().map(str::to_owned) else {
                continue;
            };
            if filename.starts_with('.') {
                continue;
            }
            images.push(ImageRef {
                identity: identity.clone(),
                path: entry.path(),
                filename,
            });
        }
        images.sort_by(|a, b| a.filename.cmp(&b.filename));
        Ok(images)
    }

    /// Whether `identity` has at least one stored image.
    pub fn has_gallery(&self, identity: &Identity) -> Result<bool, GalleryError> {
        Ok(!self.list_images(identity)?.is_empty())
    }

    pub fn read_image(&self, image: &ImageRef) -> Result<Vec<u8>, GalleryError> {
        fs::read(&image.path).map_err(io_err(&image.path))
    }

    /// Delete a single image. Returns `false` if it did not exist.
    pub fn remove_image(&self, identity: &Identity, filename: &str) -> Result<bool, GalleryError> {
        if filename.is_empty()
            || filename.starts_with('.')
            || filename.contains(|c: char| c == '/' || c == '\\')
        {
            return Err(GalleryError::InvalidFilename(filename.to_string()));
        }
        let path = self.identity_dir(identity).join(filename);
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(io_err(&path)(e)),
        }
    }

    /// Delete an identity's whole gallery. Returns `false` if there was none.
    pub fn remove_identity(&self, identity: &Identity) -> Result<bool, GalleryError> {
        let dir = self.identity_dir(identity);
        match fs::remove_dir_all(&dir) {
            Ok(()) => {
                tracing::info!(identity = %identity, "removed gallery");
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(io_err(&dir)(e)),
        }
    }
}

/// Restrict a free-text capture label to `[A-Za-z0-9_-]`.
fn sanitize_label(hint: &str) -> String {
    let cleaned: String = hint
        .trim()
        .chars()
        .take(MAX_LABEL_LEN)
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect();
    if cleaned.trim_matches('_').is_empty() {
        DEFAULT_CAPTURE_LABEL.to_string()
    } else {
        cleaned
    }
}

fn short_suffix() -> String {
    let mut hex = Uuid::new_v4().simple().to_string();
    hex.truncate(SUFFIX_LEN);
    hex
}
