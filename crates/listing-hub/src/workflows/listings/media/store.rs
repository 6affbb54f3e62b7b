use std::fs;
use std::io;
use std::path::PathBuf;

use serde::Serialize;

use super::is_plain_file_name;
use crate::workflows::listings::domain::normalize_reference;

/// Location of an ingested artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredReference {
    pub name: String,
    pub url: String,
}

/// Destination for normalized media artifacts.
pub trait MediaStore: Send + Sync {
    fn put(&self, name: &str, bytes: &[u8]) -> Result<StoredReference, MediaStoreError>;

    fn read(&self, name: &str) -> Result<Vec<u8>, MediaStoreError>;
}

#[derive(Debug, thiserror::Error)]
pub enum MediaStoreError {
    #[error("invalid media name '{0}'")]
    InvalidName(String),
    #[error("media '{0}' not found")]
    NotFound(String),
    #[error("media i/o failed for '{name}': {source}")]
    Io {
        name: String,
        #[source]
        source: io::Error,
    },
}

/// Filesystem-backed store that serves artifacts under a public URL prefix.
#[derive(Debug, Clone)]
pub struct LocalMediaStore {
    root: PathBuf,
    public_base: String,
}

impl LocalMediaStore {
    pub fn new(root: impl Into<PathBuf>, public_base: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            public_base: public_base.into(),
        }
    }

    pub fn root(&self) -> &PathBuf {
        &self.root
    }

    fn reference_for(&self, name: &str) -> StoredReference {
        StoredReference {
            name: name.to_string(),
            url: normalize_reference(&format!("{}/{name}", self.public_base)),
        }
    }
}

impl MediaStore for LocalMediaStore {
    fn put(&self, name: &str, bytes: &[u8]) -> Result<StoredReference, MediaStoreError> {
        if !is_plain_file_name(name) {
            return Err(MediaStoreError::InvalidName(name.to_string()));
        }

        let io_error = |source| MediaStoreError::Io {
            name: name.to_string(),
            source,
        };
        fs::create_dir_all(&self.root).map_err(io_error)?;
        fs::write(self.root.join(name), bytes).map_err(io_error)?;

        Ok(self.reference_for(name))
    }

    fn read(&self, name: &str) -> Result<Vec<u8>, MediaStoreError> {
        if !is_plain_file_name(name) {
            return Err(MediaStoreError::InvalidName(name.to_string()));
        }

        match fs::read(self.root.join(name)) {
            Ok(bytes) => Ok(bytes),
            Err(error) if error.kind() == io::ErrorKind::NotFound => {
                Err(MediaStoreError::NotFound(name.to_string()))
            }
            Err(source) => Err(MediaStoreError::Io {
                name: name.to_string(),
                source,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_then_read_round_trips_under_public_base() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = LocalMediaStore::new(dir.path().join("media"), "/media/");

        let reference = store.put("1-abc-porch.jpg", b"jpeg").expect("stored");
        assert_eq!(reference.url, "/media/1-abc-porch.jpg");
        assert_eq!(store.read("1-abc-porch.jpg").expect("read"), b"jpeg");
    }

    #[test]
    fn rejects_traversal_and_reports_missing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = LocalMediaStore::new(dir.path(), "https://cdn.example.com");

        match store.put("../escape.jpg", b"x") {
            Err(MediaStoreError::InvalidName(name)) => assert_eq!(name, "../escape.jpg"),
            other => panic!("expected invalid name, got {other:?}"),
        }
        match store.read("absent.jpg") {
            Err(MediaStoreError::NotFound(_)) => {}
            other => panic!("expected not found, got {other:?}"),
        }
    }
}
