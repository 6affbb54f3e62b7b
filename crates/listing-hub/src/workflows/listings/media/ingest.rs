use std::fs;
use std::io::{self, Cursor};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ExtendedColorType, GenericImageView, ImageEncoder, ImageError};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use super::is_plain_file_name;
use super::store::{MediaStore, MediaStoreError, StoredReference};
use crate::config::MediaConfig;
use crate::workflows::listings::slug::file_stem_slug;

const JPEG_QUALITY: u8 = 82;
const HASH_PREFIX_LEN: usize = 12;
const STAGED_SUFFIX: &str = "upload";

/// A raw upload waiting in the staging directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawUpload {
    pub staged_name: String,
    pub original_name: String,
    pub path: PathBuf,
}

#[derive(Debug, thiserror::Error)]
pub enum IngestionError {
    #[error("failed to stage upload '{name}': {source}")]
    Stage {
        name: String,
        #[source]
        source: io::Error,
    },
    #[error("staged upload '{0}' does not exist")]
    MissingStaged(String),
    #[error("failed to read staged upload '{name}': {source}")]
    Read {
        name: String,
        #[source]
        source: io::Error,
    },
    #[error("'{name}' is not a decodable image: {source}")]
    Decode {
        name: String,
        #[source]
        source: ImageError,
    },
    #[error("failed to encode '{name}' as jpeg: {source}")]
    Encode {
        name: String,
        #[source]
        source: ImageError,
    },
    #[error(transparent)]
    Store(#[from] MediaStoreError),
}

/// Synchronous ingestion pipeline from staged raw bytes to stored JPEG artifacts.
pub struct MediaIngestor {
    store: Arc<dyn MediaStore>,
    staging_dir: PathBuf,
    max_width: u32,
}

impl MediaIngestor {
    pub fn new(
        store: Arc<dyn MediaStore>,
        staging_dir: impl Into<PathBuf>,
        max_width: u32,
    ) -> Self {
        Self {
            store,
            staging_dir: staging_dir.into(),
            max_width: max_width.max(1),
        }
    }

    pub fn from_config(store: Arc<dyn MediaStore>, config: &MediaConfig) -> Self {
        Self::new(store, config.staging_dir.clone(), config.max_width)
    }

    pub fn store(&self) -> &Arc<dyn MediaStore> {
        &self.store
    }

    pub fn staging_dir(&self) -> &Path {
        &self.staging_dir
    }

    /// Write raw bytes into the staging directory under a fresh temporary name.
    pub fn stage(&self, original_name: &str, bytes: &[u8]) -> Result<RawUpload, IngestionError> {
        let staged_name = format!("{}.{STAGED_SUFFIX}", uuid::Uuid::new_v4().simple());
        let path = self.staging_dir.join(&staged_name);

        let stage_error = |source| IngestionError::Stage {
            name: original_name.to_string(),
            source,
        };
        fs::create_dir_all(&self.staging_dir).map_err(stage_error)?;
        fs::write(&path, bytes).map_err(stage_error)?;

        debug!(
            staged = %staged_name,
            original = original_name,
            bytes = bytes.len(),
            "staged upload"
        );
        Ok(RawUpload {
            staged_name,
            original_name: original_name.to_string(),
            path,
        })
    }

    pub fn is_staged(&self, staged_name: &str) -> bool {
        is_plain_file_name(staged_name) && self.staging_dir.join(staged_name).is_file()
    }

    /// Resolve a staged name handed back by a client into a [`RawUpload`].
    pub fn staged(
        &self,
        staged_name: &str,
        original_name: &str,
    ) -> Result<RawUpload, IngestionError> {
        if !self.is_staged(staged_name) {
            return Err(IngestionError::MissingStaged(staged_name.to_string()));
        }

        Ok(RawUpload {
            staged_name: staged_name.to_string(),
            original_name: original_name.to_string(),
            path: self.staging_dir.join(staged_name),
        })
    }

    /// Normalize one staged upload and remove the raw file once the artifact is stored.
    pub fn ingest(&self, raw: &RawUpload) -> Result<StoredReference, IngestionError> {
        let bytes = fs::read(&raw.path).map_err(|source| match source.kind() {
            io::ErrorKind::NotFound => IngestionError::MissingStaged(raw.staged_name.clone()),
            _ => IngestionError::Read {
                name: raw.original_name.clone(),
                source,
            },
        })?;

        let base = file_stem_slug(&raw.original_name);
        let decoded = image::load_from_memory(&bytes).map_err(|source| IngestionError::Decode {
            name: raw.original_name.clone(),
            source,
        })?;
        let resized = self.fit_width(decoded);
        let encoded = encode_jpeg(&resized).map_err(|source| IngestionError::Encode {
            name: raw.original_name.clone(),
            source,
        })?;

        let name = artifact_name(Utc::now().timestamp_millis(), &encoded, &base);
        let reference = self.store.put(&name, &encoded)?;

        if let Err(error) = fs::remove_file(&raw.path) {
            warn!(staged = %raw.staged_name, %error, "failed to remove staged upload");
        }

        info!(
            original = %raw.original_name,
            stored = %reference.name,
            width = resized.width(),
            height = resized.height(),
            bytes = encoded.len(),
            "ingested image"
        );
        Ok(reference)
    }

    /// Ingest uploads in order. The first failure aborts the batch; artifacts stored before the
    /// failure are kept.
    pub fn ingest_batch(&self, raws: &[RawUpload]) -> Result<Vec<StoredReference>, IngestionError> {
        raws.iter().map(|raw| self.ingest(raw)).collect()
    }

    /// Remove raw files that will never be ingested. Already-consumed uploads are skipped.
    pub fn discard(&self, raws: &[RawUpload]) {
        for raw in raws {
            match fs::remove_file(&raw.path) {
                Ok(()) => debug!(staged = %raw.staged_name, "discarded staged upload"),
                Err(error) if error.kind() == io::ErrorKind::NotFound => {}
                Err(error) => {
                    warn!(staged = %raw.staged_name, %error, "failed to discard staged upload")
                }
            }
        }
    }

    fn fit_width(&self, image: DynamicImage) -> DynamicImage {
        let (width, height) = image.dimensions();
        if width <= self.max_width {
            return image;
        }

        let scaled_height =
            (u64::from(height) * u64::from(self.max_width) / u64::from(width)).max(1);
        let scaled_height = u32::try_from(scaled_height).unwrap_or(u32::MAX);
        image.resize_exact(self.max_width, scaled_height, FilterType::Lanczos3)
    }
}

fn encode_jpeg(image: &DynamicImage) -> Result<Vec<u8>, ImageError> {
    let rgb = image.to_rgb8();
    let mut buffer = Cursor::new(Vec::new());
    JpegEncoder::new_with_quality(&mut buffer, JPEG_QUALITY).write_image(
        rgb.as_raw(),
        rgb.width(),
        rgb.height(),
        ExtendedColorType::Rgb8,
    )?;
    Ok(buffer.into_inner())
}

/// `{unix_millis}-{content_hash}-{base}.jpg`
fn artifact_name(timestamp_millis: i64, encoded: &[u8], base: &str) -> String {
    let digest = hex::encode(Sha256::digest(encoded));
    format!("{timestamp_millis}-{}-{base}.jpg", &digest[..HASH_PREFIX_LEN])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflows::listings::media::LocalMediaStore;
    use image::{ImageFormat, Rgb, RgbImage};

    fn png(width: u32, height: u32, shade: u8) -> Vec<u8> {
        let image = RgbImage::from_pixel(width, height, Rgb([shade, 90, 200]));
        let mut bytes = Cursor::new(Vec::new());
        image
            .write_to(&mut bytes, ImageFormat::Png)
            .expect("encode png");
        bytes.into_inner()
    }

    fn ingestor(root: &Path, max_width: u32) -> MediaIngestor {
        let store = LocalMediaStore::new(root.join("media"), "/media");
        MediaIngestor::new(Arc::new(store), root.join("staging"), max_width)
    }

    #[test]
    fn artifact_names_carry_timestamp_hash_and_base() {
        let name = artifact_name(1_700_000_000_000, b"bytes", "front-porch");
        let parts: Vec<&str> = name.splitn(3, '-').collect();
        assert_eq!(parts[0], "1700000000000");
        assert_eq!(parts[1].len(), HASH_PREFIX_LEN);
        assert_eq!(parts[2], "front-porch.jpg");
        assert_ne!(name, artifact_name(1_700_000_000_000, b"other", "front-porch"));
    }

    #[test]
    fn ingest_downscales_and_removes_staged_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ingestor = ingestor(dir.path(), 64);

        let raw = ingestor.stage("Wide Shot.PNG", &png(200, 100, 10)).expect("staged");
        assert!(ingestor.is_staged(&raw.staged_name));

        let reference = ingestor.ingest(&raw).expect("ingested");
        assert!(reference.name.ends_with("-wide-shot.jpg"));
        assert!(reference.url.starts_with("/media/"));
        assert!(!raw.path.exists());
        assert!(!ingestor.is_staged(&raw.staged_name));

        let stored = ingestor.store().read(&reference.name).expect("stored bytes");
        let decoded = image::load_from_memory(&stored).expect("decodes");
        assert_eq!(decoded.dimensions(), (64, 32));
    }

    #[test]
    fn undecodable_upload_is_reported_and_kept() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ingestor = ingestor(dir.path(), 64);

        let raw = ingestor.stage("notes.jpg", b"not an image").expect("staged");
        match ingestor.ingest(&raw) {
            Err(IngestionError::Decode { name, .. }) => assert_eq!(name, "notes.jpg"),
            other => panic!("expected decode failure, got {other:?}"),
        }
        assert!(raw.path.exists());
    }

    #[test]
    fn batch_aborts_on_first_failure_without_rollback() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ingestor = ingestor(dir.path(), 64);

        let good = ingestor.stage("a.png", &png(8, 8, 1)).expect("staged");
        let bad = ingestor.stage("b.png", b"garbage").expect("staged");
        let never = ingestor.stage("c.png", &png(8, 8, 3)).expect("staged");

        let result = ingestor.ingest_batch(&[good.clone(), bad.clone(), never.clone()]);
        assert!(matches!(result, Err(IngestionError::Decode { .. })));

        assert!(!good.path.exists());
        assert!(bad.path.exists());
        assert!(never.path.exists());
        let stored = std::fs::read_dir(dir.path().join("media"))
            .expect("media dir")
            .count();
        assert_eq!(stored, 1);
    }

    #[test]
    fn discard_removes_leftovers_after_a_failed_batch() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ingestor = ingestor(dir.path(), 64);

        let good = ingestor.stage("a.png", &png(8, 8, 1)).expect("staged");
        let bad = ingestor.stage("b.png", b"garbage").expect("staged");
        let never = ingestor.stage("c.png", &png(8, 8, 3)).expect("staged");
        let batch = [good, bad, never];

        assert!(ingestor.ingest_batch(&batch).is_err());
        ingestor.discard(&batch);

        assert!(batch.iter().all(|raw| !raw.path.exists()));
        let leftover = std::fs::read_dir(ingestor.staging_dir())
            .expect("staging dir")
            .count();
        assert_eq!(leftover, 0);
    }

    #[test]
    fn staged_lookup_rejects_unknown_and_traversal_names() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ingestor = ingestor(dir.path(), 64);

        assert!(!ingestor.is_staged("../media/x.jpg"));
        match ingestor.staged("missing.upload", "x.jpg") {
            Err(IngestionError::MissingStaged(name)) => assert_eq!(name, "missing.upload"),
            other => panic!("expected missing staged upload, got {other:?}"),
        }
    }
}
