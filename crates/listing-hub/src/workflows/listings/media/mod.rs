//! Image ingestion: raw uploads are staged on disk, then decoded, downscaled, transcoded to
//! JPEG and written to a [`MediaStore`] under a collision-resistant name.

mod ingest;
mod store;

pub use ingest::{IngestionError, MediaIngestor, RawUpload};
pub use store::{LocalMediaStore, MediaStore, MediaStoreError, StoredReference};

/// Reject names that could escape the directory they are resolved against.
pub(crate) fn is_plain_file_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && !name.contains("..")
        && !name.contains(['/', '\\'])
}
