//! Collaborator seams the embedding application implements: the local
//! files database, the media extraction pipeline, the collections service,
//! the connectivity probe, and the local sync tracker.

use std::path::PathBuf;

use aperture_types::Result;

use crate::model::{FileRecord, MediaKind};

/// Everything the extractor learns about a file before upload.
#[derive(Debug, Clone)]
pub struct MediaUploadData {
    pub source_path: PathBuf,
    pub thumbnail: Vec<u8>,
    pub file_hash: Option<String>,
    /// Hash of the paired video of a live photo.
    pub zip_hash: Option<String>,
    /// The asset was deleted on-device between discovery and upload; the
    /// remote record is created without a local id.
    pub is_deleted: bool,
    /// `source_path` is a temporary copy made by the extractor and must be
    /// deleted during cleanup on every exit path.
    pub temporary_copy: bool,
    /// `source_path` lives in the shared-media sandbox and is deleted only
    /// after a completed upload.
    pub shared_sandbox_copy: bool,
}

pub trait MediaExtractor: Send + Sync {
    /// May fail with `UploadError::InvalidFile`.
    fn media_upload_data(&self, file: &FileRecord) -> Result<MediaUploadData>;
}

/// The local catalog of known files (device rows and mirrored remote rows).
pub trait FilesDb: Send + Sync {
    fn get_file(&self, generated_id: i64) -> Result<Option<FileRecord>>;

    /// Upsert by `generated_id`.
    fn update(&self, file: &FileRecord) -> Result<()>;

    fn delete_by_generated_id(&self, generated_id: i64) -> Result<()>;

    /// Remote-present records owned by `owner_id` with the given kind and
    /// any of `hashes`, in stable query order.
    fn uploaded_files_with_hashes(
        &self,
        hashes: &[String],
        kind: MediaKind,
        owner_id: i64,
    ) -> Result<Vec<FileRecord>>;

    /// Propagate a re-uploaded file's fields to every collection row
    /// sharing its remote id.
    fn update_uploaded_file_across_collections(&self, file: &FileRecord) -> Result<()>;

    /// Mark a local row invalid so it is not picked up again.
    fn mark_invalid(&self, generated_id: i64) -> Result<()>;
}

pub trait CollectionsService: Send + Sync {
    /// Decrypted key of a collection, used to wrap and unwrap file keys.
    fn collection_key(&self, collection_id: i64) -> Result<[u8; 32]>;

    /// Add an already-uploaded file to another collection.
    fn add_to_collection(&self, collection_id: i64, file: &FileRecord) -> Result<()>;

    /// Link a local candidate to an existing uploaded file living in a
    /// different collection, copying it into `collection_id`.
    fn link_to_existing_uploaded_file(
        &self,
        collection_id: i64,
        candidate: &FileRecord,
        existing: &FileRecord,
    ) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connection {
    Wifi,
    Mobile,
    Offline,
}

pub trait ConnectivityProbe: Send + Sync {
    fn current(&self) -> Connection;
}

/// Records device-side sync outcomes (invalid files) for the settings UI.
pub trait LocalSyncTracker: Send + Sync {
    fn record_invalid_file(&self, local_id: &str);
}
