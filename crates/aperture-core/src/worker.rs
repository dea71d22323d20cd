//! The upload worker: one linear pass that encrypts, pushes and registers
//! a single file. Cleanup (temp artifacts, source-copy policy, lock
//! release) runs on every exit path past lock acquisition.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

use aperture_remote::api::{
    CreateFileRequest, EncryptedMetadata, UpdateFileRequest, UploadedObject,
};
use aperture_remote::blob::BlobPutter;
use aperture_remote::catalog::CatalogClient;
use aperture_remote::url_pool::UrlPool;
use aperture_types::{ProcessKind, Result, UploadError};

use crate::collab::{
    CollectionsService, Connection, ConnectivityProbe, FilesDb, LocalSyncTracker, MediaExtractor,
    MediaUploadData,
};
use crate::config::UploadConfig;
use crate::crypto::CryptoEngine;
use crate::events::{Event, EventBus};
use crate::lock::{now_micros, LockStore};
use crate::model::{FileRecord, REUPLOAD_SENTINEL};
use crate::queue::StopSignal;

/// Everything a worker needs, shared across all workers of one process.
pub struct WorkerEnv {
    pub cfg: UploadConfig,
    pub process: ProcessKind,
    pub locks: LockStore,
    pub db: Arc<dyn FilesDb>,
    pub collections: Arc<dyn CollectionsService>,
    pub media: Arc<dyn MediaExtractor>,
    pub connectivity: Arc<dyn ConnectivityProbe>,
    pub tracker: Arc<dyn LocalSyncTracker>,
    pub crypto: Arc<dyn CryptoEngine>,
    pub pool: UrlPool,
    pub blobs: BlobPutter,
    pub catalog: CatalogClient,
    pub events: Arc<EventBus>,
    pub sync_stop: StopSignal,
}

struct Deadline {
    at: Instant,
}

impl Deadline {
    fn after(duration: Duration) -> Self {
        Self {
            at: Instant::now() + duration,
        }
    }

    /// Checked at every stage boundary; in-flight syscalls are bounded by
    /// the agent's own timeouts.
    fn check(&self) -> Result<()> {
        if Instant::now() >= self.at {
            Err(UploadError::DeadlineExceeded)
        } else {
            Ok(())
        }
    }
}

pub(crate) struct TempPaths {
    pub file: PathBuf,
    pub thumb: PathBuf,
}

impl TempPaths {
    pub(crate) fn new(temp_dir: &Path, generated_id: i64, process: ProcessKind) -> Self {
        let suffix = process.temp_suffix();
        Self {
            file: temp_dir.join(format!("{generated_id}{suffix}.encrypted")),
            thumb: temp_dir.join(format!("{generated_id}_thumbnail{suffix}.encrypted")),
        }
    }
}

/// Upload one file into `collection_id`.
///
/// Preconditions (connectivity gate, already-uploaded shortcut) fail
/// before any lock is taken. Past lock acquisition, cleanup always runs.
pub fn try_to_upload(
    env: &WorkerEnv,
    file: &FileRecord,
    collection_id: i64,
    forced: bool,
) -> Result<FileRecord> {
    if !forced
        && env.connectivity.current() != Connection::Wifi
        && !env.cfg.allow_mobile_uploads
    {
        return Err(UploadError::WifiUnavailable);
    }

    // The record may have been uploaded since it was enqueued (e.g. by the
    // other process); re-read and short-circuit.
    let file = match env.db.get_file(file.generated_id)? {
        Some(fresh) => {
            if fresh.has_remote_id()
                && fresh.updation_time.is_some_and(|t| t != REUPLOAD_SENTINEL)
                && fresh.collection_id == Some(collection_id)
            {
                return Ok(fresh);
            }
            fresh
        }
        None => file.clone(),
    };

    let local_id = file
        .local_id
        .clone()
        .ok_or_else(|| UploadError::InvalidFile("record has no local id".into()))?;

    env.locks.acquire(&local_id, env.process, now_micros())?;

    let deadline = Deadline::after(env.cfg.upload_deadline());
    let temp = TempPaths::new(&env.cfg.temp_dir, file.generated_id, env.process);

    let media = match env.media.media_upload_data(&file) {
        Ok(media) => media,
        Err(e) => {
            if matches!(e, UploadError::InvalidFile(_)) {
                handle_invalid_file(env, &file, &e);
            }
            cleanup(env, &local_id, None, &temp, false);
            return Err(e);
        }
    };

    let result = upload_locked(env, &file, collection_id, &deadline, &temp, &media);
    cleanup(env, &local_id, Some(&media), &temp, result.is_ok());
    result
}

fn upload_locked(
    env: &WorkerEnv,
    file: &FileRecord,
    collection_id: i64,
    deadline: &Deadline,
    temp: &TempPaths,
    media: &MediaUploadData,
) -> Result<FileRecord> {
    let is_update = file.needs_reupload();

    let mut existing_key: Option<[u8; 32]> = None;
    if is_update {
        existing_key = Some(recover_file_key(env, file)?);
    } else if crate::mapping::resolve_same_hash_mapping(
        env.db.as_ref(),
        env.collections.as_ref(),
        file,
        collection_id,
        media,
        env.cfg.user_id,
    )? {
        // Mapped onto an existing remote file; nothing to upload.
        return Ok(file.clone());
    }

    deadline.check()?;

    // Encrypt source and thumbnail into the temp artifacts.
    std::fs::create_dir_all(&env.cfg.temp_dir)?;
    remove_if_present(&temp.file)?;
    let stream = env
        .crypto
        .encrypt_file(&media.source_path, &temp.file, existing_key.as_ref())?;

    let thumb = env.crypto.encrypt_chunk(&media.thumbnail, &stream.key)?;
    remove_if_present(&temp.thumb)?;
    std::fs::write(&temp.thumb, &thumb.encrypted_data)?;

    deadline.check()?;

    // Thumbnail first, then the file.
    let thumbnail_object_key = env.blobs.put(&env.pool, &temp.thumb)?;
    deadline.check()?;
    let file_object_key = env.blobs.put(&env.pool, &temp.file)?;
    deadline.check()?;

    let metadata_plain = serde_json::to_vec(&file.metadata)?;
    let metadata = env.crypto.encrypt_chunk(&metadata_plain, &stream.key)?;

    let file_object = UploadedObject {
        object_key: file_object_key,
        decryption_header: BASE64.encode(&stream.header),
        size: std::fs::metadata(&temp.file)?.len(),
    };
    let thumbnail_object = UploadedObject {
        object_key: thumbnail_object_key,
        decryption_header: BASE64.encode(&thumb.header),
        size: std::fs::metadata(&temp.thumb)?.len(),
    };
    let metadata_body = EncryptedMetadata {
        encrypted_data: BASE64.encode(&metadata.encrypted_data),
        decryption_header: BASE64.encode(&metadata.header),
    };

    if env.sync_stop.is_set() {
        return Err(UploadError::SyncStopRequested);
    }

    let mut updated = file.clone();
    if is_update {
        let remote_id = file
            .uploaded_file_id
            .filter(|id| *id != REUPLOAD_SENTINEL)
            .ok_or_else(|| UploadError::Db("update candidate lost its remote id".into()))?;
        let resp = env.catalog.update_file(&UpdateFileRequest {
            id: remote_id,
            file: file_object,
            thumbnail: thumbnail_object,
            metadata: metadata_body,
        })?;
        updated.updation_time = Some(resp.updation_time);
        updated.file_decryption_header = Some(BASE64.encode(&stream.header));
        updated.thumbnail_decryption_header = Some(BASE64.encode(&thumb.header));
        updated.metadata_decryption_header = Some(BASE64.encode(&metadata.header));
        env.db.update_uploaded_file_across_collections(&updated)?;
    } else {
        let collection_key = env.collections.collection_key(collection_id)?;
        let wrapped = env.crypto.wrap_key(&stream.key, &collection_key)?;
        let resp = env.catalog.create_file(&CreateFileRequest {
            collection_id,
            encrypted_key: BASE64.encode(&wrapped.encrypted_data),
            key_decryption_nonce: BASE64.encode(&wrapped.nonce),
            file: file_object,
            thumbnail: thumbnail_object,
            metadata: metadata_body,
        })?;
        updated.uploaded_file_id = Some(resp.id);
        updated.updation_time = Some(resp.updation_time);
        updated.owner_id = resp.owner_id.or(Some(env.cfg.user_id));
        updated.collection_id = Some(collection_id);
        updated.encrypted_key = Some(BASE64.encode(&wrapped.encrypted_data));
        updated.key_decryption_nonce = Some(BASE64.encode(&wrapped.nonce));
        updated.file_decryption_header = Some(BASE64.encode(&stream.header));
        updated.thumbnail_decryption_header = Some(BASE64.encode(&thumb.header));
        updated.metadata_decryption_header = Some(BASE64.encode(&metadata.header));
        if media.is_deleted {
            updated.local_id = None;
        }
        env.db.update(&updated)?;
    }

    if env.process == ProcessKind::Foreground {
        env.events.publish(Event::LocalFilesUpdated {
            file: Box::new(updated.clone()),
        });
    }

    Ok(updated)
}

/// An update re-uses the file key already wrapped on the record, under the
/// key of the collection it was created in.
fn recover_file_key(env: &WorkerEnv, file: &FileRecord) -> Result<[u8; 32]> {
    let source_collection = file
        .collection_id
        .ok_or_else(|| UploadError::Db("update candidate has no collection".into()))?;
    let collection_key = env.collections.collection_key(source_collection)?;
    let wrapped = decode_field(file.encrypted_key.as_deref(), "encrypted key")?;
    let nonce = decode_field(file.key_decryption_nonce.as_deref(), "key nonce")?;
    env.crypto.unwrap_key(&wrapped, &nonce, &collection_key)
}

fn decode_field(value: Option<&str>, what: &str) -> Result<Vec<u8>> {
    let value = value.ok_or_else(|| UploadError::Db(format!("record missing {what}")))?;
    BASE64
        .decode(value)
        .map_err(|e| UploadError::Db(format!("invalid {what}: {e}")))
}

fn handle_invalid_file(env: &WorkerEnv, file: &FileRecord, err: &UploadError) {
    tracing::warn!(
        file = %file.display_name(),
        error = %err,
        "media extractor rejected file, marking invalid"
    );
    if let Err(e) = env.db.mark_invalid(file.generated_id) {
        tracing::warn!(generated_id = file.generated_id, error = %e, "failed to mark file invalid");
    }
    if let Some(local_id) = &file.local_id {
        env.tracker.record_invalid_file(local_id);
    }
}

fn remove_if_present(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Always runs after the locked section, success or failure.
fn cleanup(
    env: &WorkerEnv,
    local_id: &str,
    media: Option<&MediaUploadData>,
    temp: &TempPaths,
    completed: bool,
) {
    if let Some(media) = media {
        if media.temporary_copy || (completed && media.shared_sandbox_copy) {
            let _ = std::fs::remove_file(&media.source_path);
        }
    }
    for path in [&temp.file, &temp.thumb] {
        if path.exists() {
            let _ = std::fs::remove_file(path);
        }
    }
    if let Err(e) = env.locks.release(local_id, env.process) {
        tracing::warn!(local_id, error = %e, "failed to release upload lock");
    }
}
