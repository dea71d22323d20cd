//! Same-hash mapping resolver: decides whether a candidate upload is
//! already covered by an existing remote file.

use aperture_types::Result;

use crate::collab::{CollectionsService, FilesDb, MediaUploadData};
use crate::model::{FileRecord, MediaKind};

/// Returns `true` when the candidate was mapped onto an existing remote
/// file and must not be uploaded; `false` means proceed with a fresh
/// upload.
///
/// Cases, applied in order with the first match in query-return order:
/// A. same local id, same collection — drop the candidate row;
/// B. same collection, existing row has no local id — stamp it with the
///    candidate's local id, then drop the candidate row;
/// C. remote file lives in a different collection — link it into the
///    target collection;
/// D. remaining matches carry a different, non-null local id — likely a
///    device-side duplicate, upload anew.
pub fn resolve_same_hash_mapping(
    db: &dyn FilesDb,
    collections: &dyn CollectionsService,
    candidate: &FileRecord,
    collection_id: i64,
    media: &MediaUploadData,
    owner_id: i64,
) -> Result<bool> {
    // The already-uploaded shortcut upstream makes this unreachable in
    // practice; proceed rather than guess.
    if candidate.has_remote_id() {
        return Ok(false);
    }

    let Some(file_hash) = &media.file_hash else {
        return Ok(false);
    };
    let mut hashes = vec![file_hash.clone()];
    if candidate.kind == MediaKind::LivePhoto {
        if let Some(zip_hash) = &media.zip_hash {
            hashes.push(zip_hash.clone());
        }
    }

    let matches = db.uploaded_files_with_hashes(&hashes, candidate.kind, owner_id)?;
    if matches.is_empty() {
        return Ok(false);
    }

    // Case A: the very same device file already uploaded to this collection.
    if let Some(existing) = matches.iter().find(|m| {
        m.has_remote_id()
            && m.collection_id == Some(collection_id)
            && m.local_id == candidate.local_id
    }) {
        tracing::debug!(
            local_id = ?candidate.local_id,
            remote_id = ?existing.uploaded_file_id,
            "hash match in same collection, dropping duplicate row"
        );
        db.delete_by_generated_id(candidate.generated_id)?;
        return Ok(true);
    }

    // Case B: same collection, remote row not yet tied to a device file.
    if let Some(existing) = matches
        .iter()
        .find(|m| m.has_remote_id() && m.collection_id == Some(collection_id) && m.local_id.is_none())
    {
        let mut stamped = existing.clone();
        stamped.local_id = candidate.local_id.clone();
        db.update(&stamped)?;
        db.delete_by_generated_id(candidate.generated_id)?;
        return Ok(true);
    }

    // Case C/D: uploaded under a different collection — link instead of
    // re-uploading the bytes.
    if let Some(existing) = matches
        .iter()
        .find(|m| m.has_remote_id() && m.collection_id != Some(collection_id))
    {
        collections.link_to_existing_uploaded_file(collection_id, candidate, existing)?;
        return Ok(true);
    }

    // Case E: only same-collection matches bound to other device files.
    Ok(false)
}
