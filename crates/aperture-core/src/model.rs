//! Local file records as the engine sees them.

use serde::{Deserialize, Serialize};

/// Remote `updationTime` marking a file whose content must be re-uploaded.
pub const REUPLOAD_SENTINEL: i64 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MediaKind {
    Image,
    Video,
    LivePhoto,
}

/// A row of the local files database.
///
/// Encrypted-key fields and decryption headers are base64 strings, filled
/// in once the file has been uploaded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRecord {
    /// Stable identifier of the file on the device.
    pub local_id: Option<String>,
    /// Local DB row identifier.
    pub generated_id: i64,
    pub title: Option<String>,
    pub kind: MediaKind,
    pub collection_id: Option<i64>,
    /// Remote identifier after a successful create. `Some(-1)` is treated
    /// as absent (legacy sentinel rows).
    pub uploaded_file_id: Option<i64>,
    pub owner_id: Option<i64>,
    pub updation_time: Option<i64>,
    pub encrypted_key: Option<String>,
    pub key_decryption_nonce: Option<String>,
    pub file_decryption_header: Option<String>,
    pub thumbnail_decryption_header: Option<String>,
    pub metadata_decryption_header: Option<String>,
    /// Content hash of the source media, as computed by the extractor.
    pub hash: Option<String>,
    /// Metadata map shipped (encrypted) to the catalog on upload.
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl FileRecord {
    /// Whether this record points at a valid remote file.
    pub fn has_remote_id(&self) -> bool {
        matches!(self.uploaded_file_id, Some(id) if id != REUPLOAD_SENTINEL)
    }

    /// An update candidate: remote id present but content marked for
    /// re-upload.
    pub fn needs_reupload(&self) -> bool {
        self.has_remote_id() && self.updation_time == Some(REUPLOAD_SENTINEL)
    }

    /// Display name for logs, falling back to the media-kind extension
    /// when the title is absent.
    pub fn display_name(&self) -> String {
        match &self.title {
            Some(title) => title.clone(),
            None => format!(
                "untitled.{}",
                match self.kind {
                    MediaKind::Image => "img",
                    MediaKind::Video => "vid",
                    MediaKind::LivePhoto => "live",
                }
            ),
        }
    }
}
