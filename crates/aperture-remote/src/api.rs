//! Wire types for the catalog service and the presigned-URL endpoint.

use serde::{Deserialize, Serialize};

/// A single-use object-store PUT endpoint with embedded authorization.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresignedUrl {
    pub object_key: String,
    pub url: String,
}

#[derive(Debug, Deserialize)]
pub struct UploadUrlsResponse {
    pub urls: Vec<PresignedUrl>,
}

/// An uploaded encrypted blob as the catalog sees it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadedObject {
    pub object_key: String,
    pub decryption_header: String,
    pub size: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedMetadata {
    pub encrypted_data: String,
    pub decryption_header: String,
}

/// Body of `POST /files` (new upload).
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateFileRequest {
    #[serde(rename = "collectionID")]
    pub collection_id: i64,
    pub encrypted_key: String,
    pub key_decryption_nonce: String,
    pub file: UploadedObject,
    pub thumbnail: UploadedObject,
    pub metadata: EncryptedMetadata,
}

/// Body of `PUT /files/update` (re-upload of an existing remote file).
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateFileRequest {
    pub id: i64,
    pub file: UploadedObject,
    pub thumbnail: UploadedObject,
    pub metadata: EncryptedMetadata,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteFileResponse {
    pub id: i64,
    pub updation_time: i64,
    #[serde(rename = "ownerID", default)]
    pub owner_id: Option<i64>,
}
