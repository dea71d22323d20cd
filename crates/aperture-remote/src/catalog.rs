//! Client for the remote file catalog: create and update file records.

use aperture_types::{Result, UploadError};

use crate::api::{CreateFileRequest, RemoteFileResponse, UpdateFileRequest};
use crate::http_util::{apply_auth, join_url};
use crate::retry::retry_http;
use crate::RetryConfig;

pub struct CatalogClient {
    agent: ureq::Agent,
    endpoint: String,
    token: String,
    retry: RetryConfig,
}

impl CatalogClient {
    pub fn new(agent: ureq::Agent, endpoint: &str, token: &str, retry: RetryConfig) -> Self {
        Self {
            agent,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            token: token.to_string(),
            retry,
        }
    }

    /// Register a newly uploaded file. `POST /files`.
    pub fn create_file(&self, req: &CreateFileRequest) -> Result<RemoteFileResponse> {
        let url = join_url(&self.endpoint, "files");
        self.send("create-file", || {
            apply_auth(self.agent.post(&url), &self.token).send_json(req)
        })
    }

    /// Replace the content of an existing remote file. `PUT /files/update`.
    pub fn update_file(&self, req: &UpdateFileRequest) -> Result<RemoteFileResponse> {
        let url = join_url(&self.endpoint, "files/update");
        self.send("update-file", || {
            apply_auth(self.agent.put(&url), &self.token).send_json(req)
        })
    }

    /// Shared retry + classification. 413 and 426 are terminal and skip the
    /// retry loop entirely; everything else retries on the fixed backoff.
    fn send(
        &self,
        op_name: &str,
        f: impl Fn() -> std::result::Result<ureq::Response, ureq::Error>,
    ) -> Result<RemoteFileResponse> {
        match retry_http(&self.retry, op_name, f) {
            Ok(resp) => resp
                .into_json()
                .map_err(|e| UploadError::Other(format!("{op_name} parse: {e}"))),
            Err(ureq::Error::Status(413, _)) => Err(UploadError::FileTooLargeForPlan),
            Err(ureq::Error::Status(426, _)) => Err(UploadError::StorageLimitExceeded),
            Err(e) => Err(e.into()),
        }
    }
}
