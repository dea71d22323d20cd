use thiserror::Error;

pub type Result<T> = std::result::Result<T, UploadError>;

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("wifi unavailable and mobile-data backup is disabled")]
    WifiUnavailable,

    #[error("upload lock already held for '{0}'")]
    LockAlreadyAcquired(String),

    #[error("invalid file: {0}")]
    InvalidFile(String),

    #[error("no active subscription")]
    NoActiveSubscription,

    #[error("storage limit exceeded")]
    StorageLimitExceeded,

    #[error("file too large for current plan")]
    FileTooLargeForPlan,

    #[error("sync stop requested")]
    SyncStopRequested,

    #[error("upload handed off to the other process but no remote file appeared")]
    SilentlyCancelUploads,

    #[error("upload deadline exceeded")]
    DeadlineExceeded,

    #[error("transport error: {0}")]
    Transport(#[source] Box<ureq::Error>),

    #[error("decryption failed: wrong key or corrupted data")]
    DecryptionFailed,

    #[error("crypto error: {0}")]
    Crypto(String),

    #[error("files database error: {0}")]
    Db(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl From<ureq::Error> for UploadError {
    fn from(value: ureq::Error) -> Self {
        UploadError::Transport(Box::new(value))
    }
}

impl UploadError {
    /// Errors that tear down the whole upload session: every not-started
    /// item is fulfilled with the same kind and the queue is cleared.
    pub fn is_session_terminal(&self) -> bool {
        matches!(
            self,
            UploadError::NoActiveSubscription
                | UploadError::StorageLimitExceeded
                | UploadError::SyncStopRequested
        )
    }

    /// Expected user-visible outcomes (policy, plan, stop). Logged without
    /// an error chain; everything else logs at error with file context.
    pub fn is_expected_outcome(&self) -> bool {
        matches!(
            self,
            UploadError::WifiUnavailable
                | UploadError::NoActiveSubscription
                | UploadError::StorageLimitExceeded
                | UploadError::FileTooLargeForPlan
                | UploadError::SyncStopRequested
                | UploadError::SilentlyCancelUploads
        )
    }

    /// Re-create the same error kind for fan-out to multiple result
    /// handles. Payloads that are not `Clone` (transport, I/O) degrade to
    /// `Other` carrying the rendered message.
    pub fn duplicate(&self) -> UploadError {
        match self {
            UploadError::WifiUnavailable => UploadError::WifiUnavailable,
            UploadError::LockAlreadyAcquired(id) => {
                UploadError::LockAlreadyAcquired(id.clone())
            }
            UploadError::InvalidFile(reason) => UploadError::InvalidFile(reason.clone()),
            UploadError::NoActiveSubscription => UploadError::NoActiveSubscription,
            UploadError::StorageLimitExceeded => UploadError::StorageLimitExceeded,
            UploadError::FileTooLargeForPlan => UploadError::FileTooLargeForPlan,
            UploadError::SyncStopRequested => UploadError::SyncStopRequested,
            UploadError::SilentlyCancelUploads => UploadError::SilentlyCancelUploads,
            UploadError::DeadlineExceeded => UploadError::DeadlineExceeded,
            UploadError::DecryptionFailed => UploadError::DecryptionFailed,
            UploadError::Crypto(msg) => UploadError::Crypto(msg.clone()),
            UploadError::Db(msg) => UploadError::Db(msg.clone()),
            UploadError::Config(msg) => UploadError::Config(msg.clone()),
            other => UploadError::Other(other.to_string()),
        }
    }
}
