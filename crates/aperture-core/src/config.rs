use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use aperture_remote::{HttpConfig, RetryConfig};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    /// Catalog service base URL, e.g. "https://api.example.org".
    pub endpoint: String,
    /// Auth token attached as `X-Auth-Token`.
    pub auth_token: String,
    /// Remote user id; hash-match queries are scoped to this owner.
    pub user_id: i64,
    /// Directory for encrypted temp artifacts.
    pub temp_dir: PathBuf,
    /// Directory backing the local state store (locks, heartbeat).
    pub state_dir: PathBuf,
    /// Allow uploads over mobile data. Off by default; the connectivity
    /// gate rejects non-wifi uploads unless forced.
    #[serde(default)]
    pub allow_mobile_uploads: bool,
    #[serde(default)]
    pub concurrency: ConcurrencyConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub locks: LockConfig,
    /// How often the foreground process probes for locks released by the
    /// background uploader.
    #[serde(default = "default_liaison_poll_ms")]
    pub liaison_poll_ms: u64,
    /// Hard per-upload deadline.
    #[serde(default = "default_upload_deadline_secs")]
    pub upload_deadline_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConcurrencyConfig {
    /// Overall in-progress upload cap.
    #[serde(default = "default_global_limit")]
    pub global_limit: usize,
    /// In-progress cap for videos specifically.
    #[serde(default = "default_video_limit")]
    pub video_limit: usize,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            global_limit: default_global_limit(),
            video_limit: default_video_limit(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockConfig {
    /// A lock older than this is stale and reclaimed by the startup sweep.
    #[serde(default = "default_lock_expiry_micros")]
    pub expiry_micros: i64,
    /// A background heartbeat older than this means the background process
    /// died holding locks; the foreground reclaims them.
    #[serde(default = "default_bg_death_timeout_micros")]
    pub bg_death_timeout_micros: i64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            expiry_micros: default_lock_expiry_micros(),
            bg_death_timeout_micros: default_bg_death_timeout_micros(),
        }
    }
}

impl UploadConfig {
    pub fn upload_deadline(&self) -> Duration {
        Duration::from_secs(self.upload_deadline_secs)
    }

    pub fn liaison_poll_interval(&self) -> Duration {
        Duration::from_millis(self.liaison_poll_ms)
    }
}

fn default_global_limit() -> usize {
    4
}

fn default_video_limit() -> usize {
    2
}

fn default_lock_expiry_micros() -> i64 {
    24 * 60 * 60 * 1_000_000 // 1 day
}

fn default_bg_death_timeout_micros() -> i64 {
    5 * 1_000_000 // 5 s
}

fn default_liaison_poll_ms() -> u64 {
    2000
}

fn default_upload_deadline_secs() -> u64 {
    50 * 60
}
