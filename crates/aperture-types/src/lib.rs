pub mod error;

pub use error::{Result, UploadError};

use serde::{Deserialize, Serialize};

/// Which of the two device processes is running this engine instance.
///
/// Persisted inside lock records so either process can tell who holds a
/// per-file lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessKind {
    Foreground,
    Background,
}

impl ProcessKind {
    /// Suffix appended to temp-file names so the two processes never
    /// clobber each other's encryption artifacts.
    pub fn temp_suffix(&self) -> &'static str {
        match self {
            ProcessKind::Foreground => "",
            ProcessKind::Background => "_bg",
        }
    }
}

impl std::fmt::Display for ProcessKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProcessKind::Foreground => write!(f, "foreground"),
            ProcessKind::Background => write!(f, "background"),
        }
    }
}
