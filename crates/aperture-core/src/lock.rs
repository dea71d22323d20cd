//! Durable per-file advisory locks shared by the foreground and background
//! uploader processes.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use aperture_types::{ProcessKind, Result, UploadError};

use crate::config::LockConfig;
use crate::store::StateStore;

const LOCKS_PREFIX: &str = "locks/";
const HEARTBEAT_KEY: &str = "heartbeat/background";

/// Wall-clock microseconds, the unit of every persisted timestamp here.
pub fn now_micros() -> i64 {
    chrono::Utc::now().timestamp_micros()
}

/// A lock record stored as `locks/<localID>.json`.
#[derive(Debug, Serialize, Deserialize)]
struct LockEntry {
    owner: ProcessKind,
    acquired_at_micros: i64,
}

#[derive(Clone)]
pub struct LockStore {
    store: Arc<dyn StateStore>,
}

impl LockStore {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self { store }
    }

    fn key(local_id: &str) -> String {
        format!("{LOCKS_PREFIX}{local_id}.json")
    }

    /// Acquire the lock for `local_id`. Fails with `LockAlreadyAcquired`
    /// while any record exists, whoever owns it.
    pub fn acquire(&self, local_id: &str, owner: ProcessKind, now_micros: i64) -> Result<()> {
        let key = Self::key(local_id);
        if self.store.exists(&key)? {
            return Err(UploadError::LockAlreadyAcquired(local_id.to_string()));
        }
        let entry = LockEntry {
            owner,
            acquired_at_micros: now_micros,
        };
        self.store.put(&key, &serde_json::to_vec(&entry)?)?;
        Ok(())
    }

    /// Release the lock for `local_id` if held by `owner`. No-op when the
    /// record is absent or owned by the other process.
    pub fn release(&self, local_id: &str, owner: ProcessKind) -> Result<()> {
        let key = Self::key(local_id);
        match self.read_entry(&key)? {
            Some(entry) if entry.owner == owner => self.store.delete(&key),
            _ => Ok(()),
        }
    }

    /// Whether `local_id` is locked by `owner` specifically.
    pub fn is_locked(&self, local_id: &str, owner: ProcessKind) -> Result<bool> {
        match self.read_entry(&Self::key(local_id))? {
            Some(entry) => Ok(entry.owner == owner),
            None => Ok(false),
        }
    }

    /// Bulk cleanup at process start: drop every lock `owner` acquired
    /// before `cutoff_micros`. Returns the number released.
    pub fn release_locks_acquired_by_owner_before(
        &self,
        owner: ProcessKind,
        cutoff_micros: i64,
    ) -> Result<usize> {
        self.sweep(|entry| entry.owner == owner && entry.acquired_at_micros < cutoff_micros)
    }

    /// Global staleness sweep: drop every lock acquired before
    /// `cutoff_micros`, regardless of owner.
    pub fn release_all_locks_acquired_before(&self, cutoff_micros: i64) -> Result<usize> {
        self.sweep(|entry| entry.acquired_at_micros < cutoff_micros)
    }

    fn sweep(&self, should_remove: impl Fn(&LockEntry) -> bool) -> Result<usize> {
        let mut removed = 0;
        for key in self.store.list(LOCKS_PREFIX)? {
            let Some(entry) = self.read_entry(&key)? else {
                continue;
            };
            if should_remove(&entry) {
                self.store.delete(&key)?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    fn read_entry(&self, key: &str) -> Result<Option<LockEntry>> {
        let Some(data) = self.store.get(key)? else {
            return Ok(None);
        };
        // An unparseable record is treated as absent; the sweep will
        // eventually delete the key when a fresh acquire overwrites it.
        Ok(serde_json::from_slice(&data).ok())
    }

    /// Stamp the background process heartbeat.
    pub fn stamp_heartbeat(&self, now_micros: i64) -> Result<()> {
        self.store
            .put(HEARTBEAT_KEY, now_micros.to_string().as_bytes())
    }

    /// Last background heartbeat, or `None` if the background process has
    /// never run.
    pub fn last_heartbeat(&self) -> Result<Option<i64>> {
        let Some(data) = self.store.get(HEARTBEAT_KEY)? else {
            return Ok(None);
        };
        Ok(String::from_utf8_lossy(&data).trim().parse().ok())
    }

    /// Startup policy. The foreground recovers its own crashed locks,
    /// sweeps expired ones, and reclaims background locks when the
    /// background heartbeat has gone silent. The background process only
    /// stamps its heartbeat.
    pub fn startup_sweep(
        &self,
        cfg: &LockConfig,
        process: ProcessKind,
        now_micros: i64,
    ) -> Result<()> {
        match process {
            ProcessKind::Background => self.stamp_heartbeat(now_micros),
            ProcessKind::Foreground => {
                let own = self
                    .release_locks_acquired_by_owner_before(ProcessKind::Foreground, now_micros)?;
                let expired =
                    self.release_all_locks_acquired_before(now_micros - cfg.expiry_micros)?;
                let last_beat = self.last_heartbeat()?.unwrap_or(0);
                let mut reclaimed = 0;
                if last_beat < now_micros - cfg.bg_death_timeout_micros {
                    reclaimed = self.release_locks_acquired_by_owner_before(
                        ProcessKind::Background,
                        now_micros,
                    )?;
                }
                if own + expired + reclaimed > 0 {
                    tracing::info!(
                        own,
                        expired,
                        reclaimed,
                        "startup lock sweep released stale locks"
                    );
                }
                Ok(())
            }
        }
    }
}
