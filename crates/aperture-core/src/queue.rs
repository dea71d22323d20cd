//! Bounded concurrent upload queue: admission, class limits, session
//! bookkeeping, and the orchestrator lifecycle around it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use aperture_remote::blob::BlobPutter;
use aperture_remote::catalog::CatalogClient;
use aperture_remote::url_pool::UrlPool;
use aperture_types::{ProcessKind, Result, UploadError};

use crate::collab::{
    CollectionsService, ConnectivityProbe, FilesDb, LocalSyncTracker, MediaExtractor,
};
use crate::config::UploadConfig;
use crate::crypto::CryptoEngine;
use crate::events::{Event, EventBus};
use crate::handle::{UploadHandle, UploadSlot};
use crate::liaison;
use crate::lock::{now_micros, LockStore};
use crate::model::{FileRecord, MediaKind};
use crate::store::StateStore;
use crate::worker::{self, WorkerEnv};

/// Cooperative stop flag owned by the external sync service. Polled at
/// every admission cycle and immediately before each catalog call.
#[derive(Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn clear(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemStatus {
    NotStarted,
    InProgress,
    /// The other process holds the lock; the background liaison owns
    /// completion reporting.
    InBackground,
}

pub(crate) struct QueueItem {
    pub(crate) local_id: String,
    pub(crate) file: FileRecord,
    pub(crate) collection_id: i64,
    pub(crate) forced: bool,
    pub(crate) status: ItemStatus,
    pub(crate) slot: UploadSlot,
}

#[derive(Default)]
pub(crate) struct QueueState {
    pub(crate) items: Vec<QueueItem>,
    pub(crate) in_progress: usize,
    pub(crate) video_in_progress: usize,
    pub(crate) total_in_session: usize,
}

/// Point-in-time queue counters for the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueStatus {
    pub not_started: usize,
    pub in_progress: usize,
    pub in_background: usize,
    pub video_in_progress: usize,
    pub total_in_session: usize,
}

pub(crate) struct Shared {
    pub(crate) env: WorkerEnv,
    pub(crate) state: Mutex<QueueState>,
    pub(crate) liaison_running: AtomicBool,
}

/// Collaborators supplied by the embedding application.
pub struct UploaderDeps {
    pub store: Arc<dyn StateStore>,
    pub db: Arc<dyn FilesDb>,
    pub collections: Arc<dyn CollectionsService>,
    pub media: Arc<dyn MediaExtractor>,
    pub connectivity: Arc<dyn ConnectivityProbe>,
    pub tracker: Arc<dyn LocalSyncTracker>,
    pub crypto: Arc<dyn CryptoEngine>,
    pub events: Arc<EventBus>,
    pub sync_stop: StopSignal,
}

/// Process-wide upload orchestrator. One instance per process, created at
/// the composition root with an explicit `init`.
pub struct Uploader {
    shared: Arc<Shared>,
    shutdown: Arc<AtomicBool>,
    listener: Option<std::thread::JoinHandle<()>>,
    liaison: Option<std::thread::JoinHandle<()>>,
}

impl Uploader {
    pub fn init(cfg: UploadConfig, process: ProcessKind, deps: UploaderDeps) -> Result<Uploader> {
        let locks = LockStore::new(Arc::clone(&deps.store));
        locks.startup_sweep(&cfg.locks, process, now_micros())?;
        std::fs::create_dir_all(&cfg.temp_dir)?;

        let agent = aperture_remote::build_agent(&cfg.http);
        let pool = UrlPool::new(agent.clone(), &cfg.endpoint, &cfg.auth_token);
        let blobs = BlobPutter::new(agent.clone(), cfg.retry.max_attempts);
        let catalog = CatalogClient::new(agent, &cfg.endpoint, &cfg.auth_token, cfg.retry.clone());

        let shared = Arc::new(Shared {
            env: WorkerEnv {
                cfg,
                process,
                locks,
                db: deps.db,
                collections: deps.collections,
                media: deps.media,
                connectivity: deps.connectivity,
                tracker: deps.tracker,
                crypto: deps.crypto,
                pool,
                blobs,
                catalog,
                events: Arc::clone(&deps.events),
                sync_stop: deps.sync_stop,
            },
            state: Mutex::new(QueueState::default()),
            liaison_running: AtomicBool::new(false),
        });

        let shutdown = Arc::new(AtomicBool::new(false));
        let listener = Some(spawn_event_listener(&shared, &deps.events, &shutdown));
        let liaison = match process {
            ProcessKind::Foreground => Some(spawn_liaison(&shared, &shutdown)),
            ProcessKind::Background => None,
        };

        Ok(Uploader {
            shared,
            shutdown,
            listener,
            liaison,
        })
    }

    /// Submit a file for upload into `collection_id`.
    pub fn enqueue(&self, file: FileRecord, collection_id: i64) -> UploadHandle {
        self.enqueue_inner(file, collection_id, false)
    }

    /// As `enqueue`, bypassing the connectivity gate.
    pub fn enqueue_forced(&self, file: FileRecord, collection_id: i64) -> UploadHandle {
        self.enqueue_inner(file, collection_id, true)
    }

    fn enqueue_inner(&self, file: FileRecord, collection_id: i64, forced: bool) -> UploadHandle {
        let Some(local_id) = file.local_id.clone() else {
            let slot = UploadSlot::new();
            slot.fulfill(Err(UploadError::InvalidFile("record has no local id".into())));
            return slot.subscribe();
        };

        let handle;
        {
            let mut st = self.shared.state.lock().unwrap();
            st.total_in_session += 1;

            if let Some(pos) = st.items.iter().position(|i| i.local_id == local_id) {
                if st.items[pos].collection_id == collection_id {
                    // Counted once too many.
                    st.total_in_session = st.total_in_session.saturating_sub(1);
                    return st.items[pos].slot.subscribe();
                }
                // Same file headed elsewhere: once the in-flight upload
                // succeeds, add the uploaded record to this collection too.
                let upstream = st.items[pos].slot.subscribe();
                let chained = UploadSlot::new();
                let chained_handle = chained.subscribe();
                let collections = Arc::clone(&self.shared.env.collections);
                std::thread::spawn(move || {
                    let outcome = match upstream.wait() {
                        Ok(record) => collections
                            .add_to_collection(collection_id, &record)
                            .map(|()| record),
                        Err(e) => Err(e),
                    };
                    chained.fulfill(outcome);
                });
                return chained_handle;
            }

            let slot = UploadSlot::new();
            handle = slot.subscribe();
            st.items.push(QueueItem {
                local_id,
                file,
                collection_id,
                forced,
                status: ItemStatus::NotStarted,
                slot,
            });
            self.shared.env.pool.set_queue_size(st.items.len());
        }
        poll(&self.shared);
        handle
    }

    /// Fulfill every not-started item with `reason` and remove it.
    /// In-progress and in-background items are untouched.
    pub fn clear_queue(&self, reason: &UploadError) {
        let mut st = self.shared.state.lock().unwrap();
        clear_not_started_locked(&mut st, reason);
        self.shared.env.pool.set_queue_size(st.items.len());
    }

    /// As `clear_queue`, restricted to not-started items matching the
    /// predicate; adjusts the session counter accordingly.
    pub fn remove_where(
        &self,
        predicate: impl Fn(&FileRecord, i64) -> bool,
        reason: &UploadError,
    ) {
        let mut st = self.shared.state.lock().unwrap();
        let mut removed = 0;
        st.items.retain(|item| {
            if item.status == ItemStatus::NotStarted && predicate(&item.file, item.collection_id) {
                item.slot.fulfill(Err(reason.duplicate()));
                removed += 1;
                false
            } else {
                true
            }
        });
        st.total_in_session = st.total_in_session.saturating_sub(removed);
        self.shared.env.pool.set_queue_size(st.items.len());
    }

    /// Items admitted in the current upload session, for the UI.
    pub fn current_session_upload_count(&self) -> usize {
        self.shared.state.lock().unwrap().total_in_session
    }

    pub fn status(&self) -> QueueStatus {
        let st = self.shared.state.lock().unwrap();
        QueueStatus {
            not_started: count_status(&st, ItemStatus::NotStarted),
            in_progress: st.in_progress,
            in_background: count_status(&st, ItemStatus::InBackground),
            video_in_progress: st.video_in_progress,
            total_in_session: st.total_in_session,
        }
    }

    pub fn item_status(&self, local_id: &str) -> Option<ItemStatus> {
        let st = self.shared.state.lock().unwrap();
        st.items
            .iter()
            .find(|i| i.local_id == local_id)
            .map(|i| i.status)
    }

    /// One liaison pass: reap items the background process has finished
    /// with. Runs automatically on the poll interval in the foreground;
    /// exposed for embedders driving it manually.
    pub fn poll_background_uploads(&self) {
        liaison::run_once(&self.shared);
    }

    /// Stop the liaison and event listener threads. Idempotent.
    pub fn shutdown(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(handle) = self.listener.take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.liaison.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Uploader {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn count_status(st: &QueueState, status: ItemStatus) -> usize {
    st.items.iter().filter(|i| i.status == status).count()
}

/// Fulfill + drop all not-started items; the session counter resets even
/// when in-progress items remain (mid-session aborts undercount).
pub(crate) fn clear_not_started_locked(st: &mut QueueState, reason: &UploadError) {
    st.items.retain(|item| {
        if item.status == ItemStatus::NotStarted {
            item.slot.fulfill(Err(reason.duplicate()));
            false
        } else {
            true
        }
    });
    st.total_in_session = 0;
}

/// Admission cycle. Idempotent; called after every enqueue and every
/// worker completion. Admits until the global or video limit saturates.
pub(crate) fn poll(shared: &Arc<Shared>) {
    let mut to_spawn = Vec::new();
    {
        let mut st = shared.state.lock().unwrap();

        if shared.env.sync_stop.is_set() {
            clear_not_started_locked(&mut st, &UploadError::SyncStopRequested);
        }
        if st.items.is_empty() {
            st.total_in_session = 0;
            shared.env.pool.set_queue_size(0);
            return;
        }

        let limits = &shared.env.cfg.concurrency;
        while st.in_progress < limits.global_limit {
            let Some(head) = st
                .items
                .iter()
                .position(|i| i.status == ItemStatus::NotStarted)
            else {
                break;
            };

            let video_saturated = st.video_in_progress >= limits.video_limit;
            let chosen = if st.items[head].file.kind == MediaKind::Video && video_saturated {
                // Head is video and the video budget is full: take the
                // first non-video instead, or wait for a slot.
                match st.items.iter().position(|i| {
                    i.status == ItemStatus::NotStarted && i.file.kind != MediaKind::Video
                }) {
                    Some(pos) => pos,
                    None => break,
                }
            } else {
                head
            };

            st.items[chosen].status = ItemStatus::InProgress;
            st.in_progress += 1;
            if st.items[chosen].file.kind == MediaKind::Video {
                st.video_in_progress += 1;
            }
            let item = &st.items[chosen];
            to_spawn.push((
                item.local_id.clone(),
                item.file.clone(),
                item.collection_id,
                item.forced,
            ));
        }
    }

    for (local_id, file, collection_id, forced) in to_spawn {
        let shared = Arc::clone(shared);
        std::thread::spawn(move || {
            let outcome = worker::try_to_upload(&shared.env, &file, collection_id, forced);
            on_upload_done(&shared, &local_id, outcome);
        });
    }
}

pub(crate) fn on_upload_done(
    shared: &Arc<Shared>,
    local_id: &str,
    outcome: Result<FileRecord>,
) {
    {
        let mut st = shared.state.lock().unwrap();
        let Some(pos) = st.items.iter().position(|i| i.local_id == local_id) else {
            return;
        };
        let is_video = st.items[pos].file.kind == MediaKind::Video;
        st.in_progress = st.in_progress.saturating_sub(1);
        if is_video {
            st.video_in_progress = st.video_in_progress.saturating_sub(1);
        }

        match outcome {
            Ok(record) => {
                let item = st.items.remove(pos);
                tracing::info!(local_id, remote_id = ?record.uploaded_file_id, "upload finished");
                item.slot.fulfill(Ok(record));
            }
            Err(UploadError::LockAlreadyAcquired(_)) => {
                // The other process is on it; the liaison reports for us.
                st.items[pos].status = ItemStatus::InBackground;
                tracing::debug!(local_id, "upload handed off to the other process");
            }
            Err(e) => {
                if e.is_session_terminal() {
                    clear_not_started_locked(&mut st, &e);
                }
                let item = st.items.remove(pos);
                if e.is_expected_outcome() {
                    tracing::info!(local_id, outcome = %e, "upload not completed");
                } else {
                    tracing::error!(local_id, file = %item.file.display_name(), error = %e, "upload failed");
                }
                item.slot.fulfill(Err(e));
            }
        }

        if st.items.is_empty() {
            st.total_in_session = 0;
        }
        shared.env.pool.set_queue_size(st.items.len());
    }
    poll(shared);
}

fn spawn_event_listener(
    shared: &Arc<Shared>,
    events: &Arc<EventBus>,
    shutdown: &Arc<AtomicBool>,
) -> std::thread::JoinHandle<()> {
    let rx = events.subscribe();
    let shared = Arc::clone(shared);
    let shutdown = Arc::clone(shutdown);
    std::thread::spawn(move || {
        while !shutdown.load(Ordering::SeqCst) {
            match rx.recv_timeout(Duration::from_millis(200)) {
                Ok(Event::SubscriptionPurchased) => {
                    shared.env.pool.reset_fetch_state();
                }
                Ok(Event::LocalFilesDeleted { local_ids }) => {
                    let reason = UploadError::InvalidFile("file deleted on device".into());
                    let mut st = shared.state.lock().unwrap();
                    let mut removed = 0;
                    st.items.retain(|item| {
                        let gone = item.status == ItemStatus::NotStarted
                            && local_ids.contains(&item.local_id);
                        if gone {
                            item.slot.fulfill(Err(reason.duplicate()));
                            removed += 1;
                        }
                        !gone
                    });
                    st.total_in_session = st.total_in_session.saturating_sub(removed);
                    shared.env.pool.set_queue_size(st.items.len());
                }
                Ok(Event::LocalFilesUpdated { .. }) => {}
                Err(crossbeam_channel::RecvTimeoutError::Timeout) => {}
                Err(crossbeam_channel::RecvTimeoutError::Disconnected) => break,
            }
        }
    })
}

fn spawn_liaison(
    shared: &Arc<Shared>,
    shutdown: &Arc<AtomicBool>,
) -> std::thread::JoinHandle<()> {
    let shared = Arc::clone(shared);
    let shutdown = Arc::clone(shutdown);
    std::thread::spawn(move || {
        liaison::run_loop(&shared, &shutdown);
    })
}
