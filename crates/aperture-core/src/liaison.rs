//! Foreground-side reconciliation of uploads picked up by the background
//! process.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use aperture_types::{ProcessKind, UploadError};

use crate::queue::{ItemStatus, Shared};

/// Interval loop driven by the orchestrator; exits on shutdown.
pub(crate) fn run_loop(shared: &Arc<Shared>, shutdown: &Arc<AtomicBool>) {
    let interval = shared.env.cfg.liaison_poll_interval();
    let mut next_run = Instant::now() + interval;
    while !shutdown.load(Ordering::SeqCst) {
        if Instant::now() >= next_run {
            run_once(shared);
            next_run = Instant::now() + interval;
        }
        std::thread::sleep(Duration::from_millis(50));
    }
}

/// One reconciliation pass over items parked in `InBackground`.
///
/// For each such item whose background lock is gone: if the local DB now
/// shows a remote id, the upload succeeded over there; otherwise the
/// background process gave up silently. Guarded against concurrent runs.
pub(crate) fn run_once(shared: &Arc<Shared>) {
    if shared.liaison_running.swap(true, Ordering::SeqCst) {
        return;
    }

    let parked: Vec<(String, i64)> = {
        let st = shared.state.lock().unwrap();
        st.items
            .iter()
            .filter(|i| i.status == ItemStatus::InBackground)
            .map(|i| (i.local_id.clone(), i.file.generated_id))
            .collect()
    };

    for (local_id, generated_id) in parked {
        let still_locked = match shared
            .env
            .locks
            .is_locked(&local_id, ProcessKind::Background)
        {
            Ok(locked) => locked,
            Err(e) => {
                tracing::warn!(local_id = %local_id, error = %e, "liaison lock probe failed");
                continue;
            }
        };
        if still_locked {
            continue;
        }

        let outcome = match shared.env.db.get_file(generated_id) {
            Ok(Some(record)) if record.has_remote_id() => Ok(record),
            Ok(_) => Err(UploadError::SilentlyCancelUploads),
            Err(e) => {
                tracing::warn!(local_id = %local_id, error = %e, "liaison DB read failed");
                continue;
            }
        };

        let mut st = shared.state.lock().unwrap();
        let Some(pos) = st.items.iter().position(|i| i.local_id == local_id) else {
            continue;
        };
        let item = st.items.remove(pos);
        match &outcome {
            Ok(record) => {
                tracing::info!(local_id = %local_id, remote_id = ?record.uploaded_file_id, "background upload finished");
            }
            Err(_) => {
                tracing::info!(local_id = %local_id, "background upload released without a remote file");
            }
        }
        item.slot.fulfill(outcome);
        if st.items.is_empty() {
            st.total_in_session = 0;
        }
        shared.env.pool.set_queue_size(st.items.len());
    }

    shared.liaison_running.store(false, Ordering::SeqCst);
}
