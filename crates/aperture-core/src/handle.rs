//! One-shot result handles for queued uploads.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};

use aperture_types::UploadError;

use crate::model::FileRecord;

pub type UploadOutcome = Result<FileRecord, UploadError>;

/// Caller-side handle; resolves once with the uploaded record or a
/// classified error.
pub struct UploadHandle {
    rx: Receiver<UploadOutcome>,
}

impl UploadHandle {
    /// Block until the upload settles.
    pub fn wait(self) -> UploadOutcome {
        self.rx
            .recv()
            .unwrap_or_else(|_| Err(UploadError::Other("upload abandoned".into())))
    }

    pub fn wait_timeout(&self, timeout: Duration) -> Option<UploadOutcome> {
        self.rx.recv_timeout(timeout).ok()
    }

    pub fn try_wait(&self) -> Option<UploadOutcome> {
        self.rx.try_recv().ok()
    }
}

struct SlotState {
    waiters: Vec<Sender<UploadOutcome>>,
    outcome: Option<UploadOutcome>,
}

/// Queue-side fulfillment point. Fans out to every subscribed handle;
/// fulfills exactly once — later calls are ignored.
#[derive(Clone)]
pub struct UploadSlot {
    inner: Arc<Mutex<SlotState>>,
}

impl Default for UploadSlot {
    fn default() -> Self {
        Self::new()
    }
}

impl UploadSlot {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(SlotState {
                waiters: Vec::new(),
                outcome: None,
            })),
        }
    }

    pub fn subscribe(&self) -> UploadHandle {
        let (tx, rx) = crossbeam_channel::bounded(1);
        let mut st = self.inner.lock().unwrap();
        match &st.outcome {
            Some(outcome) => {
                let _ = tx.send(clone_outcome(outcome));
            }
            None => st.waiters.push(tx),
        }
        UploadHandle { rx }
    }

    /// Returns `false` when the slot was already fulfilled.
    pub fn fulfill(&self, outcome: UploadOutcome) -> bool {
        let mut st = self.inner.lock().unwrap();
        if st.outcome.is_some() {
            return false;
        }
        for tx in st.waiters.drain(..) {
            let _ = tx.send(clone_outcome(&outcome));
        }
        st.outcome = Some(outcome);
        true
    }

    pub fn is_fulfilled(&self) -> bool {
        self.inner.lock().unwrap().outcome.is_some()
    }
}

fn clone_outcome(outcome: &UploadOutcome) -> UploadOutcome {
    match outcome {
        Ok(record) => Ok(record.clone()),
        Err(e) => Err(e.duplicate()),
    }
}
