//! In-process event bus connecting the engine with the rest of the app.

use std::sync::Mutex;

use crossbeam_channel::{Receiver, Sender};

use crate::model::FileRecord;

#[derive(Debug, Clone)]
pub enum Event {
    /// The user bought a plan; a previously failed URL refill should be
    /// attempted again.
    SubscriptionPurchased,
    /// Files disappeared from the device; pending uploads for them are
    /// dropped.
    LocalFilesDeleted { local_ids: Vec<String> },
    /// A file finished uploading in the foreground.
    LocalFilesUpdated { file: Box<FileRecord> },
}

/// Fan-out pub/sub: every subscriber receives every published event.
#[derive(Default)]
pub struct EventBus {
    senders: Mutex<Vec<Sender<Event>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Receiver<Event> {
        let (tx, rx) = crossbeam_channel::unbounded();
        self.senders.lock().unwrap().push(tx);
        rx
    }

    pub fn publish(&self, event: Event) {
        let mut senders = self.senders.lock().unwrap();
        // Prune subscribers whose receivers have been dropped.
        senders.retain(|tx| tx.send(event.clone()).is_ok());
    }
}
