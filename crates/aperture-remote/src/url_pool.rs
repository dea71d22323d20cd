//! Cache of presigned object PUT URLs with coalesced refill.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex};

use aperture_types::{Result, UploadError};

use crate::api::{PresignedUrl, UploadUrlsResponse};
use crate::http_util::{apply_auth, join_url};

/// Server never hands out more than this many URLs per refill.
const MAX_URLS_PER_FETCH: usize = 42;

struct PoolState {
    urls: VecDeque<PresignedUrl>,
    /// One refill at a time; concurrent takers wait on `fetch_done`.
    fetch_in_flight: bool,
    /// Outcome of the last completed fetch, shared with coalesced waiters.
    fetch_err: Option<UploadError>,
}

pub struct UrlPool {
    agent: ureq::Agent,
    endpoint: String,
    token: String,
    /// Live queue size, maintained by the scheduler; refill requests
    /// `min(42, 2 × size)` URLs.
    queue_size: AtomicUsize,
    state: Mutex<PoolState>,
    fetch_done: Condvar,
}

impl UrlPool {
    pub fn new(agent: ureq::Agent, endpoint: &str, token: &str) -> Self {
        Self {
            agent,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            token: token.to_string(),
            queue_size: AtomicUsize::new(0),
            state: Mutex::new(PoolState {
                urls: VecDeque::new(),
                fetch_in_flight: false,
                fetch_err: None,
            }),
            fetch_done: Condvar::new(),
        }
    }

    /// Called by the scheduler whenever the queue length changes.
    pub fn set_queue_size(&self, size: usize) {
        self.queue_size.store(size, Ordering::Relaxed);
    }

    /// Pop the next presigned URL, refilling the pool if it is empty.
    ///
    /// Concurrent callers share a single in-flight fetch; a failed fetch is
    /// delivered to every waiter. Refill failures are classified, never
    /// retried here.
    pub fn take(&self) -> Result<PresignedUrl> {
        let mut st = self.state.lock().unwrap();
        loop {
            if let Some(url) = st.urls.pop_front() {
                return Ok(url);
            }
            if st.fetch_in_flight {
                st = self.fetch_done.wait(st).unwrap();
                if let Some(err) = &st.fetch_err {
                    return Err(err.duplicate());
                }
                continue;
            }

            st.fetch_in_flight = true;
            st.fetch_err = None;
            drop(st);
            let fetched = self.fetch_urls();
            st = self.state.lock().unwrap();
            st.fetch_in_flight = false;
            match fetched {
                Ok(urls) if urls.is_empty() => {
                    let e = UploadError::Other("upload-urls refill returned no URLs".into());
                    st.fetch_err = Some(e.duplicate());
                    self.fetch_done.notify_all();
                    return Err(e);
                }
                Ok(urls) => {
                    st.urls.extend(urls);
                    self.fetch_done.notify_all();
                }
                Err(e) => {
                    st.fetch_err = Some(e.duplicate());
                    self.fetch_done.notify_all();
                    return Err(e);
                }
            }
        }
    }

    /// Forget any in-flight or failed fetch so the next `take` starts a
    /// fresh refill. Wired to the subscription-purchased signal.
    pub fn reset_fetch_state(&self) {
        let mut st = self.state.lock().unwrap();
        st.fetch_in_flight = false;
        st.fetch_err = None;
        self.fetch_done.notify_all();
    }

    fn fetch_count(&self) -> usize {
        let size = self.queue_size.load(Ordering::Relaxed).max(1);
        MAX_URLS_PER_FETCH.min(2 * size)
    }

    fn fetch_urls(&self) -> Result<Vec<PresignedUrl>> {
        let count = self.fetch_count();
        let url = format!(
            "{}?count={count}",
            join_url(&self.endpoint, "files/upload-urls")
        );
        let resp = match apply_auth(self.agent.get(&url), &self.token).call() {
            Ok(resp) => resp,
            Err(ureq::Error::Status(402, _)) => return Err(UploadError::NoActiveSubscription),
            Err(ureq::Error::Status(426, _)) => return Err(UploadError::StorageLimitExceeded),
            Err(e) => return Err(e.into()),
        };
        let parsed: UploadUrlsResponse = resp
            .into_json()
            .map_err(|e| UploadError::Other(format!("upload-urls parse: {e}")))?;
        tracing::debug!(count = parsed.urls.len(), "refilled presigned URL pool");
        Ok(parsed.urls)
    }
}
