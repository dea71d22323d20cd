//! Streams encrypted blobs to presigned PUT URLs.

use std::fs::File;
use std::path::Path;
use std::time::Instant;

use aperture_types::{Result, UploadError};

use crate::url_pool::UrlPool;

pub struct BlobPutter {
    agent: ureq::Agent,
    max_attempts: usize,
}

impl BlobPutter {
    pub fn new(agent: ureq::Agent, max_attempts: usize) -> Self {
        Self {
            agent,
            max_attempts: max_attempts.max(1),
        }
    }

    /// PUT the file at `path` to a presigned URL taken from `pool` and
    /// return the object key it was stored under.
    ///
    /// A first-attempt length mismatch (the source file changed size under
    /// us) is retried once with an accurately sized in-memory body on the
    /// same URL. Any other failure retries with a fresh presigned URL —
    /// the previous one may have expired — up to `max_attempts` total.
    pub fn put(&self, pool: &UrlPool, path: &Path) -> Result<String> {
        let mut attempt = 1;
        loop {
            let presigned = pool.take()?;
            let size = std::fs::metadata(path)?.len();
            let started = Instant::now();

            let outcome = self
                .agent
                .put(&presigned.url)
                .set("Content-Length", &size.to_string())
                .send(File::open(path)?);

            match outcome {
                Ok(_) => {
                    log_throughput(size, started);
                    return Ok(presigned.object_key);
                }
                Err(e) if attempt == 1 && is_length_mismatch(&e, path, size) => {
                    tracing::warn!(
                        path = %path.display(),
                        "blob PUT length mismatch, retrying with recomputed length"
                    );
                    let body = std::fs::read(path)?;
                    let started = Instant::now();
                    self.agent
                        .put(&presigned.url)
                        .set("Content-Length", &body.len().to_string())
                        .send_bytes(&body)
                        .map_err(UploadError::from)?;
                    log_throughput(body.len() as u64, started);
                    return Ok(presigned.object_key);
                }
                Err(e) if attempt < self.max_attempts => {
                    tracing::warn!(
                        path = %path.display(),
                        attempt,
                        max_attempts = self.max_attempts,
                        error = %e,
                        "blob PUT failed, retrying with fresh URL"
                    );
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

fn log_throughput(bytes: u64, started: Instant) {
    let elapsed_ms = started.elapsed().as_millis().max(1) as u64;
    tracing::info!(
        bytes,
        elapsed_ms,
        kib_per_s = (bytes / elapsed_ms).max(1),
        "blob uploaded"
    );
}

/// The transport reported fewer/more bytes than the announced length, or
/// the file's on-disk size changed between stat and send.
fn is_length_mismatch(err: &ureq::Error, path: &Path, sent_len: u64) -> bool {
    let text = err.to_string().to_ascii_lowercase();
    if text.contains("content size exceeds specified contentlength") {
        return true;
    }
    matches!(std::fs::metadata(path), Ok(m) if m.len() != sent_len)
}
