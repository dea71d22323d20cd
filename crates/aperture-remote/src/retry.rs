use std::time::Duration;

use crate::RetryConfig;

/// Retry a closure on transient `ureq::Error`s with a fixed delay between
/// attempts.
///
/// Non-retryable errors return immediately so callers can classify them
/// without burning attempts.
#[allow(clippy::result_large_err)]
pub fn retry_http<T>(
    config: &RetryConfig,
    op_name: &str,
    f: impl Fn() -> std::result::Result<T, ureq::Error>,
) -> std::result::Result<T, ureq::Error> {
    let attempts = config.max_attempts.max(1);
    let mut last_err = None;

    for attempt in 0..attempts {
        if attempt > 0 {
            std::thread::sleep(Duration::from_millis(config.backoff_ms));
        }
        match f() {
            Ok(val) => return Ok(val),
            Err(e) if attempt + 1 < attempts && worth_another_attempt(&e) => {
                tracing::warn!(
                    "{op_name}: transient error (attempt {}/{}), retrying: {e}",
                    attempt + 1,
                    attempts,
                );
                last_err = Some(e);
            }
            Err(e) => return Err(e),
        }
    }
    Err(last_err.unwrap())
}

/// A definitive catalog answer (quota, plan size, bad request) will not
/// change on a re-send, so any 4xx other than throttling stops the loop.
/// Throttling, server-side failures and connection trouble can clear on
/// their own.
fn worth_another_attempt(err: &ureq::Error) -> bool {
    match err {
        ureq::Error::Status(status, _) => *status == 429 || (500..600).contains(status),
        ureq::Error::Transport(_) => true,
    }
}
