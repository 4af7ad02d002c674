// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Module providing utilities for retrying provider operations.

use crate::error::Error;
use slog::{warn, Logger};
use std::future::Future;
use std::time::Duration;

pub use ::backoff::future::{retry, retry_notify};
pub use ::backoff::Error as BackoffError;
pub use ::backoff::{backoff::Backoff, ExponentialBackoff, Notify};

/// Return a backoff policy for polling an asynchronous provider-side
/// operation (e.g. waiting for a virtual network's IPv6 block association
/// to become active).
///
/// These operations complete on their own; polling faster does not help, so
/// the interval is fixed rather than exponential, and the policy gives up
/// after a bounded elapsed time so callers can surface a descriptive
/// timeout.
pub fn provider_async_policy() -> ::backoff::ExponentialBackoff {
    const POLL_INTERVAL: Duration = Duration::from_millis(500);
    const GIVE_UP_AFTER: Duration = Duration::from_secs(120);
    ::backoff::ExponentialBackoff {
        current_interval: POLL_INTERVAL,
        initial_interval: POLL_INTERVAL,
        multiplier: 1.0,
        randomization_factor: 0.0,
        max_interval: POLL_INTERVAL,
        max_elapsed_time: Some(GIVE_UP_AFTER),
        ..::backoff::ExponentialBackoff::default()
    }
}

/// Return a backoff policy for retrying transient provider errors
/// (throttling and the like), which are expected to clear quickly.
pub fn provider_retry_policy() -> ::backoff::ExponentialBackoff {
    const INITIAL_INTERVAL: Duration = Duration::from_millis(50);
    const MAX_INTERVAL: Duration = Duration::from_secs(1);
    const GIVE_UP_AFTER: Duration = Duration::from_secs(30);
    ::backoff::ExponentialBackoff {
        current_interval: INITIAL_INTERVAL,
        initial_interval: INITIAL_INTERVAL,
        multiplier: 2.0,
        max_interval: MAX_INTERVAL,
        max_elapsed_time: Some(GIVE_UP_AFTER),
        ..::backoff::ExponentialBackoff::default()
    }
}

/// Runs `op` under [`provider_retry_policy`], retrying it as long as it
/// fails with an [`Error`] whose `retryable()` is true.
///
/// `op` must be safe to re-run from the top: every caller passes an
/// idempotent describe-then-decide step, so a retry after a partial
/// application re-observes and converges.  Non-retryable errors and
/// budget exhaustion surface to the caller unchanged.
pub async fn retry_transient<T, F, Fut>(
    log: &Logger,
    operation: &str,
    op: F,
) -> Result<T, Error>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, Error>>,
{
    let op = &op;
    retry_notify(
        provider_retry_policy(),
        || async move {
            op().await.map_err(|error| {
                if error.retryable() {
                    BackoffError::transient(error)
                } else {
                    BackoffError::permanent(error)
                }
            })
        },
        |error, delay| {
            warn!(
                log,
                "transient provider error; retrying";
                "operation" => operation,
                "retry_after" => ?delay,
                "error" => ?error,
            );
        },
    )
    .await
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::dev::test_setup_log;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_retry_transient_absorbs_transient_errors() {
        let log = test_setup_log("retry_transient_absorbs_transient_errors");
        let attempts = AtomicU32::new(0);
        let attempts = &attempts;
        let value = retry_transient(&log, "flaky provider call", || {
            async move {
                if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(Error::unavail("throttled"))
                } else {
                    Ok(7)
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(value, 7);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_transient_surfaces_permanent_errors() {
        let log = test_setup_log("retry_transient_surfaces_permanent_errors");
        let attempts = AtomicU32::new(0);
        let attempts = &attempts;
        let result: Result<(), Error> =
            retry_transient(&log, "doomed provider call", || async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(Error::invalid_request("malformed"))
            })
            .await;
        assert_eq!(result, Err(Error::invalid_request("malformed")));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
