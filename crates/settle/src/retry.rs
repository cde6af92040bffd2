//! Retrying calls that fail while a dependency propagates.
use std::{future::Future, time::Duration};

use tokio::time::Instant;

use crate::{Error, Result};

const INITIAL_INTERVAL: Duration = Duration::from_millis(100);
const MAX_INTERVAL: Duration = Duration::from_secs(10);

/// Calls `op` until it succeeds, fails with an error `retryable` rejects,
/// or `timeout` runs out. Backs off exponentially between attempts.
///
/// On timeout the last retryable error is returned.
pub async fn retry_when<T, F, Fut>(
    timeout: Duration,
    mut op: F,
    retryable: impl Fn(&Error) -> bool,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let deadline = Instant::now() + timeout;
    let mut wait = INITIAL_INTERVAL;
    let mut attempt = 1;
    loop {
        let err = match op().await {
            Ok(value) => return Ok(value),
            Err(e) if retryable(&e) => e,
            Err(e) => return Err(e),
        };
        if Instant::now() + wait >= deadline {
            log::debug!("giving up after {attempt} attempts: {err}");
            return Err(err);
        }
        log::debug!("attempt {attempt} failed, retrying in {wait:?}: {err}");
        tokio::time::sleep(wait).await;
        wait = (wait * 2).min(MAX_INTERVAL);
        attempt += 1;
    }
}

/// Retries while the service reports the given error code.
pub async fn retry_on_code<T, F, Fut>(timeout: Duration, code: &str, op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    retry_when(timeout, op, |e| e.has_code(code)).await
}

#[cfg(test)]
mod test {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use super::*;

    const TIMEOUT: Duration = Duration::from_secs(2 * 60);

    fn forbidden() -> Error {
        Error::Api {
            code: Some("ForbiddenException".into()),
            message: "role can't be assumed yet".into(),
            source: "forbidden".into(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retries_until_success() {
        let calls = Arc::new(AtomicUsize::new(0));
        let value = retry_on_code(TIMEOUT, "ForbiddenException", || {
            let calls = calls.clone();
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 3 {
                    Err(forbidden())
                } else {
                    Ok("created")
                }
            }
        })
        .await
        .unwrap();
        assert_eq!("created", value);
        assert_eq!(4, calls.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn other_errors_are_not_retried() {
        let calls = Arc::new(AtomicUsize::new(0));
        let err = retry_on_code::<(), _, _>(TIMEOUT, "ForbiddenException", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err(Error::Api {
                    code: Some("ValidationException".into()),
                    message: "bad name".into(),
                    source: "bad".into(),
                })
            }
        })
        .await
        .unwrap_err();
        assert!(err.has_code("ValidationException"));
        assert_eq!(1, calls.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_returns_last_error() {
        let start = Instant::now();
        let err = retry_on_code::<(), _, _>(Duration::from_secs(30), "ForbiddenException", || async {
            Err(forbidden())
        })
        .await
        .unwrap_err();
        assert!(err.has_code("ForbiddenException"));
        assert!(Instant::now() - start <= Duration::from_secs(30));
    }
}
