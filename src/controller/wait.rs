//! Bounded polling used inside a single reconcile pass

use std::future::Future;
use std::time::Duration;

use tracing::debug;

use crate::error::{Error, Result};

/// Poll `probe` every `interval` until it yields a value or `timeout` elapses
///
/// Errors from the probe end the wait immediately.
pub async fn wait_for<T, F, Fut>(
    timeout: Duration,
    interval: Duration,
    what: &str,
    mut probe: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>>>,
{
    let poll = async {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            if let Some(value) = probe().await? {
                return Ok(value);
            }
            debug!("Still waiting for {}", what);
        }
    };

    match tokio::time::timeout(timeout, poll).await {
        Ok(result) => result,
        Err(_) => Err(Error::Timeout(timeout, what.to_string())),
    }
}
