//! Bridges from async code to blocking collaborator calls.

use std::time::Duration;

use tokio::task::spawn_blocking;
use tokio::time::timeout;

use crate::{zlog_warn, Error, Result};

/// Run `f` on the blocking pool, giving up after `duration`. The label names
/// the work in the log when it stalls. A timed-out closure keeps running in
/// the background; its result is discarded.
pub async fn blocking_with_timeout<F, T>(label: &str, duration: Duration, f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    match timeout(duration, spawn_blocking(f)).await {
        Ok(Ok(inner)) => inner,
        Ok(Err(join_err)) => Err(Error::TaskJoin(join_err.to_string())),
        Err(_) => {
            zlog_warn!("{} did not finish within {:?}", label, duration);
            Err(Error::Timeout(duration))
        }
    }
}
