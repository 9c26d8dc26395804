//! Shared utility functions.

use std::time::Duration;

use tokio::task::spawn_blocking;
use tokio::time::timeout;

use crate::{Error, Result};

pub async fn blocking<F, T>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    spawn_blocking(f)
        .await
        .map_err(|e| Error::TaskJoin(e.to_string()))?
}

pub async fn blocking_with_timeout<F, T>(duration: Duration, f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    match timeout(duration, spawn_blocking(f)).await {
        Ok(Ok(inner)) => inner,
        Ok(Err(join_err)) => Err(Error::TaskJoin(join_err.to_string())),
        Err(_) => Err(Error::Timeout(duration)),
    }
}

/// Run a blocking operation up to `1 + retries` times, each attempt bounded
/// by `duration`. Returns the last error when every attempt fails.
pub async fn blocking_with_retry<F, T>(duration: Duration, retries: u32, f: F) -> Result<T>
where
    F: Fn() -> Result<T> + Clone + Send + 'static,
    T: Send + 'static,
{
    let mut attempt = 0;
    loop {
        match blocking_with_timeout(duration, f.clone()).await {
            Ok(value) => return Ok(value),
            Err(e) if attempt >= retries => return Err(e),
            Err(e) => {
                attempt += 1;
                tracing::debug!(attempt, error = %e, "retrying blocking operation");
            }
        }
    }
}
