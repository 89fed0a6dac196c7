//! Shared utility functions.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::Duration;

use tokio::task::spawn_blocking;
use tokio::time::timeout;

use crate::{Error, Result};

/// Run a synchronous tmux call on the blocking pool.
pub async fn blocking<F, T>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    spawn_blocking(f)
        .await
        .map_err(|e| Error::TaskJoin(e.to_string()))?
}

/// Like [`blocking`], but bounded by a deadline. A hung tmux binary must not
/// freeze the coordination loop; callers on the health path always use this.
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

/// Stable fingerprint of captured pane output, used for idle detection.
/// Trailing whitespace is ignored so a repainted prompt doesn't count as
/// activity.
pub fn fingerprint(output: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    output.trim_end().hash(&mut hasher);
    hasher.finish()
}
