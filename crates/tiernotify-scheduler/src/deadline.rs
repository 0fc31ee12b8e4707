//! Per-call deadlines for collaborator I/O.

use std::future::Future;
use std::time::Duration;

use tiernotify_core::{Result, TierNotifyError};

/// Run `fut`, failing with `TierNotifyError::Timeout` once `limit` elapses.
pub async fn bounded<T>(
    what: &str,
    limit: Duration,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(TierNotifyError::Timeout(format!(
            "{what} exceeded {}ms",
            limit.as_millis()
        ))),
    }
}
