//! Retry-forever wrapper for the discovery loops.

use std::future::Future;
use std::time::Duration;

use anyhow::Result;
use tokio_util::sync::CancellationToken;

/// Pause between a loop failing and its restart.
pub const RETRY_DELAY: Duration = Duration::from_secs(1);

/// Run `body` until `cancel` fires, restarting it whenever it returns.
///
/// Errors are logged, never propagated. Cancellation is checked after every
/// run and during the pause between runs.
pub async fn supervise<F, Fut>(name: &'static str, cancel: CancellationToken, mut body: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<()>>,
{
    loop {
        if let Err(e) = body().await {
            tracing::warn!(task = name, error = %e, "loop failed");
        }
        if cancel.is_cancelled() {
            break;
        }
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(RETRY_DELAY) => {}
        }
        tracing::debug!(task = name, "restarting");
    }
    tracing::info!(task = name, "exiting");
}
