//! Cancellable background worker shared by the armable subsystems.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

/// A spawned worker task and the token that stops it.
#[derive(Debug)]
pub(crate) struct Worker {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl Worker {
    /// Spawn `run` with a fresh cancellation token.
    pub(crate) fn spawn<F, Fut>(run: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let token = CancellationToken::new();
        let handle = tokio::spawn(run(token.clone()));
        Self { token, handle }
    }

    pub(crate) fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// True until the worker is cancelled, by its owner or by itself.
    pub(crate) fn is_running(&self) -> bool {
        !self.token.is_cancelled() && !self.handle.is_finished()
    }

    /// Wait at most `timeout` for the task to finish, aborting it otherwise.
    ///
    /// The token must already be cancelled. Returns `false` if the task had
    /// to be aborted.
    pub(crate) async fn join(mut self, timeout: Duration) -> bool {
        match tokio::time::timeout(timeout, &mut self.handle).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                error!(error = %e, "worker task failed");
                true
            }
            Err(_) => {
                warn!(timeout_ms = timeout.as_millis() as u64, "worker did not stop in time, aborting");
                self.handle.abort();
                false
            }
        }
    }
}

/// Sleep for `duration` unless `token` is cancelled first.
///
/// Returns `false` if cancelled.
pub(crate) async fn sleep_or_cancel(token: &CancellationToken, duration: Duration) -> bool {
    tokio::select! {
        biased;
        _ = token.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}
