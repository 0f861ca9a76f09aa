//! Run cancellation and per-operation deadlines.

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;

use crate::error::VoipTestError;

/// Aborts an in-flight test run. Cloneable; any clone aborts the run.
#[derive(Debug, Clone)]
pub struct AbortHandle {
    tx: std::sync::Arc<watch::Sender<bool>>,
}

impl AbortHandle {
    pub fn abort(&self) {
        // send_replace never fails, even with no receivers
        self.tx.send_replace(true);
    }
}

/// Receiving side, threaded through every suspending step of a run.
#[derive(Debug, Clone)]
pub struct Cancellation {
    rx: watch::Receiver<bool>,
}

/// Create a linked abort handle and cancellation receiver.
pub fn cancellation() -> (AbortHandle, Cancellation) {
    let (tx, rx) = watch::channel(false);
    (
        AbortHandle {
            tx: std::sync::Arc::new(tx),
        },
        Cancellation { rx },
    )
}

impl Cancellation {
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once the run is aborted. Never resolves otherwise.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }

    /// Run `fut` unless the run is aborted first.
    pub async fn guard<T, F>(&self, fut: F) -> Result<T, VoipTestError>
    where
        F: Future<Output = Result<T, VoipTestError>>,
    {
        tokio::select! {
            biased;
            _ = self.cancelled() => Err(VoipTestError::Cancelled),
            res = fut => res,
        }
    }

    /// Run `fut` with a deadline; on expiry return `on_timeout`.
    pub async fn guard_with_deadline<T, F>(
        &self,
        limit: Duration,
        on_timeout: VoipTestError,
        fut: F,
    ) -> Result<T, VoipTestError>
    where
        F: Future<Output = Result<T, VoipTestError>>,
    {
        self.guard(async {
            match tokio::time::timeout(limit, fut).await {
                Ok(res) => res,
                Err(_) => Err(on_timeout),
            }
        })
        .await
    }
}
