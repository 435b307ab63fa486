//! Cancellation and deadlines for storage calls.

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

use crate::store::StoreError;

/// Raises the cancellation signal observed by every [`Cancellation`] cloned
/// from its pair.
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

/// Cancellation signal plus optional deadline, observed by every storage call
/// of a session.
#[derive(Debug, Clone, Default)]
pub struct Cancellation {
    signal: Option<watch::Receiver<bool>>,
    deadline: Option<Instant>,
}

impl Cancellation {
    /// Never cancelled, no deadline.
    pub fn none() -> Self {
        Self::default()
    }

    /// A cancellable signal and the handle that raises it.
    pub fn pair() -> (CancelHandle, Self) {
        let (tx, rx) = watch::channel(false);
        (
            CancelHandle { tx },
            Self {
                signal: Some(rx),
                deadline: None,
            },
        )
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_cancelled(&self) -> bool {
        self.signal.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Resolves once the signal is raised. A dropped handle never cancels.
    async fn cancelled(&self) {
        if let Some(rx) = &self.signal {
            let mut rx = rx.clone();
            if rx.wait_for(|cancelled| *cancelled).await.is_ok() {
                return;
            }
        }
        std::future::pending::<()>().await
    }

    /// Drive `fut` unless cancellation or the deadline comes first.
    ///
    /// A signal that is already raised wins over a ready future.
    pub async fn run<T, F>(&self, fut: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        if self.is_cancelled() {
            return Err(StoreError::Cancelled);
        }
        let expired = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::select! {
            biased;
            _ = self.cancelled() => Err(StoreError::Cancelled),
            _ = expired => Err(StoreError::DeadlineExceeded),
            result = fut => result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn passes_results_through() {
        let value = Cancellation::none().run(async { Ok::<_, StoreError>(7) }).await.unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn cancelled_before_start() {
        let (handle, cancel) = Cancellation::pair();
        handle.cancel();
        let err = cancel
            .run(async { Ok::<_, StoreError>(()) })
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Cancelled));
    }

    #[tokio::test]
    async fn cancel_interrupts_pending_calls() {
        let (handle, cancel) = Cancellation::pair();
        let call = cancel.run(async {
            std::future::pending::<()>().await;
            Ok::<_, StoreError>(())
        });
        handle.cancel();
        assert!(matches!(call.await.unwrap_err(), StoreError::Cancelled));
    }

    #[tokio::test]
    async fn dropped_handle_does_not_cancel() {
        let (handle, cancel) = Cancellation::pair();
        drop(handle);
        assert!(!cancel.is_cancelled());
        assert_eq!(cancel.run(async { Ok::<_, StoreError>(1) }).await.unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_interrupts_slow_calls() {
        let cancel = Cancellation::none().with_timeout(Duration::from_millis(50));
        let err = cancel
            .run(async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<_, StoreError>(())
            })
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::DeadlineExceeded));
    }
}
