//! Deferred responses: a oneshot pair plus a deadline. The handler waits on
//! one end while a pool worker produces into the other.

use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;

#[derive(Debug, Error)]
#[error("deadline expired before the work completed")]
pub struct DeferredTimeout;

pub struct DeferredSender<T>(oneshot::Sender<T>);

impl<T> DeferredSender<T> {
    // The receiver may have timed out and gone away; delivery is
    // best-effort and the producer never finds out
    pub fn send(self, value: T) {
        let _ = self.0.send(value);
    }
}

pub struct DeferredResponse<T> {
    rx: oneshot::Receiver<T>,
    deadline: Duration,
}

pub fn deferred<T>(deadline: Duration) -> (DeferredSender<T>, DeferredResponse<T>) {
    let (tx, rx) = oneshot::channel();
    (DeferredSender(tx), DeferredResponse { rx, deadline })
}

impl<T> DeferredResponse<T> {
    // Waits until the deadline. Timing out abandons the wait, not the work:
    // the producer keeps running and persists its terminal state.
    pub async fn wait(self) -> Result<T, DeferredTimeout> {
        match tokio::time::timeout(self.deadline, self.rx).await {
            Ok(Ok(value)) => Ok(value),
            // sender dropped without producing - treat like a timeout so
            // the caller falls back to polling by id
            Ok(Err(_)) => Err(DeferredTimeout),
            Err(_) => Err(DeferredTimeout),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fast_work_returns_its_result() {
        let (tx, wait) = deferred::<u32>(Duration::from_secs(120));

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            tx.send(42);
        });

        assert_eq!(wait.wait().await.unwrap(), 42);
    }

    #[tokio::test]
    async fn slow_work_times_out_but_keeps_running() {
        let (tx, wait) = deferred::<u32>(Duration::from_millis(20));
        let (done_tx, done_rx) = oneshot::channel();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(80)).await;
            tx.send(42);
            let _ = done_tx.send(());
        });

        assert!(wait.wait().await.is_err());
        // the producer still finishes after the caller gave up
        done_rx.await.unwrap();
    }

    #[tokio::test]
    async fn dropped_sender_reads_as_timeout() {
        let (tx, wait) = deferred::<u32>(Duration::from_secs(120));
        drop(tx);
        assert!(wait.wait().await.is_err());
    }
}
