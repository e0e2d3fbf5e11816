//! Single-slot background worker behind the run reaper.
//!
//! Ticker wakeups are coalesced: if the worker is still busy when the
//! next wakeup arrives, at most one stays pending.

use std::future::Future;
use std::sync::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// A worker that runs its job once per coalesced wakeup.
pub(crate) struct SleeperWorker {
    wake_tx: Mutex<Option<mpsc::Sender<()>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl SleeperWorker {
    /// Spawn the worker loop. `work` is invoked once per wakeup.
    pub fn spawn<F, Fut>(work: F) -> Self
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (wake_tx, mut wake_rx) = mpsc::channel(1);
        let handle = tokio::spawn(async move {
            while wake_rx.recv().await.is_some() {
                work().await;
            }
        });
        Self {
            wake_tx: Mutex::new(Some(wake_tx)),
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Signal the worker. A wakeup already pending absorbs this one;
    /// waking a stopped worker is a no-op.
    pub fn wake(&self) {
        if let Ok(guard) = self.wake_tx.lock() {
            if let Some(tx) = guard.as_ref() {
                let _ = tx.try_send(());
            }
        }
    }

    /// Stop the worker, letting any in-flight job finish first.
    pub async fn stop(&self) {
        let tx = self.wake_tx.lock().ok().and_then(|mut guard| guard.take());
        drop(tx);
        let handle = self.handle.lock().ok().and_then(|mut guard| guard.take());
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_wake_runs_work() {
        let count = Arc::new(AtomicU32::new(0));
        let worker = SleeperWorker::spawn({
            let count = Arc::clone(&count);
            move || {
                let count = Arc::clone(&count);
                async move {
                    count.fetch_add(1, Ordering::SeqCst);
                }
            }
        });

        worker.wake();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(count.load(Ordering::SeqCst), 1);
        worker.stop().await;
    }

    #[tokio::test]
    async fn test_wakeups_coalesce_while_busy() {
        let count = Arc::new(AtomicU32::new(0));
        let worker = SleeperWorker::spawn({
            let count = Arc::clone(&count);
            move || {
                let count = Arc::clone(&count);
                async move {
                    count.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
            }
        });

        // First wakeup starts the job; the burst behind it collapses
        // into a single pending wakeup.
        worker.wake();
        tokio::time::sleep(Duration::from_millis(10)).await;
        for _ in 0..5 {
            worker.wake();
        }
        tokio::time::sleep(Duration::from_millis(150)).await;

        assert_eq!(count.load(Ordering::SeqCst), 2);
        worker.stop().await;
    }

    #[tokio::test]
    async fn test_stop_waits_for_in_flight_work() {
        let count = Arc::new(AtomicU32::new(0));
        let worker = SleeperWorker::spawn({
            let count = Arc::clone(&count);
            move || {
                let count = Arc::clone(&count);
                async move {
                    tokio::time::sleep(Duration::from_millis(30)).await;
                    count.fetch_add(1, Ordering::SeqCst);
                }
            }
        });

        worker.wake();
        tokio::time::sleep(Duration::from_millis(5)).await;
        worker.stop().await;

        assert_eq!(count.load(Ordering::SeqCst), 1);

        // Waking after stop is a no-op.
        worker.wake();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
