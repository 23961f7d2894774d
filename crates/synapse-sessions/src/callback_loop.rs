//! Dedicated per-session callback executor.
//!
//! RTDB callbacks arrive on SDK-owned threads. Work triggered there is
//! enqueued onto this loop — an mpsc-fed tokio worker task — and the SDK
//! thread blocks only for a bounded acknowledgement wait before returning,
//! preserving SDK thread liveness. The job keeps running to completion on
//! the loop even when the ack wait times out.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{Result, SessionError};

type Job = (
    Pin<Box<dyn Future<Output = ()> + Send + 'static>>,
    std::sync::mpsc::Sender<()>,
);

const QUEUE_CAPACITY: usize = 256;

pub struct CallbackLoop {
    tx: mpsc::Sender<Job>,
    worker: JoinHandle<()>,
    label: String,
}

impl CallbackLoop {
    /// Spawn the worker task on the current runtime.
    pub fn new(label: impl Into<String>) -> Self {
        let label = label.into();
        let (tx, mut rx) = mpsc::channel::<Job>(QUEUE_CAPACITY);
        let worker_label = label.clone();
        let worker = tokio::spawn(async move {
            while let Some((job, ack)) = rx.recv().await {
                job.await;
                // Receiver may have given up after its bounded wait.
                let _ = ack.send(());
            }
            debug!(session = %worker_label, "callback loop drained and stopped");
        });
        info!(session = %label, "callback loop started");
        Self { tx, worker, label }
    }

    /// Enqueue a job from a foreign (non-runtime) thread and wait at most
    /// `timeout` for it to finish. Returns `Ok(true)` when the job completed
    /// within the wait, `Ok(false)` when it is still running.
    pub fn schedule_blocking<F>(&self, fut: F, timeout: Duration) -> Result<bool>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let (ack_tx, ack_rx) = std::sync::mpsc::channel();
        self.tx
            .blocking_send((Box::pin(fut), ack_tx))
            .map_err(|_| SessionError::CallbackLoopStopped)?;
        match ack_rx.recv_timeout(timeout) {
            Ok(()) => Ok(true),
            Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {
                warn!(session = %self.label, timeout_ms = timeout.as_millis() as u64,
                      "callback job still running after ack wait");
                Ok(false)
            }
            // Worker gone mid-job: treat like a stopped loop.
            Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => {
                Err(SessionError::CallbackLoopStopped)
            }
        }
    }

    /// Enqueue a job from async context without waiting for completion.
    pub async fn schedule<F>(&self, fut: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let (ack_tx, _ack_rx) = std::sync::mpsc::channel();
        self.tx
            .send((Box::pin(fut), ack_tx))
            .await
            .map_err(|_| SessionError::CallbackLoopStopped)
    }

    /// Stop accepting work and abort the worker. Called on session teardown.
    pub fn stop(&self) {
        self.worker.abort();
        info!(session = %self.label, "callback loop stopped");
    }
}

impl Drop for CallbackLoop {
    fn drop(&mut self) {
        self.worker.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn foreign_thread_scheduling_runs_job_on_loop() {
        let cb = Arc::new(CallbackLoop::new("u1:acme"));
        let counter = Arc::new(AtomicU32::new(0));

        let cb_thread = Arc::clone(&cb);
        let counter_thread = Arc::clone(&counter);
        let handle = std::thread::spawn(move || {
            let c = Arc::clone(&counter_thread);
            cb_thread.schedule_blocking(
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                },
                Duration::from_secs(1),
            )
        });

        let completed = handle.join().unwrap().unwrap();
        assert!(completed);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn slow_job_releases_the_caller_after_the_ack_wait() {
        let cb = Arc::new(CallbackLoop::new("u1:acme"));
        let counter = Arc::new(AtomicU32::new(0));

        let cb_thread = Arc::clone(&cb);
        let counter_thread = Arc::clone(&counter);
        let handle = std::thread::spawn(move || {
            let c = Arc::clone(&counter_thread);
            cb_thread.schedule_blocking(
                async move {
                    tokio::time::sleep(Duration::from_millis(300)).await;
                    c.fetch_add(1, Ordering::SeqCst);
                },
                Duration::from_millis(30),
            )
        });

        // Caller returns quickly with completed = false…
        let completed = handle.join().unwrap().unwrap();
        assert!(!completed);
        // …but the job still finishes on the loop.
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn stopped_loop_rejects_new_work() {
        let cb = Arc::new(CallbackLoop::new("u1:acme"));
        cb.stop();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let cb_thread = Arc::clone(&cb);
        let result = std::thread::spawn(move || {
            cb_thread.schedule_blocking(async {}, Duration::from_millis(50))
        })
        .join()
        .unwrap();
        assert!(result.is_err() || matches!(result, Ok(false)));
    }
}
