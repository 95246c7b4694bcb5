//! Bounded work queue served by a fixed pool of worker tasks.
//!
//! Every job carries its own completion channel, so callers simply await the
//! result of the job they submitted.

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use futures::future::BoxFuture;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{Mutex as AsyncMutex, mpsc, oneshot};
use tokio::task::JoinHandle;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("queue is shut down")]
    Closed,

    #[error("queue is full")]
    Full,

    #[error("job was dropped before completing")]
    Dropped,
}

type Handler<J, R> = Arc<dyn Fn(J) -> BoxFuture<'static, R> + Send + Sync>;

struct Task<J, R> {
    job: J,
    reply: oneshot::Sender<R>,
}

pub struct TaskQueue<J, R> {
    sender: Mutex<Option<mpsc::Sender<Task<J, R>>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl<J: Send + 'static, R: Send + 'static> TaskQueue<J, R> {
    /// Start `workers` tasks serving a queue of at most `capacity` pending jobs.
    ///
    /// Must be called inside a Tokio runtime.
    pub fn new<F, Fut>(workers: usize, capacity: usize, handler: F) -> Self
    where
        F: Fn(J) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = R> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel::<Task<J, R>>(capacity.max(1));
        let rx = Arc::new(AsyncMutex::new(rx));
        let handler: Handler<J, R> =
            Arc::new(move |job| -> BoxFuture<'static, R> { Box::pin(handler(job)) });

        let handles = (0..workers.max(1))
            .map(|id| {
                let rx = Arc::clone(&rx);
                let handler = Arc::clone(&handler);
                tokio::spawn(async move {
                    loop {
                        let next = rx.lock().await.recv().await;
                        let Some(task) = next else { break };
                        if task.reply.is_closed() {
                            tracing::debug!(worker = id, "caller gone, skipping job");
                            continue;
                        }
                        let result = handler(task.job).await;
                        let _ = task.reply.send(result);
                    }
                    tracing::debug!(worker = id, "worker stopped");
                })
            })
            .collect();

        Self {
            sender: Mutex::new(Some(tx)),
            workers: Mutex::new(handles),
        }
    }

    fn sender(&self) -> Result<mpsc::Sender<Task<J, R>>, QueueError> {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(QueueError::Closed)
    }

    /// Enqueue `job`, waiting for capacity, and await its result.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Closed`] after shutdown and [`QueueError::Dropped`]
    /// if the job never completed.
    pub async fn submit(&self, job: J) -> Result<R, QueueError> {
        let (reply, rx) = oneshot::channel();
        self.sender()?
            .send(Task { job, reply })
            .await
            .map_err(|_| QueueError::Closed)?;
        rx.await.map_err(|_| QueueError::Dropped)
    }

    /// Enqueue `job` only if there is capacity right now, and await its result.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Full`] when the queue is at capacity, otherwise as
    /// [`TaskQueue::submit`].
    pub async fn try_submit(&self, job: J) -> Result<R, QueueError> {
        let (reply, rx) = oneshot::channel();
        self.sender()?
            .try_send(Task { job, reply })
            .map_err(|e| match e {
                TrySendError::Full(_) => QueueError::Full,
                TrySendError::Closed(_) => QueueError::Closed,
            })?;
        rx.await.map_err(|_| QueueError::Dropped)
    }

    /// Stop accepting jobs and wait for the workers to finish queued ones.
    pub async fn shutdown(&self) {
        drop(
            self.sender
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take(),
        );
        let handles = std::mem::take(
            &mut *self
                .workers
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::warn!("queue worker failed: {e}");
            }
        }
    }

    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl<J, R> std::fmt::Debug for TaskQueue<J, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskQueue").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn submit_returns_result() {
        let queue = TaskQueue::new(2, 4, |n: u32| async move { n * 2 });
        assert_eq!(queue.submit(21).await, Ok(42));
        assert_eq!(queue.worker_count(), 2);
    }

    #[tokio::test]
    async fn results_go_to_their_callers() {
        let queue = Arc::new(TaskQueue::new(3, 16, |n: u64| async move {
            tokio::time::sleep(Duration::from_millis(10 * (5 - n % 5))).await;
            n
        }));
        let jobs = (0..10).map(|n| {
            let q = Arc::clone(&queue);
            async move { q.submit(n).await }
        });
        let results = futures::future::join_all(jobs).await;
        for (n, r) in results.into_iter().enumerate() {
            assert_eq!(r, Ok(n as u64));
        }
    }

    #[tokio::test]
    async fn workers_run_in_parallel() {
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (r, p) = (Arc::clone(&running), Arc::clone(&peak));
        let queue = Arc::new(TaskQueue::new(4, 16, move |(): ()| {
            let (r, p) = (Arc::clone(&r), Arc::clone(&p));
            async move {
                let now = r.fetch_add(1, Ordering::SeqCst) + 1;
                p.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(30)).await;
                r.fetch_sub(1, Ordering::SeqCst);
            }
        }));
        let jobs = (0..4).map(|_| {
            let q = Arc::clone(&queue);
            async move { q.submit(()).await }
        });
        futures::future::join_all(jobs).await;
        assert!(peak.load(Ordering::SeqCst) > 1);
    }

    #[tokio::test]
    async fn try_submit_fails_fast_when_full() {
        let (gate_tx, gate_rx) = tokio::sync::watch::channel(false);
        let queue = Arc::new(TaskQueue::new(1, 1, move |(): ()| {
            let mut gate = gate_rx.clone();
            async move {
                let _ = gate.wait_for(|open| *open).await;
            }
        }));

        // One job occupies the worker, one fills the channel.
        let q = Arc::clone(&queue);
        let first = tokio::spawn(async move { q.submit(()).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        let q = Arc::clone(&queue);
        let second = tokio::spawn(async move { q.submit(()).await });
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(queue.try_submit(()).await, Err(QueueError::Full));

        gate_tx.send(true).unwrap();
        assert_eq!(first.await.unwrap(), Ok(()));
        assert_eq!(second.await.unwrap(), Ok(()));
    }

    #[tokio::test]
    async fn submit_after_shutdown_is_closed() {
        let queue = TaskQueue::new(2, 4, |n: u8| async move { n });
        queue.shutdown().await;
        assert_eq!(queue.submit(1).await, Err(QueueError::Closed));
        assert_eq!(queue.try_submit(1).await, Err(QueueError::Closed));
        assert_eq!(queue.worker_count(), 0);
    }

    #[tokio::test]
    async fn panicking_job_reports_dropped() {
        let queue = TaskQueue::new(2, 4, |n: u8| async move {
            assert!(n != 0, "zero");
            n
        });
        assert_eq!(queue.submit(0).await, Err(QueueError::Dropped));
        assert_eq!(queue.submit(7).await, Ok(7));
    }
}
