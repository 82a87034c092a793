//! Bounded work queue drained by a fixed set of workers.
//!
//! Jobs are type-erased closures; each `submit` gets its own result back through a
//! oneshot channel. All workers pull from one shared receiver, so a job is claimed by
//! exactly one worker and removed from the buffer at that moment.
//!
//! With `capacity == 0` the queue is a direct handoff: a submit succeeds only when a
//! worker is free to take the job right away.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use futures::FutureExt;
use futures::future::BoxFuture;
use serde::Serialize;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError, mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::config::ConfigError;
use crate::error::GatewayError;
use crate::observer::{self, Observer};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConfig {
    /// Number of worker tasks. Must be non-zero.
    pub workers: usize,
    /// Jobs buffered beyond those being executed. Zero means direct handoff.
    pub capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            capacity: 16,
        }
    }
}

/// Lifecycle of a [`WorkQueue`]. Only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueueState {
    Running,
    /// Intake closed; workers finish what is buffered and exit.
    Draining,
    Stopped,
}

type JobFn = Box<dyn FnOnce(CancellationToken) -> BoxFuture<'static, ()> + Send>;

struct Job {
    cancel: CancellationToken,
    run: JobFn,
    /// Direct-handoff reservation, held until the job finishes.
    _worker: Option<OwnedSemaphorePermit>,
}

pub struct WorkQueue {
    sender: Mutex<Option<mpsc::Sender<Job>>>,
    /// Free workers, only tracked in direct-handoff mode.
    idle_workers: Option<Arc<Semaphore>>,
    pending: Arc<AtomicUsize>,
    workers: usize,
    capacity: usize,
    shutdown: CancellationToken,
    tracker: TaskTracker,
    state: watch::Sender<QueueState>,
    observer: Arc<dyn Observer>,
}

impl WorkQueue {
    /// Spawn the workers. Must be called from within a tokio runtime.
    pub fn new(config: QueueConfig) -> Result<Self, ConfigError> {
        Self::with_observer(config, observer::noop())
    }

    pub fn with_observer(
        config: QueueConfig,
        observer: Arc<dyn Observer>,
    ) -> Result<Self, ConfigError> {
        if config.workers == 0 {
            return Err(ConfigError::ZeroWorkers);
        }

        let (idle_workers, buffer) = if config.capacity == 0 {
            // Every job in the channel holds a worker reservation, so `workers` slots
            // are always enough.
            (Some(Arc::new(Semaphore::new(config.workers))), config.workers)
        } else {
            (None, config.capacity)
        };

        let (tx, rx) = mpsc::channel::<Job>(buffer);
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let pending = Arc::new(AtomicUsize::new(0));
        let tracker = TaskTracker::new();

        for worker_id in 0..config.workers {
            let rx = Arc::clone(&rx);
            let pending = Arc::clone(&pending);
            let observer = Arc::clone(&observer);
            tracker.spawn(worker_loop(worker_id, rx, pending, observer));
        }

        tracing::info!(
            workers = config.workers,
            capacity = config.capacity,
            "Work queue started"
        );

        Ok(Self {
            sender: Mutex::new(Some(tx)),
            idle_workers,
            pending,
            workers: config.workers,
            capacity: config.capacity,
            shutdown: CancellationToken::new(),
            tracker,
            state: watch::Sender::new(QueueState::Running),
            observer,
        })
    }

    /// Enqueue `job` and wait for its result.
    ///
    /// Fails with `QueueFull` when the buffer is full. In direct-handoff mode this waits
    /// for a free worker instead, until `cancel` fires or shutdown begins.
    ///
    /// `job` receives `cancel` so it can stop early. Cancellation after a worker has
    /// claimed the job does not interrupt it; the caller just stops waiting.
    pub async fn submit<F, Fut, T>(
        &self,
        cancel: &CancellationToken,
        job: F,
    ) -> Result<T, GatewayError>
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, GatewayError>> + Send + 'static,
        T: Send + 'static,
    {
        self.enqueue(cancel, job, true).await
    }

    /// Like [`submit`](Self::submit) but never waits for a free worker.
    pub async fn try_submit<F, Fut, T>(
        &self,
        cancel: &CancellationToken,
        job: F,
    ) -> Result<T, GatewayError>
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, GatewayError>> + Send + 'static,
        T: Send + 'static,
    {
        self.enqueue(cancel, job, false).await
    }

    async fn enqueue<F, Fut, T>(
        &self,
        cancel: &CancellationToken,
        job: F,
        wait_for_worker: bool,
    ) -> Result<T, GatewayError>
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, GatewayError>> + Send + 'static,
        T: Send + 'static,
    {
        if self.shutdown.is_cancelled() {
            return Err(GatewayError::ShutdownInProgress);
        }
        if cancel.is_cancelled() {
            return Err(GatewayError::Canceled);
        }

        let reservation = match &self.idle_workers {
            Some(idle) => Some(self.reserve_worker(idle, cancel, wait_for_worker).await?),
            None => None,
        };

        // Cloned after the reservation so a waiting submit never holds the channel open
        // across shutdown.
        let sender = self.sender().ok_or(GatewayError::ShutdownInProgress)?;

        let (result_tx, result_rx) = oneshot::channel();
        let run: JobFn = Box::new(move |token| {
            async move {
                let _ = result_tx.send(job(token).await);
            }
            .boxed()
        });

        self.pending.fetch_add(1, Ordering::SeqCst);
        let sent = sender.try_send(Job {
            cancel: cancel.clone(),
            run,
            _worker: reservation,
        });
        drop(sender);

        if let Err(e) = sent {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            return Err(match e {
                TrySendError::Full(_) => {
                    self.observer.queue_full();
                    tracing::debug!(capacity = self.capacity, "Work queue full");
                    GatewayError::QueueFull
                }
                TrySendError::Closed(_) => GatewayError::ShutdownInProgress,
            });
        }

        tokio::select! {
            biased;
            res = result_rx => match res {
                Ok(result) => result,
                // Skipped at claim time because the caller canceled.
                Err(_) if cancel.is_cancelled() => Err(GatewayError::Canceled),
                Err(_) => Err(GatewayError::internal("job ended without producing a result")),
            },
            _ = cancel.cancelled() => Err(GatewayError::Canceled),
        }
    }

    async fn reserve_worker(
        &self,
        idle: &Arc<Semaphore>,
        cancel: &CancellationToken,
        wait: bool,
    ) -> Result<OwnedSemaphorePermit, GatewayError> {
        match Arc::clone(idle).try_acquire_owned() {
            Ok(permit) => return Ok(permit),
            Err(TryAcquireError::Closed) => return Err(GatewayError::ShutdownInProgress),
            Err(TryAcquireError::NoPermits) if !wait => {
                self.observer.queue_full();
                tracing::debug!(workers = self.workers, "No idle worker for handoff");
                return Err(GatewayError::QueueFull);
            }
            Err(TryAcquireError::NoPermits) => {}
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(GatewayError::Canceled),
            _ = self.shutdown.cancelled() => Err(GatewayError::ShutdownInProgress),
            permit = Arc::clone(idle).acquire_owned() => {
                permit.map_err(|_| GatewayError::ShutdownInProgress)
            }
        }
    }

    fn sender(&self) -> Option<mpsc::Sender<Job>> {
        if self.shutdown.is_cancelled() {
            return None;
        }
        self.sender.lock().ok()?.clone()
    }

    /// Stop accepting jobs and wait for workers to finish everything already accepted.
    ///
    /// Returns `Canceled` if `cancel` fires first; the workers keep draining in the
    /// background. Safe to call more than once.
    pub async fn shutdown(&self, cancel: &CancellationToken) -> Result<(), GatewayError> {
        if !self.shutdown.is_cancelled() {
            tracing::info!(pending = self.pending(), "Draining work queue");
        }
        self.shutdown.cancel();
        self.advance(QueueState::Draining);

        if let Ok(mut sender) = self.sender.lock() {
            sender.take();
        }
        self.tracker.close();

        tokio::select! {
            biased;
            _ = self.tracker.wait() => {
                if self.advance(QueueState::Stopped) {
                    tracing::info!("Work queue stopped");
                }
                Ok(())
            }
            _ = cancel.cancelled() => {
                tracing::warn!(pending = self.pending(), "Work queue drain interrupted");
                Err(GatewayError::Canceled)
            }
        }
    }

    /// Returns true when the state actually changed.
    fn advance(&self, next: QueueState) -> bool {
        self.state.send_if_modified(|state| {
            if *state < next {
                *state = next;
                true
            } else {
                false
            }
        })
    }

    pub fn state(&self) -> QueueState {
        *self.state.borrow()
    }

    /// Subscribe to state changes.
    pub fn watch_state(&self) -> watch::Receiver<QueueState> {
        self.state.subscribe()
    }

    /// Jobs accepted but not yet claimed by a worker.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Drop for WorkQueue {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn worker_loop(
    worker_id: usize,
    rx: Arc<tokio::sync::Mutex<mpsc::Receiver<Job>>>,
    pending: Arc<AtomicUsize>,
    observer: Arc<dyn Observer>,
) {
    loop {
        let job = { rx.lock().await.recv().await };
        let Some(job) = job else {
            break;
        };
        pending.fetch_sub(1, Ordering::SeqCst);

        if job.cancel.is_cancelled() {
            tracing::debug!(worker_id, "Skipping job whose caller has gone");
            continue;
        }

        observer.job_started();
        let Job { cancel, run, _worker } = job;
        let outcome = AssertUnwindSafe(async move { run(cancel).await })
            .catch_unwind()
            .await;
        observer.job_finished();

        if outcome.is_err() {
            tracing::error!(worker_id, "Job panicked");
        }
    }
    tracing::trace!(worker_id, "Worker exiting");
}
