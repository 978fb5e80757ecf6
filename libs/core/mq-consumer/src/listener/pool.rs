//! Bounded worker pool for the concurrent listener
//!
//! Workers scale between the binding's `thread_min` and `thread_max`
//! based on backlog: a job submitted with no idle worker available
//! spawns an extra worker, up to the maximum. Core workers (the first
//! `thread_min`) are never torn down; surplus workers exit after
//! `idle_timeout` without work.

use crate::error::ConsumeError;
use futures::future::BoxFuture;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::debug;

/// Unit of work executed by one worker slot.
pub(crate) type Job = BoxFuture<'static, ()>;

struct PoolShared {
    name: String,
    rx: tokio::sync::Mutex<mpsc::Receiver<Job>>,
    live: AtomicUsize,
    busy: AtomicUsize,
    queued: AtomicUsize,
    min: usize,
    max: usize,
    idle_timeout: Duration,
}

pub(crate) struct WorkerPool {
    tx: std::sync::Mutex<Option<mpsc::Sender<Job>>>,
    shared: Arc<PoolShared>,
    handles: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    pub(crate) fn new(
        name: impl Into<String>,
        min: usize,
        max: usize,
        idle_timeout: Duration,
    ) -> Self {
        let (tx, rx) = mpsc::channel((max.max(1)) * 4);
        let pool = Self {
            tx: std::sync::Mutex::new(Some(tx)),
            shared: Arc::new(PoolShared {
                name: name.into(),
                rx: tokio::sync::Mutex::new(rx),
                live: AtomicUsize::new(0),
                busy: AtomicUsize::new(0),
                queued: AtomicUsize::new(0),
                min: min.max(1),
                max: max.max(min.max(1)),
                idle_timeout,
            }),
            handles: std::sync::Mutex::new(Vec::new()),
        };
        for _ in 0..pool.shared.min {
            pool.spawn_worker(true);
        }
        pool
    }

    /// Submit a job, scaling the pool if no idle worker is available.
    pub(crate) async fn submit(&self, job: Job) -> Result<(), ConsumeError> {
        let tx = match self.tx.lock().unwrap().as_ref() {
            Some(tx) => tx.clone(),
            None => return Err(ConsumeError::Shutdown),
        };
        self.shared.queued.fetch_add(1, Ordering::SeqCst);
        self.maybe_scale();
        if tx.send(job).await.is_err() {
            self.shared.queued.fetch_sub(1, Ordering::SeqCst);
            return Err(ConsumeError::Shutdown);
        }
        Ok(())
    }

    /// Number of live workers.
    pub(crate) fn live_workers(&self) -> usize {
        self.shared.live.load(Ordering::SeqCst)
    }

    /// Number of workers currently executing a job.
    pub(crate) fn busy_workers(&self) -> usize {
        self.shared.busy.load(Ordering::SeqCst)
    }

    /// Stop accepting work, let workers drain the queue, then abort any
    /// worker still running past the grace period. Returns the number of
    /// aborted workers.
    pub(crate) async fn close(&self, grace: Duration) -> usize {
        self.tx.lock().unwrap().take();

        let handles = std::mem::take(&mut *self.handles.lock().unwrap());
        let deadline = Instant::now() + grace;
        let mut aborted = 0;
        for mut handle in handles {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match timeout(remaining, &mut handle).await {
                Ok(_) => {}
                Err(_) => {
                    handle.abort();
                    aborted += 1;
                }
            }
        }
        aborted
    }

    fn maybe_scale(&self) {
        loop {
            let live = self.shared.live.load(Ordering::SeqCst);
            if live >= self.shared.max {
                return;
            }
            let busy = self.shared.busy.load(Ordering::SeqCst);
            let idle = live.saturating_sub(busy);
            if self.shared.queued.load(Ordering::SeqCst) <= idle {
                return;
            }
            // Reserve the slot before spawning so concurrent submitters
            // cannot push the pool past its maximum.
            if self
                .shared
                .live
                .compare_exchange(live, live + 1, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                self.launch(false);
                return;
            }
        }
    }

    fn spawn_worker(&self, core: bool) {
        self.shared.live.fetch_add(1, Ordering::SeqCst);
        self.launch(core);
    }

    fn launch(&self, core: bool) {
        let shared = Arc::clone(&self.shared);
        let handle = tokio::spawn(worker_loop(shared, core));
        self.handles.lock().unwrap().push(handle);
    }
}

async fn worker_loop(shared: Arc<PoolShared>, core: bool) {
    debug!(pool = %shared.name, core = core, "worker started");
    loop {
        let job = if core {
            next_job(&shared).await
        } else {
            match timeout(shared.idle_timeout, next_job(&shared)).await {
                Ok(job) => job,
                Err(_) => {
                    if shared.live.load(Ordering::SeqCst) > shared.min {
                        break;
                    }
                    continue;
                }
            }
        };

        let Some(job) = job else {
            break;
        };

        shared.busy.fetch_add(1, Ordering::SeqCst);
        job.await;
        shared.busy.fetch_sub(1, Ordering::SeqCst);
    }
    shared.live.fetch_sub(1, Ordering::SeqCst);
    debug!(pool = %shared.name, core = core, "worker stopped");
}

async fn next_job(shared: &Arc<PoolShared>) -> Option<Job> {
    let mut rx = shared.rx.lock().await;
    let job = rx.recv().await;
    if job.is_some() {
        shared.queued.fetch_sub(1, Ordering::SeqCst);
    }
    job
}
