//! Bounded worker pool with a caller-runs saturation policy.

use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Mutex;
use tokio::sync::mpsc::{self, error::TrySendError};

use crate::metrics::{POOL_CALLER_RUNS, QUEUE_DEPTH, WORKERS_LIVE};

pub type Task = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

// core_size workers drain a bounded queue; a full queue grows the pool up
// to max_size; when queue and pool are both full the submitter runs the
// job itself. A submitted job is never dropped.
pub struct WorkerPool {
    tx: mpsc::Sender<Task>,
    rx: Arc<Mutex<mpsc::Receiver<Task>>>,
    workers: AtomicUsize,
    max_size: usize,
}

impl WorkerPool {
    pub fn new(core_size: usize, max_size: usize, queue_capacity: usize) -> Arc<Self> {
        let core_size = core_size.max(1);
        let (tx, rx) = mpsc::channel::<Task>(queue_capacity.max(1));

        let pool = Arc::new(Self {
            tx,
            rx: Arc::new(Mutex::new(rx)),
            workers: AtomicUsize::new(core_size),
            max_size: max_size.max(core_size),
        });
        for _ in 0..core_size {
            pool.spawn_worker();
        }
        WORKERS_LIVE.set(core_size as f64);
        pool
    }

    fn spawn_worker(self: &Arc<Self>) {
        let rx = Arc::clone(&self.rx);
        tokio::spawn(async move {
            loop {
                // one worker at a time holds the receiver; the guard drops
                // before the task runs so others keep draining
                let task = { rx.lock().await.recv().await };
                match task {
                    Some(task) => {
                        QUEUE_DEPTH.dec();
                        task.await;
                    }
                    // queue closed: the pool itself is gone
                    None => break,
                }
            }
        });
    }

    // Enqueue, or grow the pool, or run on the submitting task - in that
    // order. Awaiting this under saturation blocks the caller for the
    // whole job; that is the policy, not an accident.
    pub async fn execute(self: &Arc<Self>, task: Task) {
        let task = match self.tx.try_send(task) {
            Ok(()) => {
                QUEUE_DEPTH.inc();
                return;
            }
            Err(TrySendError::Full(task)) => task,
            Err(TrySendError::Closed(task)) => task,
        };

        if self.try_grow() {
            match self.tx.try_send(task) {
                Ok(()) => {
                    QUEUE_DEPTH.inc();
                    return;
                }
                Err(TrySendError::Full(task)) | Err(TrySendError::Closed(task)) => {
                    self.run_inline(task).await;
                }
            }
            return;
        }

        self.run_inline(task).await;
    }

    fn try_grow(self: &Arc<Self>) -> bool {
        let grew = self
            .workers
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < self.max_size).then_some(n + 1)
            })
            .is_ok();
        if grew {
            self.spawn_worker();
            WORKERS_LIVE.set(self.workers.load(Ordering::SeqCst) as f64);
            tracing::debug!(workers = self.workers.load(Ordering::SeqCst), "pool grew");
        }
        grew
    }

    async fn run_inline(&self, task: Task) {
        POOL_CALLER_RUNS.inc();
        tracing::warn!("worker queue full, running job on the submitting task");
        task.await;
    }

    pub fn workers(&self) -> usize {
        self.workers.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;
    use tokio::sync::oneshot;

    fn counting_task(counter: Arc<AtomicU32>) -> Task {
        Box::pin(async move {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    async fn wait_for(counter: &AtomicU32, expected: u32) {
        for _ in 0..200 {
            if counter.load(Ordering::SeqCst) == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!(
            "expected {expected} tasks to run, saw {}",
            counter.load(Ordering::SeqCst)
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn runs_every_submitted_task() {
        let pool = WorkerPool::new(2, 4, 10);
        let counter = Arc::new(AtomicU32::new(0));

        for _ in 0..20 {
            pool.execute(counting_task(Arc::clone(&counter))).await;
        }
        wait_for(&counter, 20).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn saturated_pool_runs_task_on_the_caller() {
        // one worker, no growth, queue of one
        let pool = WorkerPool::new(1, 1, 1);
        let counter = Arc::new(AtomicU32::new(0));
        let (release_tx, release_rx) = oneshot::channel::<()>();

        // occupy the only worker
        pool.execute(Box::pin(async move {
            let _ = release_rx.await;
        }))
        .await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        // fill the queue
        pool.execute(counting_task(Arc::clone(&counter))).await;

        // both pool and queue full: this one must run inline, so the
        // counter is bumped by the time execute returns
        pool.execute(counting_task(Arc::clone(&counter))).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        // nothing was dropped: the queued task still runs once released
        release_tx.send(()).unwrap();
        wait_for(&counter, 2).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn grows_to_max_before_running_inline() {
        let pool = WorkerPool::new(1, 3, 1);
        let counter = Arc::new(AtomicU32::new(0));
        let (release_tx, _) = tokio::sync::broadcast::channel::<()>(1);

        // six submissions against one queue slot: workers fill up and
        // block, so the pool must grow; the overflow runs inline on the
        // spawned submitters
        let mut submitters = Vec::new();
        for _ in 0..6 {
            let pool = Arc::clone(&pool);
            let counter = Arc::clone(&counter);
            let mut release_rx = release_tx.subscribe();
            submitters.push(tokio::spawn(async move {
                pool.execute(Box::pin(async move {
                    let _ = release_rx.recv().await;
                    counter.fetch_add(1, Ordering::SeqCst);
                }))
                .await;
            }));
        }

        for _ in 0..200 {
            if pool.workers() == 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(pool.workers(), 3);

        release_tx.send(()).unwrap();
        for submitter in submitters {
            submitter.await.unwrap();
        }
        wait_for(&counter, 6).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn burst_beyond_all_capacity_loses_nothing() {
        let pool = WorkerPool::new(1, 2, 2);
        let counter = Arc::new(AtomicU32::new(0));

        for _ in 0..30 {
            pool.execute(counting_task(Arc::clone(&counter))).await;
        }
        wait_for(&counter, 30).await;
    }
}
