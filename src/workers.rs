use std::collections::VecDeque;
use std::io;
use std::mem;
use std::sync::{Arc, Condvar, Mutex};
use std::thread;

use log::{debug, warn};

/// A queued unit of work.
pub type Job = Box<dyn FnOnce() + Send>;

/// A fixed-size pool of threads consuming a FIFO job queue.
///
/// `enqueue` places a job on the queue; one of the workers executes it
/// eventually. Enqueue order is FIFO, but delivery across workers is
/// any-order: jobs that need mutual ordering must serialize themselves,
/// typically by routing through a reactor's `queue_in_loop`.
///
/// Workers must treat connection handlers as opaque: read the handle
/// identity, do the work, and hand results back through `Remote` or
/// `ConnHandler::send_message` only.
#[derive(Clone)]
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    queue: JobQueue,
    workers: Mutex<Vec<thread::JoinHandle<()>>>,
}

struct JobQueue {
    state: Mutex<QueueState>,
    condvar: Condvar,
}

struct QueueState {
    jobs: VecDeque<Job>,
    closed: bool,
}

impl JobQueue {
    fn new() -> JobQueue {
        JobQueue {
            state: Mutex::new(QueueState {
                jobs: VecDeque::new(),
                closed: false,
            }),
            condvar: Condvar::new(),
        }
    }

    fn push(&self, job: Job) -> bool {
        let mut state = self.state.lock().unwrap();

        if state.closed {
            return false;
        }

        state.jobs.push_back(job);
        self.condvar.notify_one();

        true
    }

    /// Blocks until a job arrives. Returns `None` once the queue is
    /// closed and drained.
    fn pop(&self) -> Option<Job> {
        let mut state = self.state.lock().unwrap();

        loop {
            if let Some(job) = state.jobs.pop_front() {
                return Some(job);
            }

            if state.closed {
                return None;
            }

            state = self.condvar.wait(state).unwrap();
        }
    }

    fn close(&self) {
        let mut state = self.state.lock().unwrap();
        state.closed = true;
        self.condvar.notify_all();
    }
}

impl WorkerPool {
    pub fn new(workers: usize) -> io::Result<WorkerPool> {
        let inner = Arc::new(PoolInner {
            queue: JobQueue::new(),
            workers: Mutex::new(Vec::new()),
        });

        let mut handles = Vec::with_capacity(workers);

        for i in 0..workers {
            let pool = inner.clone();
            let handle = thread::Builder::new()
                .name(format!("worker-{}", i))
                .spawn(move || {
                    while let Some(job) = pool.queue.pop() {
                        job();
                    }
                    debug!("worker exiting");
                })?;
            handles.push(handle);
        }

        *inner.workers.lock().unwrap() = handles;

        Ok(WorkerPool { inner })
    }

    pub fn enqueue<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if !self.inner.queue.push(Box::new(job)) {
            warn!("worker pool is shut down, job dropped");
        }
    }

    /// Closes the queue and joins the workers. Jobs still queued run to
    /// completion before the workers exit.
    pub fn shutdown(&self) {
        self.inner.queue.close();

        let workers = mem::take(&mut *self.inner.workers.lock().unwrap());
        for worker in workers {
            let _ = worker.join();
        }
    }
}

#[cfg(test)]
mod test {
    use super::WorkerPool;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn executes_jobs() {
        let pool = WorkerPool::new(4).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..100 {
            let counter = counter.clone();
            pool.enqueue(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }

        pool.shutdown();
        assert_eq!(counter.load(Ordering::SeqCst), 100);
    }

    #[test]
    fn single_worker_preserves_order() {
        let pool = WorkerPool::new(1).unwrap();
        let (tx, rx) = mpsc::channel();

        for i in 0..10 {
            let tx = tx.clone();
            pool.enqueue(move || {
                tx.send(i).unwrap();
            });
        }

        for i in 0..10 {
            assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), i);
        }

        pool.shutdown();
    }

    #[test]
    fn enqueue_after_shutdown_is_dropped() {
        let pool = WorkerPool::new(1).unwrap();
        pool.shutdown();

        // Must neither panic nor execute.
        pool.enqueue(|| panic!("job ran after shutdown"));
    }
}
