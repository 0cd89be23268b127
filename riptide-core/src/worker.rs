//! Named fixed-size pools of blocking worker threads.
//!
//! Replication routines are synchronous and may block on sockets, files and
//! storage transactions; each pool bounds how many of one routine kind run
//! concurrently. `stop` drains queued jobs before joining the workers.

use crate::{Error, Result};
use parking_lot::Mutex;
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Fixed-size pool of named worker threads executing queued closures
pub struct WorkerPool {
    name: String,
    sender: Mutex<Option<Sender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Create an empty pool; no threads run until `startup`
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sender: Mutex::new(None),
            workers: Mutex::new(Vec::new()),
        }
    }

    /// Pool name, used for thread naming and logs
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Spawn `threads` workers consuming the job queue
    pub fn startup(&self, threads: usize) -> Result<()> {
        if threads == 0 {
            return Err(Error::internal(format!(
                "pool {} needs at least one thread",
                self.name
            )));
        }
        let mut sender = self.sender.lock();
        if sender.is_some() {
            return Err(Error::internal(format!(
                "pool {} already started",
                self.name
            )));
        }

        let (tx, rx) = channel::<Job>();
        let rx = Arc::new(Mutex::new(rx));
        let mut workers = self.workers.lock();
        for i in 0..threads {
            let rx = Arc::clone(&rx);
            let handle = std::thread::Builder::new()
                .name(format!("{}-{}", self.name, i))
                .spawn(move || worker_loop(rx))?;
            workers.push(handle);
        }
        *sender = Some(tx);
        tracing::debug!("pool {} started with {} threads", self.name, threads);
        Ok(())
    }

    /// Enqueue a job; silently dropped when the pool is stopped
    pub fn schedule<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let sender = self.sender.lock();
        match sender.as_ref() {
            Some(tx) => {
                // send fails only when every worker has exited
                if tx.send(Box::new(job)).is_err() {
                    tracing::warn!("pool {} has no live workers, job dropped", self.name);
                }
            }
            None => {
                tracing::warn!("pool {} is stopped, job dropped", self.name);
            }
        }
    }

    /// Drain queued jobs and join every worker. Idempotent.
    pub fn stop(&self) {
        let tx = self.sender.lock().take();
        drop(tx);
        let workers = std::mem::take(&mut *self.workers.lock());
        for handle in workers {
            let _ = handle.join();
        }
        tracing::debug!("pool {} stopped", self.name);
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.stop();
    }
}

fn worker_loop(rx: Arc<Mutex<Receiver<Job>>>) {
    loop {
        // hold the receiver lock only while waiting for the next job
        let job = {
            let guard = rx.lock();
            guard.recv()
        };
        match job {
            Ok(job) => job(),
            Err(_) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn test_executes_jobs() {
        let pool = WorkerPool::new("test-exec");
        pool.startup(2).unwrap();

        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..10 {
            let counter = Arc::clone(&counter);
            pool.schedule(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        pool.stop();
        assert_eq!(counter.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn test_stop_drains_queue() {
        let pool = WorkerPool::new("test-drain");
        pool.startup(1).unwrap();

        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..5 {
            let counter = Arc::clone(&counter);
            pool.schedule(move || {
                std::thread::sleep(Duration::from_millis(10));
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        pool.stop();
        assert_eq!(counter.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn test_schedule_after_stop_is_dropped() {
        let pool = WorkerPool::new("test-late");
        pool.startup(1).unwrap();
        pool.stop();

        let counter = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&counter);
        pool.schedule(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_double_startup_rejected() {
        let pool = WorkerPool::new("test-double");
        pool.startup(1).unwrap();
        assert!(pool.startup(1).is_err());
        pool.stop();
    }

    #[test]
    fn test_parallelism() {
        let pool = WorkerPool::new("test-par");
        pool.startup(4).unwrap();

        let (tx, rx) = channel();
        for i in 0..4 {
            let tx = tx.clone();
            pool.schedule(move || {
                std::thread::sleep(Duration::from_millis(50));
                tx.send(i).unwrap();
            });
        }
        let start = std::time::Instant::now();
        for _ in 0..4 {
            rx.recv_timeout(Duration::from_secs(2)).unwrap();
        }
        // four 50ms jobs on four threads should overlap
        assert!(start.elapsed() < Duration::from_millis(180));
        pool.stop();
    }
}
