//! Bounded worker pool
//!
//! A fixed set of long-lived workers accepting one task at a time through
//! a rendezvous handshake: `dispatch` installs the task, wakes a worker
//! and blocks until that worker acknowledges the claim. The dispatch
//! scheduler already bounds in-flight work to the slot count and paces
//! itself, so the explicit backpressure of a rendezvous replaces an
//! auxiliary task queue.

use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};

use anyhow::{Context, Result};
use tracing::debug;

type Job = Box<dyn FnOnce() + Send + 'static>;

struct PoolState {
    task: Option<Job>,
    wake_up: bool,
    shutdown: bool,
    running: Vec<bool>,
    completed: Vec<u64>,
}

struct PoolShared {
    state: Mutex<PoolState>,
    task_ready: Condvar,
    ack: Condvar,
    idle: Condvar,
}

/// Fixed-size worker pool with a single-task rendezvous hand-off.
pub struct WorkerPool {
    shared: Arc<PoolShared>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Spawn `workers` long-lived worker threads.
    pub fn new(workers: usize) -> Result<Self> {
        let shared = Arc::new(PoolShared {
            state: Mutex::new(PoolState {
                task: None,
                wake_up: false,
                shutdown: false,
                running: vec![false; workers],
                completed: vec![0; workers],
            }),
            task_ready: Condvar::new(),
            ack: Condvar::new(),
            idle: Condvar::new(),
        });

        let mut handles = Vec::with_capacity(workers);
        for id in 0..workers {
            let shared = shared.clone();
            let handle = thread::Builder::new()
                .name(format!("worker-{id}"))
                .spawn(move || worker_loop(shared, id))
                .with_context(|| format!("spawning pool worker {id}"))?;
            handles.push(handle);
        }

        Ok(Self {
            shared,
            handles: Mutex::new(handles),
        })
    }

    /// Hand one task to the pool. Returns only once a worker has claimed
    /// it, which is what bounds the dispatcher to the workers' pace.
    pub fn dispatch(&self, job: impl FnOnce() + Send + 'static) -> Result<()> {
        let mut state = self.shared.state.lock().unwrap();

        // A previous hand-off may still be in flight; wait it out so the
        // task cell is never overwritten.
        while state.wake_up {
            state = self.shared.ack.wait(state).unwrap();
        }
        if state.shutdown {
            anyhow::bail!("dispatch on a shut-down worker pool");
        }

        state.task = Some(Box::new(job));
        state.wake_up = true;
        self.shared.task_ready.notify_one();

        while state.wake_up {
            state = self.shared.ack.wait(state).unwrap();
        }
        Ok(())
    }

    /// True when no worker is running and no task awaits a claimant.
    pub fn is_done(&self) -> bool {
        let state = self.shared.state.lock().unwrap();
        !state.wake_up && state.running.iter().all(|r| !*r)
    }

    /// Block until every worker has finished its assigned task.
    pub fn wait_idle(&self) {
        let mut state = self.shared.state.lock().unwrap();
        while state.wake_up || state.running.iter().any(|r| *r) {
            state = self.shared.idle.wait(state).unwrap();
        }
    }

    /// Per-worker completed-task counters, for the run summary.
    pub fn completed_per_worker(&self) -> Vec<u64> {
        self.shared.state.lock().unwrap().completed.clone()
    }

    /// Signal shutdown and join every worker. Safe to call more than
    /// once; the second call finds nothing left to join.
    pub fn shutdown(&self) {
        {
            let mut state = self.shared.state.lock().unwrap();
            state.shutdown = true;
            self.shared.task_ready.notify_all();
        }
        let handles: Vec<_> = self.handles.lock().unwrap().drain(..).collect();
        for handle in handles {
            let _ = handle.join();
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(shared: Arc<PoolShared>, id: usize) {
    let mut state = shared.state.lock().unwrap();
    loop {
        while !state.wake_up {
            state.running[id] = false;
            if !state.running.iter().any(|r| *r) {
                shared.idle.notify_all();
            }
            if state.shutdown {
                debug!("worker {id} exiting");
                return;
            }
            state = shared.task_ready.wait(state).unwrap();
        }

        let Some(job) = state.task.take() else {
            // Unreachable: a set wake-up always carries a task. Hand the
            // flag back rather than spinning on it.
            state.wake_up = false;
            shared.ack.notify_all();
            continue;
        };
        state.running[id] = true;
        state.wake_up = false;
        shared.ack.notify_all();
        drop(state);

        job();

        state = shared.state.lock().unwrap();
        state.completed[id] += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn test_dispatch_runs_tasks() {
        let pool = WorkerPool::new(3).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..10 {
            let counter = counter.clone();
            pool.dispatch(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        }
        pool.wait_idle();

        assert_eq!(counter.load(Ordering::SeqCst), 10);
        assert_eq!(pool.completed_per_worker().iter().sum::<u64>(), 10);
        assert!(pool.is_done());
    }

    #[test]
    fn test_dispatch_returns_after_claim() {
        let pool = WorkerPool::new(1).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));

        // With a single worker, a second dispatch can only be claimed after
        // the first task finished, so the rendezvous serializes them.
        for _ in 0..2 {
            let counter = counter.clone();
            pool.dispatch(move || {
                thread::sleep(Duration::from_millis(20));
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        }
        assert!(counter.load(Ordering::SeqCst) >= 1);
        pool.wait_idle();
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_wait_idle_on_fresh_pool() {
        let pool = WorkerPool::new(2).unwrap();
        pool.wait_idle();
        assert!(pool.is_done());
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let pool = WorkerPool::new(4).unwrap();
        pool.dispatch(|| {}).unwrap();
        pool.wait_idle();
        pool.shutdown();
        pool.shutdown();
        assert!(pool.dispatch(|| {}).is_err());
    }
}
