//! Fixed-size worker pool draining a task queue.
//!
//! Grounded in the teacher's `src/worker.rs` dispatch-by-channel pattern: `crossbeam_channel`
//! already implements the mutex+condvar bounded FIFO spec.md §4.4 describes, so workers are
//! just threads parked on `Receiver::recv` rather than a hand-rolled primitive.

use crossbeam_channel::{unbounded, Receiver, Sender};
use std::thread::JoinHandle;

/// A task submitted to the pool. Must not reference a connection past the point where it
/// signals completion (re-arm or close) — see spec.md §6's worker task contract.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// A fixed-size set of threads consuming a single FIFO of nullary tasks.
pub struct WorkerPool {
    sender: Sender<Task>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawns `size` worker threads, each blocking on the shared task queue.
    pub fn new(size: usize) -> Self {
        assert!(size > 0, "worker pool requires at least one thread");
        let (sender, receiver): (Sender<Task>, Receiver<Task>) = unbounded();

        let handles = (0..size)
            .map(|id| {
                let receiver = receiver.clone();
                std::thread::Builder::new()
                    .name(format!("evented-http-worker-{id}"))
                    .spawn(move || {
                        // `recv` returns Err once every Sender (including the pool's own,
                        // dropped in `Drop`) has disconnected — that's the shutdown signal.
                        while let Ok(task) = receiver.recv() {
                            task();
                        }
                    })
                    .expect("failed to spawn worker thread")
            })
            .collect();

        WorkerPool { sender, handles }
    }

    /// Enqueues `task`, waking one idle worker.
    pub fn submit(&self, task: Task) {
        // The only way this fails is if every worker thread has panicked and dropped its
        // receiver; propagating that here would just mask the real panic, so log and drop.
        if self.sender.send(task).is_err() {
            log::error!("worker pool has no live receivers; dropping submitted task");
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Dropping `sender` after replacing it with a disconnected stand-in closes the
        // channel; every worker's `recv` then returns `Err` and the loop exits.
        let (empty_tx, _) = unbounded();
        let _ = std::mem::replace(&mut self.sender, empty_tx);
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn runs_all_submitted_tasks() {
        let pool = WorkerPool::new(4);
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..100 {
            let counter = counter.clone();
            pool.submit(Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }));
        }
        drop(pool);
        assert_eq!(counter.load(Ordering::SeqCst), 100);
    }

    #[test]
    fn drop_joins_workers_without_losing_in_flight_tasks() {
        let pool = WorkerPool::new(2);
        let (tx, rx) = crossbeam_channel::bounded(10);
        for i in 0..10 {
            let tx = tx.clone();
            pool.submit(Box::new(move || {
                tx.send(i).unwrap();
            }));
        }
        drop(tx);
        drop(pool);
        let mut results: Vec<_> = rx.try_iter().collect();
        results.sort();
        assert_eq!(results, (0..10).collect::<Vec<_>>());
    }
}
