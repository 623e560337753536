//! Consumer execution context for received-message handling
//!
//! Inbound envelopes and discovery notifications are never dispatched
//! from inside a network task's own call stack. Instead they are handed
//! to a [`ContextRunner`], whose single contract is: the callback runs
//! eventually, exactly once, and callbacks from the same source run in
//! the order they were submitted. Which thread or loop actually runs
//! them is the embedding application's choice.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// A boxed callback handed off to the consumer context.
pub type ContextTask = Box<dyn FnOnce() + Send>;

/// Schedules callbacks onto whatever execution context the embedding
/// application designates for received-message handling.
pub trait ContextRunner: Send + Sync {
    fn run(&self, task: ContextTask);
}

/// A queue the application drains from its own loop (a game engine's
/// update tick, typically). `run` enqueues; [`TaskQueue::pump`] drains
/// in FIFO order on the caller's thread.
#[derive(Clone, Default)]
pub struct TaskQueue {
    queue: Arc<Mutex<VecDeque<ContextTask>>>,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs every queued callback on the current thread, in submission
    /// order. Returns how many ran.
    pub fn pump(&self) -> usize {
        let mut ran = 0;
        loop {
            // Pop under the lock, run outside it: callbacks may enqueue
            // more work.
            let task = self.queue.lock().unwrap().pop_front();
            match task {
                Some(task) => {
                    task();
                    ran += 1;
                }
                None => return ran,
            }
        }
    }

    pub fn len(&self) -> usize {
        self.queue.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().unwrap().is_empty()
    }
}

impl ContextRunner for TaskQueue {
    fn run(&self, task: ContextTask) {
        self.queue.lock().unwrap().push_back(task);
    }
}

/// Runs callbacks on a dedicated worker task, FIFO. For headless
/// servers and tests, where no application loop exists to pump.
///
/// Must be created inside a tokio runtime.
pub struct SpawnRunner {
    tx: mpsc::UnboundedSender<ContextTask>,
}

impl SpawnRunner {
    pub fn new() -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<ContextTask>();
        tokio::spawn(async move {
            while let Some(task) = rx.recv().await {
                task();
            }
        });
        Self { tx }
    }
}

impl Default for SpawnRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl ContextRunner for SpawnRunner {
    fn run(&self, task: ContextTask) {
        // A closed channel means the runtime is shutting down; the
        // callback contract is best-effort at that point.
        if self.tx.send(task).is_err() {
            tracing::debug!("context worker gone, dropping callback");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn test_task_queue_pumps_in_order() {
        let queue = TaskQueue::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for i in 0..5 {
            let seen = seen.clone();
            queue.run(Box::new(move || seen.lock().unwrap().push(i)));
        }

        assert_eq!(queue.len(), 5);
        assert_eq!(queue.pump(), 5);
        assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2, 3, 4]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_task_queue_pump_runs_reentrant_submissions() {
        let queue = TaskQueue::new();
        let inner_ran = Arc::new(AtomicUsize::new(0));

        let q2 = queue.clone();
        let flag = inner_ran.clone();
        queue.run(Box::new(move || {
            let flag = flag.clone();
            q2.run(Box::new(move || {
                flag.store(1, Ordering::SeqCst);
            }));
        }));

        assert_eq!(queue.pump(), 2);
        assert_eq!(inner_ran.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_spawn_runner_preserves_order() {
        let runner = SpawnRunner::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for i in 0..10 {
            let seen = seen.clone();
            runner.run(Box::new(move || seen.lock().unwrap().push(i)));
        }

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(*seen.lock().unwrap(), (0..10).collect::<Vec<_>>());
    }
}
