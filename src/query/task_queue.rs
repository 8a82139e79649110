//! A single-consumer background task queue, the Rust analogue of the
//! source's `RoutineTaskQueue` used by `BufferedDataStore` and
//! `AsyncDataStore` (SPEC_FULL.md §5: "Async task queue ... single-consumer
//! queue processed by one worker task").

use crossbeam::channel::{unbounded, Sender};
use parking_lot::Mutex;
use std::thread::JoinHandle;

type Task = Box<dyn FnOnce() + Send>;

struct TaskQueueState {
    sender: Option<Sender<Task>>,
    handle: Option<JoinHandle<()>>,
}

pub struct TaskQueue {
    state: Mutex<TaskQueueState>,
}

impl TaskQueue {
    pub fn new() -> Self {
        let (sender, receiver) = unbounded::<Task>();
        let handle = std::thread::spawn(move || {
            for task in receiver {
                task();
            }
        });
        TaskQueue {
            state: Mutex::new(TaskQueueState {
                sender: Some(sender),
                handle: Some(handle),
            }),
        }
    }

    /// Enqueues `task` to run on the worker thread. Silently dropped if the
    /// queue has already been closed.
    pub fn push(&self, task: impl FnOnce() + Send + 'static) {
        if let Some(sender) = &self.state.lock().sender {
            let _ = sender.send(Box::new(task));
        }
    }

    /// Closes the queue and blocks until every previously pushed task has
    /// run to completion. Idempotent.
    pub fn close(&self) {
        let (sender, handle) = {
            let mut state = self.state.lock();
            (state.sender.take(), state.handle.take())
        };
        drop(sender);
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }
}

impl Default for TaskQueue {
    fn default() -> Self {
        TaskQueue::new()
    }
}

impl Drop for TaskQueue {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn pushed_tasks_run_before_close_returns() {
        let queue = TaskQueue::new();
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..10 {
            let counter = counter.clone();
            queue.push(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        queue.close();
        assert_eq!(counter.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn push_after_close_is_a_no_op() {
        let queue = TaskQueue::new();
        queue.close();
        let counter = Arc::new(AtomicUsize::new(0));
        let counter2 = counter.clone();
        queue.push(move || {
            counter2.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }
}
