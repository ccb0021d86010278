//! Task execution for client-visible completion work
//!
//! Buffer completion (`on_consumed`, `on_release`) and frame-callback delivery
//! never run on the thread that detected them. They are handed to an
//! [`Executor`] owned by the client connection, which runs them in
//! submission order outside any compositor critical section.

use log::debug;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::mpsc;

/// A unit of deferred work
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Serialized execution context for client-visible work
pub trait Executor: Send + Sync {
    fn spawn(&self, task: Task);
}

/// Executor drained explicitly by the connection's dispatch loop.
///
/// This mirrors a Wayland event-loop executor: tasks queue up while requests
/// are being handled and run when the loop calls [`LoopExecutor::run_pending`].
#[derive(Default)]
pub struct LoopExecutor {
    queue: Mutex<VecDeque<Task>>,
}

impl LoopExecutor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Runs queued tasks, including any spawned by the tasks themselves.
    /// Returns the number of tasks executed.
    pub fn run_pending(&self) -> usize {
        let mut executed = 0;
        loop {
            // The lock is released before the task runs so tasks may spawn more work
            let next = self.queue.lock().pop_front();
            match next {
                Some(task) => {
                    task();
                    executed += 1;
                }
                None => break,
            }
        }
        executed
    }

    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }
}

impl Executor for LoopExecutor {
    fn spawn(&self, task: Task) {
        self.queue.lock().push_back(task);
    }
}

/// Executor backed by a single tokio task consuming an unbounded channel.
///
/// One consumer keeps tasks strictly ordered. Dropping every clone of the
/// executor ends the consumer task.
#[derive(Clone)]
pub struct TokioExecutor {
    tx: mpsc::UnboundedSender<Task>,
}

impl TokioExecutor {
    pub fn new(handle: &tokio::runtime::Handle) -> (Self, tokio::task::JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<Task>();
        let join = handle.spawn(async move {
            while let Some(task) = rx.recv().await {
                task();
            }
            debug!("Executor channel closed, consumer exiting");
        });
        (Self { tx }, join)
    }
}

impl Executor for TokioExecutor {
    fn spawn(&self, task: Task) {
        if self.tx.send(task).is_err() {
            debug!("Executor consumer stopped, dropping task");
        }
    }
}
