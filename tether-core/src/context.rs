// SPDX-License-Identifier: Apache-2.0

//! Execution contexts: where callback invocations run.
//!
//! Every owner nominates a serialized context (its "home" context) and all
//! callback invocations for that owner are marshaled onto it. Transport
//! threads post and return; they never wait for the callback.

use std::sync::Mutex;

use tokio::sync::mpsc;

/// A unit of work marshaled onto an execution context.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// A serialized execution context. `post` enqueues work for later execution
/// and returns `false` once the context no longer accepts work (shut down),
/// in which case the task is dropped.
pub trait ExecutionContext: Send + Sync {
    fn post(&self, task: Task) -> bool;
}

/// A single-consumer event queue backed by a tokio task. Tasks run one at a
/// time in post order, which gives registrants the default serialized
/// dispatch the concurrency model assumes.
///
/// Must be created inside a tokio runtime.
pub struct EventQueue {
    tx: Mutex<Option<mpsc::UnboundedSender<Task>>>,
}

impl EventQueue {
    /// Spawn the queue's worker task and return the queue.
    pub fn spawn() -> std::sync::Arc<Self> {
        let (tx, mut rx) = mpsc::unbounded_channel::<Task>();
        tokio::spawn(async move {
            while let Some(task) = rx.recv().await {
                task();
            }
        });
        std::sync::Arc::new(Self {
            tx: Mutex::new(Some(tx)),
        })
    }

    /// Stop accepting work. Tasks already queued still run; subsequent
    /// `post` calls return `false`.
    pub fn shutdown(&self) {
        self.tx.lock().unwrap().take();
    }

    /// Wait until every task posted before this call has run. Useful in
    /// tests and teardown sequencing.
    pub async fn flush(&self) {
        let (done_tx, done_rx) = tokio::sync::oneshot::channel();
        let posted = self.post(Box::new(move || {
            let _ = done_tx.send(());
        }));
        if posted {
            let _ = done_rx.await;
        }
    }
}

impl ExecutionContext for EventQueue {
    fn post(&self, task: Task) -> bool {
        match self.tx.lock().unwrap().as_ref() {
            Some(tx) => tx.send(task).is_ok(),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;

    #[tokio::test]
    async fn posted_tasks_run_in_order() {
        let queue = EventQueue::spawn();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for i in 0..10 {
            let seen = Arc::clone(&seen);
            assert!(queue.post(Box::new(move || seen.lock().unwrap().push(i))));
        }
        queue.flush().await;

        assert_eq!(*seen.lock().unwrap(), (0..10).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn post_after_shutdown_is_rejected() {
        let queue = EventQueue::spawn();
        let ran = Arc::new(AtomicUsize::new(0));

        queue.shutdown();
        let count = Arc::clone(&ran);
        assert!(!queue.post(Box::new(move || {
            count.fetch_add(1, Ordering::SeqCst);
        })));

        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn flush_after_shutdown_returns_immediately() {
        let queue = EventQueue::spawn();
        queue.shutdown();
        queue.flush().await;
    }
}
