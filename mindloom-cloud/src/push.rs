//! Background push bookkeeping.
//!
//! Asynchronous remote writes are not fire-and-forget: each is
//! registered as an explicit task with a queryable outcome, so
//! `SyncStatus` can report in-flight work and tests can await
//! quiescence deterministically.

use std::sync::{Arc, Mutex};
use tokio::sync::watch;

/// Outcome of one background remote push.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PushOutcome {
    Pending,
    Success,
    Failure(String),
}

impl PushOutcome {
    pub fn is_settled(&self) -> bool {
        !matches!(self, PushOutcome::Pending)
    }
}

/// Completer side of a push task. Dropping it without settling records
/// a failure so an aborted task never reads as forever-pending.
pub struct PushGuard {
    tx: watch::Sender<PushOutcome>,
    settled: bool,
}

impl PushGuard {
    pub fn success(mut self) {
        self.settled = true;
        let _ = self.tx.send(PushOutcome::Success);
    }

    pub fn failure(mut self, message: impl Into<String>) {
        self.settled = true;
        let _ = self.tx.send(PushOutcome::Failure(message.into()));
    }
}

impl Drop for PushGuard {
    fn drop(&mut self) {
        if !self.settled {
            let _ = self.tx.send(PushOutcome::Failure("abandoned".into()));
        }
    }
}

/// Observer side of a push task.
#[derive(Clone)]
pub struct PushTask {
    rx: watch::Receiver<PushOutcome>,
}

impl PushTask {
    /// Current outcome without waiting.
    pub fn outcome(&self) -> PushOutcome {
        self.rx.borrow().clone()
    }

    /// Waits until the push settles and returns the final outcome.
    pub async fn settled(mut self) -> PushOutcome {
        loop {
            let current = self.rx.borrow().clone();
            if current.is_settled() {
                return current;
            }
            if self.rx.changed().await.is_err() {
                return self.rx.borrow().clone();
            }
        }
    }
}

/// Registry of in-flight background pushes.
#[derive(Clone, Default)]
pub struct PushTracker {
    tasks: Arc<Mutex<Vec<watch::Receiver<PushOutcome>>>>,
}

impl PushTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new push, returning the completer and the observer.
    pub fn register(&self) -> (PushGuard, PushTask) {
        let (tx, rx) = watch::channel(PushOutcome::Pending);
        if let Ok(mut tasks) = self.tasks.lock() {
            tasks.push(rx.clone());
        }
        (
            PushGuard { tx, settled: false },
            PushTask { rx },
        )
    }

    /// Number of pushes still pending. Settled tasks are pruned.
    pub fn pending_count(&self) -> usize {
        let mut tasks = match self.tasks.lock() {
            Ok(t) => t,
            Err(_) => return 0,
        };
        tasks.retain(|rx| !rx.borrow().is_settled());
        tasks.len()
    }

    /// Waits until every registered push has settled.
    pub async fn wait_idle(&self) {
        loop {
            let pending: Vec<watch::Receiver<PushOutcome>> = {
                let mut tasks = match self.tasks.lock() {
                    Ok(t) => t,
                    Err(_) => return,
                };
                tasks.retain(|rx| !rx.borrow().is_settled());
                tasks.clone()
            };
            if pending.is_empty() {
                return;
            }
            for mut rx in pending {
                if !rx.borrow().is_settled() {
                    // A closed channel counts as settled via the guard's Drop
                    let _ = rx.changed().await;
                }
            }
        }
    }
}
