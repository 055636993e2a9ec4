// SPDX-License-Identifier: GPL-3.0-only

//! Detection Loop task ownership
//!
//! The loop is a tokio task owned through a [`LoopHandle`]. Cancelling the
//! handle first waits for any delivery in flight (the [`FrameGate`]), then
//! raises the [`CancelFlag`] and aborts the task, so no frame is delivered
//! once teardown has begun.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::ThreadId;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::debug;

#[derive(Debug, Default)]
struct CancelInner {
    cancelled: AtomicBool,
    notify: Notify,
}

/// One-way cancellation signal shared by a loop and its owner
#[derive(Debug, Clone, Default)]
pub struct CancelFlag {
    inner: Arc<CancelInner>,
}

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        if !self.inner.cancelled.swap(true, Ordering::SeqCst) {
            self.inner.notify.notify_waiters();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Resolve once [`cancel`](Self::cancel) has been called
    pub async fn cancelled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

/// Serializes frame delivery against teardown
///
/// Re-entrant per thread: a callback running inside a delivery may stop
/// its own session without deadlocking.
#[derive(Debug, Clone, Default)]
pub struct FrameGate {
    lock: Arc<Mutex<()>>,
    owner: Arc<Mutex<Option<ThreadId>>>,
}

impl FrameGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enter the gate, or `None` if this thread is already inside
    pub fn enter(&self) -> Option<GateGuard<'_>> {
        let current = std::thread::current().id();
        if *self.owner() == Some(current) {
            return None;
        }

        let lock = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        *self.owner() = Some(current);
        Some(GateGuard { gate: self, _lock: lock })
    }

    fn owner(&self) -> MutexGuard<'_, Option<ThreadId>> {
        self.owner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Held while inside a [`FrameGate`]
pub struct GateGuard<'a> {
    gate: &'a FrameGate,
    _lock: MutexGuard<'a, ()>,
}

impl Drop for GateGuard<'_> {
    fn drop(&mut self) {
        *self.gate.owner() = None;
    }
}

/// Owned reference to a running Detection Loop
pub struct LoopHandle {
    task: Option<JoinHandle<()>>,
    cancel: CancelFlag,
    gate: FrameGate,
}

impl LoopHandle {
    /// Spawn `task` on the current runtime
    pub fn spawn<F>(task: F, cancel: CancelFlag, gate: FrameGate) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        Self {
            task: Some(tokio::spawn(task)),
            cancel,
            gate,
        }
    }

    /// Whether the loop task is still running
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Stop the loop
    ///
    /// Returns after any in-flight delivery has finished. When called from
    /// the loop task itself the task is not aborted; it observes the flag
    /// and returns on its own.
    pub fn cancel(mut self) {
        self.cancel_inner();
    }

    fn cancel_inner(&mut self) {
        let Some(task) = self.task.take() else {
            return;
        };

        let _gate = self.gate.enter();
        self.cancel.cancel();
        if tokio::task::try_id() != Some(task.id()) {
            task.abort();
            debug!("Detection loop aborted");
        } else {
            debug!("Detection loop cancelled from inside");
        }
    }
}

impl Drop for LoopHandle {
    fn drop(&mut self) {
        self.cancel_inner();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    #[tokio::test]
    async fn test_cancelled_resolves_after_cancel() {
        let flag = CancelFlag::new();
        let waiter = flag.clone();
        let task = tokio::spawn(async move { waiter.cancelled().await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        flag.cancel();
        task.await.unwrap();
        assert!(flag.is_cancelled());
    }

    #[test]
    fn test_gate_is_reentrant_on_same_thread() {
        let gate = FrameGate::new();
        let outer = gate.enter();
        assert!(outer.is_some());
        assert!(gate.enter().is_none());
        drop(outer);
        assert!(gate.enter().is_some());
    }

    #[tokio::test]
    async fn test_cancel_stops_the_task() {
        let counter = Arc::new(AtomicU32::new(0));
        let task_counter = Arc::clone(&counter);
        let cancel = CancelFlag::new();

        let handle = LoopHandle::spawn(
            async move {
                loop {
                    task_counter.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(2)).await;
                }
            },
            cancel.clone(),
            FrameGate::new(),
        );

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(handle.is_running());
        handle.cancel();
        assert!(cancel.is_cancelled());

        tokio::time::sleep(Duration::from_millis(10)).await;
        let seen = counter.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(counter.load(Ordering::SeqCst), seen);
    }
}
