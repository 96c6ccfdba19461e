//! Cancellable recurring tasks (status polling, health probes).
//!
//! A [`RecurringTask`] runs its tick to completion before sleeping again, so two ticks of the
//! same task never overlap. Owners keep at most one task per concern in a [`TaskSlot`], which
//! cancels the previous task before installing a new one.

use std::future::Future;
use std::ops::ControlFlow;
use std::sync::Mutex;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Handle to a spawned recurring task. Dropping the handle cancels the task.
pub struct RecurringTask {
    handle: JoinHandle<()>,
}

impl RecurringTask {
    /// Spawn a task that waits `initial_delay`, then calls `tick` and sleeps `period` between calls.
    /// The loop ends when `tick` returns `ControlFlow::Break` or the task is cancelled.
    pub fn spawn<F, Fut>(initial_delay: Duration, period: Duration, mut tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ControlFlow<()>> + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            if !initial_delay.is_zero() {
                tokio::time::sleep(initial_delay).await;
            }
            loop {
                if tick().await.is_break() {
                    break;
                }
                tokio::time::sleep(period).await;
            }
        });
        Self { handle }
    }

    /// Stop the task. Safe to call more than once.
    pub fn cancel(&self) {
        self.handle.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for RecurringTask {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Holds at most one [`RecurringTask`].
#[derive(Default)]
pub struct TaskSlot {
    inner: Mutex<Option<RecurringTask>>,
}

impl TaskSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel the current task (if any) and install `task`.
    pub fn replace(&self, task: RecurringTask) {
        let old = self.lock().replace(task);
        if let Some(old) = old {
            old.cancel();
        }
    }

    /// Cancel the current task (if any). Idempotent.
    pub fn cancel(&self) {
        if let Some(old) = self.lock().take() {
            old.cancel();
        }
    }

    /// True while a task is installed and still running.
    pub fn is_active(&self) -> bool {
        self.lock().as_ref().is_some_and(|t| !t.is_finished())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<RecurringTask>> {
        // A panic while holding the lock leaves only an Option behind; keep going.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}
