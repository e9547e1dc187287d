//! Cancellable stage tasks.
//!
//! A [`TaskHandle`] pairs a [`CancellationToken`] with a state cell that moves
//! `Pending -> Running -> {Completed | Cancelled | Failed}`. Terminal states
//! are final. Cancellation is request-and-forget: `cancel()` never waits for
//! the task to notice.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};

use murmur_core::error::{MurmurError, Result};
use murmur_core::types::{Stage, TaskState};

use crate::sink::{ClientSink, TaskEmitter};

#[derive(Clone)]
pub struct TaskHandle {
    inner: Arc<TaskInner>,
}

struct TaskInner {
    id: u64,
    stage: Stage,
    token: CancellationToken,
    state: Mutex<TaskState>,
}

impl TaskHandle {
    pub fn new(id: u64, stage: Stage) -> Self {
        Self {
            inner: Arc::new(TaskInner {
                id,
                stage,
                token: CancellationToken::new(),
                state: Mutex::new(TaskState::Pending),
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn stage(&self) -> Stage {
        self.inner.stage
    }

    pub fn state(&self) -> TaskState {
        *self.lock_state()
    }

    pub fn is_terminal(&self) -> bool {
        self.state().is_terminal()
    }

    pub fn token(&self) -> &CancellationToken {
        &self.inner.token
    }

    /// Request cancellation.
    ///
    /// Returns `true` if this call moved the task to `Cancelled`. Cancelling a
    /// task that already reached a terminal state does nothing.
    pub fn cancel(&self) -> bool {
        let mut state = self.lock_state();
        if state.is_terminal() {
            return false;
        }
        *state = TaskState::Cancelled;
        self.inner.token.cancel();
        true
    }

    pub fn emitter(&self, sink: ClientSink) -> TaskEmitter {
        TaskEmitter::new(self.clone(), sink)
    }

    /// Run `f` while holding the state lock, unless the task is already
    /// terminal.
    pub(crate) fn while_live<T>(&self, f: impl FnOnce() -> Result<T>) -> Result<T> {
        let state = self.lock_state();
        if state.is_terminal() {
            return Err(MurmurError::Cancelled);
        }
        f()
    }

    /// Run `fut` as this task on the tokio runtime.
    ///
    /// The future is dropped at its next suspension point once the token
    /// fires, which closes any provider stream it holds.
    pub fn spawn<F>(&self, fut: F) -> JoinHandle<()>
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let handle = self.clone();
        let span = info_span!("task", task_id = self.id(), stage = %self.stage());

        tokio::spawn(
            async move {
                if !handle.transition(TaskState::Pending, TaskState::Running) {
                    debug!("Cancelled before start");
                    return;
                }
                debug!("Task started");

                let outcome = tokio::select! {
                    biased;
                    _ = handle.token().cancelled() => Err(MurmurError::Cancelled),
                    result = fut => result,
                };

                match outcome {
                    Ok(()) => {
                        handle.transition(TaskState::Running, TaskState::Completed);
                        debug!("Task completed");
                    }
                    Err(e) if e.is_cancelled() => {
                        handle.cancel();
                        debug!("Task cancelled");
                    }
                    Err(MurmurError::Transport(reason)) => {
                        handle.transition(TaskState::Running, TaskState::Failed);
                        info!(%reason, "Client gone, task stopped");
                    }
                    Err(e) => {
                        handle.transition(TaskState::Running, TaskState::Failed);
                        warn!(error = %e, "Task failed");
                    }
                }
            }
            .instrument(span),
        )
    }

    fn transition(&self, from: TaskState, to: TaskState) -> bool {
        let mut state = self.lock_state();
        if *state != from {
            return false;
        }
        *state = to;
        true
    }

    fn lock_state(&self) -> MutexGuard<'_, TaskState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskHandle")
            .field("id", &self.id())
            .field("stage", &self.stage())
            .field("state", &self.state())
            .finish()
    }
}
