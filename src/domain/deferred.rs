//! Two-sided future/promise used to hand transaction outcomes back to callers.
//!
//! The [`Completer`] side is owned by the task doing the work; the [`Deferred`] side is
//! returned to the caller, who can poll it (`is_done`, `progress`) or `wait` on it.

use crate::error::{EconomyError, Result};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::Notify;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Progress {
    pub current: u32,
    pub total: u32,
}

struct State<T> {
    outcome: Option<Result<T>>,
    progress: Progress,
    released: bool,
}

struct Shared<T> {
    state: Mutex<State<T>>,
    notify: Notify,
}

/// Creates a linked completer/deferred pair.
pub fn deferred<T>() -> (Completer<T>, Deferred<T>) {
    let shared = Arc::new(Shared {
        state: Mutex::new(State {
            outcome: None,
            progress: Progress::default(),
            released: false,
        }),
        notify: Notify::new(),
    });
    (
        Completer {
            shared: shared.clone(),
        },
        Deferred { shared },
    )
}

pub struct Deferred<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Deferred<T> {
    pub fn is_done(&self) -> bool {
        self.shared.state.lock().outcome.is_some()
    }

    pub fn is_fulfilled(&self) -> bool {
        matches!(self.shared.state.lock().outcome, Some(Ok(_)))
    }

    pub fn error(&self) -> Option<EconomyError> {
        match &self.shared.state.lock().outcome {
            Some(Err(err)) => Some(err.clone()),
            _ => None,
        }
    }

    pub fn progress(&self) -> Progress {
        self.shared.state.lock().progress
    }

    /// Takes the outcome if the work already finished.
    pub fn try_take(&self) -> Option<Result<T>> {
        self.shared.state.lock().outcome.take()
    }

    /// Waits until the completer resolves or rejects.
    pub async fn wait(self) -> Result<T> {
        loop {
            let outcome = self.shared.state.lock().outcome.take();
            if let Some(outcome) = outcome {
                return outcome;
            }
            self.shared.notify.notified().await;
        }
    }

    /// Gives up interest in the outcome. Work already delegated is not aborted.
    pub fn release(self) {
        let mut state = self.shared.state.lock();
        state.released = true;
        state.outcome = None;
    }
}

impl<T: Clone> Deferred<T> {
    pub fn result(&self) -> Option<T> {
        match &self.shared.state.lock().outcome {
            Some(Ok(value)) => Some(value.clone()),
            _ => None,
        }
    }
}

/// Producer side. Dropping it without completing rejects with [`EconomyError::Abandoned`].
pub struct Completer<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Completer<T> {
    pub fn set_progress(&self, current: u32, total: u32) {
        self.shared.state.lock().progress = Progress { current, total };
    }

    pub fn is_released(&self) -> bool {
        self.shared.state.lock().released
    }

    pub fn resolve(self, value: T) {
        self.complete(Ok(value));
    }

    pub fn reject(self, err: EconomyError) {
        self.complete(Err(err));
    }

    fn complete(&self, outcome: Result<T>) {
        {
            let mut state = self.shared.state.lock();
            if state.outcome.is_some() || state.released {
                return;
            }
            state.outcome = Some(outcome);
        }
        self.shared.notify.notify_one();
    }
}

impl<T> Drop for Completer<T> {
    fn drop(&mut self) {
        let abandoned = {
            let state = self.shared.state.lock();
            state.outcome.is_none() && !state.released
        };
        if abandoned {
            self.complete(Err(EconomyError::Abandoned));
        }
    }
}
