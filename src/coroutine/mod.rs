//! Cooperative suspension with interruption
//!
//! Storage calls run their store I/O on tokio's blocking pool and suspend the
//! calling task until it completes. Every call carries a [`CoroutineHandler`];
//! firing the matching [`Interrupter`] makes any suspended (and any future)
//! call resume with [`Interrupted`].
//!
//! Interruption only releases the caller. Store work that was already
//! dispatched keeps running to completion, and the store's own atomic batch
//! primitive decides whether it lands in full or not at all.

use std::fmt;

use tokio::sync::watch;

use crate::kv::KvResult;

/// Returned by a call whose coroutine was interrupted while suspended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interrupted;

impl fmt::Display for Interrupted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "coroutine interrupted")
    }
}

impl std::error::Error for Interrupted {}

/// Handle passed to every storage call that may suspend.
#[derive(Debug, Clone)]
pub struct CoroutineHandler {
    interrupted: watch::Receiver<bool>,
}

/// Tears down the execution context of one or more handlers.
#[derive(Debug)]
pub struct Interrupter {
    signal: watch::Sender<bool>,
}

impl Interrupter {
    /// Interrupt every handler created from this interrupter.
    pub fn interrupt(&self) {
        self.signal.send_replace(true);
    }

    pub fn is_interrupted(&self) -> bool {
        *self.signal.borrow()
    }
}

impl CoroutineHandler {
    /// Creates a handler together with the interrupter that cancels it.
    pub fn new() -> (Self, Interrupter) {
        let (signal, interrupted) = watch::channel(false);
        (Self { interrupted }, Interrupter { signal })
    }

    /// A handler that can never be interrupted.
    pub fn detached() -> Self {
        let (handler, _interrupter) = Self::new();
        handler
    }

    pub fn is_interrupted(&self) -> bool {
        *self.interrupted.borrow()
    }

    /// Resolves once the handler is interrupted. Never resolves for a
    /// handler whose interrupter was dropped without firing.
    async fn wait_interrupted(&self) {
        let mut interrupted = self.interrupted.clone();
        loop {
            if *interrupted.borrow_and_update() {
                return;
            }
            if interrupted.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }

    /// Runs `work` against the store, suspending until it completes.
    ///
    /// Returns `Err(Interrupted)` without dispatching anything if the handler
    /// was already interrupted, or as soon as an interruption arrives while
    /// suspended. Panics inside `work` are propagated to the caller.
    pub async fn run<T, F>(&self, work: F) -> Result<KvResult<T>, Interrupted>
    where
        F: FnOnce() -> KvResult<T> + Send + 'static,
        T: Send + 'static,
    {
        if self.is_interrupted() {
            return Err(Interrupted);
        }

        let task = tokio::task::spawn_blocking(work);

        tokio::select! {
            biased;
            joined = task => match joined {
                Ok(result) => Ok(result),
                Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
                // Runtime shutting down
                Err(_) => Err(Interrupted),
            },
            _ = self.wait_interrupted() => Err(Interrupted),
        }
    }
}
