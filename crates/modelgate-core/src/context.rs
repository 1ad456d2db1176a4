//! Cancellation-carrying invocation context
//!
//! Threaded through every layer of an invocation. Cancelling it (or letting its
//! deadline pass) unblocks any pending network read or channel send that races
//! against [`InvocationContext::done`].

use crate::{Error, Result, error::Cancellation};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct InvocationContext {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl InvocationContext {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            deadline: None,
        }
    }

    /// Add a deadline `timeout` from now; an earlier existing deadline wins
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(existing) if existing < deadline => existing,
            _ => deadline,
        });
        self
    }

    /// Context cancelled together with `self`, but cancellable on its own
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            deadline: self.deadline,
        }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Reason the context is finished, if it is
    pub fn err(&self) -> Option<Cancellation> {
        if self.token.is_cancelled() {
            Some(Cancellation::Canceled)
        } else if self.deadline.is_some_and(|d| Instant::now() >= d) {
            Some(Cancellation::DeadlineExceeded)
        } else {
            None
        }
    }

    /// Resolves once the context is cancelled or its deadline passes
    pub async fn done(&self) -> Cancellation {
        match self.deadline {
            Some(deadline) => tokio::select! {
                biased;
                _ = self.token.cancelled() => Cancellation::Canceled,
                _ = tokio::time::sleep_until(deadline) => Cancellation::DeadlineExceeded,
            },
            None => {
                self.token.cancelled().await;
                Cancellation::Canceled
            }
        }
    }

    /// Race `fut` against the context; a finished context wins ties
    pub async fn run<F>(&self, fut: F) -> Result<F::Output>
    where
        F: Future,
    {
        tokio::select! {
            biased;
            reason = self.done() => Err(Error::Canceled(reason)),
            output = fut => Ok(output),
        }
    }
}

impl Default for InvocationContext {
    fn default() -> Self {
        Self::new()
    }
}
