//! Event/error channel pair produced by a streaming invocation
//!
//! A producer task owns an [`EventSender`]; the caller owns the matching
//! [`InvocationStream`]. Events travel on a bounded channel in emission order,
//! and at most one terminal error travels out of band. Both channels close when
//! the producer finishes, whatever the exit path.

use crate::{
    Error, Result,
    context::InvocationContext,
    error::Cancellation,
    normalized::StreamEvent,
};
use std::future::Future;
use tokio::sync::{mpsc, oneshot};
use tracing::trace;

/// Default capacity of the per-invocation event buffer
pub const DEFAULT_EVENT_BUFFER: usize = 32;

/// Consumer half of a streaming invocation
#[derive(Debug)]
pub struct InvocationStream {
    /// Normalized events in emission order; closes when the producer exits
    pub events: mpsc::Receiver<StreamEvent>,

    /// Terminal error, if any; resolves with `Err(RecvError)` on clean exit
    pub errors: oneshot::Receiver<Error>,
}

impl InvocationStream {
    /// A stream that yields no events and fails with `err`
    pub fn failed(err: Error) -> Self {
        let (_, events) = mpsc::channel(1);
        let (tx, errors) = oneshot::channel();
        let _ = tx.send(err);
        Self { events, errors }
    }

    /// Drain every event, then report the terminal error if one was sent
    pub async fn collect(mut self) -> (Vec<StreamEvent>, Option<Error>) {
        let mut events = Vec::new();
        while let Some(event) = self.events.recv().await {
            events.push(event);
        }
        (events, self.errors.await.ok())
    }
}

/// Producer half: emits events while honouring cancellation and backpressure
#[derive(Debug, Clone)]
pub struct EventSender {
    events: mpsc::Sender<StreamEvent>,
    ctx: InvocationContext,
}

impl EventSender {
    /// Send one event, blocking while the buffer is full.
    ///
    /// Fails with [`Error::Canceled`] when the context finishes first or the
    /// consumer has gone away.
    pub async fn emit(&self, event: StreamEvent) -> Result<()> {
        tokio::select! {
            biased;
            reason = self.ctx.done() => Err(Error::Canceled(reason)),
            sent = self.events.send(event) => {
                sent.map_err(|_| Error::Canceled(Cancellation::Canceled))
            }
        }
    }

    pub fn context(&self) -> &InvocationContext {
        &self.ctx
    }
}

/// Spawn the single producer task of a streaming invocation.
///
/// `produce` receives the sender; returning `Err` publishes that error on the
/// error channel. The event sender is dropped before the error is published, so
/// consumers that wait for the events channel to close always see the error.
pub fn spawn_producer<F, Fut>(
    ctx: InvocationContext,
    buffer: usize,
    produce: F,
) -> InvocationStream
where
    F: FnOnce(EventSender) -> Fut,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    let (events_tx, events) = mpsc::channel(buffer.max(1));
    let (errors_tx, errors) = oneshot::channel();

    let task = produce(EventSender {
        events: events_tx,
        ctx,
    });

    tokio::spawn(async move {
        // The task owns the event sender, so it is gone before the error is sent.
        let result = task.await;
        match result {
            Ok(()) => trace!("producer finished cleanly"),
            Err(err) => {
                trace!("producer finished with error: {}", err);
                let _ = errors_tx.send(err);
            }
        }
    });

    InvocationStream { events, errors }
}
