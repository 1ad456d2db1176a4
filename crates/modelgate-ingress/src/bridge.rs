//! Streaming bridge: forwards one invocation's event/error pair to an outbound stream
//!
//! The loop prefers, in order: the caller's context finishing, the outbound
//! side going away, a terminal error from the producer, and finally the next
//! event. Whatever ends the loop early also cancels the context the producer
//! was started with, so its task unblocks and exits.

use async_trait::async_trait;
use modelgate_core::{
    Cancellation, Error, InvocationContext, InvocationStream, Result, StreamEvent,
};
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// Receiving end of a forwarded stream
#[async_trait]
pub trait OutboundSink: Send + Sync {
    /// Deliver one event; fails once the receiver is gone
    async fn send(&self, event: StreamEvent) -> Result<()>;

    /// Resolves when the receiver has gone away
    async fn closed(&self);
}

/// Sink backed by a bounded channel; the HTTP surface drains the receiver
#[derive(Debug, Clone)]
pub struct ChannelSink<T> {
    tx: mpsc::Sender<T>,
}

impl<T> ChannelSink<T> {
    pub fn new(tx: mpsc::Sender<T>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl<T> OutboundSink for ChannelSink<T>
where
    T: From<StreamEvent> + Send + 'static,
{
    async fn send(&self, event: StreamEvent) -> Result<()> {
        self.tx
            .send(T::from(event))
            .await
            .map_err(|_| Error::Canceled(Cancellation::Canceled))
    }

    async fn closed(&self) {
        self.tx.closed().await
    }
}

/// Forward `stream` into `sink` until it completes, fails or is cancelled.
///
/// `ctx` must be the context the producer was started with. Returns `Ok` only
/// when the producer finished cleanly and every event was delivered.
pub async fn forward<S>(stream: InvocationStream, ctx: &InvocationContext, sink: &S) -> Result<()>
where
    S: OutboundSink + ?Sized,
{
    let InvocationStream {
        mut events,
        mut errors,
    } = stream;
    let mut producer_finished = false;
    let mut forwarded = 0usize;

    let outcome = loop {
        tokio::select! {
            biased;
            reason = ctx.done() => break Err(Error::Canceled(reason)),
            _ = sink.closed() => {
                debug!("Outbound stream closed after {} events", forwarded);
                break Err(Error::Canceled(Cancellation::Canceled));
            }
            received = &mut errors, if !producer_finished => match received {
                Ok(err) => break Err(err),
                // Sender dropped without an error: only buffered events remain
                Err(_) => producer_finished = true,
            },
            event = events.recv() => match event {
                Some(event) => {
                    trace!("Forwarding event #{}", forwarded);
                    let sent = tokio::select! {
                        biased;
                        reason = ctx.done() => Err(Error::Canceled(reason)),
                        sent = sink.send(event) => sent,
                    };
                    if let Err(err) = sent {
                        break Err(err);
                    }
                    forwarded += 1;
                }
                None if producer_finished => break Ok(()),
                // Events close first; the verdict follows as the producer exits
                None => break tokio::select! {
                    biased;
                    reason = ctx.done() => Err(Error::Canceled(reason)),
                    received = &mut errors => match received {
                        Ok(err) => Err(err),
                        Err(_) => Ok(()),
                    },
                },
            },
        }
    };

    match &outcome {
        Ok(()) => debug!("Stream completed after {} events", forwarded),
        Err(err) => {
            debug!("Stream ended after {} events: {}", forwarded, err);
            ctx.cancel();
        }
    }
    outcome
}
