//! Server-sent event demultiplexing
//!
//! Upstream bodies arrive as arbitrary byte chunks. [`SseReader`] reassembles
//! them into complete SSE events and hands back the `data:` payloads one at a
//! time. Comments, keep-alives and events without data are skipped; frame
//! routing and termination are left to each adapter.

use crate::EgressError;
use bytes::Bytes;
use eventsource_stream::{Event, EventStreamError, Eventsource};
use futures::{Stream, StreamExt, stream, stream::BoxStream};
use modelgate_core::InvocationContext;
use tracing::trace;

pub struct SseReader {
    events: BoxStream<'static, Result<Event, EventStreamError<String>>>,
}

impl SseReader {
    /// Wrap any byte stream; transport errors are carried as strings.
    ///
    /// A blank line is appended at EOF so a final event whose terminating
    /// blank line never arrived is still dispatched.
    pub fn new<S, B, E>(body: S) -> Self
    where
        S: Stream<Item = Result<B, E>> + Send + 'static,
        B: Into<Bytes> + Send + 'static,
        E: std::fmt::Display + Send + 'static,
    {
        let body = body
            .map(|chunk| chunk.map(Into::<Bytes>::into).map_err(|e| e.to_string()))
            .chain(stream::once(async {
                Ok::<_, String>(Bytes::from_static(b"\n\n"))
            }));
        Self {
            events: body.eventsource().boxed(),
        }
    }

    pub fn from_response(response: reqwest::Response) -> Self {
        Self::new(response.bytes_stream())
    }

    /// Next non-empty `data:` payload, or `None` when the body ends.
    ///
    /// The read races `ctx`, so cancelling the invocation unblocks a stalled
    /// upstream.
    pub async fn next_data(
        &mut self,
        ctx: &InvocationContext,
    ) -> modelgate_core::Result<Option<String>> {
        loop {
            let next = ctx.run(self.events.next()).await?;
            match next {
                None => return Ok(None),
                Some(Ok(event)) => {
                    if event.data.trim().is_empty() {
                        trace!("skipping SSE event without data (event: {:?})", event.event);
                        continue;
                    }
                    return Ok(Some(event.data));
                }
                Some(Err(EventStreamError::Transport(msg))) => {
                    return Err(EgressError::StreamError(msg).into());
                }
                Some(Err(e)) => {
                    return Err(EgressError::ParseError(format!("Malformed SSE frame: {}", e)).into());
                }
            }
        }
    }
}

/// Parse one payload into a vendor frame shape
pub(crate) fn parse_frame<T>(vendor: &str, data: &str) -> modelgate_core::Result<T>
where
    T: serde::de::DeserializeOwned,
{
    serde_json::from_str(data).map_err(|e| {
        EgressError::ParseError(format!("Failed to parse {} stream chunk: {}", vendor, e)).into()
    })
}

/// Error for a body that ended before the vendor's terminal frame
pub(crate) fn premature_eof() -> modelgate_core::Error {
    modelgate_core::Error::UpstreamProtocol("stream ended before terminal frame".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use modelgate_core::Error;

    fn reader(chunks: Vec<&'static str>) -> SseReader {
        SseReader::new(stream::iter(
            chunks
                .into_iter()
                .map(|c| Ok::<_, std::io::Error>(Bytes::from_static(c.as_bytes()))),
        ))
    }

    #[tokio::test]
    async fn test_frame_split_across_reads() {
        let ctx = InvocationContext::new();
        let mut sse = reader(vec!["data: {\"typ", "e\":\"x\"}\n", "\n"]);

        assert_eq!(
            sse.next_data(&ctx).await.unwrap().as_deref(),
            Some(r#"{"type":"x"}"#)
        );
        assert_eq!(sse.next_data(&ctx).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_comments_and_blank_events_are_skipped() {
        let ctx = InvocationContext::new();
        let mut sse = reader(vec![
            ": keep-alive\n\n",
            "event: ping\n\n",
            "\n\n",
            "event: message_stop\ndata: {\"type\":\"message_stop\"}\n\n",
        ]);

        assert_eq!(
            sse.next_data(&ctx).await.unwrap().as_deref(),
            Some(r#"{"type":"message_stop"}"#)
        );
        assert_eq!(sse.next_data(&ctx).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_multiple_events_in_one_read() {
        let ctx = InvocationContext::new();
        let mut sse = reader(vec!["data: 1\n\ndata: 2\n\ndata: [DONE]\n\n"]);

        let mut seen = Vec::new();
        while let Some(data) = sse.next_data(&ctx).await.unwrap() {
            seen.push(data);
        }
        assert_eq!(seen, vec!["1", "2", "[DONE]"]);
    }

    #[tokio::test]
    async fn test_last_event_without_blank_line_is_flushed() {
        let ctx = InvocationContext::new();
        let mut sse = reader(vec!["data: {\"a\":1}\n\n", "data: [DONE]\n"]);

        let mut seen = Vec::new();
        while let Some(data) = sse.next_data(&ctx).await.unwrap() {
            seen.push(data);
        }
        assert_eq!(seen, vec![r#"{"a":1}"#, "[DONE]"]);
    }

    #[tokio::test]
    async fn test_last_line_without_newline_is_flushed() {
        let ctx = InvocationContext::new();
        let mut sse = reader(vec!["event: message_stop\ndata: {\"type\":\"message_stop\"}"]);

        assert_eq!(
            sse.next_data(&ctx).await.unwrap().as_deref(),
            Some(r#"{"type":"message_stop"}"#)
        );
        assert_eq!(sse.next_data(&ctx).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_transport_error_surfaces() {
        let ctx = InvocationContext::new();
        let chunks: Vec<Result<Bytes, std::io::Error>> = vec![
            Ok(Bytes::from_static(b"data: 1\n\n")),
            Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset")),
        ];
        let mut sse = SseReader::new(stream::iter(chunks));

        assert_eq!(sse.next_data(&ctx).await.unwrap().as_deref(), Some("1"));
        let err = sse.next_data(&ctx).await.unwrap_err();
        assert!(matches!(err, Error::Transport(ref msg) if msg.contains("reset")));
    }

    #[tokio::test]
    async fn test_cancel_unblocks_stalled_read() {
        let ctx = InvocationContext::new();
        let mut sse = SseReader::new(stream::pending::<Result<Bytes, std::io::Error>>());

        let canceller = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            canceller.cancel();
        });

        let err = sse.next_data(&ctx).await.unwrap_err();
        assert!(err.is_cancellation());
    }

    #[test]
    fn test_parse_frame_malformed_json() {
        let err = parse_frame::<serde_json::Value>("OpenAI", "{not json").unwrap_err();
        assert!(matches!(err, Error::UpstreamProtocol(ref msg) if msg.contains("OpenAI")));
    }
}
