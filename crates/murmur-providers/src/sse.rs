//! Server-Sent Events line parser.
//!
//! Converts a byte stream (usually a `reqwest::Response` body) into a
//! `Stream<Item = SseEvent>`.

use std::pin::Pin;

use bytes::BytesMut;
use futures::Stream;
use tokio_stream::StreamExt;

/// A parsed SSE event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
}

type ByteStream = Pin<Box<dyn Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send>>;

/// Parse a reqwest response body as an SSE stream.
pub fn parse_sse_stream(
    response: reqwest::Response,
) -> impl Stream<Item = anyhow::Result<SseEvent>> + Send {
    let byte_stream: ByteStream = Box::pin(response.bytes_stream().fuse());
    parse_sse_bytes(byte_stream)
}

/// Parse any chunked byte stream as SSE. Events may straddle chunk boundaries.
pub fn parse_sse_bytes<S, E>(byte_stream: S) -> impl Stream<Item = anyhow::Result<SseEvent>> + Send
where
    S: Stream<Item = Result<bytes::Bytes, E>> + Send + Unpin + 'static,
    E: std::fmt::Display + Send + 'static,
{
    futures::stream::unfold(
        SseState {
            byte_stream,
            buffer: BytesMut::new(),
            current_event: None,
            current_data: Vec::new(),
        },
        |mut state| async move {
            loop {
                // Only whole lines are decoded, so a character split across
                // chunks is never mangled.
                if let Some(newline_pos) = state.buffer.iter().position(|b| *b == b'\n') {
                    let raw = state.buffer.split_to(newline_pos + 1);
                    let line = String::from_utf8_lossy(&raw[..newline_pos]);
                    let line = line.trim_end_matches('\r');

                    if line.is_empty() {
                        // Blank line dispatches the event
                        if let Some(event) = state.take_event() {
                            return Some((Ok(event), state));
                        }
                        continue;
                    }

                    if line.starts_with(':') {
                        continue;
                    }

                    if let Some(value) = line.strip_prefix("event:") {
                        state.current_event = Some(value.trim_start().to_string());
                    } else if let Some(value) = line.strip_prefix("data:") {
                        state.current_data.push(value.trim_start().to_string());
                    }
                    continue;
                }

                match state.byte_stream.next().await {
                    Some(Ok(chunk)) => {
                        state.buffer.extend_from_slice(&chunk);
                    }
                    Some(Err(e)) => {
                        return Some((Err(anyhow::anyhow!("SSE stream error: {e}")), state));
                    }
                    None if !state.buffer.is_empty() => {
                        // Last line had no terminator
                        state.buffer.extend_from_slice(b"\n");
                    }
                    None => {
                        // Stream ended without a trailing blank line.
                        return state.take_event().map(|event| (Ok(event), state));
                    }
                }
            }
        },
    )
}

struct SseState<S> {
    byte_stream: S,
    buffer: BytesMut,
    current_event: Option<String>,
    current_data: Vec<String>,
}

impl<S> SseState<S> {
    fn take_event(&mut self) -> Option<SseEvent> {
        if self.current_data.is_empty() {
            return None;
        }
        let event = SseEvent {
            event: self.current_event.take(),
            data: self.current_data.join("\n"),
        };
        self.current_data.clear();
        Some(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunks(parts: &[&'static str]) -> impl Stream<Item = Result<bytes::Bytes, String>> + Unpin {
        futures::stream::iter(
            parts
                .iter()
                .map(|p| Ok(bytes::Bytes::from_static(p.as_bytes())))
                .collect::<Vec<_>>(),
        )
    }

    #[tokio::test]
    async fn test_events_split_across_chunks() {
        let stream = parse_sse_bytes(chunks(&[
            "data: {\"a\"",
            ":1}\n\n: keep-alive\n\nevent: done\r\n",
            "data: [DONE]\n\n",
        ]));
        let events: Vec<SseEvent> = stream.map(|e| e.unwrap()).collect().await;
        assert_eq!(
            events,
            vec![
                SseEvent {
                    event: None,
                    data: "{\"a\":1}".into()
                },
                SseEvent {
                    event: Some("done".into()),
                    data: "[DONE]".into()
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_multibyte_char_split_across_chunks() {
        let raw = "data: {\"c\":\"čau\"}\n\n".as_bytes();
        // Cut inside the two-byte encoding of 'č'
        let cut = raw.iter().position(|b| *b == 0xc4).unwrap() + 1;
        let parts = vec![
            Ok::<_, String>(bytes::Bytes::copy_from_slice(&raw[..cut])),
            Ok(bytes::Bytes::copy_from_slice(&raw[cut..])),
        ];
        let events: Vec<SseEvent> = parse_sse_bytes(futures::stream::iter(parts))
            .map(|e| e.unwrap())
            .collect()
            .await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "{\"c\":\"čau\"}");
    }

    #[tokio::test]
    async fn test_trailing_event_without_blank_line() {
        let stream = parse_sse_bytes(chunks(&["data: one\ndata: two"]));
        let events: Vec<SseEvent> = stream.map(|e| e.unwrap()).collect().await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "one\ntwo");
    }

    #[tokio::test]
    async fn test_transport_error_surfaces() {
        let failing = futures::stream::iter(vec![
            Ok(bytes::Bytes::from_static(b"data: x\n\n")),
            Err("reset by peer".to_string()),
        ]);
        let results: Vec<anyhow::Result<SseEvent>> = parse_sse_bytes(failing).collect().await;
        assert!(results[0].is_ok());
        let err = results[1].as_ref().unwrap_err().to_string();
        assert!(err.contains("reset by peer"));
    }
}
