//! Server-sent events decoding for streamed RAG answers.
//!
//! The backend emits `data: {"type":"chunk","content":"..."}` lines, a final
//! `data: {"type":"done"}`, and `data: {"type":"error","message":"..."}` on
//! failure. A bare `data: [DONE]` is accepted as end of stream too.

use anyhow::Result;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use serde::Deserialize;
use std::collections::VecDeque;

use justicia_core::StreamEvent;

#[derive(Deserialize)]
struct SseMessage {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// Incremental line decoder. Bytes may be split anywhere, including inside a
/// multi-byte character, so lines are assembled from raw bytes.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed bytes and return every event completed by them.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Result<StreamEvent>> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            if let Some(event) = parse_line(line.trim_end_matches(['\r', '\n'])) {
                events.push(event);
            }
        }
        events
    }

    /// Flush a trailing line that was not newline-terminated.
    pub fn finish(&mut self) -> Vec<Result<StreamEvent>> {
        if self.buffer.is_empty() {
            return Vec::new();
        }
        let line = String::from_utf8_lossy(&self.buffer).into_owned();
        self.buffer.clear();
        parse_line(line.trim_end_matches('\r')).into_iter().collect()
    }
}

fn parse_line(line: &str) -> Option<Result<StreamEvent>> {
    let data = line.strip_prefix("data:")?.trim_start();
    if data.is_empty() {
        return None;
    }
    if data == "[DONE]" {
        return Some(Ok(StreamEvent::Done));
    }

    let message: SseMessage = match serde_json::from_str(data) {
        Ok(message) => message,
        Err(e) => {
            tracing::debug!(error = %e, "Ignoring unparseable stream line");
            return None;
        }
    };

    match message.kind.as_str() {
        "chunk" | "token" => match message.content {
            Some(content) if !content.is_empty() => Some(Ok(StreamEvent::Chunk(content))),
            _ => None,
        },
        "done" | "end" => Some(Ok(StreamEvent::Done)),
        "error" => Some(Err(anyhow::anyhow!(
            "Backend reported an error: {}",
            message
                .message
                .unwrap_or_else(|| "Unknown error".to_string())
        ))),
        other => {
            tracing::trace!(kind = other, "Ignoring stream event");
            None
        }
    }
}

/// Decode a byte stream into stream events. Ends after the first transport error.
pub fn decode_stream<S, E>(bytes: S) -> impl Stream<Item = Result<StreamEvent>> + Send + 'static
where
    S: Stream<Item = std::result::Result<Bytes, E>> + Send + Unpin + 'static,
    E: std::error::Error + Send + Sync + 'static,
{
    struct State<S> {
        inner: S,
        decoder: SseDecoder,
        pending: VecDeque<Result<StreamEvent>>,
        finished: bool,
    }

    let state = State {
        inner: bytes,
        decoder: SseDecoder::new(),
        pending: VecDeque::new(),
        finished: false,
    };

    futures::stream::unfold(state, |mut st| async move {
        loop {
            if let Some(item) = st.pending.pop_front() {
                return Some((item, st));
            }
            if st.finished {
                return None;
            }
            match st.inner.next().await {
                Some(Ok(chunk)) => {
                    let events = st.decoder.push(&chunk);
                    st.pending.extend(events);
                }
                Some(Err(e)) => {
                    st.finished = true;
                    st.pending.push_back(Err(
                        anyhow::Error::new(e).context("Failed to read answer stream")
                    ));
                }
                None => {
                    st.finished = true;
                    let events = st.decoder.finish();
                    st.pending.extend(events);
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok_events(results: Vec<Result<StreamEvent>>) -> Vec<StreamEvent> {
        results.into_iter().map(|r| r.unwrap()).collect()
    }

    #[test]
    fn decodes_chunks_and_done() {
        let mut decoder = SseDecoder::new();
        let events = decoder.push(
            b"data: {\"type\":\"chunk\",\"content\":\"Hola\"}\n\n\
              data: {\"type\":\"chunk\",\"content\":\" mundo\"}\n\n\
              data: {\"type\":\"done\"}\n\n",
        );
        assert_eq!(
            ok_events(events),
            vec![
                StreamEvent::Chunk("Hola".to_string()),
                StreamEvent::Chunk(" mundo".to_string()),
                StreamEvent::Done,
            ]
        );
    }

    #[test]
    fn lines_split_across_pushes_and_inside_utf8() {
        let mut decoder = SseDecoder::new();
        let line = "data: {\"type\":\"chunk\",\"content\":\"acción\"}\n".as_bytes();
        // Split in the middle of the two-byte 'ó'
        let split = line.iter().position(|b| *b == 0xC3).unwrap() + 1;
        assert!(decoder.push(&line[..split]).is_empty());
        let events = decoder.push(&line[split..]);
        assert_eq!(
            ok_events(events),
            vec![StreamEvent::Chunk("acción".to_string())]
        );
    }

    #[test]
    fn error_event_becomes_error() {
        let mut decoder = SseDecoder::new();
        let events = decoder.push(b"data: {\"type\":\"error\",\"message\":\"LLM caido\"}\n");
        assert_eq!(events.len(), 1);
        let err = events.into_iter().next().unwrap().unwrap_err();
        assert!(err.to_string().contains("LLM caido"));
    }

    #[test]
    fn ignores_comments_unknown_and_empty_chunks() {
        let mut decoder = SseDecoder::new();
        let events = decoder.push(
            b": keep-alive\r\n\
              event: message\r\n\
              data: {\"type\":\"start\"}\r\n\
              data: {\"type\":\"chunk\",\"content\":\"\"}\r\n\
              data: not json\r\n\
              data: [DONE]\r\n",
        );
        assert_eq!(ok_events(events), vec![StreamEvent::Done]);
    }

    #[test]
    fn finish_flushes_unterminated_line() {
        let mut decoder = SseDecoder::new();
        assert!(decoder
            .push(b"data: {\"type\":\"chunk\",\"content\":\"fin\"}")
            .is_empty());
        assert_eq!(
            ok_events(decoder.finish()),
            vec![StreamEvent::Chunk("fin".to_string())]
        );
        assert!(decoder.finish().is_empty());
    }

    #[tokio::test]
    async fn decode_stream_reports_read_errors_and_stops() {
        let parts: Vec<std::result::Result<Bytes, std::io::Error>> = vec![
            Ok(Bytes::from_static(
                b"data: {\"type\":\"chunk\",\"content\":\"a\"}\n",
            )),
            Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset")),
            Ok(Bytes::from_static(
                b"data: {\"type\":\"chunk\",\"content\":\"b\"}\n",
            )),
        ];
        let items: Vec<_> = decode_stream(futures::stream::iter(parts)).collect().await;
        assert_eq!(items.len(), 2);
        assert_eq!(
            items[0].as_ref().unwrap(),
            &StreamEvent::Chunk("a".to_string())
        );
        assert!(items[1].is_err());
    }
}
