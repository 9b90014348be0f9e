//! Turns an upstream chat-completion event stream into coach stream events.

use std::fmt::Display;
use std::time::Duration;

use futures::{Stream, StreamExt};
use serde::Deserialize;
use steward_core::coach::{Provider, STREAM_DONE};
use steward_core::sse::SseDecoder;

/// One event forwarded to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayEvent {
    /// Incremental reply text.
    Content(String),
    /// End of the reply. Always the last event, emitted exactly once.
    Done,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: Option<ChunkDelta>,
}

#[derive(Debug, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, PartialEq, Eq)]
enum Frame {
    Delta(String),
    Done,
    Ignored,
}

fn parse_frame(payload: &str) -> Frame {
    if payload.trim() == STREAM_DONE {
        return Frame::Done;
    }

    match serde_json::from_str::<ChatCompletionChunk>(payload) {
        Ok(chunk) => chunk
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.delta)
            .and_then(|delta| delta.content)
            .filter(|content| !content.is_empty())
            .map_or(Frame::Ignored, Frame::Delta),
        Err(err) => {
            // Providers occasionally interleave non-JSON noise; skip it.
            tracing::debug!(error = %err, "skipping malformed stream fragment");
            Frame::Ignored
        }
    }
}

/// Longest silence tolerated between upstream reads before the relay gives up.
pub const STREAM_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Relays text deltas from `upstream` until `[DONE]`, end of body, a read
/// error or `idle_timeout` without data, then emits a single [`RelayEvent::Done`].
///
/// The upstream body is dropped before the final event is yielded, and it is
/// also dropped as soon as the caller drops the returned stream (for example
/// when the HTTP client disconnects).
pub fn relay_stream<S, B, E>(
    provider: Provider,
    upstream: S,
    idle_timeout: Duration,
) -> impl Stream<Item = RelayEvent> + Send + 'static
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Display + Send + 'static,
{
    async_stream::stream! {
        let mut upstream = Box::pin(upstream);
        let mut decoder = SseDecoder::new();
        let mut fragments = 0usize;
        let mut saw_done = false;
        let mut failed = false;

        'read: loop {
            let chunk = match tokio::time::timeout(idle_timeout, upstream.next()).await {
                Ok(Some(Ok(chunk))) => chunk,
                Ok(None) => break 'read,
                Err(_) => {
                    tracing::warn!(
                        provider = %provider,
                        idle_secs = idle_timeout.as_secs_f64(),
                        "upstream stream went idle"
                    );
                    failed = true;
                    break 'read;
                }
                Ok(Some(Err(err))) => {
                    tracing::warn!(provider = %provider, error = %err, "upstream stream failed mid-response");
                    failed = true;
                    break 'read;
                }
            };

            for payload in decoder.feed(chunk.as_ref()) {
                match parse_frame(&payload) {
                    Frame::Delta(text) => {
                        fragments += 1;
                        yield RelayEvent::Content(text);
                    }
                    Frame::Done => {
                        saw_done = true;
                        break 'read;
                    }
                    Frame::Ignored => {}
                }
            }
        }

        if !saw_done && !failed {
            if let Some(payload) = decoder.finish() {
                match parse_frame(&payload) {
                    Frame::Delta(text) => {
                        fragments += 1;
                        yield RelayEvent::Content(text);
                    }
                    Frame::Done => saw_done = true,
                    Frame::Ignored => {}
                }
            }
        }

        drop(upstream);
        tracing::debug!(provider = %provider, fragments, completed = saw_done, "coach stream finished");
        yield RelayEvent::Done;
    }
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;

    fn chunks(parts: &[&'static str]) -> impl Stream<Item = Result<&'static [u8], io::Error>> + Send + 'static {
        let parts: Vec<Result<&'static [u8], io::Error>> =
            parts.iter().map(|part| Ok(part.as_bytes())).collect();
        futures::stream::iter(parts)
    }

    async fn collect(parts: &[&'static str]) -> Vec<RelayEvent> {
        relay_stream(Provider::Openai, chunks(parts), STREAM_IDLE_TIMEOUT)
            .collect()
            .await
    }

    #[test]
    fn parse_frame_extracts_delta_content() {
        assert_eq!(
            parse_frame(r#"{"choices":[{"delta":{"content":"Hi"}}]}"#),
            Frame::Delta("Hi".to_string())
        );
        assert_eq!(parse_frame("[DONE]"), Frame::Done);
        assert_eq!(parse_frame(r#"{"choices":[{"delta":{"role":"assistant"}}]}"#), Frame::Ignored);
        assert_eq!(parse_frame(r#"{"choices":[{"delta":{"content":""}}]}"#), Frame::Ignored);
        assert_eq!(parse_frame(r#"{"choices":[]}"#), Frame::Ignored);
        assert_eq!(parse_frame("{not json"), Frame::Ignored);
    }

    #[tokio::test]
    async fn relays_content_then_done() {
        let events = collect(&[
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hi\"}}]}\n\n",
            "data: [DONE]\n\n",
        ])
        .await;
        assert_eq!(
            events,
            vec![RelayEvent::Content("Hi".to_string()), RelayEvent::Done]
        );
    }

    #[tokio::test]
    async fn skips_malformed_fragments_silently() {
        let events = collect(&[
            "data: {\"choices\":[{\"delta\":{\"content\":\"Save \"}}]}\n\n",
            "data: {oops\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"early.\"}}]}\n\n",
            "data: [DONE]\n\n",
        ])
        .await;
        assert_eq!(
            events,
            vec![
                RelayEvent::Content("Save ".to_string()),
                RelayEvent::Content("early.".to_string()),
                RelayEvent::Done,
            ]
        );
    }

    #[tokio::test]
    async fn stops_reading_at_done() {
        let events = collect(&[
            "data: [DONE]\n\ndata: {\"choices\":[{\"delta\":{\"content\":\"late\"}}]}\n\n",
        ])
        .await;
        assert_eq!(events, vec![RelayEvent::Done]);
    }

    #[tokio::test]
    async fn handles_frames_split_across_reads() {
        let events = collect(&[
            "data: {\"choices\":[{\"del",
            "ta\":{\"content\":\"Give\"}}]}\ndata: {\"choices\":[{\"delta\":{\"content\":\" gladly\"}}]}\n",
            "data: [DO",
            "NE]\n",
        ])
        .await;
        assert_eq!(
            events,
            vec![
                RelayEvent::Content("Give".to_string()),
                RelayEvent::Content(" gladly".to_string()),
                RelayEvent::Done,
            ]
        );
    }

    #[tokio::test]
    async fn emits_done_when_upstream_ends_without_marker() {
        let events = collect(&["data: {\"choices\":[{\"delta\":{\"content\":\"cut\"}}]}"]).await;
        assert_eq!(
            events,
            vec![RelayEvent::Content("cut".to_string()), RelayEvent::Done]
        );
    }

    #[tokio::test]
    async fn emits_done_once_after_read_error() {
        let upstream = futures::stream::iter(vec![
            Ok(&b"data: {\"choices\":[{\"delta\":{\"content\":\"partial\"}}]}\n\n"[..]),
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset")),
            Ok(&b"data: {\"choices\":[{\"delta\":{\"content\":\"never\"}}]}\n\n"[..]),
        ]);
        let events: Vec<RelayEvent> = relay_stream(Provider::Perplexity, upstream, STREAM_IDLE_TIMEOUT)
                .collect()
                .await;
        assert_eq!(
            events,
            vec![RelayEvent::Content("partial".to_string()), RelayEvent::Done]
        );
    }

    struct DropFlag(Arc<AtomicBool>);

    impl Drop for DropFlag {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn dropping_the_relay_releases_upstream() {
        let released = Arc::new(AtomicBool::new(false));
        let flag = DropFlag(released.clone());
        let upstream = chunks(&["data: {\"choices\":[{\"delta\":{\"content\":\"Hi\"}}]}\n\n"])
            .chain(futures::stream::pending())
            .map(move |item| {
                let _held = &flag;
                item
            });

        let mut events = Box::pin(relay_stream(Provider::Openai, upstream, STREAM_IDLE_TIMEOUT));
        assert_eq!(events.next().await, Some(RelayEvent::Content("Hi".to_string())));
        assert!(!released.load(Ordering::SeqCst));

        drop(events);
        assert!(released.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn upstream_is_released_before_final_event() {
        let released = Arc::new(AtomicBool::new(false));
        let flag = DropFlag(released.clone());
        let upstream = chunks(&["data: [DONE]\n\n"])
            .chain(futures::stream::pending())
            .map(move |item| {
                let _held = &flag;
                item
            });

        let mut events = Box::pin(relay_stream(Provider::Openai, upstream, STREAM_IDLE_TIMEOUT));
        assert_eq!(events.next().await, Some(RelayEvent::Done));
        assert!(released.load(Ordering::SeqCst));
        assert_eq!(events.next().await, None);
    }

    #[tokio::test]
    async fn stalled_upstream_ends_with_done() {
        let upstream = chunks(&["data: {\"choices\":[{\"delta\":{\"content\":\"Budget\"}}]}\n\n"])
            .chain(futures::stream::pending());

        let events: Vec<RelayEvent> =
            relay_stream(Provider::Openai, upstream, Duration::from_millis(20))
                .collect()
                .await;

        assert_eq!(
            events,
            vec![RelayEvent::Content("Budget".to_string()), RelayEvent::Done]
        );
    }
}
