//! Gemini SSE stream to [`StreamFragment`] adapter.
//!
//! `streamGenerateContent?alt=sse` sends one `data:` event per chunk, each a
//! `GenerateContentResponse` holding only the new text. The last chunk sets
//! `finishReason`; the server then closes the connection. A connection that
//! closes before any chunk declared a finish is reported as `Unavailable`.

use std::fmt;

use eventsource_stream::{Event, EventStreamError, Eventsource};
use futures_util::{Stream, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, warn};

use gemchat_core::llm::backend::FragmentStream;
use gemchat_types::llm::{BackendError, StreamFragment};

use super::client::{API_KEY_HEADER, classify_status, classify_transport};
use super::types::{GenerateContentRequest, GenerateContentResponse};

/// Open a streaming generation call. Nothing is sent until the first poll.
pub fn create_gemini_stream(
    client: &reqwest::Client,
    url: String,
    body: GenerateContentRequest,
    api_key: &SecretString,
) -> FragmentStream {
    let client = client.clone();
    let api_key = api_key.clone();

    Box::pin(async_stream::try_stream! {
        let response = client
            .post(&url)
            .header(API_KEY_HEADER, api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status();
        if status.is_success() {
            let mut fragments = map_sse_events(response.bytes_stream().eventsource());
            while let Some(fragment) = fragments.next().await {
                yield fragment?;
            }
        } else {
            let error_body = response.text().await.unwrap_or_default();
            warn!(status = %status, "Gemini stream API error response");
            Err::<(), _>(classify_status(status, &error_body))?;
        }
    })
}

/// Map parsed SSE events to reply fragments.
pub(crate) fn map_sse_events<S, E>(events: S) -> FragmentStream
where
    S: Stream<Item = Result<Event, EventStreamError<E>>> + Send + 'static,
    E: fmt::Display + Send + 'static,
{
    Box::pin(async_stream::try_stream! {
        let mut events = Box::pin(events);
        let mut finished = false;
        let mut chunks = 0usize;

        while let Some(event) = events.next().await {
            let event = event.map_err(|e| BackendError::Unavailable(format!("stream read failed: {e}")))?;
            if event.data.trim().is_empty() {
                continue;
            }

            let response: GenerateContentResponse = serde_json::from_str(&event.data)
                .map_err(|e| BackendError::Unavailable(format!("malformed stream chunk: {e}")))?;
            let chunk = response.into_chunk()?;
            chunks += 1;

            if !chunk.text.is_empty() {
                yield StreamFragment::delta(chunk.text);
            }
            finished |= chunk.finished;
        }

        if finished {
            debug!(chunks, "Gemini stream finished");
            yield StreamFragment::terminal();
        } else {
            Err::<(), _>(BackendError::Unavailable(
                "stream closed before the model finished".to_string(),
            ))?;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sse(body: &'static str) -> FragmentStream {
        let bytes = futures_util::stream::iter(vec![Ok::<_, std::io::Error>(body)]);
        map_sse_events(bytes.eventsource())
    }

    async fn collect(stream: FragmentStream) -> Vec<Result<StreamFragment, BackendError>> {
        stream.collect().await
    }

    #[tokio::test]
    async fn maps_chunks_to_fragments() {
        let items = collect(sse(concat!(
            "data: {\"candidates\":[{\"content\":{\"role\":\"model\",\"parts\":[{\"text\":\"He\"}]}}]}\n\n",
            "data: {\"candidates\":[{\"content\":{\"role\":\"model\",\"parts\":[{\"text\":\"llo\"}]},\"finishReason\":\"STOP\"}]}\n\n",
        )))
        .await;

        let items: Vec<StreamFragment> = items.into_iter().map(Result::unwrap).collect();
        assert_eq!(
            items,
            vec![
                StreamFragment::delta("He"),
                StreamFragment::delta("llo"),
                StreamFragment::terminal()
            ]
        );
    }

    #[tokio::test]
    async fn truncated_stream_is_unavailable() {
        let items = collect(sse(
            "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"He\"}]}}]}\n\n",
        ))
        .await;
        assert_eq!(items.len(), 2);
        assert!(matches!(items[1], Err(BackendError::Unavailable(_))));
    }

    #[tokio::test]
    async fn safety_stop_mid_stream_is_rejected() {
        let items = collect(sse(concat!(
            "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"He\"}]}}]}\n\n",
            "data: {\"candidates\":[{\"finishReason\":\"SAFETY\"}]}\n\n",
        )))
        .await;
        assert_eq!(items.len(), 2);
        assert!(matches!(items[1], Err(BackendError::Rejected { .. })));
    }

    #[tokio::test]
    async fn malformed_chunk_is_unavailable() {
        let items = collect(sse("data: {not json\n\n")).await;
        assert_eq!(items.len(), 1);
        assert!(matches!(items[0], Err(BackendError::Unavailable(_))));
    }

    #[tokio::test]
    async fn empty_text_chunks_are_skipped() {
        let items = collect(sse(concat!(
            "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"\"}]}}]}\n\n",
            "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"ok\"}]},\"finishReason\":\"STOP\"}]}\n\n",
            "data: {\"usageMetadata\":{\"totalTokenCount\":4}}\n\n",
        )))
        .await;
        let items: Vec<StreamFragment> = items.into_iter().map(Result::unwrap).collect();
        assert_eq!(items, vec![StreamFragment::delta("ok"), StreamFragment::terminal()]);
    }
}
