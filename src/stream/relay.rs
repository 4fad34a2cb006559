//! Drives one response stream: pulls chunks from the agent, re-chunks them
//! into paced word events, and persists the accumulated reply when the
//! stream finishes cleanly.
//!
//! The relay is a single-consumer loop per request. Terminal outcomes:
//! the chunk stream ends (COMPLETED, reply persisted), an error surfaces
//! mid-stream (FAILED, error event sent, nothing persisted), or the client
//! goes away (the event channel closes, nothing persisted).

use log::{ error, info, warn };
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;
use futures::StreamExt;

use crate::models::stream::{ ChunkStream, StreamEvent };
use crate::store::ConversationStore;
use crate::stream::{ assembler, format };

#[derive(Clone, Debug)]
pub struct RelayOptions {
    /// Inter-word pacing delay. Cosmetic typing-speed throttle; zero
    /// disables it.
    pub word_delay: Duration,
    /// Upper bound on waiting for the next provider chunk.
    pub chunk_timeout: Duration,
}

impl Default for RelayOptions {
    fn default() -> Self {
        Self {
            word_delay: Duration::from_millis(50),
            chunk_timeout: Duration::from_secs(120),
        }
    }
}

/// Consumes `chunks` and pushes [`StreamEvent`]s into `events` until a
/// terminal state is reached. The sender closing (client disconnect) stops
/// the loop immediately; the partial reply is then not persisted.
pub async fn run(
    store: ConversationStore,
    conversation_id: i64,
    mut chunks: ChunkStream,
    events: mpsc::Sender<StreamEvent>,
    options: RelayOptions
) {
    let mut full_response = String::new();
    let mut buffer = String::new();

    loop {
        let pulled = match timeout(options.chunk_timeout, chunks.next()).await {
            Ok(item) => item,
            Err(_) => {
                error!(
                    "Timed out after {:?} waiting for model output (conversation {})",
                    options.chunk_timeout,
                    conversation_id
                );
                fail(&events, "Timed out waiting for model output").await;
                return;
            }
        };

        let chunk = match pulled {
            Some(Ok(chunk)) => chunk,
            Some(Err(e)) => {
                error!("Streaming error (conversation {}): {}", conversation_id, e);
                fail(&events, &e.to_string()).await;
                return;
            }
            None => break,
        };

        let text = format::render_chunk(&chunk);
        if text.is_empty() {
            continue;
        }

        full_response.push_str(&text);
        let (words, rest) = assembler::feed(&buffer, &text);
        buffer = rest;

        for word in words {
            if events.send(StreamEvent::word(word)).await.is_err() {
                info!("Client disconnected mid-stream (conversation {})", conversation_id);
                return;
            }
            if !options.word_delay.is_zero() {
                tokio::time::sleep(options.word_delay).await;
            }
        }
    }

    if let Some(tail) = assembler::flush(&buffer) {
        if events.send(StreamEvent::word(tail)).await.is_err() {
            info!("Client disconnected before final flush (conversation {})", conversation_id);
            return;
        }
    }

    if events.send(StreamEvent::done()).await.is_err() {
        info!("Client disconnected before completion (conversation {})", conversation_id);
        return;
    }

    // The stream already closed successfully; a persistence failure here is
    // logged but cannot reach the client anymore.
    if let Err(e) = store.append_assistant_message(conversation_id, &full_response).await {
        warn!(
            "Failed to persist assistant message for conversation {}: {}",
            conversation_id,
            e
        );
    }
}

async fn fail(events: &mpsc::Sender<StreamEvent>, message: &str) {
    let _ = events.send(StreamEvent::error(message)).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::stream::ResponseChunk;
    use crate::store::memory_store;
    use std::error::Error as StdError;

    fn instant_options() -> RelayOptions {
        RelayOptions {
            word_delay: Duration::ZERO,
            chunk_timeout: Duration::from_secs(5),
        }
    }

    fn chunk_stream(
        items: Vec<Result<ResponseChunk, Box<dyn StdError + Send + Sync>>>
    ) -> ChunkStream {
        Box::pin(tokio_stream::iter(items))
    }

    fn text(fragment: &str) -> Result<ResponseChunk, Box<dyn StdError + Send + Sync>> {
        Ok(ResponseChunk::Text(fragment.to_string()))
    }

    async fn collect_events(mut rx: mpsc::Receiver<StreamEvent>) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn streams_words_and_persists_full_response() {
        let store = memory_store().await;
        let conversation = store.create_or_load("hi", None).await.unwrap();
        let (tx, rx) = mpsc::channel(32);

        let chunks = chunk_stream(vec![text("Hel"), text("lo wor"), text("ld!")]);
        run(store.clone(), conversation.id, chunks, tx, instant_options()).await;

        let events = collect_events(rx).await;
        assert_eq!(
            events,
            vec![
                StreamEvent::word("Hello "),
                StreamEvent::word("world!"),
                StreamEvent::done()
            ]
        );

        let messages = store.list_messages(conversation.id).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].role, "assistant");
        assert_eq!(messages[1].content, "Hello world!");
    }

    #[tokio::test]
    async fn empty_response_is_not_persisted() {
        let store = memory_store().await;
        let conversation = store.create_or_load("hi", None).await.unwrap();
        let (tx, rx) = mpsc::channel(32);

        let chunks = chunk_stream(vec![text("  "), text("\n")]);
        run(store.clone(), conversation.id, chunks, tx, instant_options()).await;

        let events = collect_events(rx).await;
        assert_eq!(events, vec![StreamEvent::done()]);

        let messages = store.list_messages(conversation.id).await.unwrap();
        assert_eq!(messages.len(), 1, "only the user message should exist");
    }

    #[tokio::test]
    async fn provider_error_sends_error_event_and_persists_nothing() {
        let store = memory_store().await;
        let conversation = store.create_or_load("hi", None).await.unwrap();
        let (tx, rx) = mpsc::channel(32);

        let chunks = chunk_stream(vec![
            text("partial answ"),
            Err("provider connection reset".into())
        ]);
        run(store.clone(), conversation.id, chunks, tx, instant_options()).await;

        let events = collect_events(rx).await;
        assert_eq!(
            events.last(),
            Some(&StreamEvent::error("provider connection reset"))
        );

        let messages = store.list_messages(conversation.id).await.unwrap();
        assert_eq!(messages.len(), 1);
    }

    #[tokio::test]
    async fn tool_calls_are_rendered_inline() {
        let store = memory_store().await;
        let conversation = store.create_or_load("hi", None).await.unwrap();
        let (tx, rx) = mpsc::channel(32);

        let chunks = chunk_stream(vec![
            Ok(ResponseChunk::ToolCall(vec!["product_search".to_string()])),
            text("Found it.")
        ]);
        run(store.clone(), conversation.id, chunks, tx, instant_options()).await;

        let events = collect_events(rx).await;
        let texts: Vec<String> = events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::Text { text, done: false } => Some(text.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(texts, vec!["- ", "Calling ", "tool: ", "product_search ", "Found ", "it."]);

        let messages = store.list_messages(conversation.id).await.unwrap();
        assert_eq!(
            messages[1].content,
            "\n- Calling tool: product_search\nFound it."
        );
    }

    #[tokio::test]
    async fn metadata_chunks_are_suppressed() {
        let store = memory_store().await;
        let conversation = store.create_or_load("hi", None).await.unwrap();
        let (tx, rx) = mpsc::channel(32);

        let chunks = chunk_stream(vec![text("[provider metadata]"), text("real text")]);
        run(store.clone(), conversation.id, chunks, tx, instant_options()).await;

        let events = collect_events(rx).await;
        assert_eq!(
            events,
            vec![
                StreamEvent::word("real "),
                StreamEvent::word("text"),
                StreamEvent::done()
            ]
        );

        let messages = store.list_messages(conversation.id).await.unwrap();
        assert_eq!(messages[1].content, "real text");
    }

    #[tokio::test]
    async fn client_disconnect_stops_pulling_and_skips_persistence() {
        let store = memory_store().await;
        let conversation = store.create_or_load("hi", None).await.unwrap();
        let (tx, rx) = mpsc::channel(32);
        drop(rx);

        let chunks = chunk_stream(vec![text("Hello there "), text("friend")]);
        run(store.clone(), conversation.id, chunks, tx, instant_options()).await;

        let messages = store.list_messages(conversation.id).await.unwrap();
        assert_eq!(messages.len(), 1, "partial reply must not be persisted");
    }

    #[tokio::test]
    async fn stalled_stream_times_out_with_error_event() {
        let store = memory_store().await;
        let conversation = store.create_or_load("hi", None).await.unwrap();
        let (tx, rx) = mpsc::channel(32);

        let chunks: ChunkStream = Box::pin(futures::stream::pending());
        let options = RelayOptions {
            word_delay: Duration::ZERO,
            chunk_timeout: Duration::from_millis(20),
        };
        run(store.clone(), conversation.id, chunks, tx, options).await;

        let events = collect_events(rx).await;
        assert_eq!(
            events,
            vec![StreamEvent::error("Timed out waiting for model output")]
        );

        let messages = store.list_messages(conversation.id).await.unwrap();
        assert_eq!(messages.len(), 1);
    }
}
