//! The chat agent: resolves conversation history, drives the provider's
//! streaming response, and multiplexes tool rounds into one chunk stream.

use futures::StreamExt;
use log::{ info, warn };
use std::error::Error;
use std::sync::Arc;

use crate::llm::chat::{ channel_stream, ChatClient, ChatRequest, ImageAttachment, ProviderEvent };
use crate::models::chat::ChatMessage;
use crate::models::stream::{ ChunkStream, ResponseChunk };
use crate::store::ConversationStore;
use crate::tools::ToolRegistry;

pub struct AgentConfig {
    pub chat_client: Arc<dyn ChatClient>,
    pub system_prompt: String,
    pub tools: ToolRegistry,
    pub store: ConversationStore,
    pub history_char_budget: usize,
    pub max_tool_rounds: usize,
}

#[derive(Clone)]
pub struct ChatAgent {
    config: Arc<AgentConfig>,
}

impl ChatAgent {
    pub fn new(config: AgentConfig) -> Self {
        Self { config: Arc::new(config) }
    }

    /// Opens a lazy chunk stream answering `prompt` within the given
    /// conversation. The user turn is expected to be persisted already;
    /// provider errors surface through the stream, not here.
    pub async fn stream_reply(
        &self,
        conversation_id: i64,
        prompt: &str,
        image: Option<ImageAttachment>
    ) -> Result<ChunkStream, Box<dyn Error + Send + Sync>> {
        let mut turns = self.config.store
            .recent_messages(conversation_id, self.config.history_char_budget).await?;

        // The turn being answered was persisted just before this call;
        // drop it so it is not replayed as prior history.
        if turns.last().is_some_and(|m| m.role == "user" && m.content == prompt) {
            turns.pop();
        }
        turns.push(ChatMessage::new("user", prompt));

        info!(
            "Starting agent stream: conversation={} history_turns={} model={}",
            conversation_id,
            turns.len() - 1,
            self.config.chat_client.model()
        );

        let config = Arc::clone(&self.config);
        Ok(
            channel_stream(move |tx| async move {
                drive_rounds(config, turns, image, tx).await;
            })
        )
    }
}

/// Streams provider output, executing requested tools between rounds. Each
/// round replays the growing turn list; the loop ends when a round
/// finishes without tool requests or the round budget runs out.
async fn drive_rounds(
    config: Arc<AgentConfig>,
    mut turns: Vec<ChatMessage>,
    mut image: Option<ImageAttachment>,
    tx: tokio::sync::mpsc::Sender<Result<ResponseChunk, Box<dyn Error + Send + Sync>>>
) {
    let tool_specs = config.tools.specs();

    for round in 0..=config.max_tool_rounds {
        let request = ChatRequest {
            system_prompt: config.system_prompt.clone(),
            turns: turns.clone(),
            image: image.take(),
            tools: tool_specs.clone(),
        };

        let mut stream = match config.chat_client.stream_chat(&request).await {
            Ok(stream) => stream,
            Err(e) => {
                let _ = tx.send(Err(e)).await;
                return;
            }
        };

        let mut round_text = String::new();
        let mut calls: Vec<(String, serde_json::Value)> = Vec::new();

        while let Some(event) = stream.next().await {
            match event {
                Ok(ProviderEvent::Text(text)) => {
                    round_text.push_str(&text);
                    if tx.send(Ok(ResponseChunk::Text(text))).await.is_err() {
                        return;
                    }
                }
                Ok(ProviderEvent::FunctionCall { name, args }) => {
                    calls.push((name, args));
                }
                Err(e) => {
                    let _ = tx.send(Err(e)).await;
                    return;
                }
            }
        }

        if calls.is_empty() {
            return;
        }
        if round == config.max_tool_rounds {
            warn!("Tool round budget exhausted; dropping {} pending call(s)", calls.len());
            return;
        }

        let names: Vec<String> = calls
            .iter()
            .map(|(name, _)| name.clone())
            .collect();
        if tx.send(Ok(ResponseChunk::ToolCall(names))).await.is_err() {
            return;
        }

        if !round_text.trim().is_empty() {
            turns.push(ChatMessage::new("assistant", round_text));
        }

        for (name, args) in calls {
            let outcome = match config.tools.invoke(&name, &args).await {
                Ok(result) => result,
                Err(e) => {
                    warn!("Tool invocation failed: {}", e);
                    e.to_string()
                }
            };
            turns.push(ChatMessage::new("tool", format!("Result of {}: {}", name, outcome)));
        }
    }
}
