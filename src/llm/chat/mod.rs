pub mod gemini;
pub mod openai;

use async_trait::async_trait;
use futures::{ Future, Stream, StreamExt };
use serde_json::Value as JsonValue;
use std::error::Error as StdError;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use super::{ LlmConfig, LlmType };
use crate::models::chat::ChatMessage;
use self::gemini::GeminiChatClient;
use self::openai::OpenAIChatClient;

/// Event parsed out of a provider's streaming response.
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderEvent {
    Text(String),
    FunctionCall {
        name: String,
        args: JsonValue,
    },
}

pub type ProviderStream = Pin<
    Box<dyn Stream<Item = Result<ProviderEvent, Box<dyn StdError + Send + Sync>>> + Send>
>;

/// Image payload forwarded to the provider alongside the prompt.
#[derive(Debug, Clone)]
pub struct ImageAttachment {
    pub mime_type: String,
    pub data_base64: String,
}

/// Declared tool surface, already rendered as a JSON-schema fragment.
#[derive(Debug, Clone)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: JsonValue,
}

/// One streaming chat exchange. `turns` is ordered and ends with the turn
/// being answered; an image, if any, belongs to that final turn.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub system_prompt: String,
    pub turns: Vec<ChatMessage>,
    pub image: Option<ImageAttachment>,
    pub tools: Vec<ToolSpec>,
}

#[async_trait]
pub trait ChatClient: Send + Sync {
    async fn stream_chat(
        &self,
        request: &ChatRequest
    ) -> Result<ProviderStream, Box<dyn StdError + Send + Sync>>;

    fn model(&self) -> String;
}

pub fn new_client(
    config: &LlmConfig
) -> Result<Arc<dyn ChatClient>, Box<dyn StdError + Send + Sync>> {
    let client: Arc<dyn ChatClient> = match config.llm_type {
        LlmType::Gemini => Arc::new(GeminiChatClient::from_config(config)?),
        LlmType::OpenAI => Arc::new(OpenAIChatClient::from_config(config)?),
    };
    Ok(client)
}

/// Bridges a producer task into a boxed stream over an mpsc channel.
pub fn channel_stream<T, F, Fut>(producer: F) -> Pin<Box<dyn Stream<Item = T> + Send>>
where
    T: Send + 'static,
    F: FnOnce(mpsc::Sender<T>) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let (tx, rx) = mpsc::channel(32);
    tokio::spawn(async move {
        producer(tx).await;
    });
    Box::pin(ReceiverStream::new(rx))
}

/// POSTs `payload` and feeds each complete response line through
/// `line_parser`, forwarding the parsed events. Lines may span transport
/// chunks, so a carry buffer keeps the unfinished tail.
pub async fn http_stream_events(
    url: String,
    payload: JsonValue,
    headers: Vec<(String, String)>,
    line_parser: fn(&str) -> Vec<ProviderEvent>
) -> Result<ProviderStream, Box<dyn StdError + Send + Sync>> {
    let client = reqwest::Client::new();

    Ok(
        channel_stream(move |tx| async move {
            let mut request = client.post(&url).json(&payload);
            for (name, value) in headers {
                request = request.header(name, value);
            }

            let response = match request.send().await {
                Ok(response) => response,
                Err(e) => {
                    let _ = tx.send(Err(Box::new(e) as _)).await;
                    return;
                }
            };

            if let Err(e) = response.error_for_status_ref() {
                let _ = tx.send(Err(Box::new(e) as _)).await;
                return;
            }

            let mut bytes = response.bytes_stream();
            let mut pending = String::new();

            while let Some(chunk) = bytes.next().await {
                let buf = match chunk {
                    Ok(buf) => buf,
                    Err(e) => {
                        let _ = tx.send(Err(Box::new(e) as _)).await;
                        return;
                    }
                };

                pending.push_str(&String::from_utf8_lossy(&buf));

                while let Some(newline) = pending.find('\n') {
                    let line = pending[..newline].trim_end_matches('\r').to_string();
                    pending = pending[newline + 1..].to_string();

                    for event in line_parser(&line) {
                        if tx.send(Ok(event)).await.is_err() {
                            return;
                        }
                    }
                }
            }

            for event in line_parser(pending.trim_end()) {
                let _ = tx.send(Ok(event)).await;
            }
        })
    )
}

/// Strips the SSE framing prefix, returning the data payload of a line.
pub fn sse_data(line: &str) -> Option<&str> {
    let line = line.trim();
    line.strip_prefix("data:").map(|rest| rest.trim_start())
}
