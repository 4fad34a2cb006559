use async_trait::async_trait;
use futures::StreamExt;
use log::{ info, warn };
use serde::{ Deserialize, Serialize };
use serde_json::Value as JsonValue;
use std::error::Error as StdError;

use super::{ channel_stream, sse_data, ChatClient, ChatRequest, ProviderEvent, ProviderStream };
use crate::llm::LlmConfig;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-4o-mini";

#[derive(Serialize)]
struct OpenAIRequest {
    model: String,
    stream: bool,
    messages: Vec<OpenAIMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<OpenAITool>,
}

#[derive(Serialize)]
struct OpenAIMessage {
    role: String,
    content: JsonValue,
}

#[derive(Serialize)]
struct OpenAITool {
    #[serde(rename = "type")]
    kind: String,
    function: OpenAIFunction,
}

#[derive(Serialize)]
struct OpenAIFunction {
    name: String,
    description: String,
    parameters: JsonValue,
}

#[derive(Deserialize)]
struct OpenAIChunk {
    #[serde(default)]
    choices: Vec<OpenAIChoice>,
}

#[derive(Deserialize)]
struct OpenAIChoice {
    delta: Option<OpenAIDelta>,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct OpenAIDelta {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<OpenAIToolCallDelta>,
}

#[derive(Deserialize)]
struct OpenAIToolCallDelta {
    #[serde(default)]
    index: usize,
    function: Option<OpenAIFunctionDelta>,
}

#[derive(Deserialize)]
struct OpenAIFunctionDelta {
    name: Option<String>,
    arguments: Option<String>,
}

/// Tool-call fragments arrive spread over many deltas; collected here and
/// emitted once the provider signals the end of the call list.
#[derive(Default)]
struct ToolCallAccumulator {
    calls: Vec<(String, String)>,
}

impl ToolCallAccumulator {
    fn absorb(&mut self, delta: OpenAIToolCallDelta) {
        while self.calls.len() <= delta.index {
            self.calls.push((String::new(), String::new()));
        }
        if let Some(function) = delta.function {
            let slot = &mut self.calls[delta.index];
            if let Some(name) = function.name {
                slot.0.push_str(&name);
            }
            if let Some(arguments) = function.arguments {
                slot.1.push_str(&arguments);
            }
        }
    }

    fn into_events(self) -> Vec<ProviderEvent> {
        self.calls
            .into_iter()
            .filter(|(name, _)| !name.is_empty())
            .map(|(name, arguments)| {
                let args = serde_json
                    ::from_str(&arguments)
                    .unwrap_or(JsonValue::Object(serde_json::Map::new()));
                ProviderEvent::FunctionCall { name, args }
            })
            .collect()
    }
}

pub struct OpenAIChatClient {
    api_key: String,
    model: String,
    base_url: String,
}

impl OpenAIChatClient {
    pub fn new(api_key: String, model: Option<String>, base_url: Option<String>) -> Self {
        Self {
            api_key,
            model: model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
        }
    }

    pub fn from_config(config: &LlmConfig) -> Result<Self, Box<dyn StdError + Send + Sync>> {
        let api_key = config.api_key
            .clone()
            .filter(|key| !key.is_empty())
            .ok_or_else(|| "OpenAI API key is required (CHAT_API_KEY)".to_string())?;
        Ok(Self::new(api_key, config.model.clone(), config.base_url.clone()))
    }

    fn build_payload(&self, request: &ChatRequest) -> OpenAIRequest {
        let mut messages = vec![OpenAIMessage {
            role: "system".to_string(),
            content: JsonValue::String(request.system_prompt.clone()),
        }];

        let last = request.turns.len().saturating_sub(1);
        for (index, turn) in request.turns.iter().enumerate() {
            // Tool results are replayed as user context; the registry result
            // text already names the tool.
            let role = match turn.role.as_str() {
                "assistant" => "assistant",
                _ => "user",
            };

            let content = if index == last && request.image.is_some() {
                let image = request.image.as_ref().map(|image| {
                    serde_json::json!({
                        "type": "image_url",
                        "image_url": {
                            "url": format!(
                                "data:{};base64,{}",
                                image.mime_type,
                                image.data_base64
                            )
                        }
                    })
                });
                let mut parts = vec![
                    serde_json::json!({"type": "text", "text": turn.content})
                ];
                parts.extend(image);
                JsonValue::Array(parts)
            } else {
                JsonValue::String(turn.content.clone())
            };

            messages.push(OpenAIMessage {
                role: role.to_string(),
                content,
            });
        }

        let tools = request.tools
            .iter()
            .map(|spec| OpenAITool {
                kind: "function".to_string(),
                function: OpenAIFunction {
                    name: spec.name.clone(),
                    description: spec.description.clone(),
                    parameters: spec.parameters.clone(),
                },
            })
            .collect();

        OpenAIRequest {
            model: self.model.clone(),
            stream: true,
            messages,
            tools,
        }
    }
}

#[async_trait]
impl ChatClient for OpenAIChatClient {
    async fn stream_chat(
        &self,
        request: &ChatRequest
    ) -> Result<ProviderStream, Box<dyn StdError + Send + Sync>> {
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        info!("OpenAIChatClient::stream_chat() using model: {}", self.model);

        let payload = self.build_payload(request);
        let api_key = self.api_key.clone();
        let client = reqwest::Client::new();

        Ok(
            channel_stream(move |tx| async move {
                let response = match
                    client.post(&url).bearer_auth(&api_key).json(&payload).send().await
                {
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
                let mut accumulator = ToolCallAccumulator::default();

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

                        let Some(data) = sse_data(&line) else {
                            continue;
                        };
                        if data.is_empty() || data == "[DONE]" {
                            continue;
                        }

                        let chunk = match serde_json::from_str::<OpenAIChunk>(data) {
                            Ok(chunk) => chunk,
                            Err(e) => {
                                warn!("Skipping malformed stream line: {}", e);
                                continue;
                            }
                        };

                        for choice in chunk.choices {
                            if let Some(delta) = choice.delta {
                                if let Some(content) = delta.content {
                                    if
                                        !content.is_empty() &&
                                        tx.send(Ok(ProviderEvent::Text(content))).await.is_err()
                                    {
                                        return;
                                    }
                                }
                                for tool_call in delta.tool_calls {
                                    accumulator.absorb(tool_call);
                                }
                            }

                            if choice.finish_reason.as_deref() == Some("tool_calls") {
                                let events = std::mem::take(&mut accumulator).into_events();
                                for event in events {
                                    if tx.send(Ok(event)).await.is_err() {
                                        return;
                                    }
                                }
                            }
                        }
                    }
                }
            })
        )
    }

    fn model(&self) -> String {
        self.model.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulator_reassembles_fragmented_tool_calls() {
        let mut accumulator = ToolCallAccumulator::default();
        accumulator.absorb(OpenAIToolCallDelta {
            index: 0,
            function: Some(OpenAIFunctionDelta {
                name: Some("product_search".to_string()),
                arguments: Some("{\"que".to_string()),
            }),
        });
        accumulator.absorb(OpenAIToolCallDelta {
            index: 0,
            function: Some(OpenAIFunctionDelta {
                name: None,
                arguments: Some("ry\":\"laptop\"}".to_string()),
            }),
        });

        let events = accumulator.into_events();
        assert_eq!(
            events,
            vec![ProviderEvent::FunctionCall {
                name: "product_search".to_string(),
                args: serde_json::json!({"query": "laptop"}),
            }]
        );
    }

    #[test]
    fn unparseable_arguments_fall_back_to_empty_object() {
        let mut accumulator = ToolCallAccumulator::default();
        accumulator.absorb(OpenAIToolCallDelta {
            index: 0,
            function: Some(OpenAIFunctionDelta {
                name: Some("lookup".to_string()),
                arguments: Some("not json".to_string()),
            }),
        });

        let events = accumulator.into_events();
        assert_eq!(
            events,
            vec![ProviderEvent::FunctionCall {
                name: "lookup".to_string(),
                args: serde_json::json!({}),
            }]
        );
    }
}
