use async_trait::async_trait;
use log::info;
use serde::{ Deserialize, Serialize };
use serde_json::Value as JsonValue;
use std::error::Error as StdError;

use super::{
    http_stream_events,
    sse_data,
    ChatClient,
    ChatRequest,
    ProviderEvent,
    ProviderStream,
    ToolSpec,
};
use crate::llm::LlmConfig;

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_MODEL: &str = "gemini-2.5-flash";

#[derive(Serialize)]
struct GeminiRequest {
    system_instruction: GeminiContent,
    contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<GeminiTools>,
}

#[derive(Serialize)]
struct GeminiContent {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    parts: Vec<GeminiPart>,
}

#[derive(Serialize)]
#[serde(rename_all = "snake_case")]
enum GeminiPart {
    Text(String),
    InlineData {
        mime_type: String,
        data: String,
    },
}

#[derive(Serialize)]
struct GeminiTools {
    function_declarations: Vec<GeminiFunctionDeclaration>,
}

#[derive(Serialize)]
struct GeminiFunctionDeclaration {
    name: String,
    description: String,
    parameters: JsonValue,
}

#[derive(Deserialize)]
struct GeminiChunk {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiChunkContent>,
}

#[derive(Deserialize)]
struct GeminiChunkContent {
    #[serde(default)]
    parts: Vec<GeminiChunkPart>,
}

#[derive(Deserialize)]
struct GeminiChunkPart {
    text: Option<String>,
    #[serde(rename = "functionCall")]
    function_call: Option<GeminiFunctionCall>,
}

#[derive(Deserialize)]
struct GeminiFunctionCall {
    name: String,
    #[serde(default)]
    args: JsonValue,
}

fn parse_gemini_line(line: &str) -> Vec<ProviderEvent> {
    let Some(data) = sse_data(line) else {
        return Vec::new();
    };
    if data.is_empty() || data == "[DONE]" {
        return Vec::new();
    }

    let Ok(chunk) = serde_json::from_str::<GeminiChunk>(data) else {
        return Vec::new();
    };

    let mut events = Vec::new();
    for candidate in chunk.candidates {
        let Some(content) = candidate.content else {
            continue;
        };
        for part in content.parts {
            if let Some(text) = part.text {
                if !text.is_empty() {
                    events.push(ProviderEvent::Text(text));
                }
            }
            if let Some(call) = part.function_call {
                events.push(ProviderEvent::FunctionCall {
                    name: call.name,
                    args: call.args,
                });
            }
        }
    }
    events
}

pub struct GeminiChatClient {
    api_key: String,
    model: String,
    base_url: String,
}

impl GeminiChatClient {
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
            .ok_or_else(|| "Gemini API key is required (CHAT_API_KEY)".to_string())?;
        Ok(Self::new(api_key, config.model.clone(), config.base_url.clone()))
    }

    fn build_payload(&self, request: &ChatRequest) -> GeminiRequest {
        let mut contents = Vec::with_capacity(request.turns.len());
        let last = request.turns.len().saturating_sub(1);

        for (index, turn) in request.turns.iter().enumerate() {
            // Gemini only knows user/model roles; tool results travel back
            // as user-visible context.
            let role = match turn.role.as_str() {
                "assistant" => "model",
                _ => "user",
            };

            let mut parts = vec![GeminiPart::Text(turn.content.clone())];
            if index == last {
                if let Some(image) = &request.image {
                    parts.push(GeminiPart::InlineData {
                        mime_type: image.mime_type.clone(),
                        data: image.data_base64.clone(),
                    });
                }
            }

            contents.push(GeminiContent {
                role: Some(role.to_string()),
                parts,
            });
        }

        let tools = if request.tools.is_empty() {
            Vec::new()
        } else {
            vec![GeminiTools {
                function_declarations: request.tools
                    .iter()
                    .map(|spec: &ToolSpec| GeminiFunctionDeclaration {
                        name: spec.name.clone(),
                        description: spec.description.clone(),
                        parameters: spec.parameters.clone(),
                    })
                    .collect(),
            }]
        };

        GeminiRequest {
            system_instruction: GeminiContent {
                role: None,
                parts: vec![GeminiPart::Text(request.system_prompt.clone())],
            },
            contents,
            tools,
        }
    }
}

#[async_trait]
impl ChatClient for GeminiChatClient {
    async fn stream_chat(
        &self,
        request: &ChatRequest
    ) -> Result<ProviderStream, Box<dyn StdError + Send + Sync>> {
        let url = format!(
            "{}/models/{}:streamGenerateContent?alt=sse&key={}",
            self.base_url.trim_end_matches('/'),
            self.model,
            self.api_key
        );
        info!("GeminiChatClient::stream_chat() using model: {}", self.model);

        let payload = serde_json::to_value(self.build_payload(request))?;
        let headers = vec![("Content-Type".to_string(), "application/json".to_string())];

        http_stream_events(url, payload, headers, parse_gemini_line).await
    }

    fn model(&self) -> String {
        self.model.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_text_parts() {
        let line = r#"data: {"candidates":[{"content":{"parts":[{"text":"Hello"}]}}]}"#;
        assert_eq!(parse_gemini_line(line), vec![ProviderEvent::Text("Hello".to_string())]);
    }

    #[test]
    fn parses_function_calls() {
        let line = concat!(
            r#"data: {"candidates":[{"content":{"parts":"#,
            r#"[{"functionCall":{"name":"product_search","args":{"query":"laptop"}}}]}}]}"#
        );
        assert_eq!(
            parse_gemini_line(line),
            vec![ProviderEvent::FunctionCall {
                name: "product_search".to_string(),
                args: serde_json::json!({"query": "laptop"}),
            }]
        );
    }

    #[test]
    fn ignores_non_data_lines() {
        assert!(parse_gemini_line("").is_empty());
        assert!(parse_gemini_line("event: ping").is_empty());
        assert!(parse_gemini_line("data: [DONE]").is_empty());
    }
}
