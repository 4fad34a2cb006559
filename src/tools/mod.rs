//! Tool surface the agent can invoke mid-stream. Tools are plain
//! registered functions looked up by name; arguments are validated against
//! the declared parameter schema before the handler runs.

pub mod product_search;

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::error::Error as StdError;
use std::sync::Arc;
use thiserror::Error;

use crate::llm::chat::ToolSpec;

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Unknown tool: '{0}'")]
    UnknownTool(String),
    #[error("Invalid arguments for tool '{tool}': {reason}")]
    InvalidArguments {
        tool: String,
        reason: String,
    },
    #[error("Tool '{tool}' failed: {source}")]
    Execution {
        tool: String,
        source: Box<dyn StdError + Send + Sync>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyKind {
    String,
    Number,
    Boolean,
}

impl PropertyKind {
    fn json_name(self) -> &'static str {
        match self {
            PropertyKind::String => "string",
            PropertyKind::Number => "number",
            PropertyKind::Boolean => "boolean",
        }
    }

    fn matches(self, value: &JsonValue) -> bool {
        match self {
            PropertyKind::String => value.is_string(),
            PropertyKind::Number => value.is_number(),
            PropertyKind::Boolean => value.is_boolean(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ToolProperty {
    pub name: String,
    pub kind: PropertyKind,
    pub description: String,
    pub required: bool,
}

impl ToolProperty {
    pub fn required(name: &str, kind: PropertyKind, description: &str) -> Self {
        Self {
            name: name.to_string(),
            kind,
            description: description.to_string(),
            required: true,
        }
    }
}

#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, args: &JsonValue) -> Result<String, Box<dyn StdError + Send + Sync>>;
}

pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub properties: Vec<ToolProperty>,
    pub handler: Arc<dyn ToolHandler>,
}

impl ToolDefinition {
    /// JSON-schema rendering of the parameter list, as providers expect it.
    pub fn spec(&self) -> ToolSpec {
        let mut schema_properties = serde_json::Map::new();
        let mut required = Vec::new();

        for property in &self.properties {
            schema_properties.insert(
                property.name.clone(),
                serde_json::json!({
                    "type": property.kind.json_name(),
                    "description": property.description,
                })
            );
            if property.required {
                required.push(JsonValue::String(property.name.clone()));
            }
        }

        ToolSpec {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": schema_properties,
                "required": required,
            }),
        }
    }

    fn validate(&self, args: &JsonValue) -> Result<(), ToolError> {
        let Some(object) = args.as_object() else {
            return Err(ToolError::InvalidArguments {
                tool: self.name.clone(),
                reason: "arguments must be a JSON object".to_string(),
            });
        };

        for property in &self.properties {
            match object.get(&property.name) {
                Some(value) => {
                    if !property.kind.matches(value) {
                        return Err(ToolError::InvalidArguments {
                            tool: self.name.clone(),
                            reason: format!(
                                "'{}' must be a {}",
                                property.name,
                                property.kind.json_name()
                            ),
                        });
                    }
                }
                None if property.required => {
                    return Err(ToolError::InvalidArguments {
                        tool: self.name.clone(),
                        reason: format!("missing required argument '{}'", property.name),
                    });
                }
                None => {}
            }
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, ToolDefinition>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, definition: ToolDefinition) {
        self.tools.insert(definition.name.clone(), definition);
    }

    pub fn specs(&self) -> Vec<ToolSpec> {
        let mut specs: Vec<ToolSpec> = self.tools
            .values()
            .map(|definition| definition.spec())
            .collect();
        specs.sort_by(|a, b| a.name.cmp(&b.name));
        specs
    }

    pub async fn invoke(&self, name: &str, args: &JsonValue) -> Result<String, ToolError> {
        let definition = self.tools
            .get(name)
            .ok_or_else(|| ToolError::UnknownTool(name.to_string()))?;

        definition.validate(args)?;

        definition.handler
            .call(args).await
            .map_err(|source| ToolError::Execution {
                tool: name.to_string(),
                source,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    #[async_trait]
    impl ToolHandler for Echo {
        async fn call(&self, args: &JsonValue) -> Result<String, Box<dyn StdError + Send + Sync>> {
            Ok(args["query"].as_str().unwrap_or_default().to_string())
        }
    }

    fn registry() -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        registry.register(ToolDefinition {
            name: "echo".to_string(),
            description: "Echoes the query back.".to_string(),
            properties: vec![
                ToolProperty::required("query", PropertyKind::String, "Text to echo.")
            ],
            handler: Arc::new(Echo),
        });
        registry
    }

    #[tokio::test]
    async fn invokes_registered_tool() {
        let registry = registry();
        let result = registry
            .invoke("echo", &serde_json::json!({"query": "hello"})).await
            .unwrap();
        assert_eq!(result, "hello");
    }

    #[tokio::test]
    async fn unknown_tool_is_rejected() {
        let registry = registry();
        let err = registry.invoke("mystery", &serde_json::json!({})).await.unwrap_err();
        assert!(matches!(err, ToolError::UnknownTool(_)));
    }

    #[tokio::test]
    async fn missing_required_argument_is_rejected() {
        let registry = registry();
        let err = registry.invoke("echo", &serde_json::json!({})).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments { .. }));
    }

    #[tokio::test]
    async fn wrong_argument_type_is_rejected() {
        let registry = registry();
        let err = registry.invoke("echo", &serde_json::json!({"query": 5})).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments { .. }));
    }

    #[test]
    fn spec_renders_json_schema() {
        let registry = registry();
        let specs = registry.specs();
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].name, "echo");
        assert_eq!(
            specs[0].parameters,
            serde_json::json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string", "description": "Text to echo."}
                },
                "required": ["query"],
            })
        );
    }
}
