use futures::Stream;
use serde::{ Serialize, Deserialize };
use std::error::Error as StdError;
use std::pin::Pin;

/// One unit of agent output. Lives only for the duration of a request.
#[derive(Clone, Debug, PartialEq)]
pub enum ResponseChunk {
    Text(String),
    /// The provider asked to invoke the named tools before continuing.
    ToolCall(Vec<String>),
}

pub type ChunkStream = Pin<
    Box<dyn Stream<Item = Result<ResponseChunk, Box<dyn StdError + Send + Sync>>> + Send>
>;

/// Wire frame pushed to the browser. Serializes to exactly
/// `{"text": …, "done": …}` or `{"error": …, "done": true}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StreamEvent {
    Text {
        text: String,
        done: bool,
    },
    Error {
        error: String,
        done: bool,
    },
}

impl StreamEvent {
    pub fn word(text: impl Into<String>) -> Self {
        StreamEvent::Text { text: text.into(), done: false }
    }

    pub fn done() -> Self {
        StreamEvent::Text { text: String::new(), done: true }
    }

    pub fn error(message: impl Into<String>) -> Self {
        StreamEvent::Error { error: message.into(), done: true }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_|
            r#"{"error":"event serialization failed","done":true}"#.to_string()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn word_event_wire_shape() {
        assert_eq!(StreamEvent::word("Hello ").to_json(), r#"{"text":"Hello ","done":false}"#);
    }

    #[test]
    fn done_event_wire_shape() {
        assert_eq!(StreamEvent::done().to_json(), r#"{"text":"","done":true}"#);
    }

    #[test]
    fn error_event_wire_shape() {
        assert_eq!(
            StreamEvent::error("provider unavailable").to_json(),
            r#"{"error":"provider unavailable","done":true}"#
        );
    }
}
