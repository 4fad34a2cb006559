use chrono::NaiveDateTime;
use serde::{ Serialize, Deserialize };

#[derive(Clone, Debug, Serialize, Deserialize, sqlx::FromRow)]
pub struct Conversation {
    pub id: i64,
    pub title: String,
    pub updated_at: NaiveDateTime,
}

/// A single turn of a conversation. Rows are immutable once written.
#[derive(Clone, Debug, Serialize, Deserialize, sqlx::FromRow)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: content.into(),
        }
    }
}

/// Listing shape for the sidebar: `title` is exposed as `name`.
#[derive(Clone, Debug, Serialize, sqlx::FromRow)]
pub struct ConversationSummary {
    pub id: i64,
    pub name: String,
}
