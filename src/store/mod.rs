//! Relational persistence for conversations, messages and the product
//! catalog, backed by SQLite through sqlx.

use chrono::Utc;
use log::info;
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::SqlitePool;
use std::error::Error;

use crate::models::chat::{ ChatMessage, Conversation, ConversationSummary };
use crate::models::product::Product;

const TITLE_MAX_LENGTH: usize = 25;

pub async fn connect(database_url: &str) -> Result<SqlitePool, Box<dyn Error + Send + Sync>> {
    let options = database_url
        .parse::<SqliteConnectOptions>()
        .map_err(|e| format!("Invalid database URL '{}': {}", database_url, e))?
        .create_if_missing(true);

    let pool = SqlitePool::connect_with(options).await?;
    info!("Connected to database: {}", database_url);
    Ok(pool)
}

#[derive(Clone)]
pub struct ConversationStore {
    pool: SqlitePool,
}

impl ConversationStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn init_schema(&self) -> Result<(), sqlx::Error> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS conversations (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                title TEXT NOT NULL,
                created_at DATETIME NOT NULL,
                updated_at DATETIME NOT NULL
            )"
        ).execute(&self.pool).await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                conversation_id INTEGER NOT NULL REFERENCES conversations(id),
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                created_at DATETIME NOT NULL
            )"
        ).execute(&self.pool).await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS products (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                title TEXT NOT NULL,
                category TEXT NOT NULL,
                thumbnail TEXT,
                price REAL NOT NULL
            )"
        ).execute(&self.pool).await?;

        Ok(())
    }

    /// First-or-create of the conversation plus the user-message append,
    /// inside one transaction. A caller-supplied id that already exists is
    /// reused; concurrent calls with the same new id end up with a single
    /// conversation row.
    pub async fn create_or_load(
        &self,
        prompt: &str,
        conversation_id: Option<i64>
    ) -> Result<Conversation, sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        let now = Utc::now().naive_utc();
        let title = derive_title(prompt);

        let id = match conversation_id {
            Some(id) => {
                sqlx::query(
                    "INSERT INTO conversations (id, title, created_at, updated_at)
                     VALUES (?, ?, ?, ?)
                     ON CONFLICT(id) DO NOTHING"
                )
                    .bind(id)
                    .bind(&title)
                    .bind(now)
                    .bind(now)
                    .execute(&mut *tx).await?;
                id
            }
            None => {
                let result = sqlx::query(
                    "INSERT INTO conversations (title, created_at, updated_at)
                     VALUES (?, ?, ?)"
                )
                    .bind(&title)
                    .bind(now)
                    .bind(now)
                    .execute(&mut *tx).await?;
                result.last_insert_rowid()
            }
        };

        sqlx::query(
            "INSERT INTO messages (conversation_id, role, content, created_at)
             VALUES (?, 'user', ?, ?)"
        )
            .bind(id)
            .bind(prompt)
            .bind(now)
            .execute(&mut *tx).await?;

        sqlx::query("UPDATE conversations SET updated_at = ? WHERE id = ?")
            .bind(now)
            .bind(id)
            .execute(&mut *tx).await?;

        let conversation = sqlx::query_as::<_, Conversation>(
            "SELECT id, title, updated_at FROM conversations WHERE id = ?"
        )
            .bind(id)
            .fetch_one(&mut *tx).await?;

        tx.commit().await?;
        Ok(conversation)
    }

    /// Persists the assistant's reply. Blank content is a no-op; this runs
    /// in its own transaction so an upstream failure cannot roll it back.
    pub async fn append_assistant_message(
        &self,
        conversation_id: i64,
        content: &str
    ) -> Result<(), sqlx::Error> {
        if content.trim().is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        let now = Utc::now().naive_utc();

        sqlx::query(
            "INSERT INTO messages (conversation_id, role, content, created_at)
             VALUES (?, 'assistant', ?, ?)"
        )
            .bind(conversation_id)
            .bind(content)
            .bind(now)
            .execute(&mut *tx).await?;

        sqlx::query("UPDATE conversations SET updated_at = ? WHERE id = ?")
            .bind(now)
            .bind(conversation_id)
            .execute(&mut *tx).await?;

        tx.commit().await
    }

    pub async fn list_conversations(&self) -> Result<Vec<ConversationSummary>, sqlx::Error> {
        sqlx::query_as::<_, ConversationSummary>(
            "SELECT id, title AS name FROM conversations
             ORDER BY updated_at DESC, id DESC"
        ).fetch_all(&self.pool).await
    }

    pub async fn conversation_exists(&self, id: i64) -> Result<bool, sqlx::Error> {
        let row: Option<(i64,)> = sqlx::query_as("SELECT id FROM conversations WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool).await?;
        Ok(row.is_some())
    }

    pub async fn list_messages(&self, conversation_id: i64) -> Result<Vec<ChatMessage>, sqlx::Error> {
        sqlx::query_as::<_, ChatMessage>(
            "SELECT role, content FROM messages
             WHERE conversation_id = ?
             ORDER BY created_at ASC, id ASC"
        )
            .bind(conversation_id)
            .fetch_all(&self.pool).await
    }

    /// Most recent turns first trimmed to a character budget, returned in
    /// chronological order. Used to build the provider context window.
    pub async fn recent_messages(
        &self,
        conversation_id: i64,
        char_budget: usize
    ) -> Result<Vec<ChatMessage>, sqlx::Error> {
        let rows = sqlx::query_as::<_, ChatMessage>(
            "SELECT role, content FROM messages
             WHERE conversation_id = ?
             ORDER BY created_at DESC, id DESC"
        )
            .bind(conversation_id)
            .fetch_all(&self.pool).await?;

        let mut used = 0usize;
        let mut recent = Vec::new();
        for message in rows {
            used += message.content.len();
            if used > char_budget && !recent.is_empty() {
                break;
            }
            recent.push(message);
        }
        recent.reverse();
        Ok(recent)
    }

    /// Deletes the messages then the conversation, atomically. Returns
    /// false when the conversation does not exist.
    pub async fn delete_conversation(&self, conversation_id: i64) -> Result<bool, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM messages WHERE conversation_id = ?")
            .bind(conversation_id)
            .execute(&mut *tx).await?;

        let result = sqlx::query("DELETE FROM conversations WHERE id = ?")
            .bind(conversation_id)
            .execute(&mut *tx).await?;

        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    // --- Product catalog ---

    pub async fn list_products(&self) -> Result<Vec<Product>, sqlx::Error> {
        sqlx::query_as::<_, Product>(
            "SELECT id, title, category, thumbnail, price FROM products ORDER BY id"
        ).fetch_all(&self.pool).await
    }

    /// Keyword search: the query is split on whitespace and each keyword is
    /// OR-matched against product titles.
    pub async fn search_products(&self, query: &str) -> Result<Vec<Product>, sqlx::Error> {
        let keywords: Vec<&str> = query.split_whitespace().collect();
        if keywords.is_empty() {
            return self.list_products().await;
        }

        let clauses = vec!["title LIKE ?"; keywords.len()].join(" OR ");
        let sql = format!(
            "SELECT id, title, category, thumbnail, price FROM products WHERE {} ORDER BY id",
            clauses
        );

        let mut statement = sqlx::query_as::<_, Product>(&sql);
        for keyword in &keywords {
            statement = statement.bind(format!("%{}%", keyword));
        }
        statement.fetch_all(&self.pool).await
    }

    pub async fn create_product(
        &self,
        title: &str,
        category: &str,
        thumbnail: Option<&str>,
        price: f64
    ) -> Result<Product, sqlx::Error> {
        let result = sqlx::query(
            "INSERT INTO products (title, category, thumbnail, price) VALUES (?, ?, ?, ?)"
        )
            .bind(title)
            .bind(category)
            .bind(thumbnail)
            .bind(price)
            .execute(&self.pool).await?;

        sqlx::query_as::<_, Product>(
            "SELECT id, title, category, thumbnail, price FROM products WHERE id = ?"
        )
            .bind(result.last_insert_rowid())
            .fetch_one(&self.pool).await
    }

    pub async fn update_product(
        &self,
        id: i64,
        title: &str,
        category: &str,
        thumbnail: Option<&str>,
        price: f64
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE products SET title = ?, category = ?, thumbnail = ?, price = ? WHERE id = ?"
        )
            .bind(title)
            .bind(category)
            .bind(thumbnail)
            .bind(price)
            .bind(id)
            .execute(&self.pool).await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn delete_product(&self, id: i64) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM products WHERE id = ?")
            .bind(id)
            .execute(&self.pool).await?;
        Ok(result.rows_affected() > 0)
    }
}

/// Display title for a new conversation: the prompt cut to 25 characters,
/// with an ellipsis when anything was dropped.
fn derive_title(prompt: &str) -> String {
    let mut title: String = prompt.chars().take(TITLE_MAX_LENGTH).collect();
    if title.chars().count() < prompt.chars().count() {
        title = format!("{}...", title.trim_end());
    }
    title
}

#[cfg(test)]
pub(crate) async fn memory_store() -> ConversationStore {
    use sqlx::sqlite::SqlitePoolOptions;

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:").await
        .expect("in-memory database");
    let store = ConversationStore::new(pool);
    store.init_schema().await.expect("schema");
    store
}
