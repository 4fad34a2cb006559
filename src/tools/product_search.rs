//! Keyword product search exposed to the agent.

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::error::Error as StdError;
use std::sync::Arc;

use super::{ PropertyKind, ToolDefinition, ToolHandler, ToolProperty };
use crate::store::ConversationStore;

pub const TOOL_NAME: &str = "product_search";

struct ProductSearchTool {
    store: ConversationStore,
}

#[async_trait]
impl ToolHandler for ProductSearchTool {
    async fn call(&self, args: &JsonValue) -> Result<String, Box<dyn StdError + Send + Sync>> {
        let query = args["query"].as_str().unwrap_or_default();
        let products = self.store.search_products(query).await?;

        let listing: Vec<JsonValue> = products
            .into_iter()
            .map(|product|
                serde_json::json!({
                    "id": product.id,
                    "title": product.title,
                    "category": product.category,
                    "thumbnail": product.thumbnail,
                    "price": product.price,
                    "url": format!("/products/{}", product.id),
                })
            )
            .collect();

        Ok(serde_json::to_string(&listing)?)
    }
}

pub fn definition(store: ConversationStore) -> ToolDefinition {
    ToolDefinition {
        name: TOOL_NAME.to_string(),
        description: "Searches for products in the database based on a query.".to_string(),
        properties: vec![
            ToolProperty::required(
                "query",
                PropertyKind::String,
                "The search query for products (e.g., \"laptops\", \"accessories\", \"gaming headset\")."
            )
        ],
        handler: Arc::new(ProductSearchTool { store }),
    }
}
