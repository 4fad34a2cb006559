use std::error::Error;
use std::fs;

/// Instructions handed to the provider on every request. Overridable with
/// `--system-prompt-path` for deployments that want different behavior.
pub const DEFAULT_SYSTEM_PROMPT: &str = "\
# Background
You are an advanced AI assistant designed to help users with a variety of tasks.
You can process both text and image inputs to provide comprehensive responses.
You have access to a product search tool to find products in the database.

# Steps
- Analyze the user's input carefully.
- If an image is provided and the user is asking about products, interpret its \
content to identify product names or categories.
- If a product name or category is identified from text or image, use the \
`product_search` tool to find relevant products.
- If products are found, provide details like title, url, price etc.
- If no products are found, inform the user.
- Generate a helpful and relevant reply based on the information available.

# Output
Respond in a friendly and professional manner.
Keep answers concise and to the point.

# Tools
Use the `product_search` tool when the user asks about products or provides an \
image of a product. Avoid unnecessary use of external tools.
";

pub fn load_system_prompt(path: Option<&str>) -> Result<String, Box<dyn Error + Send + Sync>> {
    match path {
        Some(path) => {
            let prompt = fs
                ::read_to_string(path)
                .map_err(|e| format!("Failed to read system prompt file '{}': {}", path, e))?;
            Ok(prompt)
        }
        None => Ok(DEFAULT_SYSTEM_PROMPT.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_prompt_is_used_without_a_path() {
        let prompt = load_system_prompt(None).unwrap();
        assert!(prompt.contains("product_search"));
    }

    #[test]
    fn missing_prompt_file_is_an_error() {
        assert!(load_system_prompt(Some("/nonexistent/prompt.txt")).is_err());
    }
}
