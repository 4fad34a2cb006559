use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Host address and port for the HTTP server to listen on.
    #[arg(long, env = "SERVER_ADDR", default_value = "127.0.0.1:4000")]
    pub server_addr: String,

    /// SQLite database URL for conversations, messages and products.
    #[arg(long, env = "DATABASE_URL", default_value = "sqlite:chat.db")]
    pub database_url: String,

    // --- Chat LLM Provider Args ---
    /// Type of LLM provider for chat completion (gemini, openai)
    #[arg(long, env = "CHAT_LLM_TYPE", default_value = "gemini")]
    pub chat_llm_type: String,

    /// API Key for the chat LLM provider.
    #[arg(long, env = "CHAT_API_KEY", default_value = "")]
    pub chat_api_key: String,

    /// Model name for chat completion (e.g., gemini-2.5-flash, gpt-4o-mini)
    #[arg(long, env = "CHAT_MODEL")] // No default, rely on adapter defaults if None
    pub chat_model: Option<String>,

    /// Base URL for the chat LLM provider API.
    #[arg(long, env = "CHAT_BASE_URL")] // No default, let adapters handle defaults if None
    pub chat_base_url: Option<String>,

    /// Optional path to a file overriding the built-in system prompt.
    #[arg(long, env = "SYSTEM_PROMPT_PATH")]
    pub system_prompt_path: Option<String>,

    // --- Streaming Args ---
    /// Delay between streamed words in milliseconds. Cosmetic typing-speed
    /// throttle; 0 disables pacing.
    #[arg(long, env = "WORD_DELAY_MS", default_value = "50")]
    pub word_delay_ms: u64,

    /// Maximum seconds to wait for the next provider chunk before failing
    /// the stream.
    #[arg(long, env = "STREAM_TIMEOUT_SECS", default_value = "120")]
    pub stream_timeout_secs: u64,

    // --- Agent Args ---
    /// Character budget for conversation history sent to the provider.
    #[arg(long, env = "HISTORY_CHAR_BUDGET", default_value = "50000")]
    pub history_char_budget: usize,

    /// Maximum tool-invocation rounds per response.
    #[arg(long, env = "MAX_TOOL_ROUNDS", default_value = "4")]
    pub max_tool_rounds: usize,

    // --- Request Validation Args ---
    /// Maximum prompt length in characters.
    #[arg(long, env = "MAX_PROMPT_CHARS", default_value = "10000")]
    pub max_prompt_chars: usize,

    /// Maximum uploaded image size in bytes.
    #[arg(long, env = "MAX_IMAGE_BYTES", default_value = "10485760")]
    pub max_image_bytes: usize,
}
