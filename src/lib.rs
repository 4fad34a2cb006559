pub mod agent;
pub mod cli;
pub mod config;
pub mod llm;
pub mod models;
pub mod server;
pub mod store;
pub mod stream;
pub mod tools;

use std::error::Error;
use std::time::Duration;

use log::info;

use agent::{ AgentConfig, ChatAgent };
use cli::Args;
use config::prompt::load_system_prompt;
use llm::chat::new_client;
use llm::{ LlmConfig, LlmType };
use server::api::{ AppState, RequestLimits };
use server::Server;
use store::ConversationStore;
use stream::relay::RelayOptions;
use tools::{ product_search, ToolRegistry };

pub async fn run(args: Args) -> Result<(), Box<dyn Error + Send + Sync>> {
    info!("--- Core Configuration ---");
    info!("Server Address: {}", args.server_addr);
    info!("Database URL: {}", args.database_url);
    info!("Chat LLM Type: {}", args.chat_llm_type);
    info!("Word Delay (ms): {}", args.word_delay_ms);
    info!("Stream Timeout (s): {}", args.stream_timeout_secs);
    info!("History Char Budget: {}", args.history_char_budget);
    info!("Max Tool Rounds: {}", args.max_tool_rounds);
    info!("-------------------------");

    let pool = store::connect(&args.database_url).await?;
    let store = ConversationStore::new(pool);
    store.init_schema().await?;

    let llm_type: LlmType = args.chat_llm_type.parse()?;
    let llm_config = LlmConfig {
        llm_type,
        api_key: Some(args.chat_api_key.clone()).filter(|key| !key.is_empty()),
        model: args.chat_model.clone(),
        base_url: args.chat_base_url.clone(),
    };
    let chat_client = new_client(&llm_config)?;
    info!("Chat model: {}", chat_client.model());

    let system_prompt = load_system_prompt(args.system_prompt_path.as_deref())?;

    let mut tools = ToolRegistry::new();
    tools.register(product_search::definition(store.clone()));

    let agent = ChatAgent::new(AgentConfig {
        chat_client,
        system_prompt,
        tools,
        store: store.clone(),
        history_char_budget: args.history_char_budget,
        max_tool_rounds: args.max_tool_rounds,
    });

    let state = AppState {
        store,
        agent,
        relay_options: RelayOptions {
            word_delay: Duration::from_millis(args.word_delay_ms),
            chunk_timeout: Duration::from_secs(args.stream_timeout_secs),
        },
        limits: RequestLimits {
            max_prompt_chars: args.max_prompt_chars,
            max_image_bytes: args.max_image_bytes,
        },
    };

    let server = Server::new(args.server_addr.clone(), state);
    server.run().await?;

    Ok(())
}
