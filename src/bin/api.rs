use financial_research_agent::{
    agent::Agent, api::start_server, config::AgentConfig, llm::GeminiClient,
    tools::create_default_registry,
};
use std::sync::Arc;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // Load environment variables
    let config = AgentConfig::from_env()?;

    if config.gemini_api_key.is_empty() {
        warn!("GEMINI_API_KEY not set in .env; model calls will fail");
    }
    if config.financial_api_key.is_empty() {
        warn!("FINANCIAL_DATASETS_API_KEY not set in .env; tool calls will fail");
    }

    info!("Financial Research Agent - API Server");
    info!("Port: {}", config.port);

    let model = Arc::new(GeminiClient::new(
        config.gemini_api_key.clone(),
        config.gemini_model.clone(),
    )?);
    let tools = Arc::new(create_default_registry(&config)?);
    let agent = Arc::new(Agent::from_config(model, tools, &config));

    info!(
        model = %config.gemini_model,
        max_iterations = config.max_iterations,
        "Agent initialized"
    );

    start_server(agent, config.port).await?;

    Ok(())
}
