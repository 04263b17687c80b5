use ledger_chat::{api::start_server, config::AppConfig, conversational::Services};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenv::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = AppConfig::from_env()?;

    info!("Ledger Chat - API Server");
    info!("Port: {}", config.port);
    info!("Parser gateway: {}", config.parser_base_url);

    let services = Services::from_config(&config)?;

    info!("Services initialized, starting API server");

    start_server(services, config.port).await?;

    Ok(())
}
