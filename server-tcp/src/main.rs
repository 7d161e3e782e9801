use server_tcp::config::NodeServerConfig;
use server_tcp::{NodeState, serve};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Load environment variables from .env file (if exists)
    match dotenvy::dotenv() {
        Ok(_) => info!("Loaded environment variables from .env file"),
        Err(_) => info!("No .env file found, using system environment variables"),
    }

    let config = NodeServerConfig::from_env()?;
    let node = Arc::new(NodeState::new(config.password.clone()));

    let listener = TcpListener::bind(config.bind_address()).await?;
    info!("Node listening on tcp://{}", listener.local_addr()?);

    serve(listener, node).await?;
    Ok(())
}
