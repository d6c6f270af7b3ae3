//! Pipeline server binary
//!
//! Run with: cargo run -p conveyor --bin conveyor-server [config.toml]

use conveyor::{config::ConveyorConfig, server::ConveyorServer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "conveyor=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    println!(
        r#"
╔═══════════════════════════════════════════════════════════╗
║                        Conveyor                           ║
║        Object-store ingestion pipeline orchestrator       ║
╚═══════════════════════════════════════════════════════════╝
"#
    );

    // Load configuration
    let config_path = std::env::args().nth(1).unwrap_or_else(|| "conveyor.toml".to_string());
    let config = ConveyorConfig::load_or_default(&config_path)?;

    tracing::info!("Configuration loaded");
    tracing::info!("  - Storage backend: {:?}", config.storage.backend);
    tracing::info!("  - Watched bucket: {}", config.storage.bucket);
    tracing::info!("  - Queue capacity: {}", config.queue.capacity);
    tracing::info!("  - Workers: {}", config.workers.effective_count());
    tracing::info!("  - Poll interval: {}s", config.watcher.interval_secs);

    // Create and start server
    let server = ConveyorServer::new(config).await?;

    println!("\nServer starting...");
    println!("  API: http://{}", server.address());
    println!("  Health: http://{}/health", server.address());
    println!("  API Info: http://{}/api/info", server.address());
    println!("\nEndpoints:");
    println!("  POST /api/files     - Upload objects");
    println!("  GET  /api/jobs      - List jobs");
    println!("  GET  /api/events    - Recent file events");
    println!("  GET  /api/stats     - Pipeline health");
    println!("\nPress Ctrl+C to stop\n");

    server.start().await?;

    Ok(())
}
