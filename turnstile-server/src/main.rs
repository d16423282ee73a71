use std::sync::Arc;

use clap::Parser;
use tokio::sync::broadcast;
use tracing_subscriber::{fmt, EnvFilter};

use turnstile_core::upstream::AgentClient;
use turnstile_core::{GatewayConfig, HttpAgentClient};
use turnstile_server::router;
use turnstile_server::state::AppState;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "turnstile.toml")]
    config: String,

    /// Check DB and back-end connectivity, then exit.
    #[arg(long)]
    health: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (dev convenience — production uses real env vars)
    dotenvy::dotenv().ok();

    let args = Args::parse();

    fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let config = match GatewayConfig::load(&args.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {}", args.config, e);
            std::process::exit(1);
        }
    };

    let pool = match turnstile_core::db::create_pool(&config.database).await {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Failed to connect to database: {}", e);
            std::process::exit(1);
        }
    };

    tracing::info!("running schema migration...");
    turnstile_core::db::init_schema(&pool).await?;

    let agent: Arc<dyn AgentClient> = Arc::new(HttpAgentClient::new(&config.llm)?);

    if args.health {
        match turnstile_core::db::health_check(&pool).await {
            Ok(v) => println!("PostgreSQL connected: {}", v),
            Err(e) => {
                println!("PostgreSQL connection failed: {}", e);
                std::process::exit(1);
            }
        }
        match agent.health_check().await {
            Ok(()) => println!("Model back-end healthy"),
            Err(e) => println!("Model back-end unavailable: {}", e),
        }
        return Ok(());
    }

    let state = Arc::new(AppState::new(config, pool, agent.clone()));

    let (tx, _rx) = broadcast::channel(1);
    let shutdown_tx = tx.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to listen for Ctrl+C");
        tracing::info!("Shutdown signal received");
        let _ = shutdown_tx.send(());
    });

    let result = router::start_http_server(state, tx.subscribe()).await;

    agent.close();
    tracing::info!("upstream client closed");

    result
}
