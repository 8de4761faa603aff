use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use taskrelay_server::{
    cli::{Cli, Commands},
    config::ServerConfig,
    router, BuiltinRoutines, EventHub, ServerState, TaskManager,
};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "taskrelay_server=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = ServerConfig::from_env()?;

    match cli.command {
        Some(Commands::Config) => {
            println!("{:#?}", config);
            return Ok(());
        }
        Some(Commands::Serve) | None => {}
    }

    info!("🚀 Starting Taskrelay Server v{}", VERSION);
    info!("📋 Configuration loaded:");
    info!("   Port: {}", config.port);
    info!("   Bind address: {}", config.bind_addr);
    info!("   Max concurrent tasks: {}", config.max_concurrent_tasks);
    info!(
        "   Task retention: {}",
        if config.task_retention_secs == 0 {
            "forever".to_string()
        } else {
            format!("{}s", config.task_retention_secs)
        }
    );
    info!("   CORS origins: {:?}", config.cors_origins);

    let hub = Arc::new(EventHub::new(config.event_hub_config()));
    let routines = BuiltinRoutines::new(config.http_timeout())?;
    let tasks = Arc::new(TaskManager::new(
        config.task_manager_config(),
        hub.clone(),
        Arc::new(routines),
    ));
    let sweeper = tasks.start_retention_sweeper();

    let state = Arc::new(ServerState::new(config.clone(), tasks.clone()));
    let app = router(state);

    let addr: SocketAddr = config.bind_address().parse()?;
    info!("🎧 Listening on http://{}", addr);
    info!("📡 WebSocket endpoint: ws://{}/ws", addr);
    info!("🔑 Health endpoint: http://{}/health", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("🛑 Shutting down, stopping active tasks");
    let cancelled = tasks.emergency_stop().await;
    if cancelled > 0 {
        info!("Cancelled {} active tasks", cancelled);
    }
    if let Some(sweeper) = sweeper {
        sweeper.abort();
    }
    if let Some(pump) = hub.close() {
        if let Err(e) = pump.await {
            warn!("Event pump ended abnormally: {}", e);
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}
