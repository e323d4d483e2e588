//! Studio gateway server.
//!
//! Serves the generation API, the image proxy and the admin API for one
//! site. Users are provisioned by the site front-end in the shared data
//! directory; this process only reads and mutates them.

use std::net::SocketAddr;

use clap::Parser;
use studio_gateway::config::GatewayConfig;
use studio_gateway::metrics;
use studio_gateway::routes::{app_router, AppState};

#[derive(Parser)]
#[command(name = "studio-gateway", about = "Studio image generation gateway")]
struct Cli {
    /// Server port
    #[arg(short, long, env = "GATEWAY_PORT", default_value = "3000")]
    port: u16,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_default();
    if log_format == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "info".into()),
            )
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "info".into()),
            )
            .init();
    }

    let cli = Cli::parse();

    tracing::info!("Starting studio gateway...");

    let config = GatewayConfig::from_env();
    tracing::info!(
        site = %config.site,
        comfy_url = %config.comfy_url,
        data_dir = %config.data_dir.display(),
        workflow = %config.workflow_path.display(),
        poll_mode = ?config.poll_mode,
        "Configuration loaded"
    );
    if !config.workflow_path.exists() {
        tracing::warn!(
            path = %config.workflow_path.display(),
            "Workflow template not found -- generation requests will fail until it exists"
        );
    }

    // Initialize metrics
    metrics::init_metrics();

    let app = app_router(AppState::new(config));

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], cli.port));
    tracing::info!("Studio gateway listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("Shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received SIGINT, shutting down..."),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down..."),
    }
}
