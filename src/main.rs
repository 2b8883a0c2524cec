use anyhow::Result;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::broadcast;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use agrolink_gateway::config::Settings;
use agrolink_gateway::server::{create_app, AppState};
use agrolink_gateway::tasks::SweepTask;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    init_tracing();

    // Load configuration; a bad encryption key fails here, not per-connection
    let settings = Settings::new()?;
    tracing::info!("Configuration loaded");

    // Create application state
    let state = AppState::new(settings.clone()).await?;
    tracing::info!("Application state initialized");

    // Shutdown signal for background tasks
    let (shutdown_tx, _) = broadcast::channel(1);

    // Start the half-closed-session sweep in the background
    let sweep_task = SweepTask::new(
        settings.websocket.clone(),
        state.registry.clone(),
        shutdown_tx.subscribe(),
    );
    let sweep_handle = tokio::spawn(async move {
        sweep_task.run().await;
    });

    // Create Axum app
    let app = create_app(state);

    // Start server
    let addr = settings.server_addr();
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    // Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal_handler(shutdown_tx))
        .await?;

    // Wait for background tasks to finish
    tracing::info!("Waiting for background tasks to finish...");
    let _ = tokio::join!(sweep_handle);

    tracing::info!("Server shutdown complete");
    Ok(())
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn shutdown_signal_handler(shutdown_tx: broadcast::Sender<()>) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        }
    }

    // Stop the sweep task
    let _ = shutdown_tx.send(());
}
