use std::net::SocketAddr;

use echobot::{app, build_state, AppConfig};
use tokio::net::TcpListener;
use tokio::signal;
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialise structured logging. Reads RUST_LOG environment variable.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    let config = AppConfig::from_env()?;
    // Adapter construction failure is the only fatal startup path.
    let state = match build_state(&config) {
        Ok(state) => state,
        Err(err) => {
            tracing::error!(error = %err, "error creating adapter");
            return Err(err.into());
        }
    };
    let app = app(state);

    let addr: SocketAddr = ([0, 0, 0, 0], config.port).into();

    // Run the server with graceful shutdown on Ctrl+C
    let listener = TcpListener::bind(addr).await?;
    tracing::info!("starting server on port {}", config.port);
    tracing::info!("bot endpoint: http://localhost:{}/api/messages", config.port);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;
    Ok(())
}

async fn shutdown_signal() {
    // Wait for Ctrl+C
    let _ = signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
