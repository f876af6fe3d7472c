/**
 * Collaboration Server Entry Point
 *
 * Starts the Axum server, and on Ctrl-C stops accepting connections and
 * shuts every live document session down so unflushed edits reach storage
 * before the process exits.
 */

#[cfg(feature = "server")]
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    use pagecollab::backend::server::{create_app, ServerConfig};

    // Load environment variables from .env file if present
    dotenv::dotenv().ok();

    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(&env_filter))
        .init();

    tracing::info!("[Startup] Server initialization started");

    let config = ServerConfig::from_env()?;
    let (app, state) = create_app(&config).await?;

    let addr = config.bind_address();
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("[Startup] Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("[Shutdown] Listener closed, stopping live sessions");
    state.registry.shutdown().await;
    tracing::info!("[Shutdown] Done");

    Ok(())
}

#[cfg(feature = "server")]
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("[Shutdown] Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("[Shutdown] Ctrl-C received");
}

#[cfg(not(feature = "server"))]
fn main() {
    eprintln!("Server requires the 'server' feature to be enabled.");
    eprintln!("Run with: cargo run --bin collab-server --features server");
    std::process::exit(1);
}
