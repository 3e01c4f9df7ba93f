use envguard::broadcast::Broadcaster;
use envguard::state::AppState;
use envguard::store::JsonlStore;
use envguard::{api, config, ingress};
use std::net::SocketAddr;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = config::load_default()?;
    envguard::init_tracing(config.log_level());
    tracing::info!(
        config_path = config::DEFAULT_CONFIG_PATH,
        app = %config.app.name,
        "envguard starting"
    );

    let store_path = config.store_path();
    let store = Arc::new(JsonlStore::open(&store_path)?);
    let broadcaster = Broadcaster::new(config.subscriber_buffer());
    let state = AppState::new(store, broadcaster);

    match config.ingest_port() {
        Some(port) => {
            let addr = SocketAddr::from(([0, 0, 0, 0], port));
            let listener = tokio::net::TcpListener::bind(addr).await?;
            tokio::spawn(ingress::serve(listener, state.ingestor().clone()));
        }
        None => tracing::info!("Raw ingest listener disabled"),
    }

    let app = api::router(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port()));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "API server listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("envguard stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %err, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::config;

    #[test]
    fn default_config_is_valid_toml() -> Result<(), Box<dyn std::error::Error>> {
        let _config = config::load_default()?;
        Ok(())
    }
}
