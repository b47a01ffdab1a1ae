use crate::{config::Settings, resolver, server::HttpServer, state::ModelState};
use std::sync::Arc;
use tokio::{signal, sync::broadcast};

pub async fn start_app(config: Settings) -> anyhow::Result<()> {
    // The model is resolved exactly once, before the listener binds; every
    // request reads the same immutable state afterwards.
    let model: Arc<ModelState> = match resolver::resolve_model(&config.model) {
        Ok(state) => Arc::new(state),
        Err(e) => {
            tracing::error!("Failed to resolve model: {e}");
            return Err(e.into());
        }
    };

    match model.as_ref() {
        ModelState::Real(loaded) => {
            tracing::info!(strategy = loaded.strategy.name(), "model ready for analysis")
        }
        ModelState::Mock(_) => {
            tracing::warn!("serving with the mock predictor; scores are randomized")
        }
        ModelState::NotLoaded => {}
    }

    let server = HttpServer::new(model, &config).await?;

    let (shutdown_tx, _) = broadcast::channel(1);
    let server_shutdown_rx = shutdown_tx.subscribe();

    let server_handle = server.run(server_shutdown_rx).await?;

    shutdown_signal().await;
    tracing::info!("Shutdown signal received, starting graceful shutdown.");

    let _ = shutdown_tx.send(());
    let _ = server_handle.await;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
