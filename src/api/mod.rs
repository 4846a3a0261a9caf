pub mod routes;

use anyhow::{Context, Result};
use axum::Router;
use std::sync::Arc;
use tracing::info;
use crate::config::ModelConfig;
use crate::refresh::orchestrator::Orchestrator;
use crate::storage::persistence::CalibrationDatabase;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub db: Arc<CalibrationDatabase>,
    pub models: Arc<Vec<ModelConfig>>,
}

impl AppState {
    pub fn new(
        orchestrator: Arc<Orchestrator>,
        db: Arc<CalibrationDatabase>,
        models: Vec<ModelConfig>,
    ) -> Self {
        Self {
            orchestrator,
            db,
            models: Arc::new(models),
        }
    }
}

/// Serve the API until ctrl-c
pub async fn serve(state: AppState, bind_addr: &str) -> Result<()> {
    let app: Router = routes::routes().with_state(state);

    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", bind_addr))?;
    info!("Listening on http://{}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down...");
        })
        .await
        .context("HTTP server error")?;

    Ok(())
}
