use anyhow::Result;
use std::sync::Arc;
use calibrated_ai::api;
use calibrated_ai::config::{Config, EnvConfig};
use calibrated_ai::data::gamma_api::GammaApiClient;
use calibrated_ai::estimation::openrouter::OpenRouterClient;
use calibrated_ai::monitoring::logger::CsvLogger;
use calibrated_ai::refresh::orchestrator::Orchestrator;
use calibrated_ai::storage::persistence::CalibrationDatabase;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,calibrated_ai=debug")),
        )
        .init();

    tracing::info!("CalibratedAI starting...");

    // Load configuration
    let config_path = std::env::var("CALIBRATEDAI_CONFIG").unwrap_or_else(|_| "config.toml".to_string());
    tracing::info!("Loading configuration from {}", config_path);
    let config = Config::load(&config_path)?;
    let env_config = EnvConfig::load()?;

    let model_ids: Vec<String> = config.models.iter().map(|m| m.id.clone()).collect();
    tracing::info!("Models on the leaderboard: {}", model_ids.len());

    // Initialize database
    let database_path = env_config.database_path
        .clone()
        .unwrap_or_else(|| config.system.database_path.clone());
    tracing::info!("Initializing database: {}", database_path);
    let db = Arc::new(CalibrationDatabase::new(&database_path)?);

    let stats = db.get_stats()?;
    tracing::info!(
        "Database holds {} events ({} resolved), {} estimates",
        stats.total_events, stats.resolved_events, stats.total_estimates
    );

    // Collaborators
    let timeout = config.refresh.request_timeout();
    let source = GammaApiClient::new(env_config.polymarket_gamma_url.clone(), timeout)?;
    let estimator = OpenRouterClient::new(
        env_config.openrouter_url.clone(),
        env_config.openrouter_api_key.clone(),
        timeout,
        config.refresh.max_tokens,
    )?;

    let mut orchestrator = Orchestrator::new(
        Arc::new(source),
        Arc::new(estimator),
        Arc::clone(&db),
        model_ids,
    );
    if config.monitoring.csv_logging {
        tracing::info!("Estimate log: {}", config.monitoring.csv_log_path);
        orchestrator = orchestrator.with_audit_log(CsvLogger::new(&config.monitoring.csv_log_path)?);
    }

    let state = api::AppState::new(Arc::new(orchestrator), db, config.models.clone());
    api::serve(state, &config.system.bind_addr).await?;

    Ok(())
}
