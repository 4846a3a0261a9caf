pub mod openrouter;

use async_trait::async_trait;

/// Asks a language model for the probability that a question resolves YES.
#[async_trait]
pub trait Estimator: Send + Sync {
    async fn estimate(
        &self,
        model_id: &str,
        question: &str,
        description: &str,
    ) -> Result<f64, EstimateError>;
}

/// Why a single (event, model) task produced no estimate.
#[derive(Debug, thiserror::Error)]
pub enum EstimateError {
    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Provider returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Empty completion")]
    EmptyResponse,

    #[error("Could not parse probability from: {0:?}")]
    Unparseable(String),

    #[error("Probability out of range: {0}")]
    OutOfRange(f64),

    #[error("Failed to store estimate: {0}")]
    Storage(#[from] anyhow::Error),
}
