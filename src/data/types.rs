use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};

/// A binary prediction-market question as stored locally.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: String,
    pub question: String,
    pub description: String,
    pub market_probability: Option<f64>,
    /// 1 = YES, 0 = NO, None while unresolved or indeterminate
    pub outcome: Option<u8>,
    pub is_resolved: bool,
    pub volume: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Estimate {
    pub event_id: String,
    pub model_id: String,
    pub probability: f64,
    pub created_at: DateTime<Utc>,
}

/// Market record as returned by the Gamma `/markets` endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawMarket {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub question: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    /// JSON-encoded string array, e.g. `["0.65", "0.35"]`
    #[serde(default)]
    pub outcome_prices: Option<String>,
    /// Gamma sends either a number or a numeric string
    #[serde(default)]
    pub volume: Option<serde_json::Value>,
    #[serde(default)]
    pub active: Option<bool>,
    #[serde(default)]
    pub closed: Option<bool>,
    #[serde(default)]
    pub resolved: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarketStatus {
    Closed,
    Active,
}

/// Volume-descending market listing request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarketQuery {
    pub status: MarketStatus,
    pub limit: usize,
}
