use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;
use serde_json::Value;
use crate::data::types::{MarketQuery, MarketStatus, RawMarket};
use crate::data::MarketSource;

const USER_AGENT: &str = "CalibratedAI/1.0";

pub struct GammaApiClient {
    client: Client,
    base_url: String,
}

impl GammaApiClient {
    pub fn new(base_url: String, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .context("Failed to build Gamma HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn query_params(query: &MarketQuery) -> Vec<(&'static str, String)> {
        let status = match query.status {
            MarketStatus::Closed => "closed",
            MarketStatus::Active => "active",
        };

        vec![
            (status, "true".to_string()),
            ("limit", query.limit.to_string()),
            ("order", "volume".to_string()),
            ("ascending", "false".to_string()),
        ]
    }
}

#[async_trait]
impl MarketSource for GammaApiClient {
    /// Fetch markets from the Gamma API, highest volume first
    async fn fetch_markets(&self, query: MarketQuery) -> Result<Vec<RawMarket>> {
        let url = format!("{}/markets", self.base_url);

        let records: Vec<Value> = self.client
            .get(&url)
            .query(&Self::query_params(&query))
            .send()
            .await
            .context("Failed to fetch markets")?
            .error_for_status()
            .context("Gamma API returned an error status")?
            .json()
            .await
            .context("Failed to parse markets response")?;

        let markets = parse_markets(records);
        debug!("Fetched {} {:?} markets", markets.len(), query.status);
        Ok(markets)
    }
}

/// Decode each listing record on its own; off-shape records are dropped.
pub fn parse_markets(records: Vec<Value>) -> Vec<RawMarket> {
    records
        .into_iter()
        .filter_map(|record| match serde_json::from_value::<RawMarket>(record) {
            Ok(market) => Some(market),
            Err(e) => {
                debug!("Skipping malformed market record: {}", e);
                None
            }
        })
        .collect()
}
