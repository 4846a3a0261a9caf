pub mod gamma_api;
pub mod ingest;
pub mod types;

use anyhow::Result;
use async_trait::async_trait;
use crate::data::types::{MarketQuery, RawMarket};

/// Upstream listing of prediction markets.
#[async_trait]
pub trait MarketSource: Send + Sync {
    async fn fetch_markets(&self, query: MarketQuery) -> Result<Vec<RawMarket>>;
}
