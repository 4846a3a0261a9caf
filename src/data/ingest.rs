//! Turns raw Gamma market listings into binary events.
//!
//! Roughly 70% of each refresh is drawn from closed markets so the
//! leaderboard has resolved ground truth; the rest are live markets.
//! Only yes/no markets with two parseable outcome prices survive.

use anyhow::Result;
use tracing::{debug, info};
use std::collections::HashSet;
use crate::data::types::{Event, MarketQuery, MarketStatus, RawMarket};
use crate::data::MarketSource;

/// Percent of each refresh requested from closed markets.
const RESOLVED_PERCENT: usize = 70;
const ACTIVE_PERCENT: usize = 30;

/// Resolved markets at or above this YES price count as YES.
const YES_THRESHOLD: f64 = 0.99;
/// Resolved markets at or below this YES price count as NO.
const NO_THRESHOLD: f64 = 0.01;

const MAX_QUESTION_CHARS: usize = 500;
const MAX_DESCRIPTION_CHARS: usize = 1000;

/// Fetch closed and active markets concurrently and merge them into at most `limit` events.
pub async fn fetch_events(source: &dyn MarketSource, limit: usize) -> Result<Vec<Event>> {
    let (resolved_limit, active_limit) = split_limit(limit);

    let (resolved, active) = tokio::try_join!(
        source.fetch_markets(MarketQuery {
            status: MarketStatus::Closed,
            limit: resolved_limit,
        }),
        source.fetch_markets(MarketQuery {
            status: MarketStatus::Active,
            limit: active_limit,
        }),
    )?;

    let raw_count = resolved.len() + active.len();
    let events = merge_markets(resolved.into_iter().chain(active), limit);
    info!("Ingested {} binary events from {} markets", events.len(), raw_count);

    Ok(events)
}

/// Closed/active request sizes for a refresh of `limit` events.
pub fn split_limit(limit: usize) -> (usize, usize) {
    let ceil_percent = |percent: usize| (limit * percent).div_ceil(100);
    (ceil_percent(RESOLVED_PERCENT), ceil_percent(ACTIVE_PERCENT))
}

/// Deduplicate by id (first wins) and keep only parseable binary markets.
pub fn merge_markets<I>(markets: I, limit: usize) -> Vec<Event>
where
    I: IntoIterator<Item = RawMarket>,
{
    let mut seen = HashSet::new();
    let mut events = Vec::new();

    for market in markets {
        if events.len() >= limit {
            break;
        }

        let Some(event) = to_event(market) else {
            continue;
        };

        if seen.insert(event.id.clone()) {
            events.push(event);
        }
    }

    events
}

/// Convert a raw market, or `None` if it is not a usable binary market.
pub fn to_event(market: RawMarket) -> Option<Event> {
    let id = market.id.filter(|id| !id.is_empty())?;
    let question = market.question.filter(|q| !q.is_empty())?;

    let Some([yes_price, _]) = market.outcome_prices.as_deref().and_then(parse_outcome_prices) else {
        debug!("Skipping market {}: outcome prices not binary", id);
        return None;
    };

    let is_resolved = market.closed.unwrap_or(false) || market.resolved.unwrap_or(false);
    let outcome = if is_resolved { resolve_outcome(yes_price) } else { None };

    Some(Event {
        id,
        question: truncate_chars(&question, MAX_QUESTION_CHARS),
        description: truncate_chars(market.description.as_deref().unwrap_or(""), MAX_DESCRIPTION_CHARS),
        market_probability: Some(yes_price),
        outcome,
        is_resolved,
        volume: parse_volume(market.volume.as_ref()),
    })
}

/// Parse a JSON-encoded price pair such as `["0.65", "0.35"]`.
pub fn parse_outcome_prices(raw: &str) -> Option<[f64; 2]> {
    let values: Vec<serde_json::Value> = serde_json::from_str(raw).ok()?;
    let [yes, no] = values.as_slice() else {
        return None;
    };

    Some([parse_number(yes)?, parse_number(no)?])
}

/// Outcome of a settled market, `None` while the price is not decisive.
pub fn resolve_outcome(yes_price: f64) -> Option<u8> {
    if yes_price >= YES_THRESHOLD {
        Some(1)
    } else if yes_price <= NO_THRESHOLD {
        Some(0)
    } else {
        None
    }
}

fn parse_number(value: &serde_json::Value) -> Option<f64> {
    let n = match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    n.is_finite().then_some(n)
}

fn parse_volume(value: Option<&serde_json::Value>) -> f64 {
    value
        .and_then(parse_number)
        .filter(|v| *v >= 0.0)
        .unwrap_or(0.0)
}

fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}
