use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::error;
use crate::api::AppState;
use crate::calibration::leaderboard::{build_report, CalibrationReport};
use crate::refresh::state::RefreshStatus;

/// Events listed by `GET /api/events`
const EVENT_LIST_LIMIT: usize = 50;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshRequest {
    #[serde(default)]
    event_count: Option<f64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventView {
    pub id: String,
    pub question: String,
    pub market_probability: Option<f64>,
    pub outcome: Option<u8>,
    pub is_resolved: bool,
    pub volume: f64,
    pub estimates: Vec<EventEstimate>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEstimate {
    pub model_id: String,
    pub model_name: String,
    pub probability: f64,
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0:#}")]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        error!("API error: {}", self);
        let body = Json(serde_json::json!({ "error": self.to_string() }));
        (StatusCode::INTERNAL_SERVER_ERROR, body).into_response()
    }
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/refresh", post(trigger_refresh))
        .route("/api/status", get(refresh_status))
        .route("/api/calibration", get(calibration))
        .route("/api/events", get(events))
}

/// Requested event count from an optional JSON body; bad input means "default"
fn requested_event_count(body: &[u8]) -> Option<usize> {
    let request: RefreshRequest = serde_json::from_slice(body).unwrap_or_default();
    request
        .event_count
        .filter(|n| n.is_finite() && *n >= 1.0)
        .map(|n| n as usize)
}

async fn trigger_refresh(State(state): State<AppState>, body: Bytes) -> Json<RefreshStatus> {
    let requested = requested_event_count(&body);
    Json(state.orchestrator.trigger(requested))
}

async fn refresh_status(State(state): State<AppState>) -> Json<RefreshStatus> {
    Json(state.orchestrator.status())
}

async fn calibration(State(state): State<AppState>) -> Result<Json<CalibrationReport>, ApiError> {
    Ok(Json(build_report(&state.db, &state.models)?))
}

async fn events(State(state): State<AppState>) -> Result<Json<Vec<EventView>>, ApiError> {
    let events = state.db.get_events(EVENT_LIST_LIMIT)?;

    let mut views = Vec::with_capacity(events.len());
    for event in events {
        let stored: HashMap<String, f64> = state.db
            .get_estimates_for_event(&event.id)?
            .into_iter()
            .map(|e| (e.model_id, e.probability))
            .collect();

        let estimates = state.models
            .iter()
            .filter_map(|m| {
                stored.get(&m.id).map(|p| EventEstimate {
                    model_id: m.id.clone(),
                    model_name: m.name.clone(),
                    probability: *p,
                })
            })
            .collect();

        views.push(EventView {
            id: event.id,
            question: event.question,
            market_probability: event.market_probability,
            outcome: event.outcome,
            is_resolved: event.is_resolved,
            volume: event.volume,
            estimates,
        });
    }

    Ok(Json(views))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModelConfig;
    use crate::data::types::{Event, MarketQuery, RawMarket};
    use crate::data::MarketSource;
    use crate::estimation::{EstimateError, Estimator};
    use crate::refresh::orchestrator::Orchestrator;
    use crate::storage::persistence::CalibrationDatabase;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Method, Request};
    use std::sync::Arc;
    use tower::ServiceExt;

    /// Keeps a triggered refresh busy long enough to observe the gate
    struct SlowEmptySource;

    #[async_trait]
    impl MarketSource for SlowEmptySource {
        async fn fetch_markets(&self, _query: MarketQuery) -> anyhow::Result<Vec<RawMarket>> {
            tokio::time::sleep(std::time::Duration::from_millis(200)).await;
            Ok(Vec::new())
        }
    }

    struct ConstantEstimator;

    #[async_trait]
    impl Estimator for ConstantEstimator {
        async fn estimate(&self, _: &str, _: &str, _: &str) -> Result<f64, EstimateError> {
            Ok(0.5)
        }
    }

    fn model(id: &str, name: &str) -> ModelConfig {
        ModelConfig {
            id: id.to_string(),
            name: name.to_string(),
            params: "1B".to_string(),
            provider: "Test".to_string(),
            color: "#123456".to_string(),
        }
    }

    fn app() -> (Router, Arc<CalibrationDatabase>) {
        let db = Arc::new(CalibrationDatabase::in_memory().unwrap());
        let models = vec![model("m1", "Model One"), model("m2", "Model Two")];
        let orchestrator = Orchestrator::new(
            Arc::new(SlowEmptySource),
            Arc::new(ConstantEstimator),
            Arc::clone(&db),
            models.iter().map(|m| m.id.clone()).collect(),
        );
        let state = AppState::new(Arc::new(orchestrator), Arc::clone(&db), models);
        (routes().with_state(state), db)
    }

    async fn send(app: &Router, method: Method, uri: &str, body: &str) -> (StatusCode, serde_json::Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[test]
    fn test_requested_event_count() {
        assert_eq!(requested_event_count(br#"{"eventCount": 20}"#), Some(20));
        assert_eq!(requested_event_count(br#"{"eventCount": 0}"#), None);
        assert_eq!(requested_event_count(br#"{"eventCount": "lots"}"#), None);
        assert_eq!(requested_event_count(b""), None);
        assert_eq!(requested_event_count(b"{}"), None);
    }

    #[tokio::test]
    async fn test_status_starts_idle() {
        let (app, _db) = app();
        let (status, json) = send(&app, Method::GET, "/api/status", "").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["phase"], "idle");
        assert_eq!(json["isRunning"], false);
        assert_eq!(json["message"], "Ready");
    }

    #[tokio::test]
    async fn test_refresh_twice_reports_busy() {
        let (app, _db) = app();

        let (status, first) = send(&app, Method::POST, "/api/refresh", r#"{"eventCount": 500}"#).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(first["isRunning"], true);
        assert_eq!(first["phase"], "fetching-events");

        let (_, second) = send(&app, Method::POST, "/api/refresh", "").await;
        assert_eq!(second["isRunning"], true);
        assert_eq!(second["message"], "Refresh already in progress");
    }

    #[tokio::test]
    async fn test_calibration_ranks_models() {
        let (app, db) = app();
        db.upsert_event(&Event {
            id: "e1".to_string(),
            question: "Q?".to_string(),
            description: String::new(),
            market_probability: Some(1.0),
            outcome: Some(1),
            is_resolved: true,
            volume: 10.0,
        })
        .unwrap();
        db.upsert_estimate("e1", "m2", 0.8).unwrap();

        let (status, json) = send(&app, Method::GET, "/api/calibration", "").await;

        assert_eq!(status, StatusCode::OK);
        let models = json["models"].as_array().unwrap();
        assert_eq!(models[0]["modelId"], "m2");
        assert_eq!(models[0]["rank"], 1);
        assert_eq!(models[0]["estimateCount"], 1);
        assert_eq!(models[1]["modelId"], "m1");
        assert!(models[1]["logLoss"].is_null());
        assert_eq!(json["stats"]["totalEvents"], 1);
    }

    #[tokio::test]
    async fn test_events_list_configured_estimates() {
        let (app, db) = app();
        db.upsert_event(&Event {
            id: "e1".to_string(),
            question: "Q?".to_string(),
            description: String::new(),
            market_probability: Some(0.3),
            outcome: None,
            is_resolved: false,
            volume: 10.0,
        })
        .unwrap();
        db.upsert_estimate("e1", "m1", 0.25).unwrap();
        db.upsert_estimate("e1", "retired-model", 0.9).unwrap();

        let (status, json) = send(&app, Method::GET, "/api/events", "").await;

        assert_eq!(status, StatusCode::OK);
        let events = json.as_array().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0]["marketProbability"], 0.3);
        assert!(events[0]["outcome"].is_null());

        let estimates = events[0]["estimates"].as_array().unwrap();
        assert_eq!(estimates.len(), 1);
        assert_eq!(estimates[0]["modelName"], "Model One");
        assert_eq!(estimates[0]["probability"], 0.25);
    }
}
