use anyhow::Result;
use serde::Serialize;
use std::cmp::Ordering;
use crate::calibration::metrics::{
    brier_score, calibration_bias, expected_calibration_error, log_loss, reliability_diagram_data,
    CalibrationInput, ReliabilityPoint, DEFAULT_BINS,
};
use crate::config::ModelConfig;
use crate::storage::persistence::{CalibrationDatabase, DatabaseStats};

/// Scores for one model over all its resolved estimates.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelMetrics {
    pub model_id: String,
    pub model_name: String,
    pub params: String,
    pub provider: String,
    pub color: String,
    pub brier_score: f64,
    /// Serialized as `null` when the model has no resolved estimates
    pub log_loss: f64,
    pub ece: f64,
    pub bias: f64,
    pub estimate_count: usize,
    pub reliability_data: Vec<ReliabilityPoint>,
    pub rank: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct CalibrationReport {
    pub models: Vec<ModelMetrics>,
    pub stats: DatabaseStats,
}

pub fn score_model(model: &ModelConfig, data: &[CalibrationInput]) -> ModelMetrics {
    ModelMetrics {
        model_id: model.id.clone(),
        model_name: model.name.clone(),
        params: model.params.clone(),
        provider: model.provider.clone(),
        color: model.color.clone(),
        brier_score: brier_score(data),
        log_loss: log_loss(data),
        ece: expected_calibration_error(data, DEFAULT_BINS),
        bias: calibration_bias(data),
        estimate_count: data.len(),
        reliability_data: reliability_diagram_data(data, DEFAULT_BINS),
        rank: 0,
    }
}

/// Sort by Brier score ascending, models without data last, and assign 1-based ranks.
///
/// The sort is stable, so ties (and the zero-data tail) keep their input order.
pub fn rank_models(metrics: &mut [ModelMetrics]) {
    metrics.sort_by(|a, b| match (a.estimate_count == 0, b.estimate_count == 0) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => a.brier_score.total_cmp(&b.brier_score),
    });

    for (i, m) in metrics.iter_mut().enumerate() {
        m.rank = i + 1;
    }
}

/// Score every configured model from the store and rank them.
pub fn build_report(db: &CalibrationDatabase, models: &[ModelConfig]) -> Result<CalibrationReport> {
    let mut scored = models
        .iter()
        .map(|model| {
            let data = db.get_calibration_inputs(&model.id)?;
            Ok(score_model(model, &data))
        })
        .collect::<Result<Vec<_>>>()?;

    rank_models(&mut scored);

    Ok(CalibrationReport {
        models: scored,
        stats: db.get_stats()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::types::Event;

    fn model(id: &str) -> ModelConfig {
        ModelConfig {
            id: id.to_string(),
            name: id.to_uppercase(),
            params: "1B".to_string(),
            provider: "Test".to_string(),
            color: "#000000".to_string(),
        }
    }

    fn scored(id: &str, data: &[(f64, u8)]) -> ModelMetrics {
        let inputs: Vec<_> = data.iter().map(|&(p, o)| CalibrationInput::new(p, o)).collect();
        score_model(&model(id), &inputs)
    }

    fn ranked_ids(metrics: &[ModelMetrics]) -> Vec<&str> {
        metrics.iter().map(|m| m.model_id.as_str()).collect()
    }

    #[test]
    fn test_score_model_without_data() {
        let m = scored("empty", &[]);
        assert_eq!(m.estimate_count, 0);
        assert_eq!(m.brier_score, 1.0);
        assert_eq!(m.log_loss, f64::INFINITY);
        assert_eq!(m.ece, 0.0);
        assert!(m.reliability_data.is_empty());

        let json = serde_json::to_value(&m).unwrap();
        assert!(json["logLoss"].is_null());
        assert_eq!(json["modelName"], "EMPTY");
    }

    #[test]
    fn test_zero_data_models_rank_last() {
        // A perfect-looking sentinel must not beat a model with real data
        let mut metrics = vec![
            scored("none-a", &[]),
            scored("bad", &[(0.9, 0), (0.8, 0)]),
            scored("none-b", &[]),
            scored("good", &[(0.9, 1), (0.2, 0)]),
        ];

        rank_models(&mut metrics);
        assert_eq!(ranked_ids(&metrics), vec!["good", "bad", "none-a", "none-b"]);
        let ranks: Vec<_> = metrics.iter().map(|m| m.rank).collect();
        assert_eq!(ranks, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_ranking_is_idempotent() {
        let mut metrics = vec![
            scored("a", &[(0.5, 1)]),
            scored("b", &[(0.5, 0)]),
            scored("c", &[]),
            scored("d", &[(0.1, 0)]),
        ];

        rank_models(&mut metrics);
        let first = metrics.clone();
        rank_models(&mut metrics);

        assert_eq!(metrics, first);
        // Equal Brier scores keep their input order
        assert_eq!(ranked_ids(&metrics), vec!["d", "a", "b", "c"]);
    }

    #[test]
    fn test_build_report_end_to_end() {
        let db = CalibrationDatabase::in_memory().unwrap();
        let outcomes = [1u8, 0, 1];
        let events: Vec<_> = outcomes
            .iter()
            .enumerate()
            .map(|(i, &o)| Event {
                id: format!("e{}", i),
                question: format!("Question {}?", i),
                description: String::new(),
                market_probability: Some(f64::from(o)),
                outcome: Some(o),
                is_resolved: true,
                volume: 100.0,
            })
            .collect();
        db.upsert_events(&events).unwrap();

        for (i, p) in [0.9, 0.2, 0.6].iter().enumerate() {
            db.upsert_estimate(&format!("e{}", i), "sharp", *p).unwrap();
            db.upsert_estimate(&format!("e{}", i), "coin", 0.5).unwrap();
        }

        let report = build_report(&db, &[model("idle"), model("coin"), model("sharp")]).unwrap();
        assert_eq!(ranked_ids(&report.models), vec!["sharp", "coin", "idle"]);

        let sharp = &report.models[0];
        assert_eq!(sharp.rank, 1);
        assert_eq!(sharp.estimate_count, 3);
        assert!((sharp.brier_score - 0.07).abs() < 1e-9);
        assert!((report.models[1].brier_score - 0.25).abs() < 1e-9);
        assert_eq!(report.models[2].estimate_count, 0);

        assert_eq!(report.stats.total_events, 3);
        assert_eq!(report.stats.total_estimates, 6);
    }
}
