use anyhow::Result;
use futures::future::join_all;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use crate::data::ingest;
use crate::data::types::Event;
use crate::data::MarketSource;
use crate::estimation::{EstimateError, Estimator};
use crate::monitoring::logger::CsvLogger;
use crate::refresh::state::{RefreshPhase, RefreshState, RefreshStatus, RunGuard};
use crate::storage::persistence::CalibrationDatabase;

/// Upper bound on events pulled per refresh; also the default.
pub const MAX_EVENT_COUNT: usize = 100;

/// Estimate requests in flight at once. A batch fully settles before the next starts.
pub const BATCH_SIZE: usize = 10;

/// Missing or zero counts mean the default; anything else is capped.
pub fn clamp_event_count(requested: Option<usize>) -> usize {
    match requested {
        Some(n) if n > 0 => n.min(MAX_EVENT_COUNT),
        _ => MAX_EVENT_COUNT,
    }
}

/// One (event, model) pair that has no stored estimate yet.
#[derive(Debug)]
struct EstimateTask<'a> {
    event: &'a Event,
    model_id: &'a str,
}

/// Drives refresh cycles: fetch events, store them, fill missing estimates.
pub struct Orchestrator {
    source: Arc<dyn MarketSource>,
    estimator: Arc<dyn Estimator>,
    db: Arc<CalibrationDatabase>,
    model_ids: Vec<String>,
    state: Arc<RefreshState>,
    audit_log: Option<CsvLogger>,
}

impl Orchestrator {
    pub fn new(
        source: Arc<dyn MarketSource>,
        estimator: Arc<dyn Estimator>,
        db: Arc<CalibrationDatabase>,
        model_ids: Vec<String>,
    ) -> Self {
        Self {
            source,
            estimator,
            db,
            model_ids,
            state: Arc::new(RefreshState::new()),
            audit_log: None,
        }
    }

    pub fn with_audit_log(mut self, logger: CsvLogger) -> Self {
        self.audit_log = Some(logger);
        self
    }

    pub fn status(&self) -> RefreshStatus {
        self.state.snapshot()
    }

    /// Start a refresh in the background and return the status right away.
    ///
    /// If a refresh is already running nothing is started and the current
    /// status comes back with a busy message.
    pub fn trigger(self: &Arc<Self>, requested: Option<usize>) -> RefreshStatus {
        let Some(guard) = self.state.try_begin() else {
            info!("Refresh requested while one is running");
            return self.state.busy_snapshot();
        };

        let event_count = clamp_event_count(requested);
        let status = self.state.snapshot();

        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.execute(event_count, guard).await;
        });

        status
    }

    /// Run a refresh on the current task and return the settled status.
    #[cfg(test)]
    async fn refresh(&self, requested: Option<usize>) -> RefreshStatus {
        let Some(guard) = self.state.try_begin() else {
            return self.state.busy_snapshot();
        };

        self.execute(clamp_event_count(requested), guard).await;
        self.state.snapshot()
    }

    async fn execute(&self, event_count: usize, guard: RunGuard) {
        info!("Refresh started (up to {} events)", event_count);

        match self.collect(event_count).await {
            Ok(()) => {
                let status = self.state.snapshot();
                let collected = status.completed.saturating_sub(status.errors);
                info!(
                    "Refresh complete: {} tasks, {} errors",
                    status.completed, status.errors
                );
                self.state.set_phase(
                    RefreshPhase::Done,
                    format!("Complete! {} estimates collected.", collected),
                );
            }
            Err(e) => {
                error!("Refresh failed: {:#}", e);
                self.state.set_phase(RefreshPhase::Error, format!("Error: {:#}", e));
            }
        }

        // Release the gate only once the final phase is visible. If this
        // future unwinds instead, the guard records the error phase itself.
        drop(guard);
    }

    async fn collect(&self, event_count: usize) -> Result<()> {
        self.state.set_phase(RefreshPhase::FetchingEvents, "Fetching events from Polymarket...");

        let events = ingest::fetch_events(self.source.as_ref(), event_count).await?;
        self.db.upsert_events(&events)?;

        let tasks = self.pending_tasks(&events)?;
        self.state.set_total(tasks.len());
        self.state.set_phase(
            RefreshPhase::RunningModels,
            format!(
                "Running {} estimates ({} events × {} models)...",
                tasks.len(),
                events.len(),
                self.model_ids.len()
            ),
        );
        info!("{} estimate tasks queued", tasks.len());

        for batch in tasks.chunks(BATCH_SIZE) {
            join_all(batch.iter().map(|task| self.run_task(task))).await;
        }

        Ok(())
    }

    /// Every (event, model) pair without a stored estimate
    fn pending_tasks<'a>(&'a self, events: &'a [Event]) -> Result<Vec<EstimateTask<'a>>> {
        let mut tasks = Vec::new();
        for event in events {
            for model_id in &self.model_ids {
                if !self.db.has_estimate(&event.id, model_id)? {
                    tasks.push(EstimateTask { event, model_id });
                }
            }
        }
        Ok(tasks)
    }

    async fn run_task(&self, task: &EstimateTask<'_>) {
        let result = self.request_estimate(task).await;

        match &result {
            Ok(p) => debug!("[{}] {} -> {:.3}", task.model_id, task.event.id, p),
            Err(e) => {
                warn!("[{}] {} failed: {}", task.model_id, task.event.id, e);
                self.state.record_error();
            }
        }

        if let Some(log) = &self.audit_log {
            if let Err(e) = log.log_estimate(&task.event.id, task.model_id, &result) {
                warn!("Failed to write estimate log: {}", e);
            }
        }

        self.state.record_completed();
    }

    async fn request_estimate(&self, task: &EstimateTask<'_>) -> Result<f64, EstimateError> {
        let probability = self.estimator
            .estimate(task.model_id, &task.event.question, &task.event.description)
            .await?;

        if !(0.0..=1.0).contains(&probability) {
            return Err(EstimateError::OutOfRange(probability));
        }

        self.db.upsert_estimate(&task.event.id, task.model_id, probability)?;
        Ok(probability)
    }
}
