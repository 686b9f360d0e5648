//! Per-attempt progress tracker handed to handlers.
//!
//! Single writer: the scheduler creates one tracker per attempt and lends it to
//! the handler as `&mut`, so no locking is needed here. Every mutation emits an
//! event through the [`StreamManager`] when one is attached.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::debug;

use crate::domain::{CompletedStage, EventType, ProgressState, TaskId, Warning};
use crate::ports::{Clock, PricingTable};
use crate::stream::StreamManager;

pub const DEFAULT_ETA_THRESHOLD_PCT: f64 = 10.0;

pub struct ProgressTracker {
    task_id: TaskId,
    state: ProgressState,
    eta_threshold_pct: f64,
    clock: Arc<dyn Clock>,
    streams: Option<StreamManager>,
}

impl ProgressTracker {
    /// Detached tracker: records state, emits nothing.
    pub fn new(task_id: TaskId, total_stages: u32, clock: Arc<dyn Clock>) -> Self {
        let now = clock.now();
        Self {
            task_id,
            state: ProgressState::new(total_stages, now),
            eta_threshold_pct: DEFAULT_ETA_THRESHOLD_PCT,
            clock,
            streams: None,
        }
    }

    pub fn with_streams(mut self, streams: StreamManager) -> Self {
        self.streams = Some(streams);
        self
    }

    pub fn with_eta_threshold(mut self, pct: f64) -> Self {
        self.eta_threshold_pct = pct;
        self
    }

    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    pub fn overall_progress(&self) -> f64 {
        self.state.overall_progress
    }

    /// Report progress `stage_progress_pct` (clamped to 0-100) within `stage_name`.
    ///
    /// A new stage name closes the current stage and advances the index.
    /// Overall progress is `((index - 1) / total) * 100 + pct / total`, and is
    /// never lowered.
    pub fn update_stage(&mut self, stage_name: &str, stage_progress_pct: f64) {
        let now = self.clock.now();
        let pct = clamp_pct(stage_progress_pct);

        if self.state.current_stage_name.as_deref() != Some(stage_name) {
            self.close_stage(now);
            self.state.current_stage_index += 1;
            self.state.current_stage_name = Some(stage_name.to_string());
            self.state.stage_start_time = now;
        }
        self.state.stage_progress = pct;

        let total = f64::from(self.state.total_stages);
        let done = f64::from(self.state.current_stage_index.saturating_sub(1));
        let computed = clamp_pct((done / total) * 100.0 + pct / total);
        self.state.overall_progress = self.state.overall_progress.max(computed);

        self.refresh_timing(now);
        self.emit_progress();
    }

    /// Accumulate usage. Totals never decrease.
    pub fn update_cost(&mut self, units: u64, cost: f64, model_label: &str) {
        let cost = if cost.is_finite() { cost.max(0.0) } else { 0.0 };
        self.state.cost.add(model_label, units, cost);

        let totals = &self.state.cost;
        let data = json!({
            "model": model_label,
            "units": units,
            "cost": cost,
            "total_units": totals.total_units,
            "total_cost": totals.total_cost,
            "by_model": totals.by_model,
        });
        self.emit(EventType::CostUpdate, data);
    }

    /// Price `units` through `pricing` and record them. Unknown models cost 0.
    pub fn record_usage(&mut self, units: u64, model_label: &str, pricing: &dyn PricingTable) -> f64 {
        let rate = pricing.cost_per_unit(model_label).unwrap_or_else(|| {
            debug!(task_id = %self.task_id, model = model_label, "no price for model");
            0.0
        });
        let cost = units as f64 * rate;
        self.update_cost(units, cost, model_label);
        cost
    }

    pub fn add_warning(&mut self, message: impl Into<String>, details: serde_json::Value) {
        let warning = Warning {
            message: message.into(),
            timestamp: self.clock.now(),
            details,
        };
        let data = json!({ "message": warning.message, "details": warning.details });
        self.state.warnings.push(warning);
        self.emit(EventType::Warning, data);
    }

    /// Free-form INFO event from inside a handler.
    pub fn note(&mut self, message: impl Into<String>) {
        let message = message.into();
        self.emit(EventType::Info, json!({ "message": message }));
    }

    /// Linear extrapolation from elapsed time; `None` until overall progress
    /// exceeds the threshold.
    pub fn estimate_completion(&self) -> Option<DateTime<Utc>> {
        let now = self.clock.now();
        let remaining = self.remaining_secs(now)?;
        chrono::Duration::try_milliseconds((remaining * 1000.0) as i64).map(|d| now + d)
    }

    /// Close the current stage and jump to 100%. Called on handler success.
    pub fn finish(&mut self) {
        let now = self.clock.now();
        self.close_stage(now);
        self.state.stage_progress = 100.0;
        self.state.overall_progress = 100.0;
        self.refresh_timing(now);
        self.emit_progress();
    }

    pub fn snapshot(&self) -> ProgressState {
        self.state.clone()
    }

    fn remaining_secs(&self, now: DateTime<Utc>) -> Option<f64> {
        let p = self.state.overall_progress;
        if p <= self.eta_threshold_pct || p <= 0.0 {
            return None;
        }
        let elapsed = elapsed_secs(self.state.start_time, now);
        Some(elapsed * (100.0 - p) / p)
    }

    fn refresh_timing(&mut self, now: DateTime<Utc>) {
        self.state.elapsed_secs = elapsed_secs(self.state.start_time, now);
        let remaining = self.remaining_secs(now);
        self.state.estimated_remaining_secs = remaining;
        self.state.estimated_completion_time = remaining
            .and_then(|r| chrono::Duration::try_milliseconds((r * 1000.0) as i64))
            .map(|d| now + d);
    }

    fn close_stage(&mut self, now: DateTime<Utc>) {
        let Some(name) = self.state.current_stage_name.take() else {
            return;
        };
        let stage = CompletedStage {
            index: self.state.current_stage_index,
            name,
            duration_ms: (now - self.state.stage_start_time).num_milliseconds(),
        };
        let data = json!({
            "stage": stage.name,
            "stage_index": stage.index,
            "total_stages": self.state.total_stages,
            "duration_ms": stage.duration_ms,
        });
        self.state.completed_stages.push(stage);
        self.emit(EventType::StageComplete, data);
    }

    fn emit_progress(&self) {
        if let Some(streams) = &self.streams
            && let Err(e) = streams.publish_progress(self.task_id, &self.state)
        {
            debug!(task_id = %self.task_id, error = %e, "progress not published");
        }
    }

    fn emit(&self, event_type: EventType, data: serde_json::Value) {
        if let Some(streams) = &self.streams
            && let Err(e) = streams.publish(self.task_id, event_type, data)
        {
            debug!(task_id = %self.task_id, error = %e, ?event_type, "event not published");
        }
    }
}

fn clamp_pct(pct: f64) -> f64 {
    if pct.is_nan() { 0.0 } else { pct.clamp(0.0, 100.0) }
}

fn elapsed_secs(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    (to - from).num_milliseconds().max(0) as f64 / 1000.0
}
