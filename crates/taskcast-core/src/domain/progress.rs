//! Progress model: the read-only shape of a task's in-flight progress.
//!
//! `ProgressTracker` owns and mutates one of these per attempt; everything
//! else (stream status, events) only ever sees snapshots.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Cost accumulated for one model label.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelCost {
    pub units: u64,
    pub cost: f64,
    pub calls: u64,
}

/// Units and money spent by a task, overall and per model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CostTracking {
    pub total_units: u64,
    pub total_cost: f64,
    pub by_model: BTreeMap<String, ModelCost>,
}

impl CostTracking {
    /// Add usage. Totals never decrease: negative or non-finite costs count as zero.
    pub fn add(&mut self, model: &str, units: u64, cost: f64) {
        let cost = if cost.is_finite() { cost.max(0.0) } else { 0.0 };

        self.total_units = self.total_units.saturating_add(units);
        self.total_cost += cost;

        let entry = self.by_model.entry(model.to_string()).or_default();
        entry.units = entry.units.saturating_add(units);
        entry.cost += cost;
        entry.calls += 1;
    }
}

/// A warning raised by a handler. Warnings are append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Warning {
    pub message: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub details: serde_json::Value,
}

/// A stage that has been left behind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletedStage {
    pub index: u32,
    pub name: String,
    pub duration_ms: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressState {
    pub total_stages: u32,

    /// 1-based once a stage has started, 0 before the first `update_stage`.
    pub current_stage_index: u32,
    pub current_stage_name: Option<String>,

    /// Progress within the current stage, 0-100.
    pub stage_progress: f64,

    /// Progress across all stages, 0-100, non-decreasing.
    pub overall_progress: f64,

    pub start_time: DateTime<Utc>,
    pub stage_start_time: DateTime<Utc>,
    pub elapsed_secs: f64,
    pub estimated_completion_time: Option<DateTime<Utc>>,
    pub estimated_remaining_secs: Option<f64>,

    pub completed_stages: Vec<CompletedStage>,
    pub cost: CostTracking,
    pub warnings: Vec<Warning>,
}

impl ProgressState {
    pub fn new(total_stages: u32, now: DateTime<Utc>) -> Self {
        Self {
            total_stages: total_stages.max(1),
            current_stage_index: 0,
            current_stage_name: None,
            stage_progress: 0.0,
            overall_progress: 0.0,
            start_time: now,
            stage_start_time: now,
            elapsed_secs: 0.0,
            estimated_completion_time: None,
            estimated_remaining_secs: None,
            completed_stages: Vec::new(),
            cost: CostTracking::default(),
            warnings: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cost_accumulates_per_model() {
        let mut cost = CostTracking::default();
        cost.add("gpt-large", 1000, 0.02);
        cost.add("gpt-small", 500, 0.001);
        cost.add("gpt-large", 250, 0.005);

        assert_eq!(cost.total_units, 1750);
        assert!((cost.total_cost - 0.026).abs() < 1e-9);

        let large = &cost.by_model["gpt-large"];
        assert_eq!(large.units, 1250);
        assert_eq!(large.calls, 2);
        assert!((large.cost - 0.025).abs() < 1e-9);
    }

    #[test]
    fn cost_never_decreases() {
        let mut cost = CostTracking::default();
        cost.add("m", 10, 1.0);
        cost.add("m", 0, -5.0);
        cost.add("m", 0, f64::NAN);

        assert_eq!(cost.total_cost, 1.0);
        assert_eq!(cost.by_model["m"].calls, 3);
    }

    #[test]
    fn zero_stages_are_bumped_to_one() {
        let state = ProgressState::new(0, Utc::now());
        assert_eq!(state.total_stages, 1);
    }
}
