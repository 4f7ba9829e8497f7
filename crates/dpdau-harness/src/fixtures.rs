//! Scenario fixture loading: JSON files that each encode a turnstile event
//! sequence plus expected DAU/MAU/budget assertions (spec.md §8, scenarios S1-S5).

use serde::{Deserialize, Serialize};

fn default_tolerance() -> f64 {
    1e-6
}

/// One turnstile event to feed into the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioEvent {
    pub user_id: String,
    pub day: String,
    pub op: char,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

/// A sparse override of the engine's DP and sketch settings. Fields left
/// `None` keep the default.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigOverrides {
    pub epsilon_dau: Option<f64>,
    pub epsilon_mau: Option<f64>,
    pub dau_budget_total: Option<f64>,
    pub mau_budget_total: Option<f64>,
    pub mau_window_days: Option<i64>,
    pub sketch_impl: Option<String>,
    pub sketch_k: Option<u32>,
}

impl ConfigOverrides {
    pub fn apply(&self, mut config: dpdau_core::PipelineConfig) -> dpdau_core::PipelineConfig {
        if let Some(v) = self.epsilon_dau {
            config.dp.epsilon_dau = v;
        }
        if let Some(v) = self.epsilon_mau {
            config.dp.epsilon_mau = v;
        }
        if let Some(v) = self.dau_budget_total {
            config.dp.dau_budget_total = v;
        }
        if let Some(v) = self.mau_budget_total {
            config.dp.mau_budget_total = v;
        }
        if let Some(v) = self.mau_window_days {
            config.sketch.mau_window_days = v;
        }
        if let Some(ref v) = self.sketch_impl {
            config.sketch.impl_name = v.clone();
        }
        if let Some(v) = self.sketch_k {
            config.sketch.k = v;
        }
        config
    }
}

/// An expectation checked after a scenario's events (and optional deletion
/// replay) have been applied.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScenarioAssertion {
    /// The exact distinct-user count for one day matches `expect`. No DP noise,
    /// no budget consumed — reads the window manager's cached snapshot directly.
    Dau { day: String, expect: f64 },
    /// The exact distinct-user count over a rolling window matches `expect`.
    Mau { end_day: String, window_days: i64, expect: f64 },
    /// Remaining DP budget for `(metric, day)`'s month matches `expect` within `tolerance`.
    BudgetRemaining {
        metric: String,
        day: String,
        expect: f64,
        #[serde(default = "default_tolerance")]
        tolerance: f64,
    },
    /// A release call for `(metric, day)` must succeed.
    ReleaseOk { metric: String, day: String },
    /// A release call for `(metric, day)` must fail with a budget-exceeded error.
    ReleaseBudgetExceeded { metric: String, day: String },
    /// Resets a metric's budget for the given period (e.g. `"2025-10"`). Always
    /// "passes" unless the reset call itself errors.
    ResetBudget { metric: String, period: String },
}

/// One named scenario: an event sequence, an optional deletion replay, and the
/// assertions checked afterward.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioCase {
    pub name: String,
    #[serde(default)]
    pub config: ConfigOverrides,
    pub events: Vec<ScenarioEvent>,
    #[serde(default)]
    pub replay_deletions: bool,
    pub assertions: Vec<ScenarioAssertion>,
}

/// A JSON file's worth of scenarios.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioSet {
    pub version: String,
    pub cases: Vec<ScenarioCase>,
}

impl ScenarioSet {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_file(path: &std::path::Path) -> Result<Self, Box<dyn std::error::Error>> {
        let content = std::fs::read_to_string(path)?;
        Ok(Self::from_json(&content)?)
    }
}
