//! Scenario execution engine: replays a [`ScenarioCase`] against a fresh
//! in-memory pipeline and checks its assertions.

use dpdau_core::{BudgetCaps, CoreError, EventRecord, Pipeline, PipelineConfig};

use crate::fixtures::{ScenarioAssertion, ScenarioCase};

/// Outcome of a single assertion within a scenario.
#[derive(Debug, Clone)]
pub struct AssertionResult {
    pub description: String,
    pub passed: bool,
    pub detail: Option<String>,
}

/// Outcome of one scenario case: its name plus each assertion's result.
#[derive(Debug, Clone)]
pub struct ScenarioResult {
    pub name: String,
    pub assertions: Vec<AssertionResult>,
}

impl ScenarioResult {
    pub fn passed(&self) -> bool {
        self.assertions.iter().all(|a| a.passed)
    }
}

/// Runs scenario cases against fresh in-memory pipelines.
pub struct ScenarioRunner;

impl ScenarioRunner {
    pub fn run(case: &ScenarioCase) -> ScenarioResult {
        let config = case.config.apply(PipelineConfig::default());
        let pipeline = match Pipeline::in_memory_silent(config) {
            Ok(p) => p,
            Err(err) => {
                return ScenarioResult {
                    name: case.name.clone(),
                    assertions: vec![AssertionResult {
                        description: "pipeline construction".to_string(),
                        passed: false,
                        detail: Some(err.to_string()),
                    }],
                };
            }
        };

        for event in &case.events {
            let record = EventRecord {
                user_id: event.user_id.clone(),
                day: event.day.clone(),
                op: event.op,
                metadata: event.metadata.clone(),
            };
            // Scenario fixtures assume every listed event is well-formed; a
            // malformed fixture event is a fixture bug, not a pipeline outcome.
            if let Err(err) = pipeline.ingest_event(&record) {
                return ScenarioResult {
                    name: case.name.clone(),
                    assertions: vec![AssertionResult {
                        description: format!("ingest {} on {}", event.user_id, event.day),
                        passed: false,
                        detail: Some(err.to_string()),
                    }],
                };
            }
        }

        if case.replay_deletions {
            if let Err(err) = pipeline.replay_deletions() {
                return ScenarioResult {
                    name: case.name.clone(),
                    assertions: vec![AssertionResult {
                        description: "replay_deletions".to_string(),
                        passed: false,
                        detail: Some(err.to_string()),
                    }],
                };
            }
        }

        let assertions = case
            .assertions
            .iter()
            .map(|assertion| check(&pipeline, assertion))
            .collect();

        ScenarioResult { name: case.name.clone(), assertions }
    }
}

fn check(pipeline: &Pipeline, assertion: &ScenarioAssertion) -> AssertionResult {
    match assertion {
        ScenarioAssertion::Dau { day, expect } => {
            let description = format!("dau({day}) == {expect}");
            match pipeline.windows().get_dau(pipeline.ledger(), day) {
                Ok((actual, _, _)) => AssertionResult {
                    passed: (actual - expect).abs() < 1e-9,
                    detail: Some(format!("actual={actual}")),
                    description,
                },
                Err(err) => AssertionResult { passed: false, detail: Some(err.to_string()), description },
            }
        }
        ScenarioAssertion::Mau { end_day, window_days, expect } => {
            let description = format!("mau({end_day}, {window_days}d) == {expect}");
            match pipeline.windows().get_mau(pipeline.ledger(), end_day, *window_days) {
                Ok((actual, _)) => AssertionResult {
                    passed: (actual - expect).abs() < 1e-9,
                    detail: Some(format!("actual={actual}")),
                    description,
                },
                Err(err) => AssertionResult { passed: false, detail: Some(err.to_string()), description },
            }
        }
        ScenarioAssertion::BudgetRemaining { metric, day, expect, tolerance } => {
            let description = format!("remaining_budget({metric}, {day}) == {expect}");
            let caps = BudgetCaps {
                dau: pipeline.config().dp.dau_budget_total,
                mau: pipeline.config().dp.mau_budget_total,
            };
            match pipeline.accountant().remaining_budget(metric, day, caps.for_metric(metric)) {
                Ok(actual) => AssertionResult {
                    passed: (actual - expect).abs() < *tolerance,
                    detail: Some(format!("actual={actual}")),
                    description,
                },
                Err(err) => AssertionResult { passed: false, detail: Some(err.to_string()), description },
            }
        }
        ScenarioAssertion::ReleaseOk { metric, day } => {
            let description = format!("release({metric}, {day}) ok");
            let result = release(pipeline, metric, day);
            match result {
                Ok(()) => AssertionResult { passed: true, detail: None, description },
                Err(err) => AssertionResult { passed: false, detail: Some(err.to_string()), description },
            }
        }
        ScenarioAssertion::ReleaseBudgetExceeded { metric, day } => {
            let description = format!("release({metric}, {day}) budget exceeded");
            match release(pipeline, metric, day) {
                Err(CoreError::BudgetExceeded { .. }) => {
                    AssertionResult { passed: true, detail: None, description }
                }
                Ok(()) => AssertionResult {
                    passed: false,
                    detail: Some("release unexpectedly succeeded".to_string()),
                    description,
                },
                Err(err) => AssertionResult { passed: false, detail: Some(err.to_string()), description },
            }
        }
        ScenarioAssertion::ResetBudget { metric, period } => {
            let description = format!("reset_budget({metric}, {period})");
            match pipeline.reset_budget(metric, period) {
                Ok(()) => AssertionResult { passed: true, detail: None, description },
                Err(err) => AssertionResult { passed: false, detail: Some(err.to_string()), description },
            }
        }
    }
}

fn release(pipeline: &Pipeline, metric: &str, day: &str) -> Result<(), CoreError> {
    match metric {
        "dau" => pipeline.get_daily_release(day).map(|_| ()),
        "mau" => pipeline.get_mau_release(day, None).map(|_| ()),
        other => Err(CoreError::InvalidConfig(format!("unknown metric '{other}'"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{ConfigOverrides, ScenarioEvent};

    #[test]
    fn scenario_passes_when_dau_matches() {
        let case = ScenarioCase {
            name: "single day".to_string(),
            config: ConfigOverrides::default(),
            events: vec![
                ScenarioEvent { user_id: "alice".to_string(), day: "2025-10-01".to_string(), op: '+', metadata: None },
                ScenarioEvent { user_id: "bob".to_string(), day: "2025-10-01".to_string(), op: '+', metadata: None },
            ],
            replay_deletions: false,
            assertions: vec![ScenarioAssertion::Dau { day: "2025-10-01".to_string(), expect: 2.0 }],
        };
        let result = ScenarioRunner::run(&case);
        assert!(result.passed(), "{:?}", result.assertions);
    }

    #[test]
    fn scenario_fails_when_dau_mismatches() {
        let case = ScenarioCase {
            name: "single day".to_string(),
            config: ConfigOverrides::default(),
            events: vec![ScenarioEvent {
                user_id: "alice".to_string(),
                day: "2025-10-01".to_string(),
                op: '+',
                metadata: None,
            }],
            replay_deletions: false,
            assertions: vec![ScenarioAssertion::Dau { day: "2025-10-01".to_string(), expect: 5.0 }],
        };
        let result = ScenarioRunner::run(&case);
        assert!(!result.passed());
    }

    #[test]
    fn budget_exceeded_assertion_matches_repeated_releases() {
        let case = ScenarioCase {
            name: "budget exhaustion".to_string(),
            config: ConfigOverrides { dau_budget_total: Some(0.4), ..Default::default() },
            events: vec![ScenarioEvent {
                user_id: "alice".to_string(),
                day: "2025-10-01".to_string(),
                op: '+',
                metadata: None,
            }],
            replay_deletions: false,
            assertions: vec![
                ScenarioAssertion::ReleaseOk { metric: "dau".to_string(), day: "2025-10-01".to_string() },
                ScenarioAssertion::ReleaseBudgetExceeded { metric: "dau".to_string(), day: "2025-10-01".to_string() },
            ],
        };
        let result = ScenarioRunner::run(&case);
        assert!(result.passed(), "{:?}", result.assertions);
    }
}
