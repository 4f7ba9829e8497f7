//! Orchestrator: wires the ledger, accountant, sketch factory, and window
//! manager into the ingest-then-release lifecycle (§4.6).
//!
//! DAU uses the Laplace mechanism (pure epsilon-DP, exact for a single
//! day-snapshot release). MAU uses the Gaussian mechanism, since its
//! sensitivity bound (`w_bound`, the most days one user can touch inside the
//! window) is looser and the Gaussian's `(epsilon, delta)` budget absorbs that
//! more gracefully than Laplace would.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::NaiveDate;

use dpdau_membrane::hashing::chrono_like;
use dpdau_membrane::{gaussian_mechanism, laplace_mechanism, seed_for, user_key, user_root, HashSecret};

use crate::accountant::{BudgetCaps, PrivacyAccountant};
use crate::config::PipelineConfig;
use crate::error::{CoreError, CoreResult};
use crate::ledger::{ActivityEntry, ErasureEntry, Ledger};
use crate::log::{LogEmitter, LogEntry, LogLevel, NullEmitter};
use crate::sketches::{SketchConfig, SketchFactory};
use crate::window::WindowManager;

/// One turnstile event: a user's `+`/`-` activity on a given day.
#[derive(Debug, Clone)]
pub struct EventRecord {
    pub user_id: String,
    pub day: String,
    pub op: char,
    pub metadata: Option<serde_json::Value>,
}

impl EventRecord {
    pub fn insert(user_id: impl Into<String>, day: impl Into<String>) -> Self {
        Self { user_id: user_id.into(), day: day.into(), op: '+', metadata: None }
    }

    pub fn retract(user_id: impl Into<String>, day: impl Into<String>) -> Self {
        Self { user_id: user_id.into(), day: day.into(), op: '-', metadata: None }
    }
}

/// A completed differentially-private release for one metric/day.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ReleasePayload {
    pub metric: String,
    pub day: String,
    pub exact_value: f64,
    pub noisy_value: f64,
    pub mechanism: String,
    pub epsilon: f64,
    pub delta: f64,
    pub lower_95: f64,
    pub upper_95: f64,
    pub seed: u64,
    pub sketch_impl: String,
    pub budget_remaining: f64,
    /// Window size in days. `None` for DAU releases, `Some(_)` for MAU.
    pub window_days: Option<i64>,
}

fn ordinal_for(day_iso: &str) -> CoreResult<chrono_like::Ordinal> {
    let date = NaiveDate::parse_from_str(day_iso, "%Y-%m-%d")
        .map_err(|e| CoreError::InvalidEvent(format!("invalid day '{day_iso}': {e}")))?;
    Ok(chrono_like::Ordinal::new(day_iso, date.num_days_from_ce() as i64))
}

pub struct Pipeline {
    config: PipelineConfig,
    secret: HashSecret,
    ledger: Ledger,
    accountant: PrivacyAccountant,
    windows: WindowManager,
    log: Arc<dyn LogEmitter>,
}

impl Pipeline {
    pub fn open(config: PipelineConfig, log: Arc<dyn LogEmitter>) -> CoreResult<Self> {
        config.validate()?;
        let data_dir = config.storage.data_dir.clone();
        let ledger = Ledger::open(&data_dir.join("ledger.sqlite3"))?;
        let accountant = PrivacyAccountant::open(&data_dir.join("accountant.sqlite3"))?;
        Self::build(config, ledger, accountant, log)
    }

    pub fn in_memory(config: PipelineConfig, log: Arc<dyn LogEmitter>) -> CoreResult<Self> {
        config.validate()?;
        let ledger = Ledger::open_in_memory()?;
        let accountant = PrivacyAccountant::open_in_memory()?;
        Self::build(config, ledger, accountant, log)
    }

    fn build(config: PipelineConfig, ledger: Ledger, accountant: PrivacyAccountant, log: Arc<dyn LogEmitter>) -> CoreResult<Self> {
        let secret = match &config.security.hash_salt_secret {
            Some(raw) => HashSecret::parse(raw),
            None => HashSecret::random(),
        };
        let sketch_config = SketchConfig {
            k: config.sketch.k,
            use_bloom_for_diff: config.sketch.use_bloom_for_diff,
            bloom_fp_rate: config.sketch.bloom_fp_rate,
        };
        let factory = Arc::new(SketchFactory::new(sketch_config, config.sketch.impl_name.clone())?);
        let windows = WindowManager::new(factory);
        Ok(Self { config, secret, ledger, accountant, windows, log })
    }

    /// Convenience constructor with a [`NullEmitter`] sink.
    pub fn in_memory_silent(config: PipelineConfig) -> CoreResult<Self> {
        Self::in_memory(config, Arc::new(NullEmitter))
    }

    pub fn ingest_event(&self, event: &EventRecord) -> CoreResult<()> {
        self.ingest_batch(std::slice::from_ref(event))?
            .into_iter()
            .next()
            .expect("ingest_batch returns one outcome per input event")
    }

    /// Builds the ledger row for one event plus, for a `-` event, the raw
    /// `(user_root, day, metadata.days hint)` needed to later derive its
    /// erasure fan-out. The fan-out itself is *not* resolved here: resolving it
    /// via `ledger.days_for_user` before the batch's own activity rows are
    /// written would miss same-batch days for this user (§4.7 requires batched
    /// ingestion to dirty the same days sequential `ingest_event` calls would).
    fn derive_entry(
        &self,
        event: &EventRecord,
    ) -> CoreResult<(ActivityEntry, Option<(Vec<u8>, String, Vec<String>)>)> {
        if event.op != '+' && event.op != '-' {
            return Err(CoreError::InvalidEvent(format!("unsupported op '{}'", event.op)));
        }
        let ordinal = ordinal_for(&event.day)?;
        let key = user_key(&self.secret, &event.user_id, &ordinal, self.config.security.hash_salt_rotation_days);
        let root = user_root(&self.secret, &event.user_id);
        let metadata_json = serde_json::to_string(event.metadata.as_ref().unwrap_or(&serde_json::json!({})))
            .expect("serde_json::Value always serializes");

        let entry = ActivityEntry {
            day: event.day.clone(),
            user_key: key.to_vec(),
            user_root: root.to_vec(),
            op: event.op,
            metadata_json,
        };

        let erasure = if event.op == '-' {
            let days_hint: Vec<String> = event
                .metadata
                .as_ref()
                .and_then(|m| m.get("days"))
                .and_then(|d| d.as_array())
                .map(|arr| arr.iter().filter_map(|v| v.as_str().map(String::from)).collect())
                .unwrap_or_default();
            Some((root.to_vec(), event.day.clone(), days_hint))
        } else {
            None
        };

        Ok((entry, erasure))
    }

    /// Ingests a batch of events. Per spec, a batch is not fail-fast: an invalid
    /// event at index `i` produces an `Err` at `result[i]` and every other event
    /// still ingests normally. A store-level failure (e.g. the durable write
    /// itself) is returned as the outer `Err` since it affects the whole batch.
    pub fn ingest_batch(&self, events: &[EventRecord]) -> CoreResult<Vec<CoreResult<()>>> {
        let mut entries = Vec::with_capacity(events.len());
        let mut outcomes = Vec::with_capacity(events.len());
        let mut dirty_days: BTreeSet<String> = BTreeSet::new();
        let mut erasure_drafts: Vec<(Vec<u8>, String, Vec<String>)> = Vec::new();

        for event in events {
            match self.derive_entry(event) {
                Ok((entry, erasure)) => {
                    dirty_days.insert(event.day.clone());
                    if let Some(erasure) = erasure {
                        erasure_drafts.push(erasure);
                    }
                    entries.push(entry);
                    outcomes.push(Ok(()));
                }
                Err(err) => outcomes.push(Err(err)),
            }
        }

        // Activity rows (including same-batch prior days for this user) must be
        // durable before resolving each erasure's day fan-out below.
        self.ledger.record_activity_batch(&entries)?;

        for (root, event_day, days_hint) in erasure_drafts {
            let mut days = days_hint;
            if days.is_empty() {
                days = self.ledger.days_for_user(&root)?;
            }
            if !days.contains(&event_day) {
                days.push(event_day);
            }
            for day in &days {
                dirty_days.insert(day.clone());
            }
            self.ledger.record_erasure(&ErasureEntry { id: None, user_root: root, days, pending: true })?;
        }

        for day in &dirty_days {
            self.windows.mark_dirty(day);
        }

        self.log.emit(LogEntry::new(
            LogLevel::Info,
            "events_ingested",
            serde_json::json!({ "count": events.len(), "days_touched": dirty_days.len() }),
        ));
        Ok(outcomes)
    }

    /// Purges ledger rows for every pending erasure and invalidates their day
    /// snapshots, so the next release reflects the deletion retroactively.
    pub fn replay_deletions(&self) -> CoreResult<()> {
        let pending = self.ledger.pending_erasures()?;
        for erasure in &pending {
            self.ledger.purge_user_activity(&erasure.user_root, &erasure.days)?;
            for day in &erasure.days {
                self.windows.mark_dirty(day);
            }
            if let Some(id) = erasure.id {
                self.ledger.mark_erasure_processed(id)?;
            }
        }
        if !pending.is_empty() {
            self.log.emit(LogEntry::new(
                LogLevel::Info,
                "erasures_replayed",
                serde_json::json!({ "count": pending.len() }),
            ));
        }
        Ok(())
    }

    fn release(
        &self,
        metric: &str,
        day: &str,
        base_value: f64,
        sensitivity: f64,
        window_days: Option<i64>,
    ) -> CoreResult<ReleasePayload> {
        let epsilon = if metric == "dau" { self.config.dp.epsilon_dau } else { self.config.dp.epsilon_mau };
        let caps = BudgetCaps { dau: self.config.dp.dau_budget_total, mau: self.config.dp.mau_budget_total };
        let cap = caps.for_metric(metric);
        if !self.accountant.can_release(metric, epsilon, day, cap)? {
            return Err(CoreError::BudgetExceeded { metric: metric.to_string(), day: day.to_string() });
        }

        let seed = seed_for(metric, day, self.config.dp.default_seed);
        let result = if metric == "dau" {
            laplace_mechanism(base_value, sensitivity, epsilon, seed)
        } else {
            gaussian_mechanism(base_value, sensitivity, epsilon, self.config.dp.delta, seed)
        };

        self.accountant.record_release(
            metric,
            day,
            result.epsilon,
            result.delta,
            result.mechanism.as_str(),
            result.seed,
        )?;
        let budget_remaining = self.accountant.remaining_budget(metric, day, cap)?;

        self.log.emit(LogEntry::new(
            LogLevel::Info,
            "release_issued",
            serde_json::json!({
                "metric": metric,
                "day": day,
                "epsilon": result.epsilon,
                "mechanism": result.mechanism.as_str(),
            }),
        ));

        Ok(ReleasePayload {
            metric: metric.to_string(),
            day: day.to_string(),
            exact_value: result.value,
            noisy_value: result.noisy_value,
            mechanism: result.mechanism.as_str().to_string(),
            epsilon: result.epsilon,
            delta: result.delta,
            lower_95: result.lower_95,
            upper_95: result.upper_95,
            seed: result.seed,
            sketch_impl: self.config.sketch.impl_name.clone(),
            budget_remaining,
            window_days,
        })
    }

    pub fn get_daily_release(&self, day: &str) -> CoreResult<ReleasePayload> {
        self.replay_deletions()?;
        let (_, _, keys) = self.windows.get_dau(&self.ledger, day)?;
        let base_value = keys.len() as f64;
        let sensitivity = (self.config.dp.w_bound as f64).min(1.0);
        self.release("dau", day, base_value, sensitivity, None)
    }

    pub fn get_mau_release(&self, end_day: &str, window_days: Option<i64>) -> CoreResult<ReleasePayload> {
        self.replay_deletions()?;
        let window_days = window_days.unwrap_or(self.config.sketch.mau_window_days);
        let (estimate, _) = self.windows.get_mau(&self.ledger, end_day, window_days)?;
        let sensitivity = self.config.dp.w_bound as f64;
        self.release("mau", end_day, estimate, sensitivity, Some(window_days))
    }

    pub fn reset_budget(&self, metric: &str, period: &str) -> CoreResult<()> {
        self.accountant.reset_month(metric, period)
    }

    pub fn accountant(&self) -> &PrivacyAccountant {
        &self.accountant
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn windows(&self) -> &WindowManager {
        &self.windows
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pipeline() -> Pipeline {
        Pipeline::in_memory_silent(PipelineConfig::default()).unwrap()
    }

    #[test]
    fn ingest_batch_is_not_fail_fast() {
        let pipeline = pipeline();
        let events = [
            EventRecord::insert("alice", "2025-10-01"),
            EventRecord { user_id: "bob".to_string(), day: "2025-10-01".to_string(), op: 'x', metadata: None },
            EventRecord::insert("carol", "2025-10-01"),
        ];
        let outcomes = pipeline.ingest_batch(&events).unwrap();
        assert!(outcomes[0].is_ok());
        assert!(matches!(outcomes[1], Err(CoreError::InvalidEvent(_))));
        assert!(outcomes[2].is_ok());

        let release = pipeline.get_daily_release("2025-10-01").unwrap();
        assert_eq!(release.exact_value, 2.0);
    }

    #[test]
    fn dau_release_counts_unique_users_after_retraction() {
        let pipeline = pipeline();
        pipeline.ingest_event(&EventRecord::insert("alice", "2025-10-01")).unwrap();
        pipeline.ingest_event(&EventRecord::insert("bob", "2025-10-01")).unwrap();
        pipeline.ingest_event(&EventRecord::retract("alice", "2025-10-01")).unwrap();

        let release = pipeline.get_daily_release("2025-10-01").unwrap();
        assert_eq!(release.exact_value, 1.0);
        assert_eq!(release.mechanism, "laplace");
    }

    #[test]
    fn mau_release_unions_days_in_window() {
        let pipeline = pipeline();
        pipeline.ingest_event(&EventRecord::insert("alice", "2025-10-01")).unwrap();
        pipeline.ingest_event(&EventRecord::insert("bob", "2025-10-02")).unwrap();

        let release = pipeline.get_mau_release("2025-10-02", Some(2)).unwrap();
        assert_eq!(release.exact_value, 2.0);
        assert_eq!(release.mechanism, "gaussian");
    }

    #[test]
    fn repeat_release_in_same_month_eventually_exceeds_budget() {
        let mut config = PipelineConfig::default();
        config.dp.dau_budget_total = 0.6;
        let pipeline = Pipeline::in_memory_silent(config).unwrap();
        pipeline.ingest_event(&EventRecord::insert("alice", "2025-10-01")).unwrap();
        for day in ["2025-10-01", "2025-10-02", "2025-10-03"] {
            let result = pipeline.get_daily_release(day);
            if day == "2025-10-03" {
                assert!(matches!(result, Err(CoreError::BudgetExceeded { .. })));
            } else {
                assert!(result.is_ok());
            }
        }
    }

    #[test]
    fn erasure_removes_user_retroactively_from_future_release() {
        let pipeline = pipeline();
        pipeline.ingest_event(&EventRecord::insert("alice", "2025-10-01")).unwrap();
        assert_eq!(pipeline.get_daily_release("2025-10-01").unwrap().exact_value, 1.0);

        pipeline
            .ingest_event(&EventRecord {
                user_id: "alice".to_string(),
                day: "2025-10-01".to_string(),
                op: '-',
                metadata: Some(serde_json::json!({ "days": ["2025-10-01"] })),
            })
            .unwrap();

        pipeline.reset_budget("dau", "2025-10").unwrap();
        assert_eq!(pipeline.get_daily_release("2025-10-01").unwrap().exact_value, 0.0);
    }

    #[test]
    fn open_persists_ledger_and_accountant_across_pipelines() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = PipelineConfig::default();
        config.storage.data_dir = dir.path().to_path_buf();
        config.security.hash_salt_secret = Some("test-secret".to_string());

        {
            let pipeline = Pipeline::open(config.clone(), std::sync::Arc::new(crate::log::NullEmitter)).unwrap();
            pipeline.ingest_event(&EventRecord::insert("alice", "2025-10-01")).unwrap();
            pipeline.get_daily_release("2025-10-01").unwrap();
        }

        let reopened = Pipeline::open(config, std::sync::Arc::new(crate::log::NullEmitter)).unwrap();
        let (dau, _, _) = reopened.windows().get_dau(reopened.ledger(), "2025-10-01").unwrap();
        assert_eq!(dau, 1.0);
        let remaining = reopened.accountant().remaining_budget("dau", "2025-10-01", reopened.config().dp.dau_budget_total).unwrap();
        assert!(remaining < reopened.config().dp.dau_budget_total);
    }
}
