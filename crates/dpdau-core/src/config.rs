//! Settings consumed by the pipeline. The core takes a fully-constructed
//! [`PipelineConfig`]; loading it from environment variables, files, or flags is a
//! transport concern the core does not implement.

use crate::error::{CoreError, CoreResult};

/// Differential-privacy knobs: per-metric epsilon, delta, sensitivity bound, and
/// monthly budget caps.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct DpSettings {
    pub epsilon_dau: f64,
    pub epsilon_mau: f64,
    pub delta: f64,
    pub advanced_delta: f64,
    pub w_bound: i64,
    pub dau_budget_total: f64,
    pub mau_budget_total: f64,
    pub default_seed: u64,
    pub rdp_orders: Vec<f64>,
}

impl Default for DpSettings {
    fn default() -> Self {
        Self {
            epsilon_dau: 0.3,
            epsilon_mau: 0.5,
            delta: 1e-6,
            advanced_delta: 1e-7,
            w_bound: 2,
            dau_budget_total: 3.0,
            mau_budget_total: 3.5,
            default_seed: 20251009,
            rdp_orders: vec![2.0, 4.0, 8.0, 16.0, 32.0],
        }
    }
}

/// Sketch backend selection and sizing.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct SketchSettings {
    pub impl_name: String,
    pub k: u32,
    pub mau_window_days: i64,
    pub hll_rebuild_days_buffer: i64,
    pub use_bloom_for_diff: bool,
    pub bloom_fp_rate: f64,
}

impl Default for SketchSettings {
    fn default() -> Self {
        Self {
            impl_name: "kmv".to_string(),
            k: 4096,
            mau_window_days: 30,
            hll_rebuild_days_buffer: 3,
            use_bloom_for_diff: true,
            bloom_fp_rate: 0.01,
        }
    }
}

/// Durable-store placement.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    pub data_dir: std::path::PathBuf,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self { data_dir: std::path::PathBuf::from("./data") }
    }
}

/// Hashing/salt-rotation knobs. `hash_salt_secret` is `None` until resolved to a
/// concrete [`dpdau_membrane::HashSecret`] at pipeline construction time, at which
/// point an absent secret is filled with a random one (§4.1).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct SecuritySettings {
    pub hash_salt_secret: Option<String>,
    pub hash_salt_rotation_days: i64,
}

impl Default for SecuritySettings {
    fn default() -> Self {
        Self { hash_salt_secret: None, hash_salt_rotation_days: 30 }
    }
}

#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub dp: DpSettings,
    pub sketch: SketchSettings,
    pub storage: StorageSettings,
    pub security: SecuritySettings,
}

impl PipelineConfig {
    /// Checks the invariants the pipeline relies on (non-empty RDP orders, deltas
    /// in range, positive epsilons). Mirrors the validation the reference
    /// configuration model performs at load time.
    pub fn validate(&self) -> CoreResult<()> {
        if self.dp.epsilon_dau <= 0.0 || self.dp.epsilon_mau <= 0.0 {
            return Err(CoreError::InvalidConfig("epsilon values must be > 0".into()));
        }
        if !(0.0 < self.dp.delta && self.dp.delta < 1.0) {
            return Err(CoreError::InvalidConfig("delta must be in (0, 1)".into()));
        }
        if !(0.0 < self.dp.advanced_delta && self.dp.advanced_delta < 1.0) {
            return Err(CoreError::InvalidConfig("advanced_delta must be in (0, 1)".into()));
        }
        if self.dp.rdp_orders.is_empty() {
            return Err(CoreError::InvalidConfig("rdp_orders must not be empty".into()));
        }
        if self.dp.rdp_orders.iter().any(|&alpha| alpha <= 1.0) {
            return Err(CoreError::InvalidConfig("rdp_orders must all be > 1".into()));
        }
        if self.dp.w_bound < 1 {
            return Err(CoreError::InvalidConfig("w_bound must be >= 1".into()));
        }
        if self.sketch.k == 0 {
            return Err(CoreError::InvalidConfig("sketch.k must be > 0".into()));
        }
        if self.sketch.mau_window_days < 1 {
            return Err(CoreError::InvalidConfig("sketch.mau_window_days must be >= 1".into()));
        }
        if !matches!(self.sketch.impl_name.as_str(), "set" | "kmv" | "hllpp" | "theta") {
            return Err(CoreError::InvalidConfig(format!(
                "sketch.impl must be one of set|kmv|hllpp|theta, got '{}'",
                self.sketch.impl_name
            )));
        }
        if self.security.hash_salt_rotation_days < 1 {
            return Err(CoreError::InvalidConfig(
                "hash_salt_rotation_days must be >= 1".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        PipelineConfig::default().validate().expect("defaults must be valid");
    }

    #[test]
    fn rejects_empty_rdp_orders() {
        let mut cfg = PipelineConfig::default();
        cfg.dp.rdp_orders.clear();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_unknown_sketch_impl() {
        let mut cfg = PipelineConfig::default();
        cfg.sketch.impl_name = "bogus".to_string();
        assert!(cfg.validate().is_err());
    }
}
