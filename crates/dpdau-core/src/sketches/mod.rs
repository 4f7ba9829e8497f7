//! Distinct-count sketch family: a closed tagged variant over the available
//! backends, replacing the duck-typed class hierarchy of the reference design
//! per the union/difference capability contract in the specification.

mod hll;
mod kmv;
mod set;

pub use hll::HllSketch;
pub use kmv::KmvSketch;
pub use set::SetSketch;

use crate::error::{CoreError, CoreResult};

/// Sizing and policy knobs shared by every backend.
#[derive(Debug, Clone)]
pub struct SketchConfig {
    pub k: u32,
    pub use_bloom_for_diff: bool,
    pub bloom_fp_rate: f64,
}

impl SketchConfig {
    /// HLL precision `p` such that `m = 2^p = k`. Valid only for `k` a power of
    /// two in `[16, 65536]` (`p` in `[4, 16]`), matching the reference's bound.
    fn hll_precision(&self) -> CoreResult<u8> {
        if !self.k.is_power_of_two() {
            return Err(CoreError::InvalidConfig(format!(
                "sketch.k must be a power of two for the hllpp backend, got {}",
                self.k
            )));
        }
        let precision = self.k.trailing_zeros() as u8;
        if !(4..=16).contains(&precision) {
            return Err(CoreError::InvalidConfig(format!(
                "hllpp precision {precision} out of range [4, 16]"
            )));
        }
        Ok(precision)
    }
}

/// A closed set of distinct-count backends. Every operation that combines two
/// sketches requires both operands to carry the same variant; a mismatch is a
/// [`CoreError::SketchMismatch`], never a silent coercion.
#[derive(Debug, Clone)]
pub enum Sketch {
    Set(SetSketch),
    Kmv(KmvSketch),
    Hll(HllSketch),
}

impl Sketch {
    pub fn add(&mut self, key: u64) {
        match self {
            Sketch::Set(s) => s.add(key),
            Sketch::Kmv(s) => s.add(key),
            Sketch::Hll(s) => s.add(key),
        }
    }

    pub fn union(&mut self, other: &Sketch) -> CoreResult<()> {
        match (self, other) {
            (Sketch::Set(a), Sketch::Set(b)) => {
                a.union(b);
                Ok(())
            }
            (Sketch::Kmv(a), Sketch::Kmv(b)) => {
                a.union(b);
                Ok(())
            }
            (Sketch::Hll(a), Sketch::Hll(b)) => a.union(b),
            (a, b) => Err(CoreError::SketchMismatch(format!(
                "cannot union {} with {}",
                a.kind(),
                b.kind()
            ))),
        }
    }

    /// `a_not_b` for HLL is deliberately absent from this method: it is
    /// structurally incapable (§4.2), so callers must branch on `kind()` before
    /// calling this rather than receive a runtime "unsupported" error for a
    /// backend that can never support it.
    pub fn a_not_b(&self, other: &Sketch) -> CoreResult<Sketch> {
        match (self, other) {
            (Sketch::Set(a), Sketch::Set(b)) => Ok(Sketch::Set(a.a_not_b(b))),
            (Sketch::Kmv(a), Sketch::Kmv(b)) => Ok(Sketch::Kmv(a.a_not_b(b))),
            (a, b) => Err(CoreError::SketchMismatch(format!(
                "cannot compute a_not_b between {} and {}",
                a.kind(),
                b.kind()
            ))),
        }
    }

    pub fn estimate(&self) -> f64 {
        match self {
            Sketch::Set(s) => s.estimate(),
            Sketch::Kmv(s) => s.estimate(),
            Sketch::Hll(s) => s.estimate(),
        }
    }

    pub fn compact(&mut self) {
        if let Sketch::Kmv(s) = self {
            s.compact();
        }
    }

    pub fn serialize(&self) -> Vec<u8> {
        match self {
            Sketch::Set(s) => s.serialize(),
            Sketch::Kmv(s) => s.serialize(),
            Sketch::Hll(s) => s.serialize(),
        }
    }

    pub fn deserialize(kind: &str, payload: &[u8], config: &SketchConfig) -> CoreResult<Sketch> {
        match kind {
            "set" => Ok(Sketch::Set(SetSketch::deserialize(payload))),
            "kmv" => Ok(Sketch::Kmv(KmvSketch::deserialize(payload, config))),
            "hllpp" => Ok(Sketch::Hll(HllSketch::deserialize(payload)?)),
            other => Err(CoreError::SketchUnavailable(other.to_string())),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Sketch::Set(_) => "set",
            Sketch::Kmv(_) => "kmv",
            Sketch::Hll(_) => "hllpp",
        }
    }
}

/// Builds sketches for a fixed backend name. Theta is absent from `builders`
/// whenever no Apache DataSketches binding is available — which is always true
/// here, since no such Rust crate exists — so requesting `"theta"` fails with
/// [`CoreError::SketchUnavailable`] instead of silently falling back.
pub struct SketchFactory {
    config: SketchConfig,
    default_impl: String,
}

impl SketchFactory {
    pub fn new(config: SketchConfig, default_impl: impl Into<String>) -> CoreResult<Self> {
        let default_impl = default_impl.into();
        let factory = Self { config, default_impl };
        factory.create_named(&factory.default_impl)?;
        Ok(factory)
    }

    pub fn create(&self) -> Sketch {
        self.create_named(&self.default_impl)
            .expect("default_impl was validated at construction")
    }

    pub fn create_named(&self, name: &str) -> CoreResult<Sketch> {
        match name {
            "set" => Ok(Sketch::Set(SetSketch::new())),
            "kmv" => Ok(Sketch::Kmv(KmvSketch::new(self.config.clone()))),
            "hllpp" => Ok(Sketch::Hll(HllSketch::new(self.config.hll_precision()?))),
            "theta" => Err(CoreError::SketchUnavailable(
                "theta: no Apache DataSketches binding is available in this build".into(),
            )),
            other => Err(CoreError::SketchUnavailable(other.to_string())),
        }
    }

    pub fn config(&self) -> &SketchConfig {
        &self.config
    }

    pub fn default_impl(&self) -> &str {
        &self.default_impl
    }
}
