//! Laplace and Gaussian differential-privacy mechanisms with deterministic seeding.
//!
//! Seeds are derived from `(metric, day, default_seed)` via SHA-256 so that identical
//! inputs always produce identical noise. This is a design requirement, not an
//! accident: tests and operators rely on reproducible releases.

use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use sha2::{Digest, Sha256};

/// The two supported output mechanisms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mechanism {
    Laplace,
    Gaussian,
}

impl Mechanism {
    pub fn as_str(self) -> &'static str {
        match self {
            Mechanism::Laplace => "laplace",
            Mechanism::Gaussian => "gaussian",
        }
    }
}

/// Result of running a noise mechanism against a base value.
#[derive(Debug, Clone, Copy)]
pub struct MechanismResult {
    pub value: f64,
    pub noisy_value: f64,
    pub mechanism: Mechanism,
    pub epsilon: f64,
    pub delta: f64,
    pub lower_95: f64,
    pub upper_95: f64,
    pub seed: u64,
}

/// Derives `seed = u64(SHA-256("metric:day_iso:default_seed")[0..8])`, big-endian.
pub fn seed_for(metric: &str, day_iso: &str, default_seed: u64) -> u64 {
    let message = format!("{metric}:{day_iso}:{default_seed}");
    let digest = Sha256::digest(message.as_bytes());
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&digest[0..8]);
    u64::from_be_bytes(buf)
}

fn rng_from_seed(seed: u64) -> ChaCha8Rng {
    ChaCha8Rng::seed_from_u64(seed)
}

/// Draws a uniform `f64` in `[0, 1)` from `rng`, the same granularity Python's
/// `random.random()` offers (53 bits of mantissa via the top 53 bits of a u64).
fn uniform01(rng: &mut ChaCha8Rng) -> f64 {
    (rng.next_u64() >> 11) as f64 * (1.0 / (1u64 << 53) as f64)
}

/// Laplace mechanism. Requires `epsilon > 0`. Scale `b = sensitivity / epsilon`.
///
/// `u ~ Uniform(-1/2, 1/2)`; `noise = -b * sign(u) * ln(1 - 2|u|)`. The 95% CI
/// half-width is `z = -b * ln(alpha/2)` with `alpha = 0.05`, i.e. exactly
/// `b * ln(40)`.
pub fn laplace_mechanism(value: f64, sensitivity: f64, epsilon: f64, seed: u64) -> MechanismResult {
    assert!(epsilon > 0.0, "epsilon must be > 0 for the Laplace mechanism");
    let scale = sensitivity / epsilon;
    let mut rng = rng_from_seed(seed);
    let u = uniform01(&mut rng) - 0.5;
    let noise = -scale * u.signum() * (1.0 - 2.0 * u.abs()).ln();
    let noisy_value = value + noise;
    let alpha = 0.05_f64;
    let z = -scale * (alpha / 2.0).ln();
    MechanismResult {
        value,
        noisy_value,
        mechanism: Mechanism::Laplace,
        epsilon,
        delta: 0.0,
        lower_95: noisy_value - z,
        upper_95: noisy_value + z,
        seed,
    }
}

/// Gaussian mechanism. Requires `epsilon > 0` and `0 < delta < 1`.
/// `sigma = sqrt(2 * ln(1.25/delta)) * sensitivity / epsilon`.
/// The 95% CI half-width is `1.959963984540054 * sigma`.
pub fn gaussian_mechanism(
    value: f64,
    sensitivity: f64,
    epsilon: f64,
    delta: f64,
    seed: u64,
) -> MechanismResult {
    assert!(epsilon > 0.0, "epsilon must be > 0 for the Gaussian mechanism");
    assert!(delta > 0.0 && delta < 1.0, "delta must be in (0, 1) for the Gaussian mechanism");
    let sigma = (2.0 * (1.25 / delta).ln()).sqrt() * sensitivity / epsilon;
    let mut rng = rng_from_seed(seed);
    let noise = sample_standard_normal(&mut rng) * sigma;
    let noisy_value = value + noise;
    const Z_95: f64 = 1.959963984540054;
    MechanismResult {
        value,
        noisy_value,
        mechanism: Mechanism::Gaussian,
        epsilon,
        delta,
        lower_95: noisy_value - Z_95 * sigma,
        upper_95: noisy_value + Z_95 * sigma,
        seed,
    }
}

/// Box-Muller transform over two uniform draws from the same seeded stream.
fn sample_standard_normal(rng: &mut ChaCha8Rng) -> f64 {
    let u1 = uniform01(rng).max(f64::MIN_POSITIVE);
    let u2 = uniform01(rng);
    (-2.0 * u1.ln()).sqrt() * (std::f64::consts::TAU * u2).cos()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seed_derivation_is_deterministic() {
        let a = seed_for("dau", "2025-10-01", 20251009);
        let b = seed_for("dau", "2025-10-01", 20251009);
        assert_eq!(a, b);
        let c = seed_for("mau", "2025-10-01", 20251009);
        assert_ne!(a, c);
    }

    #[test]
    fn laplace_ci_width_matches_closed_form() {
        let seed = seed_for("dau", "2025-10-05", 20251009);
        let result = laplace_mechanism(1.0, 1.0, 0.3, seed);
        let expected_width = 2.0 * (1.0_f64 / 0.3) * 40.0_f64.ln();
        assert!((result.upper_95 - result.lower_95 - expected_width).abs() < 1e-9);
    }

    #[test]
    fn gaussian_ci_width_matches_closed_form() {
        let seed = seed_for("mau", "2025-10-05", 20251009);
        let result = gaussian_mechanism(4.0, 2.0, 0.5, 1e-6, seed);
        let sigma = (2.0 * (1.25 / 1e-6_f64).ln()).sqrt() * 2.0 / 0.5;
        let expected_width = 2.0 * 1.959963984540054 * sigma;
        assert!((result.upper_95 - result.lower_95 - expected_width).abs() < 1e-9);
    }

    #[test]
    fn repeated_release_with_same_inputs_is_identical() {
        let seed = seed_for("dau", "2025-10-05", 20251009);
        let a = laplace_mechanism(10.0, 1.0, 0.3, seed);
        let b = laplace_mechanism(10.0, 1.0, 0.3, seed);
        assert_eq!(a.noisy_value, b.noisy_value);
        assert_eq!(a.lower_95, b.lower_95);
        assert_eq!(a.upper_95, b.upper_95);
    }

    #[test]
    #[should_panic(expected = "epsilon must be > 0")]
    fn laplace_rejects_nonpositive_epsilon() {
        let _ = laplace_mechanism(1.0, 1.0, 0.0, 42);
    }
}
