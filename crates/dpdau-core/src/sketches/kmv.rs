//! KMV (bottom-k / k-minimum-values) distinct-count sketch.
//!
//! Keeps the `k` smallest 64-bit hashes seen; cardinality is estimated from the
//! k-th smallest normalized hash (the "threshold" τ). `a_not_b` needs an
//! approximate membership test over the other sketch's hash set, provided either
//! by a plain `BTreeSet` or, when configured, a Bloom filter sized for the
//! requested false-positive rate.

use super::SketchConfig;

#[derive(Debug, Clone)]
pub struct KmvSketch {
    config: SketchConfig,
    hashes: Vec<u64>,
}

impl KmvSketch {
    pub fn new(config: SketchConfig) -> Self {
        Self { config, hashes: Vec::new() }
    }

    fn normalize(value: u64) -> f64 {
        if value == 0 {
            0.0
        } else {
            value as f64 / u64::MAX as f64
        }
    }

    fn threshold(&self) -> f64 {
        if (self.hashes.len() as u32) < self.config.k {
            1.0
        } else {
            Self::normalize(*self.hashes.last().unwrap())
        }
    }

    pub fn add(&mut self, hashed: u64) {
        if self.hashes.binary_search(&hashed).is_ok() {
            return;
        }
        let k = self.config.k as usize;
        if self.hashes.len() < k {
            let pos = self.hashes.partition_point(|&h| h < hashed);
            self.hashes.insert(pos, hashed);
            return;
        }
        if hashed >= *self.hashes.last().unwrap() {
            return;
        }
        let pos = self.hashes.partition_point(|&h| h < hashed);
        self.hashes.insert(pos, hashed);
        self.hashes.truncate(k);
    }

    pub fn union(&mut self, other: &KmvSketch) {
        let mut merged: Vec<u64> = self.hashes.iter().chain(other.hashes.iter()).copied().collect();
        merged.sort_unstable();
        merged.dedup();
        merged.truncate(self.config.k as usize);
        self.hashes = merged;
    }

    pub fn a_not_b(&self, other: &KmvSketch) -> KmvSketch {
        let membership = Membership::build(&other.hashes, &self.config);
        let k = self.config.k as usize;
        let mut kept = Vec::with_capacity(k.min(self.hashes.len()));
        for &hashed in &self.hashes {
            if !membership.contains(hashed) {
                kept.push(hashed);
                if kept.len() == k {
                    break;
                }
            }
        }
        KmvSketch { config: self.config.clone(), hashes: kept }
    }

    pub fn estimate(&self) -> f64 {
        if self.hashes.is_empty() {
            return 0.0;
        }
        if (self.hashes.len() as u32) < self.config.k {
            return self.hashes.len() as f64;
        }
        let tau = self.threshold();
        if tau <= 0.0 {
            return self.hashes.len() as f64;
        }
        (self.config.k as f64 - 1.0) / tau
    }

    pub fn compact(&mut self) {
        let k = self.config.k as usize;
        if self.hashes.len() > k {
            self.hashes.truncate(k);
        }
    }

    /// `{k: u32, count: u32, hashes: [u64; count]}`, all big-endian.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(8 + self.hashes.len() * 8);
        out.extend_from_slice(&self.config.k.to_be_bytes());
        out.extend_from_slice(&(self.hashes.len() as u32).to_be_bytes());
        for hash in &self.hashes {
            out.extend_from_slice(&hash.to_be_bytes());
        }
        out
    }

    pub fn deserialize(payload: &[u8], config: &SketchConfig) -> Self {
        if payload.len() < 8 {
            return Self::new(config.clone());
        }
        let count = u32::from_be_bytes(payload[4..8].try_into().unwrap()) as usize;
        let count = count.min(config.k as usize);
        let mut hashes = Vec::with_capacity(count);
        for i in 0..count {
            let start = 8 + i * 8;
            let end = start + 8;
            if end > payload.len() {
                break;
            }
            hashes.push(u64::from_be_bytes(payload[start..end].try_into().unwrap()));
        }
        hashes.sort_unstable();
        Self { config: config.clone(), hashes }
    }
}

enum Membership {
    Plain(std::collections::BTreeSet<u64>),
    Bloom { bits: Vec<u8>, m: u32, rounds: u32 },
}

impl Membership {
    fn build(values: &[u64], config: &SketchConfig) -> Self {
        if !config.use_bloom_for_diff {
            return Membership::Plain(values.iter().copied().collect());
        }
        let n = values.len().max(1) as f64;
        let fp = config.bloom_fp_rate.clamp(1e-6, 1.0 - 1e-6);
        let m = (-(n * fp.ln()) / std::f64::consts::LN_2.powi(2)).ceil().max(8.0) as u32;
        let rounds = (((m as f64 / n) * std::f64::consts::LN_2).round() as u32).max(1);
        let mut bits = vec![0u8; (m as usize).div_ceil(8)];
        let mut bloom = Membership::Bloom { bits: std::mem::take(&mut bits), m, rounds };
        for &value in values {
            bloom.insert(value);
        }
        bloom
    }

    fn bit_index(value: u64, round: u32, m: u32) -> u32 {
        // Splitmix64 round, distinct per `round` so each pass probes an
        // independent-looking bit within the filter.
        let mut z = value ^ (round as u64).wrapping_mul(0x9E3779B97F4A7C15);
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
        z ^= z >> 31;
        (z % m as u64) as u32
    }

    fn insert(&mut self, value: u64) {
        if let Membership::Bloom { bits, m, rounds } = self {
            for round in 0..*rounds {
                let idx = Self::bit_index(value, round, *m);
                bits[(idx / 8) as usize] |= 1 << (idx % 8);
            }
        }
    }

    fn contains(&self, value: u64) -> bool {
        match self {
            Membership::Plain(set) => set.contains(&value),
            Membership::Bloom { bits, m, rounds } => (0..*rounds).all(|round| {
                let idx = Self::bit_index(value, round, *m);
                bits[(idx / 8) as usize] & (1 << (idx % 8)) != 0
            }),
        }
    }
}
