//! Exact set sketch: reference correctness oracle, not for production traffic.

use std::collections::BTreeSet;

#[derive(Debug, Clone, Default)]
pub struct SetSketch {
    keys: BTreeSet<u64>,
}

impl SetSketch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, key: u64) {
        self.keys.insert(key);
    }

    pub fn union(&mut self, other: &SetSketch) {
        self.keys.extend(&other.keys);
    }

    pub fn a_not_b(&self, other: &SetSketch) -> SetSketch {
        SetSketch { keys: self.keys.difference(&other.keys).copied().collect() }
    }

    pub fn estimate(&self) -> f64 {
        self.keys.len() as f64
    }

    pub fn keys(&self) -> &BTreeSet<u64> {
        &self.keys
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(4 + self.keys.len() * 8);
        out.extend_from_slice(&(self.keys.len() as u32).to_be_bytes());
        for key in &self.keys {
            out.extend_from_slice(&key.to_be_bytes());
        }
        out
    }

    pub fn deserialize(payload: &[u8]) -> Self {
        if payload.len() < 4 {
            return Self::default();
        }
        let count = u32::from_be_bytes(payload[0..4].try_into().unwrap()) as usize;
        let mut keys = BTreeSet::new();
        for i in 0..count {
            let start = 4 + i * 8;
            let end = start + 8;
            if end > payload.len() {
                break;
            }
            keys.insert(u64::from_be_bytes(payload[start..end].try_into().unwrap()));
        }
        Self { keys }
    }
}
