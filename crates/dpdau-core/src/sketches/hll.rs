//! HyperLogLog++ sketch with small/large-range bias correction.
//!
//! Does not support `a_not_b`: removing a single element from a register array
//! is not well-defined once ranks have been maxed together. The pipeline must
//! rebuild an HLL day-snapshot from its cached key set on any deletion instead
//! of trying to difference two sketches (§4.2, §9).

use crate::error::{CoreError, CoreResult};

#[derive(Debug, Clone)]
pub struct HllSketch {
    precision: u8,
    registers: Vec<u8>,
}

impl HllSketch {
    pub fn new(precision: u8) -> Self {
        let m = 1usize << precision;
        Self { precision, registers: vec![0; m] }
    }

    fn m(&self) -> usize {
        1usize << self.precision
    }

    fn alpha(&self) -> f64 {
        let m = self.m() as f64;
        0.7213 / (1.0 + 1.079 / m)
    }

    pub fn add(&mut self, hashed: u64) {
        let m = self.m() as u64;
        let idx = (hashed & (m - 1)) as usize;
        let w = hashed >> self.precision;
        let rank = if w == 0 {
            (64 - self.precision) + 1
        } else {
            (w.leading_zeros() as u8 - self.precision) + 1
        };
        self.registers[idx] = self.registers[idx].max(rank);
    }

    pub fn union(&mut self, other: &HllSketch) -> CoreResult<()> {
        if self.precision != other.precision {
            return Err(CoreError::SketchMismatch(format!(
                "hllpp precision mismatch: {} vs {}",
                self.precision, other.precision
            )));
        }
        for (slot, &other_rank) in self.registers.iter_mut().zip(other.registers.iter()) {
            *slot = (*slot).max(other_rank);
        }
        Ok(())
    }

    pub fn estimate(&self) -> f64 {
        let m = self.m() as f64;
        let indicator_sum: f64 = self.registers.iter().map(|&r| 2f64.powi(-(r as i32))).sum();
        let raw_estimate = self.alpha() * m * m / indicator_sum;

        if raw_estimate <= 2.5 * m {
            let zeros = self.registers.iter().filter(|&&r| r == 0).count();
            if zeros > 0 {
                return m * (m / zeros as f64).ln();
            }
        }
        let two_pow_32 = (1u64 << 32) as f64;
        if raw_estimate > two_pow_32 / 30.0 {
            return -two_pow_32 * (1.0 - raw_estimate / two_pow_32).ln();
        }
        raw_estimate
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(1 + self.registers.len());
        out.push(self.precision);
        out.extend_from_slice(&self.registers);
        out
    }

    pub fn deserialize(payload: &[u8]) -> CoreResult<Self> {
        let Some((&precision, registers)) = payload.split_first() else {
            return Err(CoreError::InvalidConfig("empty hllpp payload".into()));
        };
        if !(4..=16).contains(&precision) {
            return Err(CoreError::InvalidConfig(format!(
                "hllpp precision {precision} out of range [4, 16]"
            )));
        }
        let m = 1usize << precision;
        let mut reg = vec![0u8; m];
        let copy_len = registers.len().min(m);
        reg[..copy_len].copy_from_slice(&registers[..copy_len]);
        Ok(Self { precision, registers: reg })
    }
}
