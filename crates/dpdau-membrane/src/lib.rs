//! Low-level cryptographic and sampling primitives for the DP DAU/MAU engine.
//!
//! This crate knows nothing about sketches, ledgers, or release pipelines. It
//! exposes exactly two concerns: deriving stable-but-rotating user keys from a
//! root secret ([`hashing`]), and drawing deterministic differentially-private
//! noise ([`noise`]).

pub mod hashing;
pub mod noise;

pub use hashing::{sketch_hash, user_key, user_root, HashSecret, UserKey, UserRoot};
pub use noise::{gaussian_mechanism, laplace_mechanism, seed_for, Mechanism, MechanismResult};
