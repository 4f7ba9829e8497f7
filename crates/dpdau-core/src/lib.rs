//! Ingest-and-release engine for differentially private DAU/MAU counting.
//!
//! Wires a durable turnstile ledger, a pluggable distinct-count sketch family,
//! a per-day snapshot cache, and a privacy accountant into one [`pipeline::Pipeline`].

pub mod accountant;
pub mod config;
pub mod error;
pub mod ledger;
pub mod log;
pub mod pipeline;
pub mod sketches;
pub mod window;

pub use accountant::{BudgetCaps, BudgetSnapshot, PrivacyAccountant, RdpPoint};
pub use config::{DpSettings, PipelineConfig, SecuritySettings, SketchSettings, StorageSettings};
pub use error::{CoreError, CoreResult};
pub use ledger::{ActivityEntry, ErasureEntry, Ledger};
pub use log::{LogEmitter, LogEntry, LogLevel, MemoryEmitter, NullEmitter};
pub use pipeline::{EventRecord, Pipeline, ReleasePayload};
pub use sketches::{HllSketch, KmvSketch, SetSketch, Sketch, SketchConfig, SketchFactory};
pub use window::{DaySnapshot, WindowManager};
