//! Experiment schema, lifecycle and storage
//!
//! ## Schema Overview
//!
//! ```text
//! ExperimentRecord (1) ──< VariantRecord (N)
//!        │                      │
//!        ├──< MetricRecord (N)  │ assigned to
//!        │                      v
//!        └──< ParticipantRecord (N) [unique (experiment_id, unit_id)]
//!                    │
//!                    └──< EventRecord (N) [append-only]
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use abtest_engine::experiment::{ExperimentRecord, VariantRecord, lifecycle, Transition};
//! use chrono::Utc;
//!
//! let mut experiment = ExperimentRecord::new("exp-001", "Checkout button color");
//! let variants = vec![
//!     VariantRecord::control("blue", "exp-001", "Blue", 50),
//!     VariantRecord::new("green", "exp-001", "Green", 50),
//! ];
//!
//! lifecycle::apply(&mut experiment, &variants, Transition::Start, Utc::now())?;
//! # Ok::<(), abtest_engine::Error>(())
//! ```

mod event_record;
mod experiment_record;
pub mod lifecycle;
mod metric_record;
mod participant_record;
mod store;
mod variant_record;

pub use event_record::{EventRecord, EventRecordBuilder, EventType};
pub use experiment_record::{ExperimentRecord, ExperimentRecordBuilder, ExperimentStatus};
pub use lifecycle::{AllocationPolicy, Transition};
pub use metric_record::{MetricRecord, MetricRecordBuilder, MetricType};
pub use participant_record::ParticipantRecord;
pub use store::{
    validate_definition, ExperimentGuard, ExperimentStore, MemoryExperimentStore,
    ParticipantUpsert, VariantCounters,
};
pub use variant_record::VariantRecord;
