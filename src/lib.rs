//! # abtest-engine: Deterministic A/B Experiment Engine
//!
//! **Version**: 0.1.0
//!
//! Assigns units (users) to experiment variants by stable hashing, records
//! participation events, and decides with hypothesis tests whether a
//! treatment beats its control.
//!
//! ## Design Principles (Toyota Way Aligned)
//!
//! - **Poka-Yoke**: same `(experiment, unit)` always gets the same variant,
//!   in every process; no random selection path exists
//! - **Jidoka**: the store is the single source of truth, reports are derived
//!   from its rows and never mutate state
//! - **Genchi Genbutsu**: significance from the actual contingency table,
//!   not from rate differences
//!
//! ## Example Usage
//!
//! ```rust
//! use abtest_engine::experiment::{
//!     EventType, ExperimentRecord, MetricRecord, MetricType, VariantRecord,
//! };
//! use abtest_engine::Engine;
//!
//! # fn main() -> abtest_engine::Result<()> {
//! let engine = Engine::builder().build()?;
//! engine.create_experiment(
//!     ExperimentRecord::new("checkout-v2", "New checkout"),
//!     vec![
//!         VariantRecord::control("old", "checkout-v2", "Old checkout", 50),
//!         VariantRecord::new("new", "checkout-v2", "New checkout", 50),
//!     ],
//!     vec![MetricRecord::new("checkout-v2", "purchase", MetricType::ConversionRate)],
//! )?;
//! engine.start("checkout-v2")?;
//!
//! let allocation = engine.allocate("checkout-v2", "user-42", None)?;
//! engine.record_event(
//!     &allocation.participant_id,
//!     EventType::Conversion,
//!     "purchase",
//!     serde_json::json!({}),
//! )?;
//!
//! let report = engine.get_report("checkout-v2")?;
//! assert_eq!(report.total_participants, 1);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod allocator;
pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod experiment;
pub mod flags;
pub mod recorder;
pub mod report;
pub mod stats;

pub use config::EngineConfig;
pub use engine::{Allocation, Engine, EngineBuilder};
pub use error::{Error, Result};
pub use report::Report;
