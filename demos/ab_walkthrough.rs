//! A/B walkthrough: create, allocate, record, report
//!
//! Simulates 10 000 visitors on a two-arm checkout experiment where the
//! treatment converts at 12% against a 10% baseline, then prints the report.
//!
//! Run with: cargo run --example ab_walkthrough
//! Verbose: RUST_LOG=abtest_engine=debug cargo run --example ab_walkthrough

use abtest_engine::experiment::{
    EventType, ExperimentRecord, MetricRecord, MetricType, VariantRecord,
};
use abtest_engine::flags::FeatureFlag;
use abtest_engine::{Engine, EngineConfig};
use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::EnvFilter;

const VISITORS: u32 = 10_000;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = EngineConfig::builder().min_lift(0.05).build()?;
    let engine = Engine::builder().config(config).build()?;

    engine.create_experiment(
        ExperimentRecord::builder("checkout-v2", "One-page checkout")
            .description("Collapse the three checkout steps into one page")
            .created_by("growth-team")
            .build()?,
        vec![
            VariantRecord::control("three-step", "checkout-v2", "Three steps", 50),
            VariantRecord::new("one-page", "checkout-v2", "One page", 50),
        ],
        vec![
            MetricRecord::builder("checkout-v2", "purchase", MetricType::ConversionRate)
                .primary()
                .build(),
            MetricRecord::new("checkout-v2", "order_value", MetricType::Custom),
        ],
    )?;
    engine.start("checkout-v2")?;

    let needed = engine.required_sample_size(0.10, 0.20)?;
    info!(needed, "participants per variant to detect a 20% lift");

    for visitor in 0..VISITORS {
        let unit = format!("visitor-{visitor}");
        let allocation = engine
            .allocate("checkout-v2", &unit, None)
            .with_context(|| format!("allocating {unit}"))?;

        engine.record_event(
            &allocation.participant_id,
            EventType::View,
            "checkout",
            serde_json::json!({}),
        )?;

        // Deterministic pseudo-outcome so the walkthrough is reproducible
        let roll = abtest_engine::allocator::stable_hash64(7, &unit) % 100;
        let threshold = if allocation.variant_id == "one-page" { 12 } else { 10 };
        if roll < threshold {
            let value = 20.0 + f64::from(visitor % 50);
            engine.record_event(
                &allocation.participant_id,
                EventType::Conversion,
                "purchase",
                serde_json::json!({ "order_value": value }),
            )?;
        }
    }

    engine
        .flags()
        .upsert(FeatureFlag::new("one-page-checkout").rollout(10))?;
    let exposed = (0..VISITORS)
        .filter(|v| engine.check_flag("one-page-checkout", &format!("visitor-{v}"), None))
        .count();
    info!(exposed, "visitors behind the 10% rollout flag");

    let report = engine.get_report("checkout-v2")?;
    println!("{}", serde_json::to_string_pretty(&report)?);

    for recommendation in &report.recommendations {
        info!("{recommendation}");
    }
    Ok(())
}
