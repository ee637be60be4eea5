//! Experiment Schema Tests
//!
//! Records, builders and the in-memory store through the public API.

use abtest_engine::experiment::{
    EventRecord, EventType, ExperimentRecord, ExperimentStatus, ExperimentStore,
    MemoryExperimentStore, MetricRecord, MetricType, ParticipantRecord, VariantRecord,
};
use abtest_engine::Error;
use chrono::{Duration, Utc};

// =============================================================================
// ExperimentRecord Tests
// =============================================================================

#[test]
fn test_experiment_record_creation() {
    let record = ExperimentRecord::new("exp-001", "Checkout button");

    assert_eq!(record.experiment_id(), "exp-001");
    assert_eq!(record.name(), "Checkout button");
    assert_eq!(record.status(), ExperimentStatus::Draft);
    assert_eq!(record.traffic_allocation(), 100);
    assert!(record.created_at().timestamp() > 0);
    assert!(record.config().is_none());
    assert!(record.target_tenants().is_empty());
}

#[test]
fn test_experiment_record_builder() {
    let config = serde_json::json!({ "surface": "checkout", "owner": "growth" });
    let start = Utc::now();

    let record = ExperimentRecord::builder("exp-002", "Pricing page")
        .description("Annual plan first")
        .tenant("acme")
        .created_by("alice")
        .traffic_allocation(25)
        .start_date(start)
        .end_date(start + Duration::days(14))
        .config(config.clone())
        .target_tenants(["acme", "globex"])
        .build()
        .unwrap();

    assert_eq!(record.description(), "Annual plan first");
    assert_eq!(record.tenant_id(), Some("acme"));
    assert_eq!(record.created_by(), Some("alice"));
    assert_eq!(record.traffic_allocation(), 25);
    assert_eq!(record.config(), Some(&config));
    assert!(record.targets_tenant("globex"));
    assert!(!record.targets_tenant("initech"));
}

#[test]
fn test_experiment_record_builder_rejects_bad_schedule() {
    let start = Utc::now();
    let result = ExperimentRecord::builder("exp-003", "Backwards")
        .start_date(start)
        .end_date(start - Duration::days(1))
        .build();
    assert!(matches!(result, Err(Error::InvalidSchedule(_))));

    let result = ExperimentRecord::builder("exp-003", "No traffic")
        .traffic_allocation(0)
        .build();
    assert!(matches!(result, Err(Error::InvalidInput(_))));
}

#[test]
fn test_experiment_record_serialization() {
    let record = ExperimentRecord::new("exp-004", "Serialization Test");

    let json = serde_json::to_string(&record).expect("serialization failed");
    assert!(json.contains("\"status\":\"draft\""));
    let deserialized: ExperimentRecord =
        serde_json::from_str(&json).expect("deserialization failed");
    assert_eq!(record, deserialized);
}

// =============================================================================
// Variant / Metric / Event Tests
// =============================================================================

#[test]
fn test_variant_record() {
    let control = VariantRecord::control("blue", "exp-1", "Blue", 50)
        .with_config(serde_json::json!({ "color": "#0000ff" }));
    let treatment = VariantRecord::new("green", "exp-1", "Green", 50);

    assert!(control.is_control());
    assert!(!treatment.is_control());
    assert_eq!(control.weight(), 50);
    assert_eq!(control.config()["color"], "#0000ff");
}

#[test]
fn test_metric_record_builder() {
    let metric = MetricRecord::builder("exp-1", "revenue", MetricType::Custom)
        .variant("green")
        .target_value(12.5)
        .primary()
        .build();

    assert_eq!(metric.name(), "revenue");
    assert_eq!(metric.variant_id(), Some("green"));
    assert_eq!(metric.target_value(), Some(12.5));
    assert!(metric.is_primary());

    let json = serde_json::to_string(&metric.metric_type()).unwrap();
    assert_eq!(json, "\"custom\"");
    let json = serde_json::to_string(&MetricType::ClickThroughRate).unwrap();
    assert_eq!(json, "\"click_through_rate\"");
}

#[test]
fn test_event_record_builder() {
    let ip = "203.0.113.9".parse().unwrap();
    let event = EventRecord::builder("p-1", EventType::Custom, "purchase")
        .properties(serde_json::json!({ "revenue": 42.0, "currency": "EUR" }))
        .ip_address(ip)
        .user_agent("Mozilla/5.0")
        .build();

    assert!(!event.event_id().is_empty());
    assert_eq!(event.participant_id(), "p-1");
    assert_eq!(event.numeric_property("revenue"), Some(42.0));
    assert_eq!(event.numeric_property("currency"), None);
    assert_eq!(event.ip_address(), Some(ip));
    assert_eq!(event.user_agent(), Some("Mozilla/5.0"));
}

// =============================================================================
// Store Tests
// =============================================================================

#[test]
fn test_store_participant_uniqueness() {
    let store = MemoryExperimentStore::new();
    store
        .create_experiment(
            ExperimentRecord::new("exp-1", "Test"),
            vec![VariantRecord::control("a", "exp-1", "control", 100)],
            vec![],
        )
        .unwrap();

    let first = store
        .insert_participant_if_absent(ParticipantRecord::new("exp-1", "u1", "a"))
        .unwrap();
    let duplicate = store
        .insert_participant_if_absent(ParticipantRecord::new("exp-1", "u1", "a"))
        .unwrap();

    assert!(first.inserted);
    assert!(!duplicate.inserted);
    assert_eq!(store.participants("exp-1").unwrap().len(), 1);
    assert_eq!(
        store.find_participant("exp-1", "u1").unwrap().unwrap().participant_id(),
        first.participant.participant_id()
    );
}

#[test]
fn test_store_lists_in_creation_order() {
    let store = MemoryExperimentStore::new();
    let base = Utc::now();
    for (id, offset) in [("late", 2), ("early", 0), ("middle", 1)] {
        let record = ExperimentRecord::builder(id, id)
            .created_at(base + Duration::seconds(offset))
            .build()
            .unwrap();
        store.create_experiment(record, vec![], vec![]).unwrap();
    }

    let ids: Vec<String> = store
        .list_experiments()
        .unwrap()
        .iter()
        .map(|e| e.experiment_id().to_string())
        .collect();
    assert_eq!(ids, ["early", "middle", "late"]);
}
