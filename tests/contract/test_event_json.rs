//! Contract tests for the event JSON shape written to event logs

use eventwatch::models::{FieldDelta, FieldValue};
use eventwatch::{Event, EventType, Severity};
use std::collections::{BTreeMap, BTreeSet};

fn event() -> Event {
    let path = "/w/app.log".to_string();
    let changes = BTreeMap::from([(
        "size".to_string(),
        FieldDelta::new(FieldValue::Int(10), FieldValue::Int(20)),
    )]);
    Event::new(
        "logs",
        "grew",
        EventType::DirSizeChanged,
        Severity::Warning,
        BTreeSet::from([path.clone()]),
        BTreeMap::from([(path, changes)]),
        1_700_000_000,
    )
}

#[test]
fn test_event_fields() {
    let value = serde_json::to_value(event()).unwrap();
    let object = value.as_object().unwrap();

    let mut keys: Vec<&str> = object.keys().map(String::as_str).collect();
    keys.sort_unstable();
    assert_eq!(
        keys,
        vec![
            "affected_paths",
            "change_details",
            "event_type",
            "event_uid",
            "rule_name",
            "sample_epoch",
            "severity",
            "watch_group",
        ]
    );
}

#[test]
fn test_event_enum_encoding() {
    let value = serde_json::to_value(event()).unwrap();

    assert_eq!(value["severity"], "WARNING");
    assert_eq!(value["event_type"], "dir_size_changed");
    assert_eq!(value["affected_paths"], serde_json::json!(["/w/app.log"]));
    assert_eq!(value["sample_epoch"], 1_700_000_000);
}

#[test]
fn test_change_details_shape() {
    let value = serde_json::to_value(event()).unwrap();
    let size = &value["change_details"]["/w/app.log"]["size"];

    assert_eq!(size["old"], 10);
    assert_eq!(size["new"], 20);
    assert_eq!(size["delta"], 10.0);
}

#[test]
fn test_non_numeric_delta_is_omitted() {
    let delta = FieldDelta::new(
        FieldValue::Text("abc".to_string()),
        FieldValue::Text("def".to_string()),
    );
    let value = serde_json::to_value(delta).unwrap();

    assert_eq!(value, serde_json::json!({"old": "abc", "new": "def"}));
}

#[test]
fn test_absent_field_is_null() {
    let delta = FieldDelta::new(FieldValue::Absent, FieldValue::Bool(true));
    let value = serde_json::to_value(delta).unwrap();

    assert!(value["old"].is_null());
    assert_eq!(value["new"], true);
}

#[test]
fn test_event_type_labels() {
    for kind in EventType::ALL {
        let encoded = serde_json::to_value(kind).unwrap();
        assert_eq!(encoded, kind.as_str());
        assert_eq!(kind.as_str().parse::<EventType>().unwrap(), kind);
    }
}
