//! Settings round-trips through a JSON file on disk.
//!
//! Run with: cargo test -p lumen-runtime --test settings_persistence

#![cfg(feature = "settings")]

use std::sync::{Arc, Mutex};

use lumen_runtime::{EventBus, JsonFileStorage, Settings, SettingsError, Value};

#[test]
fn missing_file_is_created_empty() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("settings.json");

    let settings = Settings::open(JsonFileStorage::new(&path), EventBus::new()).unwrap();

    assert_eq!(std::fs::read_to_string(&path).unwrap(), "{}");
    assert_eq!(settings.get("bar_position"), Some(Value::from("top")));
}

#[test]
fn writes_survive_a_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("settings.json");

    {
        let settings = Settings::open(JsonFileStorage::new(&path), EventBus::new()).unwrap();
        settings.set("bar_position", "bottom").unwrap();
        assert!(settings.toggle("corners").unwrap());
        settings.set("wallpaper", "/usr/share/backgrounds/dune.png").unwrap();
    }

    let on_disk: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(on_disk["bar_position"], "bottom");
    assert_eq!(on_disk["corners"], true);

    let reopened = Settings::open(JsonFileStorage::new(&path), EventBus::new()).unwrap();
    assert_eq!(reopened.get_as::<String>("bar_position").as_deref(), Some("bottom"));
    assert_eq!(reopened.get_as::<bool>("corners"), Some(true));
    assert_eq!(
        reopened.get("wallpaper"),
        Some(Value::from("/usr/share/backgrounds/dune.png"))
    );
}

#[test]
fn corrupt_file_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("settings.json");
    std::fs::write(&path, "{ not json").unwrap();

    let err = Settings::open(JsonFileStorage::new(&path), EventBus::new()).unwrap_err();
    assert!(matches!(err, SettingsError::Json(_)));
}

#[test]
fn subscribers_hear_persisted_changes() {
    let dir = tempfile::tempdir().unwrap();
    let events = EventBus::new();
    let settings =
        Settings::open(JsonFileStorage::new(dir.path().join("settings.json")), events).unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let id = settings.subscribe(
        "time_format",
        move |value| sink.lock().unwrap().push(value.clone()),
        true,
    );

    assert!(settings.toggle_between("time_format", "12", "24").unwrap());
    assert!(settings.unsubscribe(id));
    settings.reset("time_format").unwrap();

    assert_eq!(
        *seen.lock().unwrap(),
        vec![Value::from("24"), Value::from("12")]
    );
    assert_eq!(settings.get("time_format"), Some(Value::from("24")));
}
