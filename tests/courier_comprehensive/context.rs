//! Context wiring from configuration

use courier::{
    CallerContext, Courier, CourierConfig, IsolationLevel, ManualClock, MemoryEngine, Preset,
    Timestamp, CONFIG_FILE_NAME,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

#[test]
fn open_creates_default_config_file() {
    let dir = TempDir::new().unwrap();
    let courier = Courier::open(Arc::new(MemoryEngine::new()), dir.path()).unwrap();
    assert!(dir.path().join(CONFIG_FILE_NAME).exists());

    let options = courier.coordinator().options();
    assert_eq!(options.retry.max_retries, 3);
    assert!(courier.shutdown(Duration::from_secs(1)));
}

#[test]
fn configuration_flows_into_components() {
    let config = CourierConfig::from_toml_str(
        r#"
[transactions]
isolation = "serializable"
max_retries = 6
base_delay_ms = 5

[admission]
sweep_interval_secs = 1

[admission.presets.password_reset]
max_events = 1
window_secs = 120
"#,
    )
    .unwrap();
    let clock = Arc::new(ManualClock::new(Timestamp::from_secs(5_000)));
    let courier =
        Courier::with_clock(Arc::new(MemoryEngine::new()), &config, clock.clone()).unwrap();

    let options = courier.coordinator().options();
    assert_eq!(options.isolation, Some(IsolationLevel::Serializable));
    assert_eq!(options.retry.max_retries, 6);
    assert_eq!(options.retry.base_delay, Duration::from_millis(5));

    let caller = CallerContext::from_addr("198.51.100.20");
    let admission = courier.admission();
    assert!(admission.check_preset(Preset::PasswordReset, &caller).success);
    let rejected = admission.check_preset(Preset::PasswordReset, &caller);
    assert!(!rejected.success);
    assert_eq!(rejected.retry_after, Some(Duration::from_secs(120)));

    courier
        .coordinator()
        .run(options, |txn| txn.put("settings:theme", json!("dark")))
        .unwrap();
    assert!(courier.shutdown(Duration::from_secs(1)));
}

#[test]
fn unknown_preset_override_is_rejected() {
    let config = CourierConfig::from_toml_str(
        "[admission.presets.graphql]\nmax_events = 1\nwindow_secs = 60\n",
    )
    .unwrap();
    assert!(Courier::new(Arc::new(MemoryEngine::new()), &config).is_err());
}

#[test]
fn background_sweeper_clears_stale_windows() {
    let mut config = CourierConfig::default();
    config.admission.sweep_interval_secs = 1;
    let clock = Arc::new(ManualClock::new(Timestamp::from_secs(0)));
    let courier =
        Courier::with_clock(Arc::new(MemoryEngine::new()), &config, clock.clone()).unwrap();

    let caller = CallerContext::from_addr("203.0.113.50");
    courier.admission().check_preset(Preset::Webhook, &caller);
    assert_eq!(courier.admission().store().len(), 1);

    clock.advance(Duration::from_secs(61));
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while !courier.admission().store().is_empty() && std::time::Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(50));
    }
    assert!(courier.admission().store().is_empty());
    assert!(courier.shutdown(Duration::from_secs(1)));
}
