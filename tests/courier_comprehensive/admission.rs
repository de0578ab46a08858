//! Rate admission through the public API

use courier::{
    AdmissionPolicy, CallerContext, ManualClock, Preset, RateAdmissionService, RateLimit,
    Timestamp, WindowStore,
};
use proptest::prelude::*;
use std::sync::Arc;
use std::time::Duration;

fn service_at(secs: u64) -> (Arc<ManualClock>, RateAdmissionService) {
    let clock = Arc::new(ManualClock::new(Timestamp::from_secs(secs)));
    let store = Arc::new(WindowStore::with_clock(clock.clone()));
    (clock, RateAdmissionService::new(store))
}

#[test]
fn auth_preset_admits_five_then_rejects() {
    let (_clock, service) = service_at(1_700_000_000);
    let limit = service.presets().get(Preset::Auth);

    for _ in 0..5 {
        assert!(service.check_key("ip:1.2.3.4", limit).success);
    }
    let sixth = service.check_key("ip:1.2.3.4", limit);
    assert!(!sixth.success);
    assert_eq!(sixth.remaining, 0);
    assert_eq!(sixth.retry_after_secs(), Some(900));
}

#[test]
fn window_slides_from_oldest_event() {
    let (clock, service) = service_at(0);
    let limit = RateLimit::new(3, Duration::from_secs(60));

    // events at t=0, 20, 40
    for _ in 0..3 {
        assert!(service.check_key("k", limit).success);
        clock.advance(Duration::from_secs(20));
    }
    // t=60: the t=0 event just left the window; newest is only 20s old
    assert!(service.check_key("k", limit).success);
    assert!(!service.check_key("k", limit).success);
}

#[test]
fn rejected_headers_carry_retry_after() {
    let (clock, service) = service_at(1_000);
    let policy = AdmissionPolicy::new("login", RateLimit::new(1, Duration::from_secs(30)));
    let caller = CallerContext::from_addr("192.0.2.1");

    assert!(service.check(&policy, &caller).success);
    clock.advance(Duration::from_millis(10_500));
    let rejected = service.check(&policy, &caller);

    let headers = rejected.headers();
    assert!(headers.contains(&("X-RateLimit-Limit", "1".to_string())));
    assert!(headers.contains(&("X-RateLimit-Remaining", "0".to_string())));
    assert!(headers.contains(&("X-RateLimit-Reset", "1030".to_string())));
    assert!(headers.contains(&("Retry-After", "20".to_string())));
}

#[test]
fn user_keyed_policy_separates_users_behind_one_address() {
    let (_clock, service) = service_at(0);
    let policy = AdmissionPolicy::new("drafts", RateLimit::per_minute(1)).per_user();
    let office = CallerContext::from_addr("10.1.1.1");

    assert!(service.check(&policy, &office.clone().with_user("alice")).success);
    assert!(service.check(&policy, &office.clone().with_user("bob")).success);
    assert!(!service.check(&policy, &office.with_user("alice")).success);
}

proptest! {
    /// Property: N checks within one window all pass and the next fails with a positive wait
    #[test]
    fn prop_n_admitted_then_rejected(max_events in 1u32..50, window_secs in 1u64..3_600) {
        let (_clock, service) = service_at(1_000_000);
        let limit = RateLimit::new(max_events, Duration::from_secs(window_secs));

        for _ in 0..max_events {
            prop_assert!(service.check_key("k", limit).success);
        }
        let next = service.check_key("k", limit);
        prop_assert!(!next.success);
        prop_assert_eq!(next.remaining, 0);
        prop_assert!(next.retry_after.unwrap_or_default() > Duration::ZERO);
    }
}
