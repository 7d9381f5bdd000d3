use super::*;

#[test]
fn slot_starts_unresolved() {
    let slot: LazySlot<u32> = LazySlot::default();
    assert!(slot.is_unresolved());
    assert_eq!(slot.get(), None);
}

#[test]
fn begin_then_fulfill_resolves() {
    let mut slot: LazySlot<u32> = LazySlot::Unresolved;
    slot.begin("test fact");
    assert!(slot.is_in_progress());
    slot.fulfill(7, "test fact");
    assert_eq!(slot.get(), Some(&7));
}

#[test]
fn fulfill_without_begin_is_allowed() {
    // Single-step facts skip the guard.
    let mut slot: LazySlot<bool> = LazySlot::Unresolved;
    slot.fulfill(true, "bridging bit");
    assert_eq!(slot.get(), Some(&true));
}

#[test]
#[should_panic(expected = "circular resolution: superclass depends on itself")]
fn reentrant_begin_panics() {
    let mut slot: LazySlot<u32> = LazySlot::Unresolved;
    slot.begin("superclass");
    slot.begin("superclass");
}

#[test]
#[should_panic(expected = "re-resolution of already resolved signature")]
fn double_fulfill_panics() {
    let mut slot: LazySlot<u32> = LazySlot::Unresolved;
    slot.fulfill(1, "signature");
    slot.fulfill(2, "signature");
}

#[test]
#[should_panic(expected = "resolver returned without establishing access level")]
fn expect_resolved_blames_the_backend() {
    let slot: LazySlot<u32> = LazySlot::Unresolved;
    let _ = slot.expect_resolved("access level");
}

#[test]
fn tokens_round_trip_raw_values() {
    assert_eq!(DeclToken::new(42).raw(), 42);
    assert_eq!(GenericEnvToken::new(7).raw(), 7);
    assert_eq!(MemberToken::new(u64::MAX).raw(), u64::MAX);
    assert_eq!(ConformanceToken::new(0).raw(), 0);
}
