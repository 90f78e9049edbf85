use super::*;
use crate::foundation::core::ElemType;
use crate::graph::key::KeyBuilder;

const MIB: usize = 1024 * 1024;

fn key(n: u32) -> OperationKey {
    KeyBuilder::new("cache_test", 1, 1, ElemType::Value)
        .param_u32(n)
        .finish()
}

/// Single-channel image of exactly `bytes` bytes.
fn image_of(bytes: usize) -> ImageBuf {
    let floats = bytes / 4;
    ImageBuf::new(floats as u32, 1, 1)
}

#[test]
fn budget_below_one_step_is_rejected() {
    assert!(CacheManager::new(CACHE_EVICT_STEP_BYTES - 1).is_err());
    assert!(CacheManager::new(CACHE_EVICT_STEP_BYTES).is_ok());
}

#[test]
fn oldest_entry_is_evicted_until_under_ceiling() {
    let mut c = CacheManager::new(64 * MIB).unwrap();
    for n in 1..=3 {
        c.fill(key(n), image_of(30 * MIB), false);
    }
    assert_eq!(c.total_bytes(), 90 * MIB);

    let evicted = c.check_cache();
    assert_eq!(evicted, vec![key(1)]);
    assert_eq!(c.total_bytes(), 60 * MIB);
    assert!(c.contains(&key(2)));
    assert!(c.contains(&key(3)));
    assert_eq!(c.stats().evictions, 1);
}

#[test]
fn the_last_entry_survives_any_budget() {
    let mut c = CacheManager::new(2 * MIB).unwrap();
    c.fill(key(1), image_of(3 * MIB), false);
    c.fill(key(2), image_of(5 * MIB), false);
    assert_eq!(c.check_cache(), vec![key(1)]);
    assert_eq!(c.len(), 1);
    assert!(c.contains(&key(2)));
    assert!(c.check_cache().is_empty());
    assert!(c.total_bytes() > c.max_bytes());
}

#[test]
fn lookup_refreshes_recency() {
    let mut c = CacheManager::new(64 * MIB).unwrap();
    for n in 1..=3 {
        c.fill(key(n), image_of(30 * MIB), false);
    }
    assert!(c.lookup(&key(1)).is_some());
    assert_eq!(c.check_cache(), vec![key(2)]);
    assert_eq!(c.stats().hits, 1);
}

#[test]
fn under_budget_sweep_is_a_no_op() {
    let mut c = CacheManager::new(64 * MIB).unwrap();
    c.fill(key(1), image_of(64 * MIB), false);
    assert!(c.check_cache().is_empty());
}

#[test]
fn slots_are_zeroed_and_unique_per_key() {
    let mut c = CacheManager::new(CACHE_EVICT_STEP_BYTES).unwrap();
    let slot = c.take_slot(&key(1), 4, 2, 3).unwrap();
    assert_eq!(slot.len(), 24);
    assert!(slot.iter().all(|v| *v == 0.0));
    c.fill(key(1), ImageBuf::new(4, 2, 3), false);
    assert!(c.take_slot(&key(1), 4, 2, 3).unwrap_err().is_invariant());
    assert_eq!(c.stats().misses, 1);
}

#[test]
fn frame_change_keeps_only_persistent_entries() {
    let mut c = CacheManager::new(64 * MIB).unwrap();
    c.begin_frame(0);
    c.fill(key(1), image_of(MIB), true);
    c.fill(key(2), image_of(MIB), false);

    c.begin_frame(0);
    assert_eq!(c.len(), 2);

    c.begin_frame(1);
    assert!(c.contains(&key(1)));
    assert!(!c.contains(&key(2)));
    assert!(c.is_persistent(&key(1)));
    assert_eq!(c.total_bytes(), MIB);
}

#[test]
fn refilling_a_key_replaces_its_bytes() {
    let mut c = CacheManager::new(64 * MIB).unwrap();
    c.fill(key(1), image_of(MIB), false);
    c.fill(key(1), image_of(2 * MIB), false);
    assert_eq!(c.len(), 1);
    assert_eq!(c.total_bytes(), 2 * MIB);
}
