//! Expectation cache: short-lived records of values the engine just wrote.
//!
//! Before writing to a side, the engine records the value it expects to see
//! echoed back by that side's change listener. When the echo arrives it is
//! consumed and suppressed instead of starting a new run in the opposite
//! direction. Entries expire after a fixed TTL counted from when they were
//! recorded, so an echo that never arrives cannot suppress a later genuine
//! change for long.
//!
//! The per-identity sub-map is created and pruned atomically through the
//! map's entry API; no lock spans more than one call.
//!
//! Expired entries are dropped when their key is next touched, and every
//! `SWEEP_EVERY` records the whole map is swept, so keys that are never
//! touched again do not pile up even without a periodic purge.

use dashmap::DashMap;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::Instant;

/// Writes between two full sweeps of expired entries.
pub(crate) const SWEEP_EVERY: usize = 64;

#[derive(Debug, Clone, Copy)]
struct Expectation {
    value: bool,
    recorded_at: Instant,
}

/// Time-bounded `key -> (attribute -> expected value)` store for one side.
#[derive(Debug)]
pub struct ExpectationCache<K, A>
where
    K: Eq + Hash,
    A: Eq + Hash,
{
    entries: DashMap<K, HashMap<A, Expectation>>,
    ttl: Duration,
    records: AtomicUsize,
}

impl<K, A> ExpectationCache<K, A>
where
    K: Eq + Hash + Clone,
    A: Eq + Hash,
{
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            records: AtomicUsize::new(0),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Record that `attribute` of `key` is expected to become `expected`.
    ///
    /// Overwrites any earlier expectation for the same attribute and restarts
    /// its TTL. Every `SWEEP_EVERY`th call also purges expired entries.
    pub fn record(&self, key: K, attribute: A, expected: bool) {
        self.entries.entry(key).or_default().insert(
            attribute,
            Expectation {
                value: expected,
                recorded_at: Instant::now(),
            },
        );
        if self.records.fetch_add(1, Ordering::Relaxed) % SWEEP_EVERY == SWEEP_EVERY - 1 {
            self.purge_expired();
        }
    }

    /// Consume a matching, unexpired expectation.
    ///
    /// Returns `true` when the observation is the engine's own echo. A
    /// differing value leaves the expectation in place.
    pub fn check_and_consume(&self, key: &K, attribute: &A, observed: bool) -> bool {
        let now = Instant::now();
        let Some(mut expected) = self.entries.get_mut(key) else {
            return false;
        };
        expected.retain(|_, e| now.duration_since(e.recorded_at) < self.ttl);

        let hit = matches!(expected.get(attribute), Some(e) if e.value == observed);
        if hit {
            expected.remove(attribute);
        }
        let empty = expected.is_empty();
        drop(expected);

        if empty {
            self.entries.remove_if(key, |_, expected| expected.is_empty());
        }
        hit
    }

    /// Remove the expectation for `attribute` if it still holds `expected`.
    ///
    /// Called when the write that recorded it failed. A newer expectation
    /// with a different value is left alone.
    pub fn forget(&self, key: &K, attribute: &A, expected: bool) -> bool {
        let Some(mut entry) = self.entries.get_mut(key) else {
            return false;
        };
        let removed = match entry.get(attribute) {
            Some(e) if e.value == expected => entry.remove(attribute).is_some(),
            _ => false,
        };
        let empty = entry.is_empty();
        drop(entry);

        if empty {
            self.entries.remove_if(key, |_, expected| expected.is_empty());
        }
        removed
    }

    /// Whether an unexpired expectation exists for `attribute` of `key`.
    pub fn is_expecting(&self, key: &K, attribute: &A) -> bool {
        let now = Instant::now();
        self.entries
            .get(key)
            .and_then(|expected| {
                expected
                    .get(attribute)
                    .map(|e| now.duration_since(e.recorded_at) < self.ttl)
            })
            .unwrap_or(false)
    }

    /// Drop every expired expectation; returns how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut purged = 0;
        self.entries.retain(|_, expected| {
            let before = expected.len();
            expected.retain(|_, e| now.duration_since(e.recorded_at) < self.ttl);
            purged += before - expected.len();
            !expected.is_empty()
        });
        purged
    }

    /// Number of unexpired expectations.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .iter()
            .map(|entry| {
                entry
                    .value()
                    .values()
                    .filter(|e| now.duration_since(e.recorded_at) < self.ttl)
                    .count()
            })
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache() -> ExpectationCache<u64, &'static str> {
        ExpectationCache::new(Duration::from_secs(30))
    }

    #[tokio::test]
    async fn matching_observation_is_consumed_once() {
        let cache = cache();
        cache.record(1, "vip", true);

        assert!(cache.check_and_consume(&1, &"vip", true));
        assert!(!cache.check_and_consume(&1, &"vip", true));
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn differing_observation_is_not_consumed() {
        let cache = cache();
        cache.record(1, "vip", true);

        assert!(!cache.check_and_consume(&1, &"vip", false));
        assert!(cache.is_expecting(&1, &"vip"));
        assert!(cache.check_and_consume(&1, &"vip", true));
    }

    #[tokio::test]
    async fn unknown_keys_and_attributes() {
        let cache = cache();
        cache.record(1, "vip", true);

        assert!(!cache.check_and_consume(&2, &"vip", true));
        assert!(!cache.check_and_consume(&1, &"mod", true));
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn record_overwrites_previous_value() {
        let cache = cache();
        cache.record(1, "vip", true);
        cache.record(1, "vip", false);

        assert!(!cache.check_and_consume(&1, &"vip", true));
        assert!(cache.check_and_consume(&1, &"vip", false));
    }

    #[tokio::test(start_paused = true)]
    async fn expectations_expire_after_ttl() {
        let cache = ExpectationCache::new(Duration::from_secs(5));
        cache.record(1u64, "vip", true);

        tokio::time::advance(Duration::from_secs(4)).await;
        assert!(cache.is_expecting(&1, &"vip"));

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(!cache.is_expecting(&1, &"vip"));
        assert!(!cache.check_and_consume(&1, &"vip", true));
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn purge_drops_only_expired_entries() {
        let cache = ExpectationCache::new(Duration::from_secs(5));
        cache.record(1u64, "vip", true);
        tokio::time::advance(Duration::from_secs(3)).await;
        cache.record(2u64, "vip", false);
        tokio::time::advance(Duration::from_secs(3)).await;

        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.len(), 1);
        assert!(cache.is_expecting(&2, &"vip"));
    }

    #[tokio::test(start_paused = true)]
    async fn records_sweep_untouched_expired_keys() {
        let cache = ExpectationCache::new(Duration::from_secs(5));
        for who in 0..10u64 {
            cache.record(who, "vip", true);
        }
        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(cache.entries.len(), 10);

        for who in 100..100 + SWEEP_EVERY as u64 {
            cache.record(who, "vip", true);
        }
        // the stale keys were never touched again
        assert_eq!(cache.entries.len(), SWEEP_EVERY);
        assert!(!cache.entries.contains_key(&0));
        assert_eq!(cache.len(), SWEEP_EVERY);
    }

    #[tokio::test]
    async fn forget_respects_newer_value() {
        let cache = cache();
        cache.record(1, "vip", true);
        assert!(!cache.forget(&1, &"vip", false));
        assert!(cache.forget(&1, &"vip", true));
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn concurrent_records_and_consumes() {
        let cache = std::sync::Arc::new(ExpectationCache::new(Duration::from_secs(30)));
        let mut handles = Vec::new();
        for who in 0..32u64 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move {
                cache.record(who, "vip", who % 2 == 0);
                cache.check_and_consume(&who, &"vip", who % 2 == 0)
            }));
        }
        for handle in handles {
            assert!(handle.await.unwrap());
        }
        assert!(cache.is_empty());
    }
}
