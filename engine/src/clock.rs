//! Change stamps and arbitration between the two sides.
//!
//! Every genuine external change gets a [`ChangeStamp`] from the engine's
//! [`ChangeClock`]: a monotonic sequence number plus the instant it was
//! observed. [`RecentChanges`] keeps the latest stamp per
//! (identity, pair, side) for as long as an expectation may live, which is
//! what [`arbitrate`] needs to decide most-recent-wins pairs. Like the
//! expectation caches, it sweeps out expired stamps as new ones come in.

use crate::config::PairConfig;
use crate::expectation::SWEEP_EVERY;
use crate::result::Side;
use crate::someone::Linked;
use dashmap::DashMap;
use std::cmp::Ordering;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering as AtomicOrdering};
use std::time::Duration;
use tokio::time::Instant;

/// When a genuine external change was observed.
///
/// Ordering rules:
/// 1. Earlier observation instant first
/// 2. If instants are equal, lower sequence number first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChangeStamp {
    pub seq: u64,
    pub at: Instant,
}

impl Ord for ChangeStamp {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.at.cmp(&other.at) {
            Ordering::Equal => self.seq.cmp(&other.seq),
            other => other,
        }
    }
}

impl PartialOrd for ChangeStamp {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl ChangeStamp {
    /// Absolute distance between two observations.
    pub fn distance(&self, other: &ChangeStamp) -> Duration {
        if self.at >= other.at {
            self.at.duration_since(other.at)
        } else {
            other.at.duration_since(self.at)
        }
    }
}

/// Source of [`ChangeStamp`]s for one engine.
#[derive(Debug, Default)]
pub struct ChangeClock {
    counter: AtomicU64,
}

impl ChangeClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stamp an observation happening now.
    pub fn tick(&self) -> ChangeStamp {
        let seq = self.counter.fetch_add(1, AtomicOrdering::Relaxed) + 1;
        ChangeStamp {
            seq,
            at: Instant::now(),
        }
    }

    /// Number of stamps handed out so far.
    pub fn current(&self) -> u64 {
        self.counter.load(AtomicOrdering::Relaxed)
    }
}

/// The change that triggered a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Trigger {
    pub side: Side,
    pub stamp: ChangeStamp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct ChangeKey {
    who: Linked,
    pair: usize,
    side: Side,
}

/// Latest genuine change per (identity, pair index, side).
#[derive(Debug)]
pub struct RecentChanges {
    entries: DashMap<ChangeKey, ChangeStamp>,
    retention: Duration,
    observed: AtomicUsize,
}

impl RecentChanges {
    pub fn new(retention: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            retention,
            observed: AtomicUsize::new(0),
        }
    }

    /// Remember a change, keeping only the newest stamp per key.
    pub fn observe(&self, who: Linked, pair: usize, side: Side, stamp: ChangeStamp) {
        self.entries
            .entry(ChangeKey { who, pair, side })
            .and_modify(|existing| {
                if stamp > *existing {
                    *existing = stamp;
                }
            })
            .or_insert(stamp);
        if self.observed.fetch_add(1, AtomicOrdering::Relaxed) % SWEEP_EVERY == SWEEP_EVERY - 1 {
            self.purge_expired();
        }
    }

    /// The newest unexpired change on `side`.
    pub fn latest(&self, who: Linked, pair: usize, side: Side) -> Option<ChangeStamp> {
        let stamp = *self.entries.get(&ChangeKey { who, pair, side })?;
        (stamp.at.elapsed() < self.retention).then_some(stamp)
    }

    pub fn purge_expired(&self) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, stamp| stamp.at.elapsed() < self.retention);
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Decide which side's value prevails for a mismatched pair.
///
/// Fixed authority always wins. For most-recent-wins pairs, a run with no
/// triggering side goes to the tie-breaker; otherwise the trigger is compared
/// with the latest change seen on the opposite side: changes within
/// `window` of each other are simultaneous and go to the tie-breaker, and a
/// clearly newer opposite change beats the trigger.
pub fn arbitrate(
    pair: &PairConfig,
    trigger: Option<Trigger>,
    opposite: Option<ChangeStamp>,
    window: Duration,
) -> Side {
    if let Some(side) = pair.authority.side() {
        return side;
    }
    let Some(trigger) = trigger else {
        return pair.tie_breaker.side();
    };
    match opposite {
        None => trigger.side,
        Some(opposite) if opposite.distance(&trigger.stamp) <= window => pair.tie_breaker.side(),
        Some(opposite) if opposite > trigger.stamp => trigger.side.opposite(),
        Some(_) => trigger.side,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Authority, TieBreaker};
    use uuid::Uuid;

    fn linked() -> Linked {
        Linked::new(1, Uuid::nil())
    }

    #[tokio::test]
    async fn tick_is_monotonic() {
        let clock = ChangeClock::new();
        let first = clock.tick();
        let second = clock.tick();
        assert!(first < second);
        assert_eq!(clock.current(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn ordering_by_instant_then_seq() {
        let clock = ChangeClock::new();
        let a = clock.tick();
        tokio::time::advance(Duration::from_millis(10)).await;
        let b = clock.tick();
        assert!(a < b);
        assert_eq!(a.distance(&b), Duration::from_millis(10));
        assert_eq!(b.distance(&a), Duration::from_millis(10));

        let same_instant = ChangeStamp { seq: 0, at: b.at };
        assert!(same_instant < b);
    }

    #[test]
    fn fixed_authority_ignores_trigger() {
        let pair = PairConfig::new(1, "vip").with_authority(Authority::Remote);
        let trigger = Trigger {
            side: Side::Local,
            stamp: ChangeClock::new().tick(),
        };
        assert_eq!(
            arbitrate(&pair, Some(trigger), None, Duration::ZERO),
            Side::Remote
        );

        let pair = PairConfig::new(1, "vip").with_authority(Authority::Local);
        assert_eq!(arbitrate(&pair, None, None, Duration::ZERO), Side::Local);
    }

    #[test]
    fn most_recent_without_trigger_uses_tie_breaker() {
        let pair = PairConfig::new(1, "vip").with_tie_breaker(TieBreaker::Local);
        assert_eq!(arbitrate(&pair, None, None, Duration::ZERO), Side::Local);
    }

    #[tokio::test(start_paused = true)]
    async fn most_recent_arbitration() {
        let clock = ChangeClock::new();
        let window = Duration::from_secs(1);
        let pair = PairConfig::new(1, "vip").with_tie_breaker(TieBreaker::Remote);

        let old_remote = clock.tick();
        tokio::time::advance(Duration::from_secs(5)).await;
        let local = Trigger {
            side: Side::Local,
            stamp: clock.tick(),
        };

        // trigger alone, or clearly newer than the opposite change
        assert_eq!(arbitrate(&pair, Some(local), None, window), Side::Local);
        assert_eq!(
            arbitrate(&pair, Some(local), Some(old_remote), window),
            Side::Local
        );

        // simultaneous
        tokio::time::advance(Duration::from_millis(500)).await;
        let close_remote = clock.tick();
        assert_eq!(
            arbitrate(&pair, Some(local), Some(close_remote), window),
            Side::Remote
        );

        // opposite clearly newer
        tokio::time::advance(Duration::from_secs(3)).await;
        let new_remote = clock.tick();
        assert_eq!(
            arbitrate(&pair, Some(local), Some(new_remote), window),
            Side::Remote
        );
    }

    #[tokio::test(start_paused = true)]
    async fn observations_sweep_stale_identities() {
        let clock = ChangeClock::new();
        let recent = RecentChanges::new(Duration::from_secs(5));
        for pair in 0..10 {
            recent.observe(linked(), pair, Side::Remote, clock.tick());
        }
        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(recent.len(), 10);

        let other = Linked::new(2, Uuid::nil());
        for pair in 0..SWEEP_EVERY {
            recent.observe(other, pair, Side::Local, clock.tick());
        }
        assert_eq!(recent.len(), SWEEP_EVERY);
        assert!(recent.latest(other, 0, Side::Local).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn recent_changes_keep_newest_and_expire() {
        let clock = ChangeClock::new();
        let recent = RecentChanges::new(Duration::from_secs(30));
        let older = clock.tick();
        tokio::time::advance(Duration::from_secs(1)).await;
        let newer = clock.tick();

        recent.observe(linked(), 0, Side::Remote, newer);
        recent.observe(linked(), 0, Side::Remote, older);
        assert_eq!(recent.latest(linked(), 0, Side::Remote), Some(newer));
        assert_eq!(recent.latest(linked(), 0, Side::Local), None);
        assert_eq!(recent.latest(linked(), 1, Side::Remote), None);

        tokio::time::advance(Duration::from_secs(31)).await;
        assert_eq!(recent.latest(linked(), 0, Side::Remote), None);
        assert_eq!(recent.purge_expired(), 1);
        assert!(recent.is_empty());
    }
}
