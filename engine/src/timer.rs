//! Periodic resync of timed pairs.
//!
//! Each pair with a [`TimerConfig`](crate::config::TimerConfig) gets its own
//! interval task; the first tick fires one full cycle after start. A
//! housekeeping task drops expired expectations once per TTL. All tasks are
//! aborted when the [`PairTimers`] is stopped or dropped.

use crate::cause::SyncCause;
use crate::engine::SyncEngine;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

#[derive(Debug, Default)]
pub struct PairTimers {
    tasks: Vec<JoinHandle<()>>,
}

impl PairTimers {
    /// Start one task per timed pair of `engine`.
    ///
    /// A disabled engine gets no timers.
    pub fn start(engine: &SyncEngine) -> Self {
        let mut timers = Self::default();
        if !engine.is_enabled() {
            return timers;
        }

        for (index, pair) in engine.active_pairs() {
            let Some(timer) = pair.timer else {
                continue;
            };
            let cycle = timer.cycle();
            tracing::info!(pair = %pair, cycle_secs = timer.cycle_secs, "Starting resync timer");
            timers.tasks.push(spawn_every(cycle, {
                let engine = engine.clone();
                move || {
                    let engine = engine.clone();
                    async move {
                        match engine.resync_pair(index, SyncCause::Timer).await {
                            Ok(reports) => tracing::debug!(
                                pair = index,
                                identities = reports.len(),
                                "Timed resync finished"
                            ),
                            Err(fail) => tracing::warn!(
                                pair = index,
                                error = %fail,
                                "Timed resync could not list identities"
                            ),
                        }
                    }
                }
            }));
        }

        let housekeeping = engine.config().expectation_ttl();
        timers.tasks.push(spawn_every(housekeeping, {
            let engine = engine.clone();
            move || {
                let engine = engine.clone();
                async move {
                    let purged = engine.purge_expired();
                    if purged > 0 {
                        tracing::debug!(purged, "Dropped expired expectations");
                    }
                }
            }
        }));
        timers
    }

    /// Stop the current tasks and start fresh ones, e.g. after a reload.
    pub fn restart(&mut self, engine: &SyncEngine) {
        self.stop();
        *self = Self::start(engine);
    }

    pub fn stop(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }

    /// Number of running tasks, housekeeping included.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

impl Drop for PairTimers {
    fn drop(&mut self) {
        self.stop();
    }
}

fn spawn_every<F, Fut>(period: Duration, mut tick: F) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    let first = Instant::now() + period;
    tokio::spawn(async move {
        let mut interval = interval_at(first, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            tick().await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PairConfig, SyncConfig, TimerConfig};
    use crate::memory::{MemoryDirectory, MemoryGroups, MemoryRemote};
    use std::collections::BTreeSet;
    use std::sync::Arc;
    use uuid::Uuid;

    fn setup(pairs: Vec<PairConfig>) -> (SyncEngine, Arc<MemoryRemote>, Arc<MemoryGroups>, Uuid) {
        let remote = Arc::new(MemoryRemote::new([1, 2]));
        let groups = Arc::new(MemoryGroups::new(["vip", "mod"]));
        let directory = Arc::new(MemoryDirectory::new());
        let local = Uuid::new_v4();
        directory.link(7, local);
        let engine = SyncEngine::new(
            SyncConfig::new(pairs),
            remote.clone(),
            Some(groups.clone().into_local_side()),
            directory,
        )
        .unwrap();
        (engine, remote, groups, local)
    }

    async fn settle() {
        for _ in 0..50 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn timed_pair_resyncs_after_one_cycle() {
        let (engine, remote, groups, local) = setup(vec![
            PairConfig::new(1, "vip").with_timer(TimerConfig { cycle_secs: 60 }),
            PairConfig::new(2, "mod"),
        ]);
        remote.seed(7, 1, true);
        remote.seed(7, 2, true);

        let timers = PairTimers::start(&engine);
        assert_eq!(timers.len(), 2);

        tokio::time::advance(Duration::from_secs(59)).await;
        settle().await;
        assert!(!groups.is_member(local, "vip", &BTreeSet::new()));

        tokio::time::advance(Duration::from_secs(2)).await;
        settle().await;
        assert!(groups.is_member(local, "vip", &BTreeSet::new()));
        // untimed pair untouched
        assert!(!groups.is_member(local, "mod", &BTreeSet::new()));
    }

    #[tokio::test(start_paused = true)]
    async fn stopped_timers_do_nothing() {
        let (engine, remote, groups, local) = setup(vec![
            PairConfig::new(1, "vip").with_timer(TimerConfig { cycle_secs: 10 }),
        ]);
        remote.seed(7, 1, true);

        let mut timers = PairTimers::start(&engine);
        timers.stop();
        assert!(timers.is_empty());

        tokio::time::advance(Duration::from_secs(30)).await;
        settle().await;
        assert!(!groups.is_member(local, "vip", &BTreeSet::new()));
        assert_eq!(groups.apply_count(), 0);
    }

    #[tokio::test]
    async fn disabled_engine_has_no_timers() {
        let (engine, ..) = setup(vec![PairConfig::unset()]);
        assert!(PairTimers::start(&engine).is_empty());
    }
}
