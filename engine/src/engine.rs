//! The synchronization engine.
//!
//! # Algorithm
//!
//! For one (identity, pair):
//!
//! 1. Fetch the remote and local value concurrently
//! 2. If either fetch failed, report it and write nothing
//! 3. If the values match, report [`SyncResult::Matched`]
//! 4. Otherwise [`arbitrate`] which side wins, record an expectation on the
//!    side about to be written, and write the winning value there
//! 5. If the write fails, drop the expectation again and report the failure
//!
//! Change notifications first go through that side's expectation cache so
//! that the echo of step 4 ends processing instead of starting a new run.

use crate::cause::{ChangeEvent, SyncCause};
use crate::clock::{arbitrate, ChangeClock, RecentChanges, Trigger};
use crate::config::{local_key, normalize_context, PairConfig, SyncConfig};
use crate::error::{ConfigError, FailReason, SyncFail};
use crate::expectation::ExpectationCache;
use crate::provider::{IdentityDirectory, LocalSide, RemoteSide};
use crate::result::{Side, SyncResult};
use crate::someone::{Linked, Someone};
use crate::summary::{PairOutcome, SummaryReport, SyncSummary};
use crate::{AttributeId, LocalId, RemoteId};
use futures::future::join_all;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Name used in logs and diagnostics.
pub const SYNC_NAME: &str = "Group sync";

/// What a change notification led to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeOutcome {
    /// No pair is fully configured
    Disabled,
    /// The change was the echo of one of the engine's own writes
    Echo,
    /// No configured pair concerns the changed attribute
    Unmatched,
    /// A run happened
    Synced(SummaryReport),
}

impl ChangeOutcome {
    pub fn report(&self) -> Option<&SummaryReport> {
        match self {
            ChangeOutcome::Synced(report) => Some(report),
            _ => None,
        }
    }
}

struct Inner {
    config: SyncConfig,
    remote: Arc<dyn RemoteSide>,
    local: Option<LocalSide>,
    directory: Arc<dyn IdentityDirectory>,
    expected_remote: ExpectationCache<RemoteId, AttributeId>,
    expected_local: ExpectationCache<LocalId, String>,
    clock: ChangeClock,
    recent: RecentChanges,
}

/// Keeps every configured pair consistent between the two sides.
///
/// Cheap to clone; clones share caches and providers.
#[derive(Clone)]
pub struct SyncEngine {
    inner: Arc<Inner>,
}

impl SyncEngine {
    /// Create an engine over its collaborators.
    ///
    /// `local` is `None` when no local group store is available; every run
    /// then fails as a whole with [`FailReason::NoLocalProvider`].
    pub fn new(
        config: SyncConfig,
        remote: Arc<dyn RemoteSide>,
        local: Option<LocalSide>,
        directory: Arc<dyn IdentityDirectory>,
    ) -> Result<Self, ConfigError> {
        let config = config.normalized();
        config.validate()?;
        let ttl = config.expectation_ttl();
        tracing::info!(
            pairs = config.active_pairs().count(),
            ttl_secs = ttl.as_secs(),
            local = local.as_ref().map(LocalSide::name).unwrap_or("none"),
            "{} configured",
            SYNC_NAME
        );
        Ok(Self {
            inner: Arc::new(Inner {
                remote,
                local,
                directory,
                expected_remote: ExpectationCache::new(ttl),
                expected_local: ExpectationCache::new(ttl),
                clock: ChangeClock::new(),
                recent: RecentChanges::new(ttl),
                config,
            }),
        })
    }

    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    /// At least one pair is fully configured.
    pub fn is_enabled(&self) -> bool {
        self.inner.config.is_enabled()
    }

    /// Fully configured pairs with their index in the configuration.
    pub fn active_pairs(&self) -> impl Iterator<Item = (usize, &PairConfig)> {
        self.inner
            .config
            .pairs
            .iter()
            .enumerate()
            .filter(|(_, pair)| pair.is_set())
    }

    pub fn expected_remote(&self) -> &ExpectationCache<RemoteId, AttributeId> {
        &self.inner.expected_remote
    }

    pub fn expected_local(&self) -> &ExpectationCache<LocalId, String> {
        &self.inner.expected_local
    }

    /// A remote attribute changed.
    pub async fn on_remote_attribute_changed(
        &self,
        who: RemoteId,
        attribute: AttributeId,
        state: bool,
    ) -> ChangeOutcome {
        if !self.is_enabled() {
            return ChangeOutcome::Disabled;
        }
        if self
            .inner
            .expected_remote
            .check_and_consume(&who, &attribute, state)
        {
            tracing::debug!(who, attribute, state, "Ignoring echo of own remote write");
            return ChangeOutcome::Echo;
        }

        let pairs: Vec<usize> = self
            .active_pairs()
            .filter(|(_, pair)| pair.remote_attribute == attribute)
            .map(|(index, _)| index)
            .collect();
        if pairs.is_empty() {
            return ChangeOutcome::Unmatched;
        }

        let trigger = Trigger {
            side: Side::Remote,
            stamp: self.inner.clock.tick(),
        };
        let report = self
            .run(
                SyncCause::RemoteAttributeChanged,
                Someone::Remote(who),
                pairs,
                Some(trigger),
            )
            .await;
        ChangeOutcome::Synced(report)
    }

    /// A local group changed within `context` (`None` for global).
    pub async fn on_local_attribute_changed(
        &self,
        who: LocalId,
        group: &str,
        context: Option<&BTreeSet<String>>,
        state: bool,
        cause: SyncCause,
    ) -> ChangeOutcome {
        if !self.is_enabled() {
            return ChangeOutcome::Disabled;
        }
        let Some(context) = normalize_context(context) else {
            return ChangeOutcome::Unmatched;
        };
        if cause.engine_can_cause() {
            let key = local_key(group, &context);
            if self.inner.expected_local.check_and_consume(&who, &key, state) {
                tracing::debug!(who = %who, key = %key, state, "Ignoring echo of own local write");
                return ChangeOutcome::Echo;
            }
        }

        let pairs: Vec<usize> = self
            .active_pairs()
            .filter(|(_, pair)| pair.matches_local(group, Some(&context)))
            .map(|(index, _)| index)
            .collect();
        if pairs.is_empty() {
            return ChangeOutcome::Unmatched;
        }

        let trigger = cause.origin().map(|side| Trigger {
            side,
            stamp: self.inner.clock.tick(),
        });
        let report = self.run(cause, Someone::Local(who), pairs, trigger).await;
        ChangeOutcome::Synced(report)
    }

    /// Route a change notification to the matching entry point.
    pub async fn dispatch(&self, event: ChangeEvent) -> ChangeOutcome {
        match event {
            ChangeEvent::Remote {
                who,
                attribute,
                state,
            } => self.on_remote_attribute_changed(who, attribute, state).await,
            ChangeEvent::Local {
                who,
                group,
                context,
                state,
                cause,
            } => {
                self.on_local_attribute_changed(who, &group, context.as_ref(), state, cause)
                    .await
            }
        }
    }

    /// Consume a change-notification stream until it closes.
    ///
    /// Each event is handled on its own task. Returns `None` for a disabled
    /// engine, which does not listen.
    pub fn listen(
        &self,
        mut events: mpsc::UnboundedReceiver<ChangeEvent>,
    ) -> Option<JoinHandle<()>> {
        if !self.is_enabled() {
            tracing::info!("{} has no complete pairs, not listening", SYNC_NAME);
            return None;
        }
        let engine = self.clone();
        Some(tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let engine = engine.clone();
                tokio::spawn(async move {
                    engine.dispatch(event).await;
                });
            }
            tracing::debug!("Change stream closed");
        }))
    }

    /// Re-evaluate every pair for one identity.
    pub async fn resync(&self, who: Someone) -> Option<SummaryReport> {
        self.resync_with_cause(who, SyncCause::ManualResync).await
    }

    pub async fn resync_with_cause(&self, who: Someone, cause: SyncCause) -> Option<SummaryReport> {
        if !self.is_enabled() {
            return None;
        }
        let pairs = self.active_pairs().map(|(index, _)| index).collect();
        Some(self.run(cause, who, pairs, None).await)
    }

    /// Re-evaluate every pair for every linked identity.
    pub async fn resync_all(&self) -> Result<Vec<SummaryReport>, SyncFail> {
        self.resync_all_with_cause(SyncCause::ManualResync).await
    }

    pub async fn resync_all_with_cause(
        &self,
        cause: SyncCause,
    ) -> Result<Vec<SummaryReport>, SyncFail> {
        let pairs: Vec<usize> = self.active_pairs().map(|(index, _)| index).collect();
        self.resync_linked(pairs, cause).await
    }

    /// Re-evaluate one pair for every linked identity.
    pub async fn resync_pair(
        &self,
        index: usize,
        cause: SyncCause,
    ) -> Result<Vec<SummaryReport>, SyncFail> {
        let pairs = match self.inner.config.pairs.get(index) {
            Some(pair) if pair.is_set() => vec![index],
            _ => Vec::new(),
        };
        self.resync_linked(pairs, cause).await
    }

    async fn resync_linked(
        &self,
        pairs: Vec<usize>,
        cause: SyncCause,
    ) -> Result<Vec<SummaryReport>, SyncFail> {
        if !self.is_enabled() || pairs.is_empty() {
            return Ok(Vec::new());
        }
        let linked = self
            .inner
            .directory
            .linked()
            .await
            .map_err(|err| SyncFail::with_cause(FailReason::DirectoryUnavailable, err))?;
        tracing::info!(
            identities = linked.len(),
            pairs = pairs.len(),
            cause = %cause,
            "Resyncing linked identities"
        );

        let runs = linked.into_iter().map(|who| {
            let summary = SyncSummary::new(SYNC_NAME, cause, Someone::from(who));
            self.run_linked(summary, who, pairs.clone(), None)
        });
        Ok(join_all(runs).await)
    }

    async fn run(
        &self,
        cause: SyncCause,
        who: Someone,
        pairs: Vec<usize>,
        trigger: Option<Trigger>,
    ) -> SummaryReport {
        let summary = SyncSummary::new(SYNC_NAME, cause, who);
        if self.inner.local.is_none() {
            return summary
                .fail(SyncFail::new(FailReason::NoLocalProvider))
                .resolve()
                .await;
        }
        match who.resolve(self.inner.directory.as_ref()).await {
            Ok(linked) => self.run_linked(summary, linked, pairs, trigger).await,
            Err(fail) => summary.fail(fail).resolve().await,
        }
    }

    async fn run_linked(
        &self,
        mut summary: SyncSummary,
        who: Linked,
        pairs: Vec<usize>,
        trigger: Option<Trigger>,
    ) -> SummaryReport {
        let Some(local) = self.inner.local.clone() else {
            return summary
                .fail(SyncFail::new(FailReason::NoLocalProvider))
                .resolve()
                .await;
        };

        for index in pairs {
            let Some(pair) = self.inner.config.pairs.get(index).cloned() else {
                continue;
            };
            if let Some(trigger) = trigger {
                self.inner
                    .recent
                    .observe(who, index, trigger.side, trigger.stamp);
            }
            let engine = self.clone();
            let local = local.clone();
            let task_pair = pair.clone();
            summary.append_future(pair, async move {
                engine
                    .resolve_pair(index, &task_pair, who, &local, trigger)
                    .await
            });
        }
        summary.resolve().await
    }

    async fn resolve_pair(
        &self,
        index: usize,
        pair: &PairConfig,
        who: Linked,
        local: &LocalSide,
        trigger: Option<Trigger>,
    ) -> PairOutcome {
        let (remote_state, local_state) = tokio::join!(
            self.inner.remote.fetch_attribute(pair, who.remote),
            local.fetch_attribute(pair, who.local),
        );
        let remote_state = remote_state.map_err(|err| SyncFail::from(err).on(Side::Remote));
        let local_state = local_state.map_err(|err| SyncFail::from(err).on(Side::Local));

        let (remote_state, local_state) = match (remote_state, local_state) {
            (Ok(remote_state), Ok(local_state)) => (remote_state, local_state),
            (Err(remote), Err(local)) => return Err(SyncFail::both_fetches_failed(remote, local)),
            (Err(fail), Ok(_)) | (Ok(_), Err(fail)) => return Err(fail),
        };
        if remote_state == local_state {
            return Ok(SyncResult::Matched(remote_state));
        }

        let opposite = trigger.and_then(|t| self.inner.recent.latest(who, index, t.side.opposite()));
        let winner = arbitrate(pair, trigger, opposite, self.inner.config.conflict_window());
        tracing::debug!(
            pair = %pair,
            who = %who,
            remote = remote_state,
            local = local_state,
            winner = %winner,
            "States differ"
        );

        match winner {
            Side::Remote => self.apply_local(pair, who.local, local, remote_state).await,
            Side::Local => self.apply_remote(pair, who.remote, local_state).await,
        }
    }

    async fn apply_remote(&self, pair: &PairConfig, who: RemoteId, state: bool) -> PairOutcome {
        let expected = &self.inner.expected_remote;
        expected.record(who, pair.remote_attribute, state);

        match self.inner.remote.apply_attribute(pair, who, state).await {
            Ok(()) => Ok(SyncResult::applied(Side::Remote, state)),
            Err(err) => {
                expected.forget(&who, &pair.remote_attribute, state);
                Err(SyncFail::from(err).on(Side::Remote))
            }
        }
    }

    async fn apply_local(
        &self,
        pair: &PairConfig,
        who: LocalId,
        local: &LocalSide,
        state: bool,
    ) -> PairOutcome {
        let expected = &self.inner.expected_local;
        let key = self.expectation_key(pair, local);
        expected.record(who, key.clone(), state);

        match local.apply_attribute(pair, who, state).await {
            Ok(()) => Ok(SyncResult::applied(Side::Local, state)),
            Err(err) => {
                expected.forget(&who, &key, state);
                Err(SyncFail::from(err).on(Side::Local))
            }
        }
    }

    /// Key the local echo will arrive under; plain stores echo globally.
    fn expectation_key(&self, pair: &PairConfig, local: &LocalSide) -> String {
        if local.supports_context() {
            pair.local_key()
        } else {
            local_key(&pair.local_attribute, &BTreeSet::new())
        }
    }

    /// Drop expired expectations and change stamps.
    ///
    /// The caches already sweep themselves as entries are written; calling
    /// this (as [`PairTimers`](crate::PairTimers) does once per TTL) also
    /// reclaims memory on an engine that has gone quiet.
    pub fn purge_expired(&self) -> usize {
        self.inner.expected_remote.purge_expired()
            + self.inner.expected_local.purge_expired()
            + self.inner.recent.purge_expired()
    }

    /// Human-readable state for operators. Has no side effects.
    pub fn debug_dump(&self) -> String {
        let mut out = format!(
            "{} ({})\nActive pairs:",
            SYNC_NAME,
            if self.is_enabled() { "enabled" } else { "disabled" }
        );
        for (_, pair) in self.active_pairs() {
            let context = if pair.is_global() {
                "global".to_string()
            } else {
                pair.context.iter().cloned().collect::<Vec<_>>().join(", ")
            };
            out.push_str(&format!(
                "\n- {} (tie-breaker: {}, direction: {}, context: {})",
                pair, pair.tie_breaker, pair.authority, context
            ));
            if let Some(timer) = pair.timer {
                out.push_str(&format!(" [Timed every {}s]", timer.cycle_secs));
            }
        }

        match &self.inner.local {
            Some(local) => {
                out.push_str(&format!(
                    "\n\nAvailable groups ({}{}):",
                    local.name(),
                    if local.supports_context() {
                        ", context-aware"
                    } else {
                        ""
                    }
                ));
                for group in local.groups() {
                    out.push_str(&format!("\n- {}", group));
                }
            }
            None => out.push_str("\n\nNo permission provider available"),
        }

        out.push_str(&format!(
            "\n\nRemote provider: {}\nPending expectations: remote {}, local {}",
            self.inner.remote.name(),
            self.inner.expected_remote.len(),
            self.inner.expected_local.len()
        ));
        out
    }
}
