//! In-memory providers.
//!
//! Backed by concurrent maps, these implement every collaborator trait. They
//! count mutating calls, accept injected failures and can publish change
//! notifications (including the echoes of the engine's own writes) on a
//! channel, which makes them suitable both for tests and as a standalone
//! backend for the host.

use crate::cause::{ChangeEvent, SyncCause};
use crate::config::{local_key, normalize_context, PairConfig};
use crate::error::ProviderError;
use crate::provider::{ContextGroups, Groups, IdentityDirectory, LocalSide, ProviderResult, RemoteSide};
use crate::someone::Linked;
use crate::{AttributeId, LocalId, RemoteId};
use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::mpsc;

/// Sender half of a change-notification stream.
pub type EventSender = mpsc::UnboundedSender<ChangeEvent>;

/// A mutating call observed by an in-memory provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedChange {
    pub who: String,
    pub attribute: String,
    pub state: bool,
}

/// Failure injection and call accounting shared by the providers.
#[derive(Debug, Default)]
struct Faults {
    fetch: RwLock<Option<ProviderError>>,
    apply: RwLock<Option<ProviderError>>,
    fetches: AtomicUsize,
    applied: Mutex<Vec<AppliedChange>>,
}

impl Faults {
    fn check_fetch(&self) -> ProviderResult<()> {
        self.fetches.fetch_add(1, Ordering::Relaxed);
        match &*self.fetch.read().unwrap_or_else(|e| e.into_inner()) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    fn check_apply(&self) -> ProviderResult<()> {
        match &*self.apply.read().unwrap_or_else(|e| e.into_inner()) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    fn set_fetch(&self, err: Option<ProviderError>) {
        *self.fetch.write().unwrap_or_else(|e| e.into_inner()) = err;
    }

    fn set_apply(&self, err: Option<ProviderError>) {
        *self.apply.write().unwrap_or_else(|e| e.into_inner()) = err;
    }

    fn log(&self, change: AppliedChange) {
        self.applied
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(change);
    }

    fn applied(&self) -> Vec<AppliedChange> {
        self.applied
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

/// Remote side holding attribute membership in memory.
#[derive(Debug, Default)]
pub struct MemoryRemote {
    attributes: DashSet<AttributeId>,
    holders: DashSet<(RemoteId, AttributeId)>,
    faults: Faults,
    events: RwLock<Option<EventSender>>,
}

impl MemoryRemote {
    /// A remote side where `attributes` exist.
    pub fn new(attributes: impl IntoIterator<Item = AttributeId>) -> Self {
        let remote = Self::default();
        for attribute in attributes {
            remote.attributes.insert(attribute);
        }
        remote
    }

    /// Publish every state change, echoes included, on `events`.
    pub fn notify(&self, events: EventSender) {
        *self.events.write().unwrap_or_else(|e| e.into_inner()) = Some(events);
    }

    pub fn create_attribute(&self, attribute: AttributeId) {
        self.attributes.insert(attribute);
    }

    pub fn delete_attribute(&self, attribute: AttributeId) {
        self.attributes.remove(&attribute);
        self.holders.retain(|(_, held)| *held != attribute);
    }

    /// Seed state without emitting a notification.
    pub fn seed(&self, who: RemoteId, attribute: AttributeId, state: bool) {
        self.write(who, attribute, state);
    }

    /// Change state as an external actor would; emits a notification when
    /// the state actually changed.
    pub fn set(&self, who: RemoteId, attribute: AttributeId, state: bool) -> bool {
        let changed = self.write(who, attribute, state);
        if changed {
            self.emit(who, attribute, state);
        }
        changed
    }

    pub fn holds(&self, who: RemoteId, attribute: AttributeId) -> bool {
        self.holders.contains(&(who, attribute))
    }

    pub fn fail_fetches(&self, err: Option<ProviderError>) {
        self.faults.set_fetch(err);
    }

    pub fn fail_applies(&self, err: Option<ProviderError>) {
        self.faults.set_apply(err);
    }

    pub fn fetch_count(&self) -> usize {
        self.faults.fetches.load(Ordering::Relaxed)
    }

    pub fn applied(&self) -> Vec<AppliedChange> {
        self.faults.applied()
    }

    pub fn apply_count(&self) -> usize {
        self.applied().len()
    }

    fn write(&self, who: RemoteId, attribute: AttributeId, state: bool) -> bool {
        if state {
            self.holders.insert((who, attribute))
        } else {
            self.holders.remove(&(who, attribute)).is_some()
        }
    }

    fn emit(&self, who: RemoteId, attribute: AttributeId, state: bool) {
        if let Some(events) = &*self.events.read().unwrap_or_else(|e| e.into_inner()) {
            let _ = events.send(ChangeEvent::Remote {
                who,
                attribute,
                state,
            });
        }
    }

    fn ensure_exists(&self, attribute: AttributeId) -> ProviderResult<()> {
        if self.attributes.contains(&attribute) {
            Ok(())
        } else {
            Err(ProviderError::UnknownAttribute(attribute.to_string()))
        }
    }
}

#[async_trait]
impl RemoteSide for MemoryRemote {
    fn name(&self) -> &str {
        "memory"
    }

    async fn fetch_attribute(&self, pair: &PairConfig, who: RemoteId) -> ProviderResult<bool> {
        tokio::task::yield_now().await;
        self.faults.check_fetch()?;
        self.ensure_exists(pair.remote_attribute)?;
        Ok(self.holds(who, pair.remote_attribute))
    }

    async fn apply_attribute(
        &self,
        pair: &PairConfig,
        who: RemoteId,
        state: bool,
    ) -> ProviderResult<()> {
        tokio::task::yield_now().await;
        self.ensure_exists(pair.remote_attribute)?;
        self.faults.check_apply()?;
        self.faults.log(AppliedChange {
            who: who.to_string(),
            attribute: pair.remote_attribute.to_string(),
            state,
        });
        self.set(who, pair.remote_attribute, state);
        Ok(())
    }
}

/// Local group store held in memory, optionally context-aware.
#[derive(Debug, Default)]
pub struct MemoryGroups {
    groups: DashSet<String>,
    members: DashSet<(LocalId, String)>,
    context_aware: bool,
    faults: Faults,
    events: RwLock<Option<EventSender>>,
}

impl MemoryGroups {
    /// A store that only knows global groups.
    pub fn new<I, S>(groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let store = Self::default();
        for group in groups {
            store.groups.insert(group.into());
        }
        store
    }

    /// A store that scopes membership by context.
    pub fn contextual<I, S>(groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            context_aware: true,
            ..Self::new(groups)
        }
    }

    /// Wrap into the engine's local side, picking the capability once.
    pub fn into_local_side(self: Arc<Self>) -> LocalSide {
        if self.context_aware {
            LocalSide::Contextual(self)
        } else {
            LocalSide::Plain(self)
        }
    }

    pub fn notify(&self, events: EventSender) {
        *self.events.write().unwrap_or_else(|e| e.into_inner()) = Some(events);
    }

    pub fn seed(&self, who: LocalId, group: &str, context: &BTreeSet<String>, state: bool) {
        self.write(who, group, context, state);
    }

    /// Change membership as another local component would; emits a
    /// notification with `cause` when membership actually changed.
    pub fn set(
        &self,
        who: LocalId,
        group: &str,
        context: &BTreeSet<String>,
        state: bool,
        cause: SyncCause,
    ) -> bool {
        let changed = self.write(who, group, context, state);
        if changed {
            self.emit(who, group, context, state, cause);
        }
        changed
    }

    pub fn is_member(&self, who: LocalId, group: &str, context: &BTreeSet<String>) -> bool {
        self.members.contains(&(who, self.key(group, context)))
    }

    pub fn fail_fetches(&self, err: Option<ProviderError>) {
        self.faults.set_fetch(err);
    }

    pub fn fail_applies(&self, err: Option<ProviderError>) {
        self.faults.set_apply(err);
    }

    pub fn fetch_count(&self) -> usize {
        self.faults.fetches.load(Ordering::Relaxed)
    }

    pub fn applied(&self) -> Vec<AppliedChange> {
        self.faults.applied()
    }

    pub fn apply_count(&self) -> usize {
        self.applied().len()
    }

    fn key(&self, group: &str, context: &BTreeSet<String>) -> String {
        if self.context_aware {
            let context = normalize_context(Some(context)).unwrap_or_default();
            local_key(group, &context)
        } else {
            local_key(group, &BTreeSet::new())
        }
    }

    fn write(&self, who: LocalId, group: &str, context: &BTreeSet<String>, state: bool) -> bool {
        let key = self.key(group, context);
        if state {
            self.members.insert((who, key))
        } else {
            self.members.remove(&(who, key)).is_some()
        }
    }

    fn emit(
        &self,
        who: LocalId,
        group: &str,
        context: &BTreeSet<String>,
        state: bool,
        cause: SyncCause,
    ) {
        if let Some(events) = &*self.events.read().unwrap_or_else(|e| e.into_inner()) {
            let _ = events.send(ChangeEvent::Local {
                who,
                group: group.to_string(),
                context: (self.context_aware && !context.is_empty()).then(|| context.clone()),
                state,
                cause,
            });
        }
    }

    fn ensure_exists(&self, group: &str) -> ProviderResult<()> {
        if self.groups.contains(group) {
            Ok(())
        } else {
            Err(ProviderError::UnknownAttribute(group.to_string()))
        }
    }

    async fn fetch(&self, who: LocalId, group: &str, context: &BTreeSet<String>) -> ProviderResult<bool> {
        tokio::task::yield_now().await;
        self.faults.check_fetch()?;
        self.ensure_exists(group)?;
        Ok(self.is_member(who, group, context))
    }

    async fn apply(
        &self,
        who: LocalId,
        group: &str,
        context: &BTreeSet<String>,
        state: bool,
    ) -> ProviderResult<()> {
        tokio::task::yield_now().await;
        self.ensure_exists(group)?;
        self.faults.check_apply()?;
        self.faults.log(AppliedChange {
            who: who.to_string(),
            attribute: self.key(group, context),
            state,
        });
        self.set(who, group, context, state, SyncCause::LocalAttributeChanged);
        Ok(())
    }
}

#[async_trait]
impl Groups for MemoryGroups {
    fn name(&self) -> &str {
        if self.context_aware {
            "memory (contextual)"
        } else {
            "memory"
        }
    }

    fn groups(&self) -> Vec<String> {
        let mut groups: Vec<String> = self.groups.iter().map(|g| g.key().clone()).collect();
        groups.sort();
        groups
    }

    async fn has_group(&self, who: LocalId, group: &str) -> ProviderResult<bool> {
        self.fetch(who, group, &BTreeSet::new()).await
    }

    async fn add_group(&self, who: LocalId, group: &str) -> ProviderResult<()> {
        self.apply(who, group, &BTreeSet::new(), true).await
    }

    async fn remove_group(&self, who: LocalId, group: &str) -> ProviderResult<()> {
        self.apply(who, group, &BTreeSet::new(), false).await
    }
}

#[async_trait]
impl ContextGroups for MemoryGroups {
    async fn has_group_in(
        &self,
        who: LocalId,
        group: &str,
        context: &BTreeSet<String>,
    ) -> ProviderResult<bool> {
        self.fetch(who, group, context).await
    }

    async fn add_group_in(
        &self,
        who: LocalId,
        group: &str,
        context: &BTreeSet<String>,
    ) -> ProviderResult<()> {
        self.apply(who, group, context, true).await
    }

    async fn remove_group_in(
        &self,
        who: LocalId,
        group: &str,
        context: &BTreeSet<String>,
    ) -> ProviderResult<()> {
        self.apply(who, group, context, false).await
    }
}

/// Account links held in memory.
#[derive(Debug, Default)]
pub struct MemoryDirectory {
    by_remote: DashMap<RemoteId, LocalId>,
    by_local: DashMap<LocalId, RemoteId>,
    failure: RwLock<Option<ProviderError>>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn link(&self, remote: RemoteId, local: LocalId) {
        self.by_remote.insert(remote, local);
        self.by_local.insert(local, remote);
    }

    pub fn unlink(&self, remote: RemoteId) {
        if let Some((_, local)) = self.by_remote.remove(&remote) {
            self.by_local.remove(&local);
        }
    }

    pub fn fail_with(&self, err: Option<ProviderError>) {
        *self.failure.write().unwrap_or_else(|e| e.into_inner()) = err;
    }

    fn check(&self) -> ProviderResult<()> {
        match &*self.failure.read().unwrap_or_else(|e| e.into_inner()) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl IdentityDirectory for MemoryDirectory {
    async fn local_for(&self, remote: RemoteId) -> ProviderResult<Option<LocalId>> {
        self.check()?;
        Ok(self.by_remote.get(&remote).map(|local| *local))
    }

    async fn remote_for(&self, local: LocalId) -> ProviderResult<Option<RemoteId>> {
        self.check()?;
        Ok(self.by_local.get(&local).map(|remote| *remote))
    }

    async fn linked(&self) -> ProviderResult<Vec<Linked>> {
        self.check()?;
        let mut linked: Vec<Linked> = self
            .by_remote
            .iter()
            .map(|entry| Linked::new(*entry.key(), *entry.value()))
            .collect();
        linked.sort_by_key(|l| l.remote);
        Ok(linked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[tokio::test]
    async fn remote_reports_unknown_attribute() {
        let remote = MemoryRemote::new([10]);
        let err = remote
            .fetch_attribute(&PairConfig::new(11, "vip"), 1)
            .await
            .unwrap_err();
        assert_eq!(err, ProviderError::UnknownAttribute("11".into()));
    }

    #[tokio::test]
    async fn remote_apply_records_and_echoes() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let remote = MemoryRemote::new([10]);
        remote.notify(tx);

        remote
            .apply_attribute(&PairConfig::new(10, "vip"), 1, true)
            .await
            .unwrap();
        assert!(remote.holds(1, 10));
        assert_eq!(remote.apply_count(), 1);
        assert_eq!(
            rx.try_recv().unwrap(),
            ChangeEvent::Remote {
                who: 1,
                attribute: 10,
                state: true
            }
        );
    }

    #[tokio::test]
    async fn plain_store_ignores_context() {
        let groups = Arc::new(MemoryGroups::new(["vip"]));
        let who = Uuid::new_v4();
        let side = groups.clone().into_local_side();
        assert!(!side.supports_context());

        let pair = PairConfig::new(10, "vip").with_context(["survival"]);
        side.apply_attribute(&pair, who, true).await.unwrap();
        assert!(groups.is_member(who, "vip", &BTreeSet::new()));
        assert!(side.fetch_attribute(&PairConfig::new(10, "vip"), who).await.unwrap());
    }

    #[tokio::test]
    async fn contextual_store_scopes_membership() {
        let groups = Arc::new(MemoryGroups::contextual(["vip"]));
        let who = Uuid::new_v4();
        let side = groups.clone().into_local_side();
        assert!(side.supports_context());

        let scoped = PairConfig::new(10, "vip").with_context(["survival"]);
        side.apply_attribute(&scoped, who, true).await.unwrap();
        assert!(side.fetch_attribute(&scoped, who).await.unwrap());
        assert!(!side
            .fetch_attribute(&PairConfig::new(10, "vip"), who)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn injected_failures() {
        let groups = MemoryGroups::new(["vip"]);
        groups.fail_applies(Some(ProviderError::Unavailable("down".into())));
        let err = groups.add_group(Uuid::new_v4(), "vip").await.unwrap_err();
        assert_eq!(err, ProviderError::Unavailable("down".into()));
        assert_eq!(groups.apply_count(), 0);

        groups.fail_applies(None);
        groups.add_group(Uuid::new_v4(), "vip").await.unwrap();
        assert_eq!(groups.apply_count(), 1);
    }

    #[tokio::test]
    async fn directory_lists_links() {
        let directory = MemoryDirectory::new();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        directory.link(2, b);
        directory.link(1, a);
        let linked = directory.linked().await.unwrap();
        assert_eq!(linked, vec![Linked::new(1, a), Linked::new(2, b)]);

        directory.unlink(1);
        assert_eq!(directory.remote_for(a).await.unwrap(), None);
    }
}
