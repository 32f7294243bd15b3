//! Collaborator interfaces consumed by the engine.
//!
//! The remote side and the identity directory are plain traits. The local
//! side comes in two capability levels: [`Groups`] for stores that only know
//! global groups, and [`ContextGroups`] for stores partitioned by context
//! (e.g. per sub-server). [`LocalSide`] records which one was supplied so the
//! capability is decided once, at construction.

use crate::config::PairConfig;
use crate::error::ProviderError;
use crate::someone::Linked;
use crate::{LocalId, RemoteId};
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Result type for provider calls.
pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

/// The remote chat/identity service.
#[async_trait]
pub trait RemoteSide: Send + Sync {
    /// Display name used in diagnostics.
    fn name(&self) -> &str;

    /// Whether `who` currently holds the pair's remote attribute.
    async fn fetch_attribute(&self, pair: &PairConfig, who: RemoteId) -> ProviderResult<bool>;

    /// Grant (`true`) or revoke (`false`) the pair's remote attribute.
    async fn apply_attribute(
        &self,
        pair: &PairConfig,
        who: RemoteId,
        state: bool,
    ) -> ProviderResult<()>;
}

/// A local group store without context support.
#[async_trait]
pub trait Groups: Send + Sync {
    fn name(&self) -> &str;

    /// The catalogue of groups known to the store.
    fn groups(&self) -> Vec<String>;

    async fn has_group(&self, who: LocalId, group: &str) -> ProviderResult<bool>;

    async fn add_group(&self, who: LocalId, group: &str) -> ProviderResult<()>;

    async fn remove_group(&self, who: LocalId, group: &str) -> ProviderResult<()>;
}

/// A local group store that scopes membership by context.
#[async_trait]
pub trait ContextGroups: Groups {
    async fn has_group_in(
        &self,
        who: LocalId,
        group: &str,
        context: &BTreeSet<String>,
    ) -> ProviderResult<bool>;

    async fn add_group_in(
        &self,
        who: LocalId,
        group: &str,
        context: &BTreeSet<String>,
    ) -> ProviderResult<()>;

    async fn remove_group_in(
        &self,
        who: LocalId,
        group: &str,
        context: &BTreeSet<String>,
    ) -> ProviderResult<()>;
}

/// The local side, tagged with its capability.
#[derive(Clone)]
pub enum LocalSide {
    Plain(Arc<dyn Groups>),
    Contextual(Arc<dyn ContextGroups>),
}

impl LocalSide {
    pub fn supports_context(&self) -> bool {
        matches!(self, LocalSide::Contextual(_))
    }

    pub fn name(&self) -> &str {
        match self {
            LocalSide::Plain(groups) => groups.name(),
            LocalSide::Contextual(groups) => groups.name(),
        }
    }

    pub fn groups(&self) -> Vec<String> {
        match self {
            LocalSide::Plain(groups) => groups.groups(),
            LocalSide::Contextual(groups) => groups.groups(),
        }
    }

    /// Whether `who` holds the pair's local attribute.
    ///
    /// A plain store ignores the pair's context and answers globally.
    pub async fn fetch_attribute(&self, pair: &PairConfig, who: LocalId) -> ProviderResult<bool> {
        let group = pair.local_attribute.as_str();
        match self {
            LocalSide::Contextual(groups) if !pair.is_global() => {
                groups.has_group_in(who, group, &pair.context).await
            }
            LocalSide::Contextual(groups) => groups.has_group(who, group).await,
            LocalSide::Plain(groups) => groups.has_group(who, group).await,
        }
    }

    pub async fn apply_attribute(
        &self,
        pair: &PairConfig,
        who: LocalId,
        state: bool,
    ) -> ProviderResult<()> {
        let group = pair.local_attribute.as_str();
        match self {
            LocalSide::Contextual(groups) if !pair.is_global() => {
                if state {
                    groups.add_group_in(who, group, &pair.context).await
                } else {
                    groups.remove_group_in(who, group, &pair.context).await
                }
            }
            LocalSide::Contextual(groups) => {
                if state {
                    groups.add_group(who, group).await
                } else {
                    groups.remove_group(who, group).await
                }
            }
            LocalSide::Plain(groups) => {
                if state {
                    groups.add_group(who, group).await
                } else {
                    groups.remove_group(who, group).await
                }
            }
        }
    }
}

/// Maps remote ids to local ids and back.
#[async_trait]
pub trait IdentityDirectory: Send + Sync {
    async fn local_for(&self, remote: RemoteId) -> ProviderResult<Option<LocalId>>;

    async fn remote_for(&self, local: LocalId) -> ProviderResult<Option<RemoteId>>;

    /// Every currently linked identity, used by full resyncs.
    async fn linked(&self) -> ProviderResult<Vec<Linked>>;
}
