//! Standalone in-memory backend standing in for the chat service, the
//! permission store and the account-link directory.

use attrsync_engine::{
    AttributeId, ConfigError, EventSender, Linked, LocalId, MemoryDirectory, MemoryGroups,
    MemoryRemote, RemoteId, SyncConfig, SyncEngine,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Initial backend contents.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Seed {
    /// Remote attributes (roles) that exist
    pub attributes: Vec<AttributeId>,
    /// Local groups that exist
    pub groups: Vec<String>,
    /// Whether the group store scopes membership by context
    pub contextual: bool,
    pub links: Vec<Linked>,
    pub holders: Vec<Holder>,
    pub members: Vec<Member>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Holder {
    pub who: RemoteId,
    pub attribute: AttributeId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Member {
    pub who: LocalId,
    pub group: String,
    #[serde(default)]
    pub context: BTreeSet<String>,
}

/// The three in-memory providers, wired to one notification channel.
pub struct Backend {
    pub remote: Arc<MemoryRemote>,
    pub groups: Arc<MemoryGroups>,
    pub directory: Arc<MemoryDirectory>,
}

impl Backend {
    pub fn from_seed(seed: &Seed, events: EventSender) -> Self {
        let remote = Arc::new(MemoryRemote::new(seed.attributes.iter().copied()));
        let groups = Arc::new(if seed.contextual {
            MemoryGroups::contextual(seed.groups.iter().cloned())
        } else {
            MemoryGroups::new(seed.groups.iter().cloned())
        });
        let directory = Arc::new(MemoryDirectory::new());

        for link in &seed.links {
            directory.link(link.remote, link.local);
        }
        for holder in &seed.holders {
            remote.seed(holder.who, holder.attribute, true);
        }
        for member in &seed.members {
            groups.seed(member.who, &member.group, &member.context, true);
        }

        remote.notify(events.clone());
        groups.notify(events);
        tracing::info!(
            attributes = seed.attributes.len(),
            groups = seed.groups.len(),
            links = seed.links.len(),
            "In-memory backend seeded"
        );

        Self {
            remote,
            groups,
            directory,
        }
    }

    /// Build an engine over this backend.
    pub fn engine(&self, config: SyncConfig) -> Result<SyncEngine, ConfigError> {
        SyncEngine::new(
            config,
            self.remote.clone(),
            Some(self.groups.clone().into_local_side()),
            self.directory.clone(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;
    use uuid::Uuid;

    #[test]
    fn seed_from_json() {
        let who = Uuid::new_v4();
        let json = format!(
            r#"{{
                "attributes": [1234],
                "groups": ["vip"],
                "links": [{{ "remote": 42, "local": "{who}" }}],
                "holders": [{{ "who": 42, "attribute": 1234 }}],
                "members": [{{ "who": "{who}", "group": "vip" }}]
            }}"#
        );
        let seed: Seed = serde_json::from_str(&json).unwrap();
        let (tx, _rx) = mpsc::unbounded_channel();
        let backend = Backend::from_seed(&seed, tx);

        assert!(backend.remote.holds(42, 1234));
        assert!(backend.groups.is_member(who, "vip", &BTreeSet::new()));
        assert!(!seed.contextual);
    }
}
