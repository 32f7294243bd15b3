//! Identity of a person on either side.

use crate::error::{FailReason, SyncFail};
use crate::provider::IdentityDirectory;
use crate::{LocalId, RemoteId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A person, known by their remote id or their local id.
///
/// Constructed per event or request; resolves to the counterpart id through
/// an [`IdentityDirectory`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "side", content = "id", rename_all = "lowercase")]
pub enum Someone {
    Remote(RemoteId),
    Local(LocalId),
}

/// Both ids of a linked person.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Linked {
    pub remote: RemoteId,
    pub local: LocalId,
}

impl Linked {
    pub fn new(remote: RemoteId, local: LocalId) -> Self {
        Self { remote, local }
    }
}

impl Someone {
    pub fn remote(id: RemoteId) -> Self {
        Someone::Remote(id)
    }

    pub fn local(id: LocalId) -> Self {
        Someone::Local(id)
    }

    pub fn remote_id(&self) -> Option<RemoteId> {
        match self {
            Someone::Remote(id) => Some(*id),
            Someone::Local(_) => None,
        }
    }

    pub fn local_id(&self) -> Option<LocalId> {
        match self {
            Someone::Local(id) => Some(*id),
            Someone::Remote(_) => None,
        }
    }

    /// Look up the counterpart id and return both.
    pub async fn resolve(&self, directory: &dyn IdentityDirectory) -> Result<Linked, SyncFail> {
        match *self {
            Someone::Remote(remote) => directory
                .local_for(remote)
                .await
                .map_err(|err| SyncFail::with_cause(FailReason::DirectoryUnavailable, err))?
                .map(|local| Linked { remote, local })
                .ok_or_else(|| SyncFail::new(FailReason::NotLinked)),
            Someone::Local(local) => directory
                .remote_for(local)
                .await
                .map_err(|err| SyncFail::with_cause(FailReason::DirectoryUnavailable, err))?
                .map(|remote| Linked { remote, local })
                .ok_or_else(|| SyncFail::new(FailReason::NotLinked)),
        }
    }
}

impl From<Linked> for Someone {
    fn from(linked: Linked) -> Self {
        Someone::Local(linked.local)
    }
}

impl fmt::Display for Someone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Someone::Remote(id) => write!(f, "remote:{}", id),
            Someone::Local(id) => write!(f, "local:{}", id),
        }
    }
}

impl fmt::Display for Linked {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "remote:{}/local:{}", self.remote, self.local)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderError;
    use crate::memory::MemoryDirectory;
    use uuid::Uuid;

    #[tokio::test]
    async fn resolves_both_directions() {
        let directory = MemoryDirectory::new();
        let local = Uuid::new_v4();
        directory.link(42, local);

        let from_remote = Someone::remote(42).resolve(&directory).await.unwrap();
        let from_local = Someone::local(local).resolve(&directory).await.unwrap();
        assert_eq!(from_remote, Linked::new(42, local));
        assert_eq!(from_remote, from_local);
    }

    #[tokio::test]
    async fn unlinked_identity_fails() {
        let directory = MemoryDirectory::new();
        let fail = Someone::remote(7).resolve(&directory).await.unwrap_err();
        assert_eq!(fail.reason(), FailReason::NotLinked);
    }

    #[tokio::test]
    async fn directory_errors_are_wrapped() {
        let directory = MemoryDirectory::new();
        directory.fail_with(Some(ProviderError::Unavailable("db".into())));
        let fail = Someone::local(Uuid::new_v4())
            .resolve(&directory)
            .await
            .unwrap_err();
        assert_eq!(fail.reason(), FailReason::DirectoryUnavailable);
        assert!(fail.root_cause().is_some());
    }

    #[test]
    fn display() {
        assert_eq!(Someone::remote(5).to_string(), "remote:5");
        let json = serde_json::to_string(&Someone::remote(5)).unwrap();
        assert_eq!(json, r#"{"side":"remote","id":5}"#);
    }
}
