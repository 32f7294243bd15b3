//! What triggered a synchronization run, and the change events that carry it.

use crate::result::Side;
use crate::{AttributeId, LocalId, RemoteId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Trigger of a synchronization attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncCause {
    /// An attribute changed on the remote side
    RemoteAttributeChanged,
    /// A group changed on the local side through the permission store
    LocalAttributeChanged,
    /// A group changed by another local component (e.g. an admin command)
    LocalPluginChange,
    /// Operator asked for a resync
    ManualResync,
    /// The engine started
    ModuleStartup,
    /// A pair's periodic timer fired
    Timer,
}

impl SyncCause {
    /// Whether the engine's own writes can produce this cause.
    ///
    /// Only these causes need the expectation cache consulted.
    pub fn engine_can_cause(self) -> bool {
        matches!(
            self,
            SyncCause::RemoteAttributeChanged | SyncCause::LocalAttributeChanged
        )
    }

    /// The side whose change triggered the run.
    pub fn origin(self) -> Option<Side> {
        match self {
            SyncCause::RemoteAttributeChanged => Some(Side::Remote),
            SyncCause::LocalAttributeChanged | SyncCause::LocalPluginChange => Some(Side::Local),
            SyncCause::ManualResync | SyncCause::ModuleStartup | SyncCause::Timer => None,
        }
    }
}

impl fmt::Display for SyncCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            SyncCause::RemoteAttributeChanged => "remote attribute changed",
            SyncCause::LocalAttributeChanged => "local attribute changed",
            SyncCause::LocalPluginChange => "local plugin change",
            SyncCause::ManualResync => "manual resync",
            SyncCause::ModuleStartup => "module startup",
            SyncCause::Timer => "timer",
        };
        f.write_str(text)
    }
}

/// A change notification delivered by either side's listener.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "side", rename_all = "camelCase")]
pub enum ChangeEvent {
    #[serde(rename_all = "camelCase")]
    Remote {
        who: RemoteId,
        attribute: AttributeId,
        state: bool,
    },
    #[serde(rename_all = "camelCase")]
    Local {
        who: LocalId,
        group: String,
        #[serde(default)]
        context: Option<BTreeSet<String>>,
        state: bool,
        cause: SyncCause,
    },
}

impl ChangeEvent {
    pub fn side(&self) -> Side {
        match self {
            ChangeEvent::Remote { .. } => Side::Remote,
            ChangeEvent::Local { .. } => Side::Local,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_attribute_changes_can_be_echoes() {
        assert!(SyncCause::RemoteAttributeChanged.engine_can_cause());
        assert!(SyncCause::LocalAttributeChanged.engine_can_cause());
        assert!(!SyncCause::LocalPluginChange.engine_can_cause());
        assert!(!SyncCause::ManualResync.engine_can_cause());
        assert!(!SyncCause::Timer.engine_can_cause());
    }

    #[test]
    fn origin_side() {
        assert_eq!(SyncCause::RemoteAttributeChanged.origin(), Some(Side::Remote));
        assert_eq!(SyncCause::LocalPluginChange.origin(), Some(Side::Local));
        assert_eq!(SyncCause::ModuleStartup.origin(), None);
    }

    #[test]
    fn local_event_deserialization() {
        let json = r#"{
            "side": "local",
            "who": "67e55044-10b1-426f-9247-bb680e5fe0c8",
            "group": "vip",
            "state": true,
            "cause": "local_attribute_changed"
        }"#;
        let event: ChangeEvent = serde_json::from_str(json).unwrap();
        match event {
            ChangeEvent::Local {
                group,
                context,
                state,
                cause,
                ..
            } => {
                assert_eq!(group, "vip");
                assert!(context.is_none());
                assert!(state);
                assert_eq!(cause, SyncCause::LocalAttributeChanged);
            }
            _ => panic!("Expected local event"),
        }
    }
}
