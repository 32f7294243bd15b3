//! Outcomes of a single synchronization attempt.

use crate::error::{FailReason, SyncFail};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One of the two synchronized systems.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    /// The remote chat/identity service
    Remote,
    /// The local permission/group store
    Local,
}

impl Side {
    pub fn opposite(self) -> Side {
        match self {
            Side::Remote => Side::Local,
            Side::Local => Side::Remote,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Remote => f.write_str("remote"),
            Side::Local => f.write_str("local"),
        }
    }
}

/// Tagged, immutable outcome of synchronizing one (identity, pair).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum SyncResult {
    /// Both sides already held this value
    Matched(bool),
    AddedRemote,
    RemovedRemote,
    AddedLocal,
    RemovedLocal,
    /// The attempt failed
    Failed(FailReason),
}

impl SyncResult {
    /// Result of writing `state` to `side`.
    pub fn applied(side: Side, state: bool) -> Self {
        match (side, state) {
            (Side::Remote, true) => SyncResult::AddedRemote,
            (Side::Remote, false) => SyncResult::RemovedRemote,
            (Side::Local, true) => SyncResult::AddedLocal,
            (Side::Local, false) => SyncResult::RemovedLocal,
        }
    }

    pub fn is_success(&self) -> bool {
        !matches!(self, SyncResult::Failed(_))
    }

    /// The side that was written, if any.
    pub fn mutated_side(&self) -> Option<Side> {
        match self {
            SyncResult::AddedRemote | SyncResult::RemovedRemote => Some(Side::Remote),
            SyncResult::AddedLocal | SyncResult::RemovedLocal => Some(Side::Local),
            SyncResult::Matched(_) | SyncResult::Failed(_) => None,
        }
    }

    pub fn fail_reason(&self) -> Option<FailReason> {
        match self {
            SyncResult::Failed(reason) => Some(*reason),
            _ => None,
        }
    }
}

impl From<&SyncFail> for SyncResult {
    fn from(fail: &SyncFail) -> Self {
        SyncResult::Failed(fail.reason())
    }
}

impl fmt::Display for SyncResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncResult::Matched(state) => write!(f, "both {}", state),
            SyncResult::AddedRemote => f.write_str("added on remote"),
            SyncResult::RemovedRemote => f.write_str("removed on remote"),
            SyncResult::AddedLocal => f.write_str("added on local"),
            SyncResult::RemovedLocal => f.write_str("removed on local"),
            SyncResult::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn applied_maps_side_and_state() {
        assert_eq!(SyncResult::applied(Side::Local, true), SyncResult::AddedLocal);
        assert_eq!(
            SyncResult::applied(Side::Remote, false),
            SyncResult::RemovedRemote
        );
        assert_eq!(
            SyncResult::applied(Side::Local, false).mutated_side(),
            Some(Side::Local)
        );
        assert_eq!(SyncResult::Matched(true).mutated_side(), None);
    }

    #[test]
    fn failed_is_not_success() {
        let fail = SyncFail::new(FailReason::NotAMember);
        let result = SyncResult::from(&fail);
        assert!(!result.is_success());
        assert_eq!(result.fail_reason(), Some(FailReason::NotAMember));
        assert!(SyncResult::Matched(false).is_success());
    }

    #[test]
    fn serialization_format() {
        let json = serde_json::to_string(&SyncResult::Matched(true)).unwrap();
        assert_eq!(json, r#"{"kind":"matched","value":true}"#);

        let json = serde_json::to_string(&SyncResult::AddedLocal).unwrap();
        assert_eq!(json, r#"{"kind":"added_local"}"#);

        let json = serde_json::to_string(&SyncResult::Failed(FailReason::NotLinked)).unwrap();
        assert_eq!(json, r#"{"kind":"failed","value":"not_linked"}"#);
    }

    #[test]
    fn opposite_side() {
        assert_eq!(Side::Remote.opposite(), Side::Local);
        assert_eq!(Side::Local.opposite().opposite(), Side::Local);
    }
}
