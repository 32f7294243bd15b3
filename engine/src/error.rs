//! Error types for the sync engine.
//!
//! Collaborators report [`ProviderError`]s. The engine funnels every failure,
//! whatever its origin, through [`SyncFail`] so a summary can log them the
//! same way.

use crate::result::Side;
use serde::{Deserialize, Serialize};
use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Shared, type-erased underlying error.
pub type Cause = Arc<dyn StdError + Send + Sync + 'static>;

/// Typed reason carried by a [`SyncFail`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailReason {
    /// The configured attribute no longer exists on one side
    AttributeDoesNotExist,
    /// The engine lacks the rights to modify the attribute
    NoPermissionToModify,
    /// The identity is not a member of the scope holding the attribute
    NotAMember,
    /// A provider backend could not be reached or errored
    BackendUnavailable,
    /// Both fetches failed for the pair
    BothFetchesFailed,
    /// The identity has no counterpart on the other side
    NotLinked,
    /// The identity directory could not be queried
    DirectoryUnavailable,
    /// No local attribute provider is available at all
    NoLocalProvider,
}

impl FailReason {
    /// Whether a later trigger may succeed without operator action.
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            FailReason::BackendUnavailable
                | FailReason::BothFetchesFailed
                | FailReason::DirectoryUnavailable
        )
    }
}

impl fmt::Display for FailReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            FailReason::AttributeDoesNotExist => "attribute does not exist",
            FailReason::NoPermissionToModify => "no permission to modify attribute",
            FailReason::NotAMember => "not a member",
            FailReason::BackendUnavailable => "backend unavailable",
            FailReason::BothFetchesFailed => "both fetches failed",
            FailReason::NotLinked => "identity not linked",
            FailReason::DirectoryUnavailable => "identity directory unavailable",
            FailReason::NoLocalProvider => "no local attribute provider",
        };
        f.write_str(text)
    }
}

/// Errors returned by remote/local providers and the identity directory.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    #[error("unknown attribute: {0}")]
    UnknownAttribute(String),

    #[error("permission denied for {0}")]
    PermissionDenied(String),

    #[error("{0} is not a member")]
    NotAMember(String),

    #[error("backend unavailable: {0}")]
    Unavailable(String),

    #[error("provider error: {0}")]
    Other(String),
}

impl ProviderError {
    /// The failure reason this error maps to.
    pub fn reason(&self) -> FailReason {
        match self {
            ProviderError::UnknownAttribute(_) => FailReason::AttributeDoesNotExist,
            ProviderError::PermissionDenied(_) => FailReason::NoPermissionToModify,
            ProviderError::NotAMember(_) => FailReason::NotAMember,
            ProviderError::Unavailable(_) | ProviderError::Other(_) => {
                FailReason::BackendUnavailable
            }
        }
    }
}

/// The single failure carrier for one sync attempt.
#[derive(Debug, Clone, Error)]
#[error("{reason}{}", side_suffix(.side))]
pub struct SyncFail {
    reason: FailReason,
    side: Option<Side>,
    #[source]
    cause: Option<Cause>,
}

fn side_suffix(side: &Option<Side>) -> String {
    match side {
        Some(side) => format!(" ({} side)", side),
        None => String::new(),
    }
}

impl SyncFail {
    /// A failure without an underlying error.
    pub fn new(reason: FailReason) -> Self {
        Self {
            reason,
            side: None,
            cause: None,
        }
    }

    /// A failure wrapping an underlying error.
    pub fn with_cause(reason: FailReason, cause: impl StdError + Send + Sync + 'static) -> Self {
        Self {
            reason,
            side: None,
            cause: Some(Arc::new(cause)),
        }
    }

    /// Attribute the failure to one side.
    pub fn on(mut self, side: Side) -> Self {
        self.side = Some(side);
        self
    }

    /// Both sides failed to report their state.
    pub fn both_fetches_failed(remote: SyncFail, local: SyncFail) -> Self {
        Self::with_cause(FailReason::BothFetchesFailed, FetchFailures { remote, local })
    }

    pub fn reason(&self) -> FailReason {
        self.reason
    }

    pub fn side(&self) -> Option<Side> {
        self.side
    }

    pub fn cause(&self) -> Option<&Cause> {
        self.cause.as_ref()
    }

    /// The innermost error in the cause chain, if there is one.
    pub fn root_cause(&self) -> Option<&(dyn StdError + 'static)> {
        let mut current: &(dyn StdError + 'static) = self.cause.as_deref()?;
        while let Some(next) = current.source() {
            current = next;
        }
        Some(current)
    }
}

impl From<ProviderError> for SyncFail {
    fn from(err: ProviderError) -> Self {
        SyncFail::with_cause(err.reason(), err)
    }
}

/// Underlying error of [`FailReason::BothFetchesFailed`].
#[derive(Debug, Clone, Error)]
#[error("remote: {remote}; local: {local}")]
pub struct FetchFailures {
    #[source]
    pub remote: SyncFail,
    pub local: SyncFail,
}

/// Invalid pair or engine configuration.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("pair #{index}: timer cycle must be at least one second")]
    InvalidTimer { index: usize },

    #[error("pair #{index}: context entries must not be blank")]
    BlankContext { index: usize },

    #[error("pairs #{first} and #{second} describe the same relationship")]
    DuplicatePair { first: usize, second: usize },

    #[error("expectation ttl must be greater than zero")]
    ZeroTtl,

    #[error("invalid sync config: {0}")]
    Parse(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let fail = SyncFail::new(FailReason::NotLinked);
        assert_eq!(fail.to_string(), "identity not linked");

        let fail = SyncFail::from(ProviderError::Unavailable("timeout".into())).on(Side::Local);
        assert_eq!(fail.to_string(), "backend unavailable (local side)");
        assert_eq!(fail.reason(), FailReason::BackendUnavailable);

        let err = ConfigError::InvalidTimer { index: 2 };
        assert_eq!(
            err.to_string(),
            "pair #2: timer cycle must be at least one second"
        );
    }

    #[test]
    fn provider_errors_map_to_reasons() {
        let cases = [
            (
                ProviderError::UnknownAttribute("vip".into()),
                FailReason::AttributeDoesNotExist,
            ),
            (
                ProviderError::PermissionDenied("role".into()),
                FailReason::NoPermissionToModify,
            ),
            (ProviderError::NotAMember("42".into()), FailReason::NotAMember),
            (ProviderError::Other("boom".into()), FailReason::BackendUnavailable),
        ];
        for (err, reason) in cases {
            assert_eq!(SyncFail::from(err).reason(), reason);
        }
    }

    #[test]
    fn root_cause_unwraps_nested_failures() {
        let remote = SyncFail::from(ProviderError::Unavailable("gateway down".into()));
        let local = SyncFail::new(FailReason::NoLocalProvider);
        let both = SyncFail::both_fetches_failed(remote, local);

        assert_eq!(both.reason(), FailReason::BothFetchesFailed);
        let root = both.root_cause().expect("root cause");
        assert_eq!(root.to_string(), "backend unavailable: gateway down");
    }

    #[test]
    fn root_cause_absent_without_cause() {
        assert!(SyncFail::new(FailReason::NotAMember).root_cause().is_none());
    }

    #[test]
    fn transient_reasons() {
        assert!(FailReason::BackendUnavailable.is_transient());
        assert!(FailReason::BothFetchesFailed.is_transient());
        assert!(FailReason::DirectoryUnavailable.is_transient());
        assert!(!FailReason::NotLinked.is_transient());
        assert!(!FailReason::AttributeDoesNotExist.is_transient());
        assert!(!FailReason::NoPermissionToModify.is_transient());
    }
}
