//! Pair configuration.
//!
//! A [`PairConfig`] describes one remote attribute ↔ local group relationship.
//! Configs are supplied already parsed, created once when the engine starts
//! and never mutated afterwards.

use crate::error::ConfigError;
use crate::result::Side;
use crate::AttributeId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

/// Context name used for pairs without a context.
pub const GLOBAL_CONTEXT: &str = "global";

/// Which side's value prevails when the two disagree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Authority {
    /// The remote value is always pushed to the local side
    Remote,
    /// The local value is always pushed to the remote side
    Local,
    /// The side whose change triggered the run wins (default)
    #[default]
    MostRecent,
}

impl Authority {
    /// The fixed authoritative side, if any.
    pub fn side(self) -> Option<Side> {
        match self {
            Authority::Remote => Some(Side::Remote),
            Authority::Local => Some(Side::Local),
            Authority::MostRecent => None,
        }
    }
}

impl fmt::Display for Authority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Authority::Remote => f.write_str("remote-authoritative"),
            Authority::Local => f.write_str("local-authoritative"),
            Authority::MostRecent => f.write_str("most-recent-wins"),
        }
    }
}

/// Side that wins simultaneous changes, and runs with no originating side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TieBreaker {
    #[default]
    Remote,
    Local,
}

impl TieBreaker {
    pub fn side(self) -> Side {
        match self {
            TieBreaker::Remote => Side::Remote,
            TieBreaker::Local => Side::Local,
        }
    }
}

impl fmt::Display for TieBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.side(), f)
    }
}

/// Periodic resync of a pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerConfig {
    /// Seconds between two resyncs
    pub cycle_secs: u64,
}

impl TimerConfig {
    pub fn every(cycle: Duration) -> Self {
        Self {
            cycle_secs: cycle.as_secs(),
        }
    }

    pub fn cycle(&self) -> Duration {
        Duration::from_secs(self.cycle_secs)
    }
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self { cycle_secs: 300 }
    }
}

/// One configured synchronization relationship.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PairConfig {
    /// Remote attribute id (0 = unset)
    pub remote_attribute: AttributeId,
    /// Local group name (empty = unset)
    pub local_attribute: String,
    /// Local scoping context, empty for global
    pub context: BTreeSet<String>,
    pub authority: Authority,
    pub tie_breaker: TieBreaker,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timer: Option<TimerConfig>,
}

impl Default for PairConfig {
    fn default() -> Self {
        Self::unset()
    }
}

impl PairConfig {
    /// A global, most-recent-wins pair.
    pub fn new(remote_attribute: AttributeId, local_attribute: impl Into<String>) -> Self {
        Self {
            remote_attribute,
            local_attribute: local_attribute.into(),
            ..Self::unset()
        }
    }

    /// The empty pair every field resets to.
    pub fn unset() -> Self {
        Self {
            remote_attribute: 0,
            local_attribute: String::new(),
            context: BTreeSet::new(),
            authority: Authority::MostRecent,
            tie_breaker: TieBreaker::Remote,
            timer: None,
        }
    }

    pub fn with_context<I, S>(mut self, context: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.context = context.into_iter().map(Into::into).collect();
        self.normalize();
        self
    }

    /// Drop the `global` context name; a pair scoped only to it is global.
    pub fn normalize(&mut self) {
        self.context.retain(|c| c != GLOBAL_CONTEXT);
    }

    pub fn with_authority(mut self, authority: Authority) -> Self {
        self.authority = authority;
        self
    }

    pub fn with_tie_breaker(mut self, tie_breaker: TieBreaker) -> Self {
        self.tie_breaker = tie_breaker;
        self
    }

    pub fn with_timer(mut self, timer: TimerConfig) -> Self {
        self.timer = Some(timer);
        self
    }

    /// Both attribute ids are filled in.
    pub fn is_set(&self) -> bool {
        self.remote_attribute != 0 && !self.local_attribute.trim().is_empty()
    }

    pub fn is_global(&self) -> bool {
        self.context.is_empty()
    }

    /// Key identifying the pair's local attribute, context included.
    pub fn local_key(&self) -> String {
        local_key(&self.local_attribute, &self.context)
    }

    /// Whether a local change of `group` within `context` concerns this pair.
    ///
    /// A missing or empty context means global. A context made only of an
    /// empty name matches no pair.
    pub fn matches_local(&self, group: &str, context: Option<&BTreeSet<String>>) -> bool {
        match normalize_context(context) {
            Some(context) => self.local_attribute == group && self.context == context,
            None => false,
        }
    }

    pub fn describe(&self) -> String {
        format!("{} <-> {}", self.remote_attribute, self.local_key())
    }

    /// Check one pair; `index` is its position in the configuration.
    pub fn validate(&self, index: usize) -> Result<(), ConfigError> {
        if self.context.iter().any(|c| c.trim().is_empty()) {
            return Err(ConfigError::BlankContext { index });
        }
        if let Some(timer) = self.timer {
            if timer.cycle_secs == 0 {
                return Err(ConfigError::InvalidTimer { index });
            }
        }
        Ok(())
    }
}

impl fmt::Display for PairConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}

/// Cache key for a group within a context.
pub fn local_key(group: &str, context: &BTreeSet<String>) -> String {
    if context.is_empty() {
        return format!("{}[{}]", group, GLOBAL_CONTEXT);
    }
    let joined: Vec<&str> = context.iter().map(String::as_str).collect();
    format!("{}[{}]", group, joined.join(","))
}

/// Normalize an event's context: `None` when it matches nothing.
pub fn normalize_context(context: Option<&BTreeSet<String>>) -> Option<BTreeSet<String>> {
    match context {
        None => Some(BTreeSet::new()),
        Some(context) if context.is_empty() => Some(BTreeSet::new()),
        Some(context) if context.len() == 1 && context.iter().all(|c| c.is_empty()) => None,
        Some(context) => Some(
            context
                .iter()
                .filter(|c| c.as_str() != GLOBAL_CONTEXT)
                .cloned()
                .collect(),
        ),
    }
}

/// Engine-wide configuration: the pair list plus timing knobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SyncConfig {
    pub pairs: Vec<PairConfig>,
    /// How long a recorded expectation may wait for its echo
    pub expectation_ttl_secs: u64,
    /// Changes on both sides closer than this are simultaneous
    pub conflict_window_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            pairs: Vec::new(),
            expectation_ttl_secs: 30,
            conflict_window_ms: 1000,
        }
    }
}

impl SyncConfig {
    pub fn new(pairs: Vec<PairConfig>) -> Self {
        Self {
            pairs,
            ..Self::default()
        }
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: SyncConfig =
            serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;
        let config = config.normalized();
        config.validate()?;
        Ok(config)
    }

    /// The same configuration with every pair context normalized.
    pub fn normalized(mut self) -> Self {
        self.pairs.iter_mut().for_each(PairConfig::normalize);
        self
    }

    pub fn expectation_ttl(&self) -> Duration {
        Duration::from_secs(self.expectation_ttl_secs)
    }

    pub fn conflict_window(&self) -> Duration {
        Duration::from_millis(self.conflict_window_ms)
    }

    /// Fully specified pairs, in configuration order.
    pub fn active_pairs(&self) -> impl Iterator<Item = &PairConfig> {
        self.pairs.iter().filter(|pair| pair.is_set())
    }

    /// At least one pair is fully specified.
    pub fn is_enabled(&self) -> bool {
        self.active_pairs().next().is_some()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.expectation_ttl_secs == 0 {
            return Err(ConfigError::ZeroTtl);
        }
        for (index, pair) in self.pairs.iter().enumerate() {
            pair.validate(index)?;
            if !pair.is_set() {
                continue;
            }
            let duplicate = self.pairs[..index].iter().position(|other| {
                other.remote_attribute == pair.remote_attribute
                    && other.local_key() == pair.local_key()
            });
            if let Some(first) = duplicate {
                return Err(ConfigError::DuplicatePair {
                    first,
                    second: index,
                });
            }
        }
        Ok(())
    }
}
