//! # Attrsync Engine
//!
//! Bidirectional synchronization of boolean attributes between a remote
//! identity service (chat roles) and a local group store (permission groups).
//!
//! Each configured [`PairConfig`] ties one remote attribute to one local
//! group, optionally within a context. When either side changes, or a resync
//! is requested, the engine reads both sides and makes them agree.
//!
//! ## Design Principles
//!
//! - **Providers at the seams**: the engine only talks to [`RemoteSide`],
//!   [`Groups`] / [`ContextGroups`] and [`IdentityDirectory`]
//! - **No echo loops**: every write is preceded by an expectation that
//!   swallows the change notification it causes
//! - **Pairs are independent**: one pair failing never stops another
//! - **Never panics outward**: failures become [`SyncResult::Failed`]
//!
//! ## Core Concepts
//!
//! ### Identities
//!
//! A [`Someone`] is known by one id and resolved through the
//! [`IdentityDirectory`] into a [`Linked`] pair of ids.
//!
//! ### Results
//!
//! Every pair resolution yields one [`SyncResult`]; failures carry a
//! [`FailReason`] inside a [`SyncFail`]. A run's results are gathered by a
//! [`SyncSummary`] into a [`SummaryReport`].
//!
//! ### Conflicts
//!
//! A pair's [`Authority`] decides which side wins a mismatch. Most-recent
//! pairs let the triggering side win, with [`TieBreaker`] settling
//! simultaneous changes and runs with no triggering side.
//!
//! ## Quick Start
//!
//! ```rust
//! use attrsync_engine::{
//!     MemoryDirectory, MemoryGroups, MemoryRemote, PairConfig, Someone, SyncConfig,
//!     SyncEngine, SyncResult,
//! };
//! use std::sync::Arc;
//! use uuid::Uuid;
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! // 1. Providers
//! let remote = Arc::new(MemoryRemote::new([1234]));
//! let groups = Arc::new(MemoryGroups::new(["vip"]));
//! let directory = Arc::new(MemoryDirectory::new());
//! let player = Uuid::new_v4();
//! directory.link(42, player);
//! remote.seed(42, 1234, true);
//!
//! // 2. Engine
//! let pair = PairConfig::new(1234, "vip");
//! let engine = SyncEngine::new(
//!     SyncConfig::new(vec![pair.clone()]),
//!     remote,
//!     Some(groups.clone().into_local_side()),
//!     directory,
//! )
//! .unwrap();
//!
//! // 3. Resync
//! let report = engine.resync(Someone::remote(42)).await.unwrap();
//! assert_eq!(report.result_for(&pair), Some(SyncResult::AddedLocal));
//! # });
//! ```

pub mod cause;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod expectation;
pub mod memory;
pub mod provider;
pub mod result;
pub mod someone;
pub mod summary;
pub mod timer;

// Re-export main types at crate root
pub use cause::{ChangeEvent, SyncCause};
pub use clock::{arbitrate, ChangeClock, ChangeStamp, RecentChanges, Trigger};
pub use config::{local_key, Authority, PairConfig, SyncConfig, TieBreaker, TimerConfig};
pub use engine::{ChangeOutcome, SyncEngine, SYNC_NAME};
pub use error::{ConfigError, FailReason, ProviderError, SyncFail};
pub use expectation::ExpectationCache;
pub use memory::{AppliedChange, EventSender, MemoryDirectory, MemoryGroups, MemoryRemote};
pub use provider::{ContextGroups, Groups, IdentityDirectory, LocalSide, ProviderResult, RemoteSide};
pub use result::{Side, SyncResult};
pub use someone::{Linked, Someone};
pub use summary::{PairOutcome, PairReport, SummaryReport, SyncSummary};
pub use timer::PairTimers;

/// Type aliases for clarity
pub type RemoteId = u64;
pub type LocalId = uuid::Uuid;
pub type AttributeId = u64;
