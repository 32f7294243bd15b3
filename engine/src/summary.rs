//! Aggregation of one triggered synchronization run.
//!
//! A [`SyncSummary`] collects one in-flight result per pair. Each pair's
//! future is spawned onto the ambient tokio runtime as soon as it is
//! appended, so pairs run concurrently and may finish in any order.
//! [`SyncSummary::resolve`] waits for all of them, never fails itself, and
//! logs every failure with the pair, identity, cause and root error.

use crate::cause::SyncCause;
use crate::config::PairConfig;
use crate::error::{FailReason, SyncFail};
use crate::result::SyncResult;
use crate::someone::Someone;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use tokio::task::{JoinError, JoinHandle};

/// Output of one pair's resolution.
pub type PairOutcome = Result<SyncResult, SyncFail>;

enum Pending {
    Ready(PairOutcome),
    InFlight(JoinHandle<PairOutcome>),
}

/// Accumulator for the per-pair results of one run.
pub struct SyncSummary {
    sync_name: String,
    cause: SyncCause,
    who: Someone,
    all_fail_reason: Option<SyncFail>,
    results: Vec<(PairConfig, Pending)>,
}

impl SyncSummary {
    pub fn new(sync_name: impl Into<String>, cause: SyncCause, who: Someone) -> Self {
        Self {
            sync_name: sync_name.into(),
            cause,
            who,
            all_fail_reason: None,
            results: Vec::new(),
        }
    }

    pub fn cause(&self) -> SyncCause {
        self.cause
    }

    pub fn who(&self) -> Someone {
        self.who
    }

    /// Mark the whole run as failed before any pair was attempted.
    pub fn fail(mut self, fail: SyncFail) -> Self {
        self.all_fail_reason = Some(fail);
        self
    }

    pub fn all_fail_reason(&self) -> Option<&SyncFail> {
        self.all_fail_reason.as_ref()
    }

    /// Append an already known outcome.
    pub fn append_result(&mut self, pair: PairConfig, outcome: PairOutcome) -> &mut Self {
        self.results.push((pair, Pending::Ready(outcome)));
        self
    }

    /// Spawn `future` and track it as the outcome for `pair`.
    pub fn append_future<F>(&mut self, pair: PairConfig, future: F) -> &mut Self
    where
        F: Future<Output = PairOutcome> + Send + 'static,
    {
        self.results
            .push((pair, Pending::InFlight(tokio::spawn(future))));
        self
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Wait for every pair and fold the outcomes into a report.
    pub async fn resolve(self) -> SummaryReport {
        let SyncSummary {
            sync_name,
            cause,
            who,
            all_fail_reason,
            results,
        } = self;

        if let Some(fail) = &all_fail_reason {
            log_failure(&sync_name, None, who, cause, fail);
            return SummaryReport {
                who,
                cause,
                all_fail_reason: Some(fail.reason()),
                results: Vec::new(),
            };
        }

        let (pairs, pending): (Vec<PairConfig>, Vec<Pending>) = results.into_iter().unzip();
        let outcomes = join_all(pending.into_iter().map(|pending| async move {
            match pending {
                Pending::Ready(outcome) => Ok(outcome),
                Pending::InFlight(handle) => handle.await,
            }
        }))
        .await;

        let results: Vec<PairReport> = pairs
            .into_iter()
            .zip(outcomes)
            .map(|(pair, outcome)| {
                let result = match outcome {
                    Ok(Ok(result)) => Some(result),
                    Ok(Err(fail)) => {
                        log_failure(&sync_name, Some(&pair), who, cause, &fail);
                        Some(SyncResult::from(&fail))
                    }
                    Err(join_error) => {
                        tracing::error!(
                            sync = %sync_name,
                            pair = %pair,
                            who = %who,
                            cause = %cause,
                            error = %join_error_message(join_error),
                            "Sync task did not complete"
                        );
                        None
                    }
                };
                PairReport { pair, result }
            })
            .collect();

        let report = SummaryReport {
            who,
            cause,
            all_fail_reason: None,
            results,
        };
        tracing::debug!(
            sync = %sync_name,
            who = %who,
            cause = %cause,
            pairs = report.results.len(),
            changed = report.changed_count(),
            failed = report.failed_count(),
            "Sync run finished"
        );
        report
    }
}

fn log_failure(
    sync_name: &str,
    pair: Option<&PairConfig>,
    who: Someone,
    cause: SyncCause,
    fail: &SyncFail,
) {
    let pair = pair.map(PairConfig::describe).unwrap_or_else(|| "all pairs".into());
    match fail.root_cause() {
        Some(root) => tracing::error!(
            sync = %sync_name,
            pair = %pair,
            who = %who,
            cause = %cause,
            reason = %fail,
            error = %root,
            "Error in {} {} for {} (sync cause: {})",
            sync_name,
            pair,
            who,
            cause
        ),
        None => tracing::debug!(
            sync = %sync_name,
            pair = %pair,
            who = %who,
            cause = %cause,
            reason = %fail,
            "Sync failed"
        ),
    }
}

/// Unwrap a task failure to its panic payload when there is one.
fn join_error_message(err: JoinError) -> String {
    if err.is_cancelled() {
        return "task cancelled".to_string();
    }
    match err.try_into_panic() {
        Ok(payload) => {
            if let Some(message) = payload.downcast_ref::<&str>() {
                (*message).to_string()
            } else if let Some(message) = payload.downcast_ref::<String>() {
                message.clone()
            } else {
                "task panicked".to_string()
            }
        }
        Err(err) => err.to_string(),
    }
}

/// Result for one pair; `None` when the pair's task ended without one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PairReport {
    pub pair: PairConfig,
    pub result: Option<SyncResult>,
}

/// Consolidated outcome of one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryReport {
    pub who: Someone,
    pub cause: SyncCause,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub all_fail_reason: Option<FailReason>,
    pub results: Vec<PairReport>,
}

impl SummaryReport {
    /// Best-effort result for `pair`.
    pub fn result_for(&self, pair: &PairConfig) -> Option<SyncResult> {
        self.results
            .iter()
            .find(|report| &report.pair == pair)
            .and_then(|report| report.result)
    }

    pub fn into_map(self) -> HashMap<PairConfig, Option<SyncResult>> {
        self.results
            .into_iter()
            .map(|report| (report.pair, report.result))
            .collect()
    }

    /// Pairs where a side was written.
    pub fn changed_count(&self) -> usize {
        self.results
            .iter()
            .filter(|r| matches!(r.result, Some(result) if result.mutated_side().is_some()))
            .count()
    }

    /// Pairs that failed or produced no result.
    pub fn failed_count(&self) -> usize {
        self.results
            .iter()
            .filter(|r| !matches!(r.result, Some(result) if result.is_success()))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderError;
    use crate::result::Side;

    fn summary() -> SyncSummary {
        SyncSummary::new("Group sync", SyncCause::ManualResync, Someone::remote(1))
    }

    #[tokio::test]
    async fn resolves_all_pairs() {
        let mut summary = summary();
        summary
            .append_result(PairConfig::new(1, "a"), Ok(SyncResult::Matched(true)))
            .append_future(PairConfig::new(2, "b"), async {
                tokio::task::yield_now().await;
                Ok(SyncResult::AddedLocal)
            })
            .append_future(PairConfig::new(3, "c"), async {
                Err(SyncFail::from(ProviderError::Unavailable("down".into())).on(Side::Remote))
            });
        assert_eq!(summary.len(), 3);

        let report = summary.resolve().await;
        assert_eq!(report.results.len(), 3);
        assert_eq!(
            report.result_for(&PairConfig::new(1, "a")),
            Some(SyncResult::Matched(true))
        );
        assert_eq!(
            report.result_for(&PairConfig::new(2, "b")),
            Some(SyncResult::AddedLocal)
        );
        assert_eq!(
            report.result_for(&PairConfig::new(3, "c")),
            Some(SyncResult::Failed(FailReason::BackendUnavailable))
        );
        assert_eq!(report.changed_count(), 1);
        assert_eq!(report.failed_count(), 1);
    }

    async fn explode() -> PairOutcome {
        panic!("provider exploded")
    }

    #[tokio::test]
    async fn panicking_pair_yields_no_result() {
        let mut summary = summary();
        summary
            .append_future(PairConfig::new(1, "a"), explode())
            .append_result(PairConfig::new(2, "b"), Ok(SyncResult::Matched(false)));

        let report = summary.resolve().await;
        let map = report.clone().into_map();
        assert_eq!(map.get(&PairConfig::new(1, "a")), Some(&None));
        assert_eq!(
            map.get(&PairConfig::new(2, "b")),
            Some(&Some(SyncResult::Matched(false)))
        );
        assert_eq!(report.failed_count(), 1);
    }

    #[tokio::test]
    async fn all_fail_short_circuits() {
        let report = summary()
            .fail(SyncFail::new(FailReason::NoLocalProvider))
            .resolve()
            .await;
        assert_eq!(report.all_fail_reason, Some(FailReason::NoLocalProvider));
        assert!(report.results.is_empty());
    }

    #[tokio::test]
    async fn report_serialization() {
        let mut summary = summary();
        summary.append_result(PairConfig::new(1, "a"), Ok(SyncResult::RemovedRemote));
        let json = serde_json::to_value(summary.resolve().await).unwrap();
        assert_eq!(json["cause"], "manual_resync");
        assert_eq!(json["who"]["id"], 1);
        assert_eq!(json["results"][0]["result"]["kind"], "removed_remote");
        assert!(json.get("allFailReason").is_none());
    }

    #[test]
    fn empty_summary() {
        let summary = summary();
        assert!(summary.is_empty());
        assert_eq!(summary.who(), Someone::remote(1));
        assert_eq!(summary.cause(), SyncCause::ManualResync);
        assert!(summary.all_fail_reason().is_none());
    }
}
