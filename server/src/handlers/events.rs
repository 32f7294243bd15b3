//! Events handler - forwards change notifications and resyncs to the engine.

use crate::error::{AppError, Result};
use attrsync_engine::{
    AttributeId, ChangeOutcome, LocalId, RemoteId, Someone, SummaryReport, SyncCause, SyncEngine,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A remote attribute changed.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteChangeRequest {
    pub remote_id: RemoteId,
    pub attribute: AttributeId,
    pub value: bool,
}

/// A local group changed.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalChangeRequest {
    pub local_id: LocalId,
    pub group: String,
    /// Missing for global changes
    pub context: Option<BTreeSet<String>>,
    pub value: bool,
    /// Defaults to a change the engine may have caused
    pub cause: Option<SyncCause>,
}

/// What the engine did with a notification.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeResponse {
    /// One of `disabled`, `echo`, `unmatched`, `synced`
    pub outcome: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<SummaryReport>,
}

impl From<ChangeOutcome> for ChangeResponse {
    fn from(outcome: ChangeOutcome) -> Self {
        let (outcome, report) = match outcome {
            ChangeOutcome::Disabled => ("disabled", None),
            ChangeOutcome::Echo => ("echo", None),
            ChangeOutcome::Unmatched => ("unmatched", None),
            ChangeOutcome::Synced(report) => ("synced", Some(report)),
        };
        Self {
            outcome: outcome.to_string(),
            report,
        }
    }
}

pub async fn handle_remote_change(
    engine: &SyncEngine,
    request: RemoteChangeRequest,
) -> ChangeResponse {
    tracing::debug!(
        who = request.remote_id,
        attribute = request.attribute,
        value = request.value,
        "Remote change notification"
    );
    engine
        .on_remote_attribute_changed(request.remote_id, request.attribute, request.value)
        .await
        .into()
}

pub async fn handle_local_change(
    engine: &SyncEngine,
    request: LocalChangeRequest,
) -> Result<ChangeResponse> {
    let cause = request.cause.unwrap_or(SyncCause::LocalAttributeChanged);
    if cause.origin() != Some(attrsync_engine::Side::Local) {
        return Err(AppError::BadRequest(format!(
            "{} is not a local change cause",
            cause
        )));
    }
    if request.group.trim().is_empty() {
        return Err(AppError::BadRequest("group must not be empty".into()));
    }

    tracing::debug!(
        who = %request.local_id,
        group = %request.group,
        value = request.value,
        cause = %cause,
        "Local change notification"
    );
    Ok(engine
        .on_local_attribute_changed(
            request.local_id,
            &request.group,
            request.context.as_ref(),
            request.value,
            cause,
        )
        .await
        .into())
}

/// Resync one identity on request.
pub async fn handle_resync(engine: &SyncEngine, who: Someone) -> Result<SummaryReport> {
    engine.resync(who).await.ok_or(AppError::Disabled)
}

/// Resync every linked identity on request.
pub async fn handle_resync_all(engine: &SyncEngine) -> Result<Vec<SummaryReport>> {
    if !engine.is_enabled() {
        return Err(AppError::Disabled);
    }
    Ok(engine.resync_all().await?)
}
