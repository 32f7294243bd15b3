//! Sandbox handler - plays the external systems against the in-memory backend.
//!
//! Every effective change emits the same notification the real system
//! would, which the engine's listener then picks up.

use crate::backend::Backend;
use crate::error::{AppError, Result};
use attrsync_engine::{AttributeId, LocalId, RemoteId, SyncCause};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetRemoteRequest {
    pub value: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetLocalRequest {
    pub value: bool,
    #[serde(default)]
    pub context: BTreeSet<String>,
    /// Defaults to a change made by another local component
    pub cause: Option<SyncCause>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetResponse {
    /// Whether the stored state actually changed
    pub changed: bool,
}

pub fn handle_set_remote(
    backend: &Backend,
    who: RemoteId,
    attribute: AttributeId,
    request: SetRemoteRequest,
) -> SetResponse {
    let changed = backend.remote.set(who, attribute, request.value);
    tracing::info!(who, attribute, value = request.value, changed, "Sandbox remote change");
    SetResponse { changed }
}

pub fn handle_set_local(
    backend: &Backend,
    who: LocalId,
    group: &str,
    request: SetLocalRequest,
) -> Result<SetResponse> {
    let cause = request.cause.unwrap_or(SyncCause::LocalPluginChange);
    if cause.origin() != Some(attrsync_engine::Side::Local) {
        return Err(AppError::BadRequest(format!(
            "{} is not a local change cause",
            cause
        )));
    }

    let changed = backend
        .groups
        .set(who, group, &request.context, request.value, cause);
    tracing::info!(who = %who, group, value = request.value, changed, "Sandbox local change");
    Ok(SetResponse { changed })
}
