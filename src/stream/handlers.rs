use std::collections::BTreeMap;

use axum::{
    extract::{rejection::QueryRejection, Query, State},
    response::{sse::Sse, IntoResponse},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use super::session::StreamSession;
use super::sink::sse_channel;
use crate::event::{ChangeToken, CharacterState, MapId, TileEntry};
use crate::shared::{AppError, AppState, Principal};

#[derive(Debug, Default, Deserialize)]
pub struct SinceQuery {
    pub since: Option<ChangeToken>,
}

fn since_param(query: Result<Query<SinceQuery>, QueryRejection>) -> Result<SinceQuery, AppError> {
    query.map(|Query(query)| query).map_err(|rejection| {
        warn!(error = %rejection, "Rejecting malformed query string");
        AppError::BadRequest(rejection.body_text())
    })
}

/// HTTP handler opening a live update stream
///
/// GET /map/updates/stream?since=<token>
/// Sends the snapshot the client is missing, then live updates until the
/// client disconnects or the server shuts down.
#[instrument(name = "stream_updates", skip(state, query), fields(tenant_id = %principal.tenant_id))]
pub async fn stream_updates(
    State(state): State<AppState>,
    principal: Principal,
    query: Result<Query<SinceQuery>, QueryRejection>,
) -> Result<impl IntoResponse, AppError> {
    let SinceQuery { since } = since_param(query)?;

    let cancel = state.event_bus.shutdown_token().child_token();
    let (sink, stream) = sse_channel(state.config.frame_buffer, &cancel);
    let mut session = StreamSession::new(&state, principal, since, Box::new(sink), cancel);
    let session_id = session.id();

    tokio::spawn(async move {
        match session.run().await {
            Ok(()) => info!(session_id = %session_id, "Stream session ended"),
            Err(e) => warn!(session_id = %session_id, error = %e, "Stream session failed"),
        }
    });

    info!(session_id = %session_id, since = ?since, "Stream opened");

    Ok(([("x-accel-buffering", "no")], Sse::new(stream)))
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollResponse {
    pub tiles: Vec<TileEntry>,
    pub revisions: BTreeMap<MapId, u64>,
    pub characters: Option<Vec<CharacterState>>,
    pub latest_token: Option<ChangeToken>,
}

/// HTTP handler returning the same snapshot a stream would start with
///
/// GET /map/updates?since=<token>
/// For clients that cannot hold a stream open.
#[instrument(name = "poll_updates", skip(state, query), fields(tenant_id = %principal.tenant_id))]
pub async fn poll_updates(
    State(state): State<AppState>,
    principal: Principal,
    query: Result<Query<SinceQuery>, QueryRejection>,
) -> Result<Json<PollResponse>, AppError> {
    let SinceQuery { since } = since_param(query)?;

    let builder = state.snapshot_builder();
    let snapshot = tokio::task::spawn_blocking(move || {
        builder.build(&principal.tenant_id, since, principal.can_see_positions)
    })
    .await
    .map_err(|e| {
        warn!(error = %e, "Snapshot task failed");
        AppError::Internal
    })?;

    let latest_token = snapshot.latest_token();
    Ok(Json(PollResponse {
        tiles: snapshot.tiles,
        revisions: snapshot.revisions,
        characters: snapshot.characters,
        latest_token,
    }))
}
