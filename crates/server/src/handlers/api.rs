//! Node API endpoints.

use super::FileParams;
use crate::error::ApiResult;
use crate::peers::PeerState;
use crate::state::AppState;
use axum::Json;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use peercache_core::validate_filename;
use std::collections::BTreeMap;

/// GET /_internal/api/discovery - liveness probe used by peers.
pub async fn discovery() -> StatusCode {
    StatusCode::OK
}

/// GET /_internal/api/peerStatus
pub async fn peer_status(State(state): State<AppState>) -> Json<BTreeMap<String, PeerState>> {
    Json(state.peers.statuses())
}

/// GET /_internal/api/checkmd5sum?filename=<f>[&remove=true]
///
/// Returns the MD5 of the cached file, renaming (or removing) it when its
/// name does not match. The body is empty when the file does not exist,
/// including names that can never be cache entries.
pub async fn check_md5sum(
    State(state): State<AppState>,
    Query(params): Query<FileParams>,
) -> ApiResult<String> {
    let Some(filename) = params.filename() else {
        return Ok(String::new());
    };
    if validate_filename(filename).is_err() {
        return Ok(String::new());
    }
    let remove = params.wants_remove();
    tracing::info!(filename = %filename, remove, "Checking content digest");
    Ok(state.store.verify_identity(filename, remove).await?)
}
