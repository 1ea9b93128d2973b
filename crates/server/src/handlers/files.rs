//! File transfer endpoints: download, upload and redirect.

use super::FileParams;
use crate::download::JobOutcome;
use crate::error::{ApiError, ApiResult};
use crate::metrics;
use crate::state::AppState;
use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE, LOCATION};
use axum::response::{IntoResponse, Response};
use futures::TryStreamExt;
use peercache_core::{TOKEN_HEADER, validate_filename};
use peercache_storage::{StorageError, WriteOutcome};
use tokio_util::io::{ReaderStream, StreamReader};

/// Stream a cached file back to the client.
async fn serve_file(state: &AppState, filename: &str) -> ApiResult<Response> {
    let (file, size) = state.store.read(filename).await?;
    let body = Body::from_stream(ReaderStream::new(file));

    Ok((
        StatusCode::OK,
        [
            (CONTENT_TYPE, "application/octet-stream".to_string()),
            (CONTENT_LENGTH, size.to_string()),
            (CONTENT_DISPOSITION, format!("attachment; filename={filename}")),
        ],
        body,
    )
        .into_response())
}

fn not_found(filename: &str) -> ApiError {
    ApiError::NotFound(format!("file not found: {filename}"))
}

/// GET /_internal/download?filename=<f>[&redirect=true]
///
/// Serves the file from the local cache. On a miss, either redirects the
/// client to a peer that holds it (`redirect=true`) or fetches it from the
/// peers, shared with any concurrent request for the same file.
pub async fn download(
    State(state): State<AppState>,
    Query(params): Query<FileParams>,
) -> ApiResult<Response> {
    let filename = params
        .filename()
        .ok_or_else(|| ApiError::NotFound("filename field must be submitted".to_string()))?;
    if validate_filename(filename).is_err() {
        return Err(not_found(filename));
    }

    match serve_file(&state, filename).await {
        Ok(response) => {
            metrics::CACHE_HITS.inc();
            return Ok(response);
        }
        Err(ApiError::Storage(StorageError::NotFound(_))) => {}
        Err(e) => return Err(e),
    }
    metrics::CACHE_MISSES.inc();

    if params.wants_redirect() {
        return match state.peers.find_redirect(filename).await {
            Some((peer, token)) => {
                tracing::info!(filename = %filename, peer = %peer.label(), "Redirecting to peer");
                let location = peer.download_location(filename, &token);
                Ok((StatusCode::FOUND, [(LOCATION, location)]).into_response())
            }
            None => Err(not_found(filename)),
        };
    }

    let job = state.coordinator.await_or_start(filename);
    match job.wait(state.shutdown_token()).await {
        JobOutcome::Completed => match serve_file(&state, filename).await {
            Err(ApiError::Storage(StorageError::NotFound(_))) => Err(not_found(filename)),
            other => other,
        },
        JobOutcome::TimedOut => {
            tracing::warn!(filename = %filename, "Timed out waiting for peer download");
            Err(not_found(filename))
        }
        JobOutcome::Shutdown => Err(not_found(filename)),
    }
}

/// POST /_internal/upload?filename=<f>
///
/// Stores the request body under `filename`. An existing entry is left
/// untouched.
pub async fn upload(
    State(state): State<AppState>,
    Query(params): Query<FileParams>,
    body: Body,
) -> ApiResult<StatusCode> {
    let filename = params
        .filename()
        .ok_or_else(|| ApiError::Forbidden("filename field must be submitted".to_string()))?;
    validate_filename(filename)?;

    let stream = Box::pin(body.into_data_stream().map_err(std::io::Error::other));
    match state.store.write(filename, StreamReader::new(stream)).await? {
        WriteOutcome::Stored(bytes) => {
            metrics::BYTES_UPLOADED.inc_by(bytes);
            tracing::info!(filename = %filename, bytes, "File uploaded");
        }
        WriteOutcome::AlreadyPresent => {
            tracing::debug!(filename = %filename, "Upload skipped, file already cached");
        }
    }

    Ok(StatusCode::OK)
}

/// GET /_internal/redirect?filename=<f>
///
/// Answers 200 with this node's access token when the file is cached here.
pub async fn redirect(
    State(state): State<AppState>,
    Query(params): Query<FileParams>,
) -> ApiResult<Response> {
    let filename = params.filename().unwrap_or_default();
    if !filename.is_empty() && state.store.exists(filename).await {
        return Ok((StatusCode::OK, [(TOKEN_HEADER, state.tokens.get())]).into_response());
    }
    Err(not_found(filename))
}
