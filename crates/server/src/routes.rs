//! Route configuration.

use crate::access::access_middleware;
use crate::error::ApiError;
use crate::handlers;
use crate::metrics::metrics_handler;
use crate::state::AppState;
use axum::Router;
use axum::extract::{Request, State};
use axum::http::HeaderValue;
use axum::http::header::SERVER;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use peercache_core::{
    API_CHECK_MD5SUM, API_DISCOVERY, API_METRICS, API_PEER_STATUS, DOWNLOAD, REDIRECT, UPLOAD,
};
use tower_http::trace::TraceLayer;

/// Value of the `Server` header on every response.
pub const SERVER_HEADER: &str = concat!("peercache/", env!("CARGO_PKG_VERSION"));

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let mut router = Router::new()
        .route(API_DISCOVERY, get(handlers::discovery))
        .route(API_PEER_STATUS, get(handlers::peer_status))
        .route(API_CHECK_MD5SUM, get(handlers::check_md5sum))
        .route(UPLOAD, post(handlers::upload))
        .route(REDIRECT, get(handlers::redirect))
        .route(DOWNLOAD, get(handlers::download));

    // Disabled metrics fall through to the 403 fallback
    if state.config.server.metrics_enabled {
        router = router.route(API_METRICS, get(metrics_handler));
    }

    // Middleware layers are applied in reverse order (outermost first).
    // Order of execution: TraceLayer -> Server header -> closed gate -> access -> handler
    router
        .fallback(handlers::access_deny)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            access_middleware,
        ))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            closed_middleware,
        ))
        .layer(middleware::map_response(set_server_header))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Refuse every request once the node is closing.
async fn closed_middleware(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if state.is_closed() {
        return Err(ApiError::Unavailable("server is closing".to_string()));
    }
    Ok(next.run(req).await)
}

async fn set_server_header(mut response: Response) -> Response {
    response
        .headers_mut()
        .insert(SERVER, HeaderValue::from_static(SERVER_HEADER));
    response
}
