//! Network authorization middleware.
//!
//! A request is admitted when it carries a valid rotating token (in the
//! `token` header or query parameter), or when it comes from an allowed
//! address: a configured IP, a peer host, or a member of a configured CIDR.

use crate::error::ApiError;
use crate::metrics;
use crate::state::AppState;
use crate::token::TokenAuthenticator;
use axum::extract::{ConnectInfo, FromRequestParts, Query, Request, State};
use axum::middleware::Next;
use axum::response::Response;
use ipnet::IpNet;
use peercache_core::{AppConfig, TOKEN_HEADER};
use serde::Deserialize;
use std::collections::HashSet;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tracing::Instrument;

/// Source-address allow list.
#[derive(Clone, Debug, Default)]
pub struct AccessPolicy {
    networks: Vec<IpNet>,
    addresses: HashSet<IpAddr>,
}

impl AccessPolicy {
    pub fn new(networks: Vec<IpNet>, addresses: impl IntoIterator<Item = IpAddr>) -> Self {
        Self {
            networks,
            addresses: addresses.into_iter().map(|ip| ip.to_canonical()).collect(),
        }
    }

    /// Build the policy from configuration. Peer hosts are resolved and added
    /// to the allowed addresses; a host that fails to resolve is skipped with
    /// a warning.
    pub async fn from_config(config: &AppConfig) -> peercache_core::Result<Self> {
        let networks = config.access.networks()?;
        let mut addresses = config.access.addresses()?;

        for peer in &config.peers {
            let host = peer.host()?;
            match resolve_host(&host).await {
                Ok(resolved) => addresses.extend(resolved),
                Err(e) => {
                    tracing::warn!(
                        peer = %peer.label,
                        host = %host,
                        error = %e,
                        "Failed to resolve peer host, not whitelisted"
                    );
                }
            }
        }

        Ok(Self::new(networks, addresses))
    }

    /// Whether `ip` may connect without a token.
    pub fn allows(&self, ip: IpAddr) -> bool {
        let ip = ip.to_canonical();
        self.addresses.contains(&ip) || self.networks.iter().any(|net| net.contains(&ip))
    }
}

async fn resolve_host(host: &str) -> std::io::Result<Vec<IpAddr>> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(vec![ip]);
    }
    let resolved = tokio::net::lookup_host((host, 0)).await?;
    Ok(resolved.map(|addr| addr.ip()).collect())
}

/// Combined token and address authorization.
#[derive(Debug)]
pub struct Authorizer {
    tokens: Arc<TokenAuthenticator>,
    policy: AccessPolicy,
}

impl Authorizer {
    pub fn new(tokens: Arc<TokenAuthenticator>, policy: AccessPolicy) -> Self {
        Self { tokens, policy }
    }

    /// A valid token admits any address; otherwise the address must be
    /// allowed by the policy.
    pub fn allow(&self, ip: IpAddr, token: Option<&str>) -> bool {
        if token.is_some_and(|t| self.tokens.check(t)) {
            return true;
        }
        self.policy.allows(ip)
    }
}

#[derive(Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

/// Token from the `token` header, falling back to the query string.
fn extract_token(req: &Request) -> Option<String> {
    if let Some(token) = req
        .headers()
        .get(TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
    {
        return Some(token.to_string());
    }

    Query::<TokenQuery>::try_from_uri(req.uri())
        .ok()
        .and_then(|Query(q)| q.token)
        .filter(|t| !t.is_empty())
}

/// Reject requests from callers that are neither token holders nor allowed
/// addresses. The rest of the request runs inside a span carrying the
/// remote address.
pub async fn access_middleware(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let (mut parts, body) = req.into_parts();
    let remote = ConnectInfo::<SocketAddr>::from_request_parts(&mut parts, &state)
        .await
        .ok();
    let req = Request::from_parts(parts, body);

    let Some(ConnectInfo(remote)) = remote else {
        metrics::AUTH_DENIALS.inc();
        tracing::warn!(path = %req.uri().path(), "Request without peer address denied");
        return Err(ApiError::Unauthorized("unknown remote address".to_string()));
    };

    let token = extract_token(&req);
    if !state.access.allow(remote.ip(), token.as_deref()) {
        metrics::AUTH_DENIALS.inc();
        tracing::warn!(
            remote = %remote,
            path = %req.uri().path(),
            "Access denied"
        );
        return Err(ApiError::Unauthorized("access denied".to_string()));
    }

    let response = next
        .run(req)
        .instrument(tracing::info_span!("request", remote = %remote))
        .await;

    Ok(response)
}
