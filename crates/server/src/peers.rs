//! Peer registry and health monitoring.
//!
//! Each configured peer carries a cached liveness state that request paths
//! consult before any network call. A per-peer monitor task probes the peer's
//! discovery endpoint when armed; it is armed once at startup and afterwards
//! only when a request path found the peer unusable.

use crate::metrics;
use futures::TryStreamExt;
use peercache_core::{API_DISCOVERY, DOWNLOAD, PeerConfig, REDIRECT, TOKEN_HEADER};
use peercache_storage::CacheStore;
use reqwest::{Client, StatusCode, Url};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::io::StreamReader;
use tokio_util::sync::CancellationToken;

/// Timeout for discovery and redirect requests to a peer.
const CONTROL_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Connect timeout for all peer requests.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Liveness of a peer as last observed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum PeerStatus {
    /// Not probed yet, or the last probe got an unexpected answer.
    Unknown,
    /// The peer could not be reached.
    Offline,
    /// The last probe succeeded.
    Online,
}

impl fmt::Display for PeerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unknown => "Unknown",
            Self::Offline => "Offline",
            Self::Online => "Online",
        };
        f.write_str(s)
    }
}

/// Status plus a human-readable reason for the last transition.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PeerState {
    pub status: PeerStatus,
    pub tagging: String,
}

/// A remote cache node.
#[derive(Debug)]
pub struct Peer {
    label: String,
    base_url: Url,
    probe_interval: Duration,
    client: Client,
    state: RwLock<PeerState>,
    wake: Notify,
}

impl Peer {
    /// Create a peer in the `Unknown` state.
    pub fn new(config: &PeerConfig, client: Client) -> peercache_core::Result<Self> {
        let base_url = Url::parse(&config.base_url()).map_err(|e| {
            peercache_core::Error::Config(format!(
                "peer {} has invalid address {}: {e}",
                config.label, config.address
            ))
        })?;

        Ok(Self {
            label: config.label.clone(),
            base_url,
            probe_interval: config.probe_interval(),
            client,
            state: RwLock::new(PeerState {
                status: PeerStatus::Unknown,
                tagging: String::new(),
            }),
            wake: Notify::new(),
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Base URL of the peer, without a trailing slash.
    pub fn base_url(&self) -> &str {
        self.base_url.as_str().trim_end_matches('/')
    }

    /// Cached liveness status.
    pub fn status(&self) -> PeerStatus {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .status
    }

    /// Cached status and reason.
    pub fn describe(&self) -> PeerState {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_state(&self, status: PeerStatus, tagging: String) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if state.status != status {
            tracing::info!(
                peer = %self.label,
                from = %state.status,
                to = %status,
                reason = %tagging,
                "Peer status changed"
            );
        }
        state.status = status;
        state.tagging = tagging;
    }

    /// Ask the monitor to probe the peer. Repeated requests coalesce.
    pub fn request_probe(&self) {
        self.wake.notify_one();
    }

    fn endpoint(&self, path: &str, filename: Option<&str>) -> Url {
        let mut url = self.base_url.clone();
        url.set_path(path);
        if let Some(filename) = filename {
            url.query_pairs_mut().append_pair("filename", filename);
        }
        url
    }

    /// Download URL on this peer carrying an access token it issued.
    pub fn download_location(&self, filename: &str, token: &str) -> String {
        let mut url = self.endpoint(DOWNLOAD, Some(filename));
        url.query_pairs_mut().append_pair("token", token);
        url.into()
    }

    /// Whether the peer may be used right now. A refused peer is queued for
    /// a re-probe.
    fn usable(&self) -> bool {
        if self.status() == PeerStatus::Online {
            true
        } else {
            self.request_probe();
            false
        }
    }

    fn on_request_error(&self, error: &reqwest::Error) {
        if error.is_connect() || error.is_timeout() {
            self.set_state(PeerStatus::Offline, error.to_string());
            self.request_probe();
        } else {
            tracing::warn!(peer = %self.label, error = %error, "Peer request failed");
        }
    }

    /// Probe the discovery endpoint once and record the result.
    pub async fn probe(&self) -> PeerStatus {
        let url = self.endpoint(API_DISCOVERY, None);
        let (status, tagging) = match self
            .client
            .get(url)
            .timeout(CONTROL_REQUEST_TIMEOUT)
            .send()
            .await
        {
            Ok(resp) if resp.status().is_success() => (PeerStatus::Online, String::new()),
            Ok(resp) => (
                PeerStatus::Unknown,
                format!("discovery returned {}", resp.status()),
            ),
            Err(e) if e.is_connect() || e.is_timeout() => (PeerStatus::Offline, e.to_string()),
            Err(e) => (PeerStatus::Unknown, e.to_string()),
        };
        self.set_state(status, tagging);
        status
    }

    /// Ask the peer whether it holds `filename`. Returns the peer's access
    /// token when it does.
    pub async fn redirect(&self, filename: &str) -> Option<String> {
        if !self.usable() {
            return None;
        }

        let url = self.endpoint(REDIRECT, Some(filename));
        match self
            .client
            .get(url)
            .timeout(CONTROL_REQUEST_TIMEOUT)
            .send()
            .await
        {
            Ok(resp) if resp.status() == StatusCode::OK => resp
                .headers()
                .get(TOKEN_HEADER)
                .and_then(|v| v.to_str().ok())
                .filter(|t| !t.is_empty())
                .map(str::to_string),
            Ok(resp) => {
                tracing::debug!(
                    peer = %self.label,
                    filename = %filename,
                    status = %resp.status(),
                    "Peer does not hold file"
                );
                None
            }
            Err(e) => {
                self.on_request_error(&e);
                None
            }
        }
    }

    /// Download `filename` from the peer into the local store. Returns true
    /// only when the transfer completed and the entry is present.
    pub async fn fetch_into(&self, filename: &str, store: &CacheStore) -> bool {
        if !self.usable() {
            metrics::record_peer_fetch(&self.label, "skipped");
            return false;
        }

        let url = self.endpoint(DOWNLOAD, Some(filename));
        let resp = match self.client.get(url).send().await {
            Ok(resp) => resp,
            Err(e) => {
                self.on_request_error(&e);
                metrics::record_peer_fetch(&self.label, "unreachable");
                return false;
            }
        };

        if resp.status() != StatusCode::OK {
            tracing::debug!(
                peer = %self.label,
                filename = %filename,
                status = %resp.status(),
                "Peer fetch rejected"
            );
            metrics::record_peer_fetch(&self.label, "miss");
            return false;
        }

        let body = Box::pin(resp.bytes_stream().map_err(std::io::Error::other));
        match store.write(filename, StreamReader::new(body)).await {
            Ok(outcome) => {
                tracing::info!(
                    peer = %self.label,
                    filename = %filename,
                    ?outcome,
                    "Fetched file from peer"
                );
                metrics::record_peer_fetch(&self.label, "success");
                true
            }
            Err(e) => {
                tracing::warn!(
                    peer = %self.label,
                    filename = %filename,
                    error = %e,
                    "Failed to store file from peer"
                );
                metrics::record_peer_fetch(&self.label, "failure");
                false
            }
        }
    }

    /// Monitor loop: probe when armed, back off after a failed probe.
    async fn monitor(&self, shutdown: &CancellationToken) {
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => return,
                _ = self.wake.notified() => {}
            }

            if self.probe().await != PeerStatus::Online {
                tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => return,
                    _ = tokio::time::sleep(self.probe_interval) => {}
                }
            }
        }
    }
}

/// Ordered set of peers. Lookup order is configuration order.
#[derive(Debug, Default)]
pub struct PeerRegistry {
    peers: Vec<Arc<Peer>>,
}

impl PeerRegistry {
    /// Build the registry, sharing one HTTP client between peers.
    ///
    /// `read_timeout` bounds each read from a peer so a stalled transfer
    /// fails instead of holding its download job forever.
    pub fn new(configs: &[PeerConfig], read_timeout: Duration) -> peercache_core::Result<Self> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .read_timeout(read_timeout)
            .user_agent(concat!("peercache/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| {
                peercache_core::Error::Config(format!("failed to build HTTP client: {e}"))
            })?;

        let peers = configs
            .iter()
            .map(|config| Peer::new(config, client.clone()).map(Arc::new))
            .collect::<peercache_core::Result<Vec<_>>>()?;

        Ok(Self { peers })
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Peer>> {
        self.peers.iter()
    }

    pub fn get(&self, label: &str) -> Option<&Arc<Peer>> {
        self.peers.iter().find(|p| p.label == label)
    }

    /// Status of every peer keyed by label.
    pub fn statuses(&self) -> BTreeMap<String, PeerState> {
        self.peers
            .iter()
            .map(|p| (p.label.clone(), p.describe()))
            .collect()
    }

    /// Probe every peer once, in order.
    pub async fn probe_all(&self) {
        for peer in &self.peers {
            peer.probe().await;
        }
    }

    /// Find the first peer that holds `filename`, returning it with the
    /// token it issued.
    pub async fn find_redirect(&self, filename: &str) -> Option<(Arc<Peer>, String)> {
        for peer in &self.peers {
            if let Some(token) = peer.redirect(filename).await {
                return Some((peer.clone(), token));
            }
        }
        None
    }

    /// Start one supervised monitor per peer, each armed for an initial
    /// probe. A monitor that panics is restarted until shutdown.
    pub fn spawn_monitors(&self, shutdown: CancellationToken) -> Vec<JoinHandle<()>> {
        self.peers
            .iter()
            .map(|peer| {
                let peer = peer.clone();
                let shutdown = shutdown.clone();
                peer.request_probe();
                tokio::spawn(supervise(peer, shutdown))
            })
            .collect()
    }
}

async fn supervise(peer: Arc<Peer>, shutdown: CancellationToken) {
    loop {
        let worker = {
            let peer = peer.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move { peer.monitor(&shutdown).await })
        };

        match worker.await {
            Ok(()) => break,
            Err(e) if e.is_panic() && !shutdown.is_cancelled() => {
                tracing::error!(peer = %peer.label, error = ?e, "Peer monitor panicked, restarting");
                peer.request_probe();
            }
            Err(_) => break,
        }
    }
    tracing::debug!(peer = %peer.label, "Peer monitor stopped");
}
