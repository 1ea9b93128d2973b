//! Application state shared across handlers.

use crate::access::{AccessPolicy, Authorizer};
use crate::download::DownloadCoordinator;
use crate::peers::PeerRegistry;
use crate::token::TokenAuthenticator;
use peercache_core::AppConfig;
use peercache_storage::CacheStore;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<AppConfig>,
    /// Local file cache.
    pub store: Arc<CacheStore>,
    /// Remote nodes, in lookup order.
    pub peers: Arc<PeerRegistry>,
    /// Single-flight peer downloads.
    pub coordinator: Arc<DownloadCoordinator>,
    /// Rotating access tokens.
    pub tokens: Arc<TokenAuthenticator>,
    /// Token and address authorization.
    pub access: Arc<Authorizer>,
    closed: Arc<AtomicBool>,
    shutdown: CancellationToken,
}

impl AppState {
    /// Build the state from validated configuration and an opened store.
    ///
    /// Background tasks are not started; see [`AppState::spawn_background`].
    pub fn new(
        config: AppConfig,
        store: Arc<CacheStore>,
        policy: AccessPolicy,
    ) -> peercache_core::Result<Self> {
        let shutdown = CancellationToken::new();
        let peers = Arc::new(PeerRegistry::new(
            &config.peers,
            config.server.peer_read_timeout(),
        )?);
        let tokens = Arc::new(TokenAuthenticator::new(config.token.rotation_interval()));
        let coordinator = Arc::new(DownloadCoordinator::new(
            peers.clone(),
            store.clone(),
            config.server.download_timeout(),
            shutdown.clone(),
        ));
        let access = Arc::new(Authorizer::new(tokens.clone(), policy));

        Ok(Self {
            config: Arc::new(config),
            store,
            peers,
            coordinator,
            tokens,
            access,
            closed: Arc::new(AtomicBool::new(false)),
            shutdown,
        })
    }

    /// Start peer monitors and token rotation. The tasks end on [`AppState::close`].
    pub fn spawn_background(&self) -> Vec<JoinHandle<()>> {
        let mut handles = self.peers.spawn_monitors(self.shutdown.clone());
        handles.push(self.tokens.clone().spawn_rotation(self.shutdown.clone()));
        handles
    }

    /// Whether the node has stopped accepting requests.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Stop accepting requests and signal every background task and waiter.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            tracing::info!("Closing node");
        }
        self.shutdown.cancel();
    }

    /// Process-wide shutdown signal.
    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    async fn build_state(config: AppConfig) -> (tempfile::TempDir, AppState) {
        let temp = tempdir().unwrap();
        let store = Arc::new(CacheStore::new(temp.path()).await.unwrap());
        let policy = AccessPolicy::from_config(&config).await.unwrap();
        let state = AppState::new(config, store, policy).unwrap();
        (temp, state)
    }

    #[tokio::test]
    async fn close_marks_closed_and_cancels_shutdown() {
        let (_temp, state) = build_state(AppConfig::for_testing()).await;
        assert!(!state.is_closed());
        assert!(!state.shutdown_token().is_cancelled());

        state.close();
        assert!(state.is_closed());
        assert!(state.shutdown_token().is_cancelled());

        // Idempotent
        state.close();
        assert!(state.is_closed());
    }

    #[tokio::test]
    async fn background_tasks_stop_on_close() {
        let mut config = AppConfig::for_testing();
        config.peers = vec![peercache_core::PeerConfig {
            address: "127.0.0.1:9".to_string(),
            label: "b".to_string(),
            probe_interval_secs: 1,
        }];
        let (_temp, state) = build_state(config).await;

        let handles = state.spawn_background();
        assert_eq!(handles.len(), 2);

        state.close();
        for handle in handles {
            handle.await.unwrap();
        }
    }

    #[tokio::test]
    async fn clones_share_closed_flag() {
        let (_temp, state) = build_state(AppConfig::for_testing()).await;
        let other = state.clone();
        state.close();
        assert!(other.is_closed());
    }
}
