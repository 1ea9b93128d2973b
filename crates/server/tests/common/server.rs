//! Server test utilities.

use axum::extract::connect_info::MockConnectInfo;
use peercache_core::AppConfig;
use peercache_server::{AccessPolicy, AppState, create_router};
use peercache_storage::CacheStore;
use std::net::SocketAddr;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// Remote address used for requests from an allowed network.
#[allow(dead_code)]
pub const LOOPBACK: &str = "127.0.0.1:40000";

/// Remote address outside every allowed network.
#[allow(dead_code)]
pub const OUTSIDER: &str = "203.0.113.50:40000";

async fn build_state(config: AppConfig) -> AppState {
    let store = Arc::new(
        CacheStore::new(&config.cache.path)
            .await
            .expect("Failed to create cache store"),
    );
    let policy = AccessPolicy::from_config(&config)
        .await
        .expect("Failed to build access policy");
    AppState::new(config, store, policy).expect("Failed to build state")
}

fn test_config(temp_dir: &TempDir) -> AppConfig {
    let mut config = AppConfig::for_testing();
    config.cache.path = temp_dir.path().join("cache");
    config
}

/// A router driven in-process with a mocked remote address.
/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[allow(dead_code)]
pub struct TestServer {
    pub router: axum::Router,
    pub state: AppState,
    app: axum::Router,
    _temp_dir: TempDir,
}

#[allow(dead_code)]
impl TestServer {
    /// Create a test server with temporary storage and no peers.
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Create a test server with custom config modifications.
    pub async fn with_config<F>(modifier: F) -> Self
    where
        F: FnOnce(&mut AppConfig),
    {
        peercache_server::metrics::register_metrics();

        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");
        let mut config = test_config(&temp_dir);
        modifier(&mut config);

        let state = build_state(config).await;
        let app = create_router(state.clone());
        let router = app.clone().layer(MockConnectInfo(
            LOOPBACK.parse::<SocketAddr>().unwrap(),
        ));

        Self {
            router,
            state,
            app,
            _temp_dir: temp_dir,
        }
    }

    /// Router that sees requests as coming from `remote`.
    pub fn router_from(&self, remote: &str) -> axum::Router {
        let addr: SocketAddr = remote.parse().expect("invalid remote address");
        self.app.clone().layer(MockConnectInfo(addr))
    }

    /// Router without connect info, as if mounted without a TCP listener.
    pub fn bare_router(&self) -> axum::Router {
        self.app.clone()
    }

    /// Path of an entry in the cache directory.
    pub fn cache_path(&self, name: &str) -> std::path::PathBuf {
        self.state.store.root().join(name)
    }
}

/// A node listening on an ephemeral loopback port.
#[allow(dead_code)]
pub struct TestNode {
    pub addr: SocketAddr,
    pub state: AppState,
    server: JoinHandle<()>,
    background: Vec<JoinHandle<()>>,
    _temp_dir: TempDir,
}

#[allow(dead_code)]
impl TestNode {
    /// Start a node with background tasks running.
    pub async fn start<F>(label: &str, modifier: F) -> Self
    where
        F: FnOnce(&mut AppConfig),
    {
        peercache_server::metrics::register_metrics();

        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind listener");
        let addr = listener.local_addr().unwrap();

        let mut config = test_config(&temp_dir);
        config.server.bind = addr.to_string();
        config.server.label = label.to_string();
        modifier(&mut config);
        config.validate().expect("invalid test configuration");

        let state = build_state(config).await;
        let background = state.spawn_background();
        let app = create_router(state.clone());
        let shutdown = state.shutdown_token().clone();

        let server = tokio::spawn(async move {
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
            .expect("server failed");
        });

        Self {
            addr,
            state,
            server,
            background,
            _temp_dir: temp_dir,
        }
    }

    /// Base URL of the node.
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Close the node and wait for its tasks to finish.
    pub async fn stop(self) {
        self.state.close();
        let _ = self.server.await;
        for handle in self.background {
            let _ = handle.await;
        }
    }
}
