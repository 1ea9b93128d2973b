//! HTTP node of a distributed, content-addressed file cache.
//!
//! This crate provides:
//! - File download, upload and redirect endpoints
//! - Peer health monitoring and single-flight peer downloads
//! - Rotating access tokens and network authorization
//! - Node status and content verification endpoints

pub mod access;
pub mod download;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod peers;
pub mod routes;
pub mod state;
pub mod token;

pub use access::{AccessPolicy, Authorizer};
pub use download::{DownloadCoordinator, DownloadJob, JobOutcome};
pub use error::{ApiError, ApiResult};
pub use peers::{Peer, PeerRegistry, PeerState, PeerStatus};
pub use routes::{SERVER_HEADER, create_router};
pub use state::AppState;
pub use token::TokenAuthenticator;
