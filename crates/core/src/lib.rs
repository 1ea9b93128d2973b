//! Core types shared by every peercache crate.
//!
//! This crate defines:
//! - Node, cache, peer, token and access configuration
//! - Content digests used to name cache entries
//! - Cache entry name validation

pub mod config;
pub mod error;
pub mod hash;
pub mod name;

pub use config::{AppConfig, PeerConfig};
pub use error::{Error, Result};
pub use hash::{ContentDigest, ContentHasher};
pub use name::validate_filename;

/// Liveness probe answered by every node.
pub const API_DISCOVERY: &str = "/_internal/api/discovery";

/// JSON snapshot of the peer registry.
pub const API_PEER_STATUS: &str = "/_internal/api/peerStatus";

/// Content identity check and repair.
pub const API_CHECK_MD5SUM: &str = "/_internal/api/checkmd5sum";

/// Prometheus metrics.
pub const API_METRICS: &str = "/_internal/api/metrics";

/// File upload.
pub const UPLOAD: &str = "/_internal/upload";

/// Presence check that hands out an access token.
pub const REDIRECT: &str = "/_internal/redirect";

/// File download.
pub const DOWNLOAD: &str = "/_internal/download";

/// Request header (and query parameter) carrying an access token.
pub const TOKEN_HEADER: &str = "token";
