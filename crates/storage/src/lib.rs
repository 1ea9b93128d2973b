//! Local file cache for peercache nodes.
//!
//! This crate provides:
//! - A flat, content-keyed file store rooted at a single directory
//! - All-or-nothing writes through exclusive temporary files
//! - Content identity verification and repair

pub mod error;
pub mod store;

pub use error::{StorageError, StorageResult};
pub use store::{CacheStore, WriteOutcome};
