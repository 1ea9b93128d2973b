//! Content digests used to name cache entries.
//!
//! Files are conventionally stored under the lowercase hex MD5 of their
//! contents, so a node can detect and repair misnamed entries.

use std::fmt;

/// An MD5 content digest.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentDigest([u8; 16]);

impl ContentDigest {
    /// Compute the digest of an in-memory buffer.
    pub fn compute(data: &[u8]) -> Self {
        Self(md5::compute(data).0)
    }

    /// Create an incremental hasher.
    pub fn hasher() -> ContentHasher {
        ContentHasher(md5::Context::new())
    }

    /// Encode as lowercase hex.
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }
}

impl fmt::Debug for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentDigest({})", self.to_hex())
    }
}

impl fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Incremental MD5 hasher.
pub struct ContentHasher(md5::Context);

impl ContentHasher {
    /// Feed more data into the hasher.
    pub fn update(&mut self, data: &[u8]) {
        self.0.consume(data);
    }

    /// Finalize and return the digest.
    pub fn finalize(self) -> ContentDigest {
        ContentDigest(self.0.compute().0)
    }
}

impl Default for ContentHasher {
    fn default() -> Self {
        ContentDigest::hasher()
    }
}
