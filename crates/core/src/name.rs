//! Cache entry name validation.

/// Suffix reserved for in-progress writes.
pub const TEMP_SUFFIX: &str = ".tmp";

/// Check that `name` is usable as a flat cache entry name.
///
/// Names must be a single normal path component and must not collide with
/// the temporary files used during writes.
pub fn validate_filename(name: &str) -> crate::Result<()> {
    if name.is_empty() {
        return Err(crate::Error::InvalidFilename("empty filename".to_string()));
    }
    if name.contains('/') || name.contains('\\') || name.contains('\0') {
        return Err(crate::Error::InvalidFilename(format!(
            "path separators not allowed: {name}"
        )));
    }
    if name.starts_with('.') {
        return Err(crate::Error::InvalidFilename(format!(
            "hidden or relative names not allowed: {name}"
        )));
    }
    if name.ends_with(TEMP_SUFFIX) {
        return Err(crate::Error::InvalidFilename(format!(
            "reserved suffix {TEMP_SUFFIX}: {name}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_digest_names() {
        assert!(validate_filename("5eb63bbbe01eeed093cb22bb8f5acdc3").is_ok());
        assert!(validate_filename("abc123").is_ok());
        assert!(validate_filename("archive.tar.gz").is_ok());
    }

    #[test]
    fn rejects_traversal_and_reserved_names() {
        assert!(validate_filename("").is_err());
        assert!(validate_filename("..").is_err());
        assert!(validate_filename("../etc/passwd").is_err());
        assert!(validate_filename("a/b").is_err());
        assert!(validate_filename("a\\b").is_err());
        assert!(validate_filename(".hidden").is_err());
        assert!(validate_filename("abc.tmp").is_err());
    }
}
