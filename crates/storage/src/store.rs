//! Flat file cache rooted at a local directory.

use crate::error::{StorageError, StorageResult};
use peercache_core::name::TEMP_SUFFIX;
use peercache_core::{ContentDigest, validate_filename};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::instrument;

/// Chunk size for hashing reads (64 KiB).
const HASH_CHUNK_SIZE: usize = 64 * 1024;

/// Result of a [`CacheStore::write`] call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The file was written and published; carries the byte count.
    Stored(u64),
    /// A file with this name already existed and was left untouched.
    AlreadyPresent,
}

/// Content-keyed file cache.
///
/// Every entry is a regular file directly under the root. Writes go through
/// an exclusive `<name>.tmp` file and are published under the final name
/// only once complete, so readers never observe a partial file.
#[derive(Debug)]
pub struct CacheStore {
    root: PathBuf,
}

impl CacheStore {
    /// Open the cache rooted at `root`, creating the directory if missing.
    pub async fn new(root: impl AsRef<Path>) -> StorageResult<Self> {
        let root = root.as_ref().to_path_buf();
        match fs::metadata(&root).await {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => return Err(StorageError::NotADirectory(root)),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                fs::create_dir_all(&root).await?;
                tracing::info!(path = %root.display(), "Created cache directory");
            }
            Err(e) => return Err(StorageError::Io(e)),
        }
        let store = Self { root };
        store.sweep_temp_files().await?;
        Ok(store)
    }

    /// Remove temporary files left behind by writers of a previous process.
    async fn sweep_temp_files(&self) -> StorageResult<usize> {
        let mut entries = fs::read_dir(&self.root).await?;
        let mut removed = 0;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            if !name.to_string_lossy().ends_with(TEMP_SUFFIX) {
                continue;
            }
            match fs::remove_file(entry.path()).await {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(StorageError::Io(e)),
            }
        }
        if removed > 0 {
            tracing::warn!(removed, "Removed stale temporary files");
        }
        Ok(removed)
    }

    /// Root directory of the cache.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn entry_path(&self, name: &str) -> StorageResult<PathBuf> {
        validate_filename(name).map_err(|e| StorageError::InvalidKey(e.to_string()))?;
        Ok(self.root.join(name))
    }

    fn temp_path(&self, name: &str) -> PathBuf {
        self.root.join(format!("{name}{TEMP_SUFFIX}"))
    }

    /// Whether an entry named exactly `name` is present.
    pub async fn exists(&self, name: &str) -> bool {
        match self.entry_path(name) {
            Ok(path) => fs::symlink_metadata(&path).await.is_ok(),
            Err(_) => false,
        }
    }

    /// Store the bytes read from `reader` under `name`.
    ///
    /// Succeeds without reading when the entry already exists. Fails with
    /// [`StorageError::WriteInProgress`] when another writer holds the
    /// temporary file. On a copy failure the temporary file is removed.
    #[instrument(skip(self, reader))]
    pub async fn write<R>(&self, name: &str, mut reader: R) -> StorageResult<WriteOutcome>
    where
        R: AsyncRead + Unpin,
    {
        let path = self.entry_path(name)?;
        if fs::symlink_metadata(&path).await.is_ok() {
            tracing::debug!("Entry already present, skipping write");
            return Ok(WriteOutcome::AlreadyPresent);
        }

        let temp_path = self.temp_path(name);
        let mut file = match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&temp_path)
            .await
        {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(StorageError::WriteInProgress(name.to_string()));
            }
            Err(e) => return Err(StorageError::Io(e)),
        };
        // Removes the temporary file on every exit, including a dropped future
        let mut guard = TempFileGuard::new(temp_path);

        let copied = async {
            let written = tokio::io::copy(&mut reader, &mut file).await?;
            // Flush to disk before the entry becomes visible
            file.sync_all().await?;
            Ok::<u64, std::io::Error>(written)
        }
        .await;
        drop(file);

        let written = match copied {
            Ok(written) => written,
            Err(e) => {
                tracing::warn!(error = %e, "Write failed, temporary file removed");
                return Err(StorageError::Io(e));
            }
        };

        Self::publish(&mut guard, &path, written).await
    }

    /// Move a finished temporary file to its final name without replacing an
    /// existing entry.
    async fn publish(
        guard: &mut TempFileGuard,
        path: &Path,
        written: u64,
    ) -> StorageResult<WriteOutcome> {
        match fs::hard_link(guard.path(), path).await {
            Ok(()) => {
                tracing::debug!(bytes = written, "Entry stored");
                Ok(WriteOutcome::Stored(written))
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(WriteOutcome::AlreadyPresent),
            Err(e) => {
                // Filesystems without hard links
                tracing::debug!(error = %e, "Hard link failed, falling back to rename");
                if fs::try_exists(path).await.unwrap_or(false) {
                    return Ok(WriteOutcome::AlreadyPresent);
                }
                fs::rename(guard.path(), path).await?;
                guard.disarm();
                Ok(WriteOutcome::Stored(written))
            }
        }
    }

    /// Open the entry for reading, returning the file and its size.
    #[instrument(skip(self))]
    pub async fn read(&self, name: &str) -> StorageResult<(fs::File, u64)> {
        let path = self.entry_path(name)?;
        let file = fs::File::open(&path).await.map_err(|e| {
            if e.kind() == ErrorKind::NotFound {
                StorageError::NotFound(name.to_string())
            } else {
                StorageError::Io(e)
            }
        })?;
        let size = file.metadata().await?.len();
        Ok((file, size))
    }

    /// Check that the entry is named after the MD5 digest of its contents.
    ///
    /// A misnamed entry is deleted when `remove` is set, otherwise renamed to
    /// its digest. Returns the computed digest, or an empty string when the
    /// entry does not exist.
    #[instrument(skip(self))]
    pub async fn verify_identity(&self, name: &str, remove: bool) -> StorageResult<String> {
        let path = self.entry_path(name)?;
        let digest = match digest_file(&path).await {
            Ok(digest) => digest.to_hex(),
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(String::new()),
            Err(e) => return Err(StorageError::Io(e)),
        };

        if digest != name {
            if remove {
                match fs::remove_file(&path).await {
                    Ok(()) => {}
                    Err(e) if e.kind() == ErrorKind::NotFound => {}
                    Err(e) => return Err(StorageError::Io(e)),
                }
                tracing::warn!(digest = %digest, "Removed entry with mismatched content");
            } else {
                fs::rename(&path, self.root.join(&digest)).await?;
                tracing::info!(digest = %digest, "Renamed entry to its content digest");
            }
        }

        Ok(digest)
    }
}

/// Deletes a temporary write file when dropped unless disarmed.
///
/// Removal is synchronous so it also runs when the owning future is dropped
/// mid-write, e.g. on shutdown.
struct TempFileGuard {
    path: PathBuf,
    armed: bool,
}

impl TempFileGuard {
    fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    fn path(&self) -> &Path {
        &self.path
    }

    /// The file was moved to its final name; nothing to clean up.
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for TempFileGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Err(e) = std::fs::remove_file(&self.path)
            && e.kind() != ErrorKind::NotFound
        {
            tracing::warn!(path = %self.path.display(), error = %e, "Failed to remove temporary file");
        }
    }
}

async fn digest_file(path: &Path) -> std::io::Result<ContentDigest> {
    let mut file = fs::File::open(path).await?;
    let mut hasher = ContentDigest::hasher();
    let mut buf = vec![0u8; HASH_CHUNK_SIZE];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize())
}
