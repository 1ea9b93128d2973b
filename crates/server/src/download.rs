//! Single-flight peer downloads.
//!
//! Concurrent misses for the same file share one download job. The first
//! miss starts a background task that asks each peer in order; every caller
//! then waits for the job to finish, its deadline to pass, or the node to
//! shut down.

use crate::metrics;
use crate::peers::PeerRegistry;
use peercache_storage::CacheStore;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// How a wait on a download job ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobOutcome {
    /// The job finished. The file may or may not have been fetched.
    Completed,
    /// The deadline passed before the job finished.
    TimedOut,
    /// The node is shutting down.
    Shutdown,
}

/// An in-flight fetch of one file from the peers.
#[derive(Debug)]
pub struct DownloadJob {
    filename: String,
    deadline: Instant,
    done: CancellationToken,
}

impl DownloadJob {
    pub fn is_done(&self) -> bool {
        self.done.is_cancelled()
    }

    /// Wait until the job finishes, its deadline passes, or `shutdown` fires.
    pub async fn wait(&self, shutdown: &CancellationToken) -> JobOutcome {
        tokio::select! {
            biased;
            _ = self.done.cancelled() => JobOutcome::Completed,
            _ = shutdown.cancelled() => JobOutcome::Shutdown,
            _ = tokio::time::sleep_until(self.deadline) => JobOutcome::TimedOut,
        }
    }
}

type JobTable = Arc<Mutex<HashMap<String, Arc<DownloadJob>>>>;

fn lock_jobs(jobs: &JobTable) -> MutexGuard<'_, HashMap<String, Arc<DownloadJob>>> {
    jobs.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Removes the job from the table and signals completion when dropped, so a
/// panicking fetch task cannot leave waiters hanging.
struct JobGuard {
    jobs: JobTable,
    job: Arc<DownloadJob>,
}

impl Drop for JobGuard {
    fn drop(&mut self) {
        let mut jobs = lock_jobs(&self.jobs);
        jobs.remove(&self.job.filename);
        self.job.done.cancel();
        metrics::ACTIVE_DOWNLOAD_JOBS.dec();
    }
}

/// Deduplicates peer downloads by filename.
#[derive(Debug)]
pub struct DownloadCoordinator {
    jobs: JobTable,
    peers: Arc<PeerRegistry>,
    store: Arc<CacheStore>,
    timeout: Duration,
    shutdown: CancellationToken,
}

impl DownloadCoordinator {
    pub fn new(
        peers: Arc<PeerRegistry>,
        store: Arc<CacheStore>,
        timeout: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            jobs: Arc::new(Mutex::new(HashMap::new())),
            peers,
            store,
            timeout,
            shutdown,
        }
    }

    /// Number of jobs currently in flight.
    pub fn active_jobs(&self) -> usize {
        lock_jobs(&self.jobs).len()
    }

    /// Return the in-flight job for `filename`, or start one.
    pub fn await_or_start(&self, filename: &str) -> Arc<DownloadJob> {
        let job = {
            let mut jobs = lock_jobs(&self.jobs);
            if let Some(job) = jobs.get(filename) {
                tracing::debug!(filename = %filename, "Joining in-flight download");
                return job.clone();
            }

            let job = Arc::new(DownloadJob {
                filename: filename.to_string(),
                deadline: Instant::now() + self.timeout,
                done: CancellationToken::new(),
            });
            jobs.insert(filename.to_string(), job.clone());
            metrics::ACTIVE_DOWNLOAD_JOBS.inc();
            job
        };

        let guard = JobGuard {
            jobs: self.jobs.clone(),
            job: job.clone(),
        };
        let peers = self.peers.clone();
        let store = self.store.clone();
        let shutdown = self.shutdown.clone();

        tokio::spawn(async move {
            let filename = guard.job.filename.clone();
            tracing::info!(filename = %filename, "Downloading from peers");
            let fetched = tokio::select! {
                _ = shutdown.cancelled() => false,
                fetched = fetch_from_peers(&peers, &store, &filename) => fetched,
            };
            if !fetched {
                tracing::info!(filename = %filename, "No peer could provide file");
            }
            drop(guard);
        });

        job
    }
}

async fn fetch_from_peers(peers: &PeerRegistry, store: &CacheStore, filename: &str) -> bool {
    for peer in peers.iter() {
        if peer.fetch_into(filename, store).await {
            return true;
        }
    }
    false
}
