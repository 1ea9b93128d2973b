//! Rotating access tokens handed out to peers.
//!
//! A node that holds a file answers `/_internal/redirect` with its current
//! token, and the caller is then redirected to the holder with that token in
//! the query string. Tokens rotate on a fixed interval; the previous token
//! stays valid for a short grace window so redirects issued just before a
//! rotation still succeed.

use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Number of characters in a generated token.
pub const TOKEN_LENGTH: usize = 16;

/// How long the previous token is still accepted after a rotation.
pub const GRACE_PERIOD: Duration = Duration::from_secs(300);

const TOKEN_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Snapshot of the token pair.
#[derive(Clone, Debug)]
pub struct TokenState {
    pub current: String,
    pub previous: String,
    pub rotated_at: Instant,
}

/// Issues and validates rotating tokens.
///
/// The pair is published through a `watch` channel so that `check` always
/// sees a consistent current/previous/rotated_at triple.
#[derive(Debug)]
pub struct TokenAuthenticator {
    state: watch::Sender<TokenState>,
    rotation_interval: Duration,
}

impl TokenAuthenticator {
    /// Create an authenticator with a freshly generated token.
    pub fn new(rotation_interval: Duration) -> Self {
        let token = generate_token();
        let (state, _) = watch::channel(TokenState {
            current: token.clone(),
            previous: token,
            rotated_at: Instant::now(),
        });
        Self {
            state,
            rotation_interval,
        }
    }

    /// The current token.
    pub fn get(&self) -> String {
        self.state.borrow().current.clone()
    }

    /// A copy of the full token state.
    pub fn snapshot(&self) -> TokenState {
        self.state.borrow().clone()
    }

    /// Validate a candidate token.
    pub fn check(&self, candidate: &str) -> bool {
        if candidate.is_empty() {
            return false;
        }
        let state = self.state.borrow();
        if candidate == state.current {
            return true;
        }
        candidate == state.previous && state.rotated_at.elapsed() <= GRACE_PERIOD
    }

    /// Replace the current token, demoting it to previous.
    pub fn rotate(&self) {
        let token = generate_token();
        self.state.send_modify(|state| {
            state.previous = std::mem::replace(&mut state.current, token);
            state.rotated_at = Instant::now();
        });
        tracing::debug!("Access token rotated");
    }

    /// Spawn the rotation loop. It stops when `shutdown` is cancelled.
    pub fn spawn_rotation(self: Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.rotation_interval);
            // The first tick completes immediately
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => self.rotate(),
                }
            }
            tracing::debug!("Token rotation stopped");
        })
    }
}

fn generate_token() -> String {
    let mut rng = rand::rng();
    (0..TOKEN_LENGTH)
        .map(|_| TOKEN_ALPHABET[rng.random_range(0..TOKEN_ALPHABET.len())] as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_token_shape() {
        let token = generate_token();
        assert_eq!(token.len(), TOKEN_LENGTH);
        assert!(
            token
                .bytes()
                .all(|b| b.is_ascii_digit() || b.is_ascii_lowercase())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_current_token_always_accepted() {
        let auth = TokenAuthenticator::new(Duration::from_secs(3600));
        let token = auth.get();
        assert!(auth.check(&token));

        tokio::time::advance(Duration::from_secs(10_000)).await;
        assert!(auth.check(&token));
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_and_unknown_rejected() {
        let auth = TokenAuthenticator::new(Duration::from_secs(3600));
        assert!(!auth.check(""));
        assert!(!auth.check("notarealtoken123"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_previous_token_accepted_within_grace() {
        let auth = TokenAuthenticator::new(Duration::from_secs(3600));
        let old = auth.get();
        auth.rotate();
        let new = auth.get();
        assert_ne!(old, new);

        assert!(auth.check(&old));
        tokio::time::advance(GRACE_PERIOD - Duration::from_secs(1)).await;
        assert!(auth.check(&old));

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(!auth.check(&old));
        assert!(auth.check(&new));
    }

    #[tokio::test(start_paused = true)]
    async fn test_token_two_rotations_back_rejected() {
        let auth = TokenAuthenticator::new(Duration::from_secs(3600));
        let oldest = auth.get();
        auth.rotate();
        auth.rotate();
        assert!(!auth.check(&oldest));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rotation_task_rotates_and_stops() {
        let auth = Arc::new(TokenAuthenticator::new(Duration::from_secs(60)));
        let shutdown = CancellationToken::new();
        let handle = auth.clone().spawn_rotation(shutdown.clone());

        let before = auth.get();
        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_ne!(auth.get(), before);
        assert_eq!(auth.snapshot().previous, before);

        shutdown.cancel();
        handle.await.unwrap();
    }
}
