//! Session-backed distributed lock over a single KV key.
//!
//! The lock key's value holds the owning session ID (or nothing when
//! unheld). Every read returns the key's version index; keeping the
//! last observed version and passing it back as the next read's wait
//! index turns polling into a monotone long-poll: the store only
//! answers once the value changes past that version, or after the
//! bounded wait elapses. Competing instances therefore block instead
//! of spinning.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::store::{KvClient, SessionClient};
use crate::{AppError, Result};

/// Wait time for loss-watch long-polls. Deliberately long: the watch
/// only needs to wake when the lock value actually changes.
const LOSS_WATCH_WAIT: Duration = Duration::from_secs(60);

/// Signal sent exactly once when the lock no longer belongs to us.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockLost;

/// Acquire/poll/release state machine for the leader lock.
pub struct LockCoordinator {
    kv: Arc<dyn KvClient>,
    sessions: Arc<dyn SessionClient>,
    key_path: String,
    session_id: String,
    lock_delay: Duration,
    last_version: u64,
}

impl LockCoordinator {
    /// Create a coordinator for the lock at `key_path`.
    ///
    /// No session is bound yet; call [`set_session`](Self::set_session)
    /// once one is established.
    #[must_use]
    pub fn new(
        kv: Arc<dyn KvClient>,
        sessions: Arc<dyn SessionClient>,
        key_path: String,
        lock_delay: Duration,
    ) -> Self {
        Self {
            kv,
            sessions,
            key_path,
            session_id: String::new(),
            lock_delay,
            last_version: 0,
        }
    }

    /// Bind the coordinator to `session_id` (initially and after the
    /// session has been re-established).
    pub fn set_session(&mut self, session_id: String) {
        self.session_id = session_id;
    }

    /// Check whether we hold the lock, acquiring it if unheld.
    ///
    /// Ordering: already-ours (idempotent re-entry, no new write),
    /// then held-by-other (benign `false`; the version update makes
    /// the next call block until the value actually changes), then an
    /// atomic acquire attempt whose result is returned verbatim.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::SessionInvalid`] if the store no longer
    /// knows our session, or [`AppError::Store`] for read/write
    /// failures. Never retries internally.
    pub async fn acquire_or_check(&mut self) -> Result<bool> {
        let session = self.sessions.get_session(self.session_id.clone()).await?;
        if session.is_none() {
            return Err(AppError::SessionInvalid(format!(
                "session {} is no longer valid",
                self.session_id
            )));
        }

        let (record, version) = self
            .kv
            .get(self.key_path.clone(), self.last_version, self.lock_delay)
            .await?;
        self.last_version = version;

        if let Some(record) = record {
            if !record.session.is_empty() {
                if record.session == self.session_id {
                    debug!(key = %self.key_path, "lock already held by us");
                    return Ok(true);
                }
                debug!(key = %self.key_path, holder = %record.session, "lock held by other session");
                return Ok(false);
            }
        }

        debug!(key = %self.key_path, session = %self.session_id, "attempting to acquire lock");
        self.kv
            .acquire(self.key_path.clone(), self.session_id.clone())
            .await
    }

    /// Spawn the lock-loss watch.
    ///
    /// The task repeats bounded-wait reads of the lock key until the
    /// observed value no longer belongs to us (cleared, reassigned, or
    /// read error), then sends [`LockLost`] exactly once and exits.
    /// There is no separate cancellation: releasing the lock changes
    /// the key, which wakes the long-poll and terminates the watch.
    #[must_use]
    pub fn spawn_loss_watch(&self) -> (JoinHandle<()>, mpsc::Receiver<LockLost>) {
        let kv = Arc::clone(&self.kv);
        let key_path = self.key_path.clone();
        let session_id = self.session_id.clone();
        let mut version = self.last_version;
        let (tx, rx) = mpsc::channel(1);

        let handle = tokio::spawn(async move {
            loop {
                match kv.get(key_path.clone(), version, LOSS_WATCH_WAIT).await {
                    Ok((record, next_version)) => {
                        version = next_version;
                        let ours = record.is_some_and(|r| r.session == session_id);
                        if !ours {
                            break;
                        }
                    }
                    Err(err) => {
                        error!(%err, key = %key_path, "unable to check lock key");
                        break;
                    }
                }
            }
            info!(key = %key_path, "lock no longer held by us");
            let _ = tx.send(LockLost).await;
        });

        (handle, rx)
    }

    /// Release the lock for our session.
    ///
    /// Not retried on failure: a stale lock self-expires once the
    /// session's invalidation delay passes.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Store`] if the release write fails.
    pub async fn release(&mut self) -> Result<()> {
        let released = self
            .kv
            .release(self.key_path.clone(), self.session_id.clone())
            .await?;
        debug!(key = %self.key_path, released, "released lock");
        Ok(())
    }
}
