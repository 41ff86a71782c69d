//! Leadership orchestration.
//!
//! The control loop owns all leadership state and is the only task
//! that reads the loss/results channels or aborts the results watch;
//! watchers communicate with it exclusively through channels, never
//! shared flags. Each iteration re-arms the liveness check, then
//! attempts (or re-confirms) lock acquisition. While leading, a
//! three-way select multiplexes lock loss, new health batches, and a
//! persistent update-interval ticker that re-arms the liveness ping at
//! least once per interval, however busy the relay is.

pub mod health_watcher;
pub mod lock_coordinator;
pub mod relay;
pub mod session_manager;

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::sink::SinkConnector;
use crate::{AppError, Result};

use health_watcher::HealthWatcher;
use lock_coordinator::LockCoordinator;
use relay::ResultRelay;
use session_manager::SessionManager;

/// Why a Leading phase ended.
enum Demotion {
    /// The lock no longer belongs to us.
    LockLost,
    /// Relay or watch failure; the lock was released.
    Released,
    /// Shutdown was requested.
    Shutdown,
}

/// Owns leadership state and drives the acquire/lead/release cycle.
pub struct Orchestrator {
    session_manager: SessionManager,
    lock: LockCoordinator,
    health_watcher: HealthWatcher,
    relay: ResultRelay,
    sink_connector: Box<dyn SinkConnector>,
    update_interval: Duration,
}

impl Orchestrator {
    /// Assemble the orchestrator from its collaborators.
    #[must_use]
    pub fn new(
        session_manager: SessionManager,
        lock: LockCoordinator,
        health_watcher: HealthWatcher,
        relay: ResultRelay,
        sink_connector: Box<dyn SinkConnector>,
        update_interval: Duration,
    ) -> Self {
        Self {
            session_manager,
            lock,
            health_watcher,
            relay,
            sink_connector,
            update_interval,
        }
    }

    /// Register this daemon with the store and establish its session,
    /// binding the lock coordinator to it.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Store`] if registration fails or
    /// [`AppError::SessionUnavailable`](crate::AppError::SessionUnavailable)
    /// if no session can be discovered or created; both are fatal at
    /// startup.
    pub async fn bootstrap(&mut self, check_ttl: Duration) -> Result<()> {
        self.session_manager.register_service(check_ttl).await?;
        let session_id = self.session_manager.ensure_session().await?;
        self.lock.set_session(session_id);
        Ok(())
    }

    /// Run the control loop until `shutdown` is triggered or a fatal
    /// error occurs. The session is destroyed (best-effort) on every
    /// exit path.
    ///
    /// # Errors
    ///
    /// Returns the underlying error when liveness cannot be reported
    /// or the session cannot be re-established; both mean the backend
    /// is unreachable or misconfigured and the daemon cannot proceed.
    pub async fn run(&mut self, shutdown: CancellationToken) -> Result<()> {
        let result = self.run_loop(&shutdown).await;
        self.session_manager.destroy_session().await;
        result
    }

    async fn run_loop(&mut self, shutdown: &CancellationToken) -> Result<()> {
        loop {
            if shutdown.is_cancelled() {
                return Ok(());
            }

            debug!("attempting lock acquisition");
            self.session_manager.pass_liveness().await?;

            let have_lock = tokio::select! {
                () = shutdown.cancelled() => continue,
                acquired = self.lock.acquire_or_check() => match acquired {
                    Ok(have_lock) => have_lock,
                    Err(AppError::SessionInvalid(msg)) => {
                        warn!(%msg, "session lost; re-establishing");
                        let session_id = self.session_manager.ensure_session().await?;
                        self.lock.set_session(session_id);
                        continue;
                    }
                    Err(err) => {
                        error!(%err, "error checking lock; will retry");
                        continue;
                    }
                },
            };

            if !have_lock {
                continue;
            }

            match self.lead(shutdown).await? {
                Demotion::LockLost | Demotion::Released => {}
                Demotion::Shutdown => return Ok(()),
            }
        }
    }

    /// One Leading phase: connect the sink, start both watches, then
    /// select over loss, results, and the liveness ticker until
    /// demoted.
    ///
    /// # Errors
    ///
    /// Returns the liveness error if the periodic ping fails while
    /// leading; liveness cannot be faked, so this ends the process.
    async fn lead(&mut self, shutdown: &CancellationToken) -> Result<Demotion> {
        let mut sink = match self.sink_connector.connect().await {
            Ok(sink) => sink,
            Err(err) => {
                // Do not hold a lock we cannot use.
                error!(%err, "unable to connect to sink; releasing lock");
                if let Err(release_err) = self.lock.release().await {
                    error!(%release_err, "unable to release lock");
                }
                return Ok(Demotion::Released);
            }
        };

        info!("lock acquired; relaying health results");
        let (_loss_task, mut loss_rx) = self.lock.spawn_loss_watch();
        let mut results = self.health_watcher.spawn();

        // The ticker persists across iterations: batch arrivals must
        // not reset it, or sustained health churn would starve the
        // ping and let the TTL check expire mid-leadership.
        let mut liveness = tokio::time::interval(self.update_interval);
        liveness.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = shutdown.cancelled() => {
                    results.abort().await;
                    if let Err(err) = self.lock.release().await {
                        error!(%err, "unable to release lock on shutdown");
                    }
                    return Ok(Demotion::Shutdown);
                }

                _ = loss_rx.recv() => {
                    warn!("lost the lock");
                    results.abort().await;
                    return Ok(Demotion::LockLost);
                }

                batch = results.next_batch() => match batch {
                    Some(batch) => {
                        if let Err(err) = self.relay.relay_batch(sink.as_mut(), &batch).await {
                            error!(%err, "unable to relay health results; releasing lock");
                            if let Err(release_err) = self.lock.release().await {
                                error!(%release_err, "unable to release lock");
                            }
                            // The loss watch observes the release and
                            // winds itself down; the abandoned results
                            // watch stops at its next emit.
                            return Ok(Demotion::Released);
                        }
                    }
                    None => {
                        error!("health results watch terminated; releasing lock");
                        if let Err(err) = self.lock.release().await {
                            error!(%err, "unable to release lock");
                        }
                        return Ok(Demotion::Released);
                    }
                },

                _ = liveness.tick() => {
                    // Keep our own liveness check fresh while leading.
                    // A ping failure is fatal, like at acquisition.
                    if let Err(err) = self.session_manager.pass_liveness().await {
                        results.abort().await;
                        if let Err(release_err) = self.lock.release().await {
                            error!(%release_err, "unable to release lock");
                        }
                        return Err(err);
                    }
                }
            }
        }
    }
}
