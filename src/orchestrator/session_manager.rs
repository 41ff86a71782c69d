//! Store session lifecycle: discovery, creation, liveness, teardown.
//!
//! A session ties the leader lock's validity to this node's liveness
//! checks. One session is discovered or created at startup and
//! destroyed (best-effort) at shutdown.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::store::{AgentClient, SessionClient};
use crate::{AppError, Result};

/// Node-level liveness check every session is bound to.
const NODE_CHECK: &str = "serfHealth";

/// Manages the single store session this daemon operates under.
pub struct SessionManager {
    sessions: Arc<dyn SessionClient>,
    agent: Arc<dyn AgentClient>,
    node_name: String,
    service_name: String,
    lock_delay: Duration,
    session_id: Option<String>,
}

impl SessionManager {
    /// Create a manager for `service_name` running on `node_name`.
    #[must_use]
    pub fn new(
        sessions: Arc<dyn SessionClient>,
        agent: Arc<dyn AgentClient>,
        node_name: String,
        service_name: String,
        lock_delay: Duration,
    ) -> Self {
        Self {
            sessions,
            agent,
            node_name,
            service_name,
            lock_delay,
            session_id: None,
        }
    }

    /// Identifier of this service's own TTL liveness check.
    #[must_use]
    pub fn check_id(&self) -> String {
        format!("service:{}", self.service_name)
    }

    /// Register this daemon as a service with a TTL check of
    /// `check_ttl`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Store`] if the registration call fails.
    pub async fn register_service(&self, check_ttl: Duration) -> Result<()> {
        self.agent
            .register_service(self.service_name.clone(), check_ttl)
            .await
    }

    /// Report this service's TTL check as passing.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Store`] if the check update fails; the
    /// caller treats this as fatal (liveness cannot be faked).
    pub async fn pass_liveness(&self) -> Result<()> {
        self.agent.pass_check(self.check_id(), String::new()).await
    }

    /// Discover an existing session for this node/service pair, or
    /// create one bound to the node-liveness check and this service's
    /// own TTL check. Returns the session ID.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::SessionUnavailable`] if the list or create
    /// call fails.
    pub async fn ensure_session(&mut self) -> Result<String> {
        debug!("initializing session");
        self.session_id = None;

        let sessions = self
            .sessions
            .list_sessions()
            .await
            .map_err(|err| AppError::SessionUnavailable(format!("list sessions: {err}")))?;

        for entry in sessions {
            if entry.node == self.node_name && entry.name == self.service_name {
                debug!(session = %entry.id, "found existing session");
                self.session_id = Some(entry.id.clone());
                return Ok(entry.id);
            }
        }

        info!("creating session");

        // Session creation fails while the bound check is critical, so
        // re-arm the TTL check first.
        if let Err(err) = self.pass_liveness().await {
            warn!(%err, "unable to pass liveness check before session create");
        }

        let id = self
            .sessions
            .create_session(
                self.service_name.clone(),
                vec![NODE_CHECK.to_owned(), self.check_id()],
                self.lock_delay,
            )
            .await
            .map_err(|err| AppError::SessionUnavailable(format!("create session: {err}")))?;

        info!(session = %id, "have session");
        self.session_id = Some(id.clone());
        Ok(id)
    }

    /// Destroy the current session, releasing any lock it holds.
    ///
    /// Best-effort: errors are logged, never propagated, so the
    /// shutdown path cannot block on backend cooperation.
    pub async fn destroy_session(&mut self) {
        let Some(id) = self.session_id.take() else {
            return;
        };
        info!(session = %id, "destroying session");
        if let Err(err) = self.sessions.destroy_session(id).await {
            error!(%err, "unable to destroy session");
        }
    }
}
