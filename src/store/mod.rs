//! Coordination store capability contracts.
//!
//! The core never talks to Consul directly; it depends on the narrow
//! traits defined here ([`SessionClient`], [`KvClient`],
//! [`HealthClient`], [`CatalogClient`], [`AgentClient`]), injected at
//! construction. The production implementation over the Consul HTTP
//! API lives in [`consul`]; tests substitute in-memory fakes.
//!
//! All blocking reads take a `wait_index`/`wait_time` pair: the store
//! returns only once the watched value's version exceeds `wait_index`
//! or `wait_time` has elapsed. `wait_index = 0, wait_time = 0` is an
//! immediate read.

pub mod consul;

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde::Deserialize;

use crate::Result;

/// Boxed future returned by the dyn-safe client traits.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A store-issued session tying lock validity to node liveness.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct SessionInfo {
    /// Opaque session identifier issued by the store.
    #[serde(rename = "ID")]
    pub id: String,
    /// Session name; this daemon uses its service name.
    #[serde(rename = "Name", default)]
    pub name: String,
    /// Node the session was created on.
    #[serde(rename = "Node", default)]
    pub node: String,
}

/// Current value of the leader lock key.
///
/// `session` is empty when the key exists but no session holds it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LockRecord {
    /// Session currently holding the lock, empty if unheld.
    pub session: String,
}

/// One health-check observation from the store.
///
/// Transient: regenerated every watch cycle, never persisted. `tags`
/// is filled in by catalog enrichment, not by the health endpoint.
#[derive(Debug, Clone, Deserialize, Default, PartialEq, Eq)]
pub struct HealthEntry {
    /// Node the check runs on.
    #[serde(rename = "Node", default)]
    pub node: String,
    /// Unique check identifier.
    #[serde(rename = "CheckID", default)]
    pub check_id: String,
    /// Human-readable check name.
    #[serde(rename = "Name", default)]
    pub name: String,
    /// Raw status string: `passing`, `warning`, `critical`, or other.
    #[serde(rename = "Status", default)]
    pub status: String,
    /// Operator notes attached to the check.
    #[serde(rename = "Notes", default)]
    pub notes: String,
    /// Most recent check output.
    #[serde(rename = "Output", default)]
    pub output: String,
    /// Service instance this check belongs to, empty for node checks.
    #[serde(rename = "ServiceID", default)]
    pub service_id: String,
    /// Service name, empty for node checks.
    #[serde(rename = "ServiceName", default)]
    pub service_name: String,
    /// Service tags, enriched from the catalog per watch cycle.
    #[serde(skip)]
    pub tags: Vec<String>,
}

/// One registered instance of a service, from the catalog.
#[derive(Debug, Clone, Deserialize, Default, PartialEq, Eq)]
pub struct ServiceInstance {
    /// Node the instance runs on.
    #[serde(rename = "Node", default)]
    pub node: String,
    /// Instance identifier, unique per node.
    #[serde(rename = "ServiceID", default)]
    pub service_id: String,
    /// Tags registered for this instance.
    #[serde(rename = "ServiceTags", default)]
    pub tags: Vec<String>,
}

/// Session lifecycle operations.
pub trait SessionClient: Send + Sync {
    /// List all sessions known to the store.
    fn list_sessions(&self) -> BoxFuture<'_, Result<Vec<SessionInfo>>>;

    /// Create a session bound to `checks`, holding locks for
    /// `lock_delay` after the session is judged dead. Returns the new
    /// session ID.
    fn create_session(
        &self,
        name: String,
        checks: Vec<String>,
        lock_delay: Duration,
    ) -> BoxFuture<'_, Result<String>>;

    /// Look up a session by ID; `None` if the store no longer has it.
    fn get_session(&self, id: String) -> BoxFuture<'_, Result<Option<SessionInfo>>>;

    /// Destroy a session, releasing any locks it holds.
    fn destroy_session(&self, id: String) -> BoxFuture<'_, Result<()>>;
}

/// Key/value operations on the leader lock key.
pub trait KvClient: Send + Sync {
    /// Blocking read of `key`. Returns the current record (`None` if
    /// the key is absent) and its version index.
    fn get(
        &self,
        key: String,
        wait_index: u64,
        wait_time: Duration,
    ) -> BoxFuture<'_, Result<(Option<LockRecord>, u64)>>;

    /// Atomically bind `key` to `session`. `true` if the write won.
    fn acquire(&self, key: String, session: String) -> BoxFuture<'_, Result<bool>>;

    /// Release `key` if held by `session`. `true` if released.
    fn release(&self, key: String, session: String) -> BoxFuture<'_, Result<bool>>;
}

/// Cluster-wide health state reads.
pub trait HealthClient: Send + Sync {
    /// Blocking read of all checks in `filter` state (`any` for all).
    /// Returns the checks and the version index for the next poll.
    fn list_health(
        &self,
        filter: String,
        wait_index: u64,
        wait_time: Duration,
    ) -> BoxFuture<'_, Result<(Vec<HealthEntry>, u64)>>;
}

/// Catalog lookups used for tag enrichment.
pub trait CatalogClient: Send + Sync {
    /// List all registered instances of `service_name`.
    fn list_service_instances(
        &self,
        service_name: String,
    ) -> BoxFuture<'_, Result<Vec<ServiceInstance>>>;
}

/// Local-agent operations: identity, registration, liveness.
pub trait AgentClient: Send + Sync {
    /// Name of the node the local agent runs on.
    fn node_name(&self) -> BoxFuture<'_, Result<String>>;

    /// Register this daemon as a service with a TTL liveness check.
    fn register_service(&self, name: String, check_ttl: Duration) -> BoxFuture<'_, Result<()>>;

    /// Report the TTL check identified by `check_id` as passing.
    fn pass_check(&self, check_id: String, note: String) -> BoxFuture<'_, Result<()>>;
}
