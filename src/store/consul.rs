//! Consul HTTP API v1 client.
//!
//! Implements every store capability trait over plain HTTP. Blocking
//! queries use the `index`/`wait` query parameters; the version index
//! of a read comes from the `X-Consul-Index` response header.

use std::time::Duration;

use serde::Deserialize;
use serde_json::json;

use super::{
    AgentClient, BoxFuture, CatalogClient, HealthClient, HealthEntry, KvClient, LockRecord,
    ServiceInstance, SessionClient, SessionInfo,
};
use crate::{AppError, Result};

/// Version-index response header set on every Consul read.
const INDEX_HEADER: &str = "X-Consul-Index";

/// HTTP client for a single Consul agent.
#[derive(Debug, Clone)]
pub struct ConsulClient {
    http: reqwest::Client,
    base: String,
}

impl ConsulClient {
    /// Create a client for the agent at `addr` (`host:port`).
    #[must_use]
    pub fn new(addr: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base: format!("http://{addr}/v1"),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base)
    }
}

/// Wrap a transport error with the failing operation's name.
fn op_err(op: &'static str) -> impl Fn(reqwest::Error) -> AppError {
    move |err| AppError::Store(format!("{op}: {err}"))
}

/// Render a duration the way Consul expects it, e.g. `15000ms`.
fn consul_duration(d: Duration) -> String {
    format!("{}ms", d.as_millis())
}

/// Extract the version index from a read response.
fn index_of(resp: &reqwest::Response) -> u64 {
    resp.headers()
        .get(INDEX_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
        .unwrap_or(0)
}

/// Query parameters for a blocking read. A zero `wait_index` means an
/// immediate read, so both parameters are omitted.
fn wait_params(wait_index: u64, wait_time: Duration) -> Vec<(&'static str, String)> {
    if wait_index == 0 {
        Vec::new()
    } else {
        vec![
            ("index", wait_index.to_string()),
            ("wait", consul_duration(wait_time)),
        ]
    }
}

/// Raw KV row as returned by `GET /v1/kv/<key>`.
#[derive(Debug, Deserialize)]
struct KvRow {
    #[serde(rename = "Session", default)]
    session: String,
}

#[derive(Debug, Deserialize)]
struct CreatedSession {
    #[serde(rename = "ID")]
    id: String,
}

impl SessionClient for ConsulClient {
    fn list_sessions(&self) -> BoxFuture<'_, Result<Vec<SessionInfo>>> {
        Box::pin(async move {
            let resp = self
                .http
                .get(self.url("/session/list"))
                .send()
                .await
                .and_then(reqwest::Response::error_for_status)
                .map_err(op_err("list sessions"))?;
            let sessions: Option<Vec<SessionInfo>> =
                resp.json().await.map_err(op_err("list sessions"))?;
            Ok(sessions.unwrap_or_default())
        })
    }

    fn create_session(
        &self,
        name: String,
        checks: Vec<String>,
        lock_delay: Duration,
    ) -> BoxFuture<'_, Result<String>> {
        Box::pin(async move {
            let body = json!({
                "Name": name,
                "LockDelay": consul_duration(lock_delay),
                "Checks": checks,
            });
            let created: CreatedSession = self
                .http
                .put(self.url("/session/create"))
                .json(&body)
                .send()
                .await
                .and_then(reqwest::Response::error_for_status)
                .map_err(op_err("create session"))?
                .json()
                .await
                .map_err(op_err("create session"))?;
            Ok(created.id)
        })
    }

    fn get_session(&self, id: String) -> BoxFuture<'_, Result<Option<SessionInfo>>> {
        Box::pin(async move {
            // Returns a one-element array, or null/empty if unknown.
            let sessions: Option<Vec<SessionInfo>> = self
                .http
                .get(self.url(&format!("/session/info/{id}")))
                .send()
                .await
                .and_then(reqwest::Response::error_for_status)
                .map_err(op_err("get session"))?
                .json()
                .await
                .map_err(op_err("get session"))?;
            Ok(sessions.unwrap_or_default().into_iter().next())
        })
    }

    fn destroy_session(&self, id: String) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.http
                .put(self.url(&format!("/session/destroy/{id}")))
                .send()
                .await
                .and_then(reqwest::Response::error_for_status)
                .map_err(op_err("destroy session"))?;
            Ok(())
        })
    }
}

impl KvClient for ConsulClient {
    fn get(
        &self,
        key: String,
        wait_index: u64,
        wait_time: Duration,
    ) -> BoxFuture<'_, Result<(Option<LockRecord>, u64)>> {
        Box::pin(async move {
            let resp = self
                .http
                .get(self.url(&format!("/kv/{key}")))
                .query(&wait_params(wait_index, wait_time))
                .send()
                .await
                .map_err(op_err("get key"))?;

            let version = index_of(&resp);

            if resp.status() == reqwest::StatusCode::NOT_FOUND {
                return Ok((None, version));
            }

            let rows: Vec<KvRow> = resp
                .error_for_status()
                .map_err(op_err("get key"))?
                .json()
                .await
                .map_err(op_err("get key"))?;
            let record = rows.into_iter().next().map(|row| LockRecord {
                session: row.session,
            });
            Ok((record, version))
        })
    }

    fn acquire(&self, key: String, session: String) -> BoxFuture<'_, Result<bool>> {
        Box::pin(async move {
            let won: bool = self
                .http
                .put(self.url(&format!("/kv/{key}")))
                .query(&[("acquire", session)])
                .send()
                .await
                .and_then(reqwest::Response::error_for_status)
                .map_err(op_err("acquire key"))?
                .json()
                .await
                .map_err(op_err("acquire key"))?;
            Ok(won)
        })
    }

    fn release(&self, key: String, session: String) -> BoxFuture<'_, Result<bool>> {
        Box::pin(async move {
            let released: bool = self
                .http
                .put(self.url(&format!("/kv/{key}")))
                .query(&[("release", session)])
                .send()
                .await
                .and_then(reqwest::Response::error_for_status)
                .map_err(op_err("release key"))?
                .json()
                .await
                .map_err(op_err("release key"))?;
            Ok(released)
        })
    }
}

impl HealthClient for ConsulClient {
    fn list_health(
        &self,
        filter: String,
        wait_index: u64,
        wait_time: Duration,
    ) -> BoxFuture<'_, Result<(Vec<HealthEntry>, u64)>> {
        Box::pin(async move {
            let resp = self
                .http
                .get(self.url(&format!("/health/state/{filter}")))
                .query(&wait_params(wait_index, wait_time))
                .send()
                .await
                .and_then(reqwest::Response::error_for_status)
                .map_err(op_err("list health"))?;

            let version = index_of(&resp);
            let entries: Vec<HealthEntry> = resp.json().await.map_err(op_err("list health"))?;
            Ok((entries, version))
        })
    }
}

impl CatalogClient for ConsulClient {
    fn list_service_instances(
        &self,
        service_name: String,
    ) -> BoxFuture<'_, Result<Vec<ServiceInstance>>> {
        Box::pin(async move {
            let instances: Vec<ServiceInstance> = self
                .http
                .get(self.url(&format!("/catalog/service/{service_name}")))
                .send()
                .await
                .and_then(reqwest::Response::error_for_status)
                .map_err(op_err("list service instances"))?
                .json()
                .await
                .map_err(op_err("list service instances"))?;
            Ok(instances)
        })
    }
}

impl AgentClient for ConsulClient {
    fn node_name(&self) -> BoxFuture<'_, Result<String>> {
        Box::pin(async move {
            let info: serde_json::Value = self
                .http
                .get(self.url("/agent/self"))
                .send()
                .await
                .and_then(reqwest::Response::error_for_status)
                .map_err(op_err("agent self"))?
                .json()
                .await
                .map_err(op_err("agent self"))?;
            info["Config"]["NodeName"]
                .as_str()
                .map(str::to_owned)
                .ok_or_else(|| AppError::Store("agent self: missing Config.NodeName".into()))
        })
    }

    fn register_service(&self, name: String, check_ttl: Duration) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let body = json!({
                "ID": name.as_str(),
                "Name": name.as_str(),
                "Check": { "TTL": format!("{}s", check_ttl.as_secs()) },
            });
            self.http
                .put(self.url("/agent/service/register"))
                .json(&body)
                .send()
                .await
                .and_then(reqwest::Response::error_for_status)
                .map_err(op_err("register service"))?;
            Ok(())
        })
    }

    fn pass_check(&self, check_id: String, note: String) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.http
                .put(self.url(&format!("/agent/check/pass/{check_id}")))
                .query(&[("note", note)])
                .send()
                .await
                .and_then(reqwest::Response::error_for_status)
                .map_err(op_err("pass check"))?;
            Ok(())
        })
    }
}
