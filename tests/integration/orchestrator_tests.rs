//! End-to-end orchestrator tests against the in-memory store.
//!
//! Each test drives the real control loop (session bootstrap, lock
//! acquisition, loss watch, health watch, relay) with only the store
//! and the sink faked, then observes effects through the store's state
//! and the recording connector.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use consul_relay::orchestrator::health_watcher::HealthWatcher;
use consul_relay::orchestrator::lock_coordinator::LockCoordinator;
use consul_relay::orchestrator::relay::ResultRelay;
use consul_relay::orchestrator::session_manager::SessionManager;
use consul_relay::orchestrator::Orchestrator;
use consul_relay::store::{
    AgentClient, CatalogClient, HealthClient, HealthEntry, KvClient, ServiceInstance,
    SessionClient,
};
use consul_relay::{AppError, Result};

use super::test_helpers::{FakeConnector, InMemoryStore, NODE};

const SERVICE: &str = "consul-relay";
const KEY: &str = "services/consul-relay/leader";
const UPDATE_INTERVAL: Duration = Duration::from_millis(50);
const LOCK_DELAY: Duration = Duration::from_millis(10);
const CHECK_TTL: Duration = Duration::from_millis(150);

fn orchestrator(store: &Arc<InMemoryStore>, connector: &FakeConnector) -> Orchestrator {
    let session_manager = SessionManager::new(
        Arc::clone(store) as Arc<dyn SessionClient>,
        Arc::clone(store) as Arc<dyn AgentClient>,
        NODE.to_owned(),
        SERVICE.to_owned(),
        LOCK_DELAY,
    );
    let lock = LockCoordinator::new(
        Arc::clone(store) as Arc<dyn KvClient>,
        Arc::clone(store) as Arc<dyn SessionClient>,
        KEY.to_owned(),
        LOCK_DELAY,
    );
    let health_watcher = HealthWatcher::new(
        Arc::clone(store) as Arc<dyn HealthClient>,
        Arc::clone(store) as Arc<dyn CatalogClient>,
        UPDATE_INTERVAL,
    );
    Orchestrator::new(
        session_manager,
        lock,
        health_watcher,
        ResultRelay::new(CHECK_TTL),
        Box::new(connector.clone()),
        UPDATE_INTERVAL,
    )
}

/// Bootstrap and spawn the control loop; returns the running task and
/// its shutdown token.
async fn start(
    store: &Arc<InMemoryStore>,
    connector: &FakeConnector,
) -> (tokio::task::JoinHandle<Result<()>>, CancellationToken) {
    let mut orchestrator = orchestrator(store, connector);
    orchestrator
        .bootstrap(CHECK_TTL)
        .await
        .expect("bootstrap against a healthy store succeeds");
    let shutdown = CancellationToken::new();
    let token = shutdown.clone();
    let task = tokio::spawn(async move { orchestrator.run(token).await });
    (task, shutdown)
}

async fn wait_until(what: &str, predicate: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    while !predicate() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {what}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

fn service_check(node: &str, service_id: &str, service_name: &str) -> HealthEntry {
    HealthEntry {
        node: node.to_owned(),
        check_id: format!("service:{service_id}"),
        status: "passing".to_owned(),
        output: "all good".to_owned(),
        service_id: service_id.to_owned(),
        service_name: service_name.to_owned(),
        ..HealthEntry::default()
    }
}

#[tokio::test]
async fn leader_relays_enriched_health_results() {
    let store = InMemoryStore::new();
    let connector = FakeConnector::new();
    store.insert_catalog(
        "api",
        vec![ServiceInstance {
            node: "web-1".into(),
            service_id: "api-0".into(),
            tags: vec!["edge".into()],
        }],
    );

    let (task, shutdown) = start(&store, &connector).await;
    store.push_health(vec![service_check("web-1", "api-0", "api")]);

    wait_until("an event to reach the sink", || !connector.events().is_empty()).await;

    let events = connector.events();
    assert_eq!(events[0].host, "web-1");
    assert_eq!(events[0].service, "service:api-0");
    assert_eq!(events[0].state, "ok");
    assert_eq!(events[0].description, "all good");
    assert_eq!(events[0].tags, vec!["consul".to_owned(), "edge".to_owned()]);

    assert_eq!(
        store.registrations(),
        vec![(SERVICE.to_owned(), CHECK_TTL)],
        "the daemon registers itself with its TTL check"
    );

    shutdown.cancel();
    task.await.unwrap().expect("clean shutdown");
}

#[tokio::test]
async fn reacquires_after_losing_the_lock() {
    let store = InMemoryStore::new();
    let connector = FakeConnector::new();

    let (task, shutdown) = start(&store, &connector).await;
    wait_until("initial leadership", || {
        store.lock_holder().as_deref() == Some("session-1")
    })
    .await;
    assert_eq!(connector.connect_count(), 1);

    // An external writer takes the lock; the loss watch demotes us.
    store.seize_lock("intruder");
    wait_until("the intruder to be observed", || {
        store.lock_holder().as_deref() == Some("intruder")
    })
    .await;

    // Once the lock frees up, the standby loop wins it again and opens
    // a fresh sink connection.
    store.clear_lock();
    wait_until("leadership to be regained", || {
        store.lock_holder().as_deref() == Some("session-1") && connector.connect_count() >= 2
    })
    .await;

    shutdown.cancel();
    task.await.unwrap().expect("clean shutdown");
}

#[tokio::test]
async fn sink_connect_failure_releases_the_lock_and_retries() {
    let store = InMemoryStore::new();
    let connector = FakeConnector::failing_first(1);

    let (task, shutdown) = start(&store, &connector).await;

    // First win hits the refused connection, releases, then the next
    // standby pass re-acquires and connects successfully.
    wait_until("a successful reconnect", || {
        connector.connect_count() >= 2
            && store.lock_holder().as_deref() == Some("session-1")
    })
    .await;
    assert!(store.release_count() >= 1, "the unused lock was released");

    shutdown.cancel();
    task.await.unwrap().expect("clean shutdown");
}

#[tokio::test]
async fn liveness_ping_keeps_up_under_sustained_health_churn() {
    let store = InMemoryStore::new();
    let connector = FakeConnector::new();

    let (task, shutdown) = start(&store, &connector).await;
    wait_until("leadership", || {
        store.lock_holder().as_deref() == Some("session-1")
    })
    .await;

    // Push batches much faster than the update interval for ten
    // intervals; the ping must still fire at least once per interval,
    // or the TTL check would expire while the relay is busiest.
    let before = store.liveness_pings();
    for _ in 0..50 {
        store.push_health(vec![service_check("web-1", "api-0", "api")]);
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let pings = store.liveness_pings() - before;
    assert!(
        pings >= 3,
        "liveness starved while relaying: only {pings} pings over ten update intervals"
    );

    shutdown.cancel();
    task.await.unwrap().expect("clean shutdown");
}

#[tokio::test]
async fn relay_send_failure_releases_the_lock_and_recovers() {
    let store = InMemoryStore::new();
    let connector = FakeConnector::failing_sends(1);

    let (task, shutdown) = start(&store, &connector).await;
    wait_until("leadership", || {
        store.lock_holder().as_deref() == Some("session-1")
    })
    .await;

    store.push_health(vec![service_check("web-1", "api-0", "api")]);
    wait_until("the lock to be released after the failed send", || {
        store.release_count() >= 1
    })
    .await;
    assert!(
        connector.events().is_empty(),
        "the failed send must not record an event"
    );

    // Standby wins the lock back and reconnects; keep feeding batches
    // (the abandoned watch may discard one while winding down) until
    // one arrives through the fresh connection.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    while connector.events().is_empty() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for relaying to resume"
        );
        store.push_health(vec![service_check("web-1", "api-0", "api")]);
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(connector.connect_count() >= 2, "a fresh sink connection");
    assert_eq!(store.lock_holder().as_deref(), Some("session-1"));

    shutdown.cancel();
    task.await.unwrap().expect("clean shutdown");
}

#[tokio::test]
async fn health_watch_failure_surrenders_leadership_until_recovery() {
    let store = InMemoryStore::new();
    let connector = FakeConnector::new();
    store.set_health_failing(true);

    let (task, shutdown) = start(&store, &connector).await;
    wait_until("leadership to be surrendered", || store.release_count() >= 1).await;

    store.set_health_failing(false);
    store.push_health(vec![service_check("web-1", "api-0", "api")]);
    wait_until("relaying to resume", || !connector.events().is_empty()).await;

    shutdown.cancel();
    task.await.unwrap().expect("clean shutdown");
}

#[tokio::test]
async fn shutdown_releases_the_lock_and_destroys_the_session() {
    let store = InMemoryStore::new();
    let connector = FakeConnector::new();

    let (task, shutdown) = start(&store, &connector).await;
    wait_until("leadership", || {
        store.lock_holder().as_deref() == Some("session-1")
    })
    .await;

    shutdown.cancel();
    task.await.unwrap().expect("clean shutdown");

    assert_eq!(store.lock_holder(), None, "lock released on shutdown");
    assert_eq!(store.destroyed_sessions(), vec!["session-1".to_owned()]);
}

#[tokio::test]
async fn liveness_failure_while_leading_stops_the_daemon() {
    let store = InMemoryStore::new();
    let connector = FakeConnector::new();

    let (task, _shutdown) = start(&store, &connector).await;
    wait_until("leadership", || {
        store.lock_holder().as_deref() == Some("session-1")
    })
    .await;

    store.set_liveness_failing(true);

    let result = tokio::time::timeout(Duration::from_secs(3), task)
        .await
        .expect("the control loop must stop")
        .unwrap();
    assert!(matches!(result, Err(AppError::Store(_))));
    assert_eq!(
        store.destroyed_sessions(),
        vec!["session-1".to_owned()],
        "the session is destroyed even on the fatal path"
    );
}
