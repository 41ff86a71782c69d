//! Unit tests for health-entry to sink-event mapping and batch relay.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use consul_relay::orchestrator::relay::ResultRelay;
use consul_relay::sink::{EventSink, SinkEvent};
use consul_relay::store::{BoxFuture, HealthEntry};
use consul_relay::{AppError, Result};

/// Recording sink that can be told to fail from the nth send onward.
#[derive(Default)]
struct FakeSink {
    sent: Arc<Mutex<Vec<SinkEvent>>>,
    fail_from: Option<usize>,
}

impl EventSink for FakeSink {
    fn send<'a>(&'a mut self, event: &'a SinkEvent) -> BoxFuture<'a, Result<()>> {
        let count = self.sent.lock().unwrap().len();
        let fail = self.fail_from.is_some_and(|threshold| count >= threshold);
        if !fail {
            self.sent.lock().unwrap().push(event.clone());
        }
        Box::pin(async move {
            if fail {
                Err(AppError::Sink("send failed".into()))
            } else {
                Ok(())
            }
        })
    }
}

fn entry(status: &str) -> HealthEntry {
    HealthEntry {
        node: "web-01".into(),
        check_id: "service:api".into(),
        name: "Service 'api' check".into(),
        status: status.to_owned(),
        notes: "restarts hourly".into(),
        output: "TTL expired".into(),
        service_id: "api".into(),
        service_name: "api".into(),
        tags: vec!["edge".into()],
    }
}

#[test]
fn maps_known_statuses_to_sink_states() {
    let relay = ResultRelay::new(Duration::from_secs(180));
    assert_eq!(relay.event_from_check(&entry("passing"), 0).state, "ok");
    assert_eq!(relay.event_from_check(&entry("warning"), 0).state, "warning");
    assert_eq!(
        relay.event_from_check(&entry("critical"), 0).state,
        "critical"
    );
}

#[test]
fn unknown_status_passes_through_verbatim() {
    let relay = ResultRelay::new(Duration::from_secs(180));
    let event = relay.event_from_check(&entry("maintenance"), 0);
    assert_eq!(event.state, "maintenance");
}

#[test]
fn event_carries_check_identity_and_output() {
    let relay = ResultRelay::new(Duration::from_secs(180));
    let event = relay.event_from_check(&entry("critical"), 1_700_000_000);

    assert_eq!(event.host, "web-01");
    assert_eq!(event.service, "service:api");
    assert_eq!(event.description, "TTL expired");
    assert_eq!(event.time, 1_700_000_000);
    assert!((event.ttl - 180.0).abs() < f32::EPSILON);
    assert_eq!(
        event.tags,
        vec!["consul".to_owned(), "edge".to_owned()],
        "source tag first, then enriched service tags"
    );

    let attributes = event.attributes.expect("notes present");
    assert_eq!(attributes.get("notes").map(String::as_str), Some("restarts hourly"));
    assert_eq!(attributes.get("service-name").map(String::as_str), Some("api"));
}

#[test]
fn node_check_without_notes_has_no_attributes() {
    let relay = ResultRelay::new(Duration::from_secs(180));
    let event = relay.event_from_check(
        &HealthEntry {
            node: "web-01".into(),
            check_id: "serfHealth".into(),
            status: "passing".into(),
            ..HealthEntry::default()
        },
        0,
    );
    assert!(event.attributes.is_none());
    assert_eq!(event.tags, vec!["consul".to_owned()]);
}

#[tokio::test]
async fn relays_every_entry_in_order() {
    let relay = ResultRelay::new(Duration::from_secs(180));
    let mut sink = FakeSink::default();
    let entries = vec![entry("passing"), entry("critical")];

    relay
        .relay_batch(&mut sink, &entries)
        .await
        .expect("batch should relay");

    let sent = sink.sent.lock().unwrap();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0].state, "ok");
    assert_eq!(sent[1].state, "critical");
}

#[tokio::test]
async fn batch_terminates_on_first_send_failure() {
    let relay = ResultRelay::new(Duration::from_secs(180));
    let mut sink = FakeSink {
        fail_from: Some(1),
        ..FakeSink::default()
    };
    let entries = vec![entry("passing"), entry("warning"), entry("critical")];

    let err = relay
        .relay_batch(&mut sink, &entries)
        .await
        .expect_err("second send fails");
    assert!(matches!(err, AppError::Sink(_)));
    assert_eq!(
        sink.sent.lock().unwrap().len(),
        1,
        "entries after the failure are not sent"
    );
}
