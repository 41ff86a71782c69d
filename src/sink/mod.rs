//! Event sink contract and wire model.
//!
//! The relay delivers health observations as [`SinkEvent`]s through
//! the [`EventSink`] trait. A [`SinkConnector`] produces a fresh sink
//! connection each time leadership is won; the connection is owned by
//! the orchestrator for the duration of a Leading phase and dropped
//! when leadership is lost. The production NDJSON-over-TCP/UDP
//! implementation lives in [`net`]; tests substitute a recording fake.

pub mod net;

use std::collections::BTreeMap;

use serde::Serialize;

use crate::store::BoxFuture;
use crate::Result;

/// One event delivered to the sink.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SinkEvent {
    /// Seconds this event is considered valid for.
    pub ttl: f32,
    /// Event time, epoch seconds.
    pub time: i64,
    /// Free-form tags; always includes the `consul` source tag.
    pub tags: Vec<String>,
    /// Node the underlying check runs on.
    pub host: String,
    /// Event state: `ok`, `warning`, `critical`, or the raw check
    /// status for anything else.
    pub state: String,
    /// Check identifier the event reports on.
    pub service: String,
    /// Most recent check output.
    pub description: String,
    /// Optional extra context (notes, reporting node).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attributes: Option<BTreeMap<String, String>>,
}

/// A live connection to the sink.
pub trait EventSink: Send {
    /// Deliver one event.
    fn send<'a>(&'a mut self, event: &'a SinkEvent) -> BoxFuture<'a, Result<()>>;
}

/// Factory for sink connections, injected into the orchestrator.
pub trait SinkConnector: Send + Sync {
    /// Open a new connection to the sink.
    fn connect(&self) -> BoxFuture<'_, Result<Box<dyn EventSink>>>;
}
