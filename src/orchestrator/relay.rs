//! Maps health-check entries into sink events and delivers batches.

use std::collections::BTreeMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::sink::{EventSink, SinkEvent};
use crate::store::HealthEntry;
use crate::Result;

/// Source tag attached to every emitted event.
const SOURCE_TAG: &str = "consul";

/// Translates health entries into sink events.
pub struct ResultRelay {
    event_ttl: Duration,
}

impl ResultRelay {
    /// Create a relay emitting events valid for `event_ttl`.
    #[must_use]
    pub fn new(event_ttl: Duration) -> Self {
        Self { event_ttl }
    }

    /// Build the sink event for one health entry.
    ///
    /// Known statuses map to sink states (`passing` becomes `ok`);
    /// anything else passes through verbatim so no observation is
    /// silently dropped.
    #[must_use]
    pub fn event_from_check(&self, entry: &HealthEntry, time: i64) -> SinkEvent {
        let state = match entry.status.as_str() {
            "passing" => "ok".to_owned(),
            _ => entry.status.clone(),
        };

        let mut tags = vec![SOURCE_TAG.to_owned()];
        tags.extend(entry.tags.iter().cloned());

        let mut attributes = BTreeMap::new();
        if !entry.notes.is_empty() {
            attributes.insert("notes".to_owned(), entry.notes.clone());
        }
        if !entry.service_name.is_empty() {
            attributes.insert("service-name".to_owned(), entry.service_name.clone());
        }

        SinkEvent {
            ttl: self.event_ttl.as_secs_f32(),
            time,
            tags,
            host: entry.node.clone(),
            state,
            service: entry.check_id.clone(),
            description: entry.output.clone(),
            attributes: (!attributes.is_empty()).then_some(attributes),
        }
    }

    /// Deliver one batch, terminating on the first send failure.
    ///
    /// # Errors
    ///
    /// Returns the sink's error unchanged; entries after the failing
    /// one are not sent, and the caller is expected to surrender
    /// leadership.
    pub async fn relay_batch(&self, sink: &mut dyn EventSink, entries: &[HealthEntry]) -> Result<()> {
        let time = epoch_seconds();
        for entry in entries {
            let event = self.event_from_check(entry, time);
            sink.send(&event).await?;
        }
        Ok(())
    }
}

fn epoch_seconds() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| i64::try_from(elapsed.as_secs()).unwrap_or(i64::MAX))
}
