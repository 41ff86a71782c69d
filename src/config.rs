//! Runtime configuration and validation.
//!
//! The CLI in `main.rs` collects raw option values; [`RelayConfig`]
//! holds the validated form handed to the rest of the application.

use std::fmt::{Display, Formatter};
use std::str::FromStr;
use std::time::Duration;

use crate::{AppError, Result};

/// Transport used for delivering events to the sink.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum SinkProto {
    /// Stream delivery over TCP.
    Tcp,
    /// Datagram delivery over UDP.
    Udp,
}

impl FromStr for SinkProto {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "tcp" => Ok(Self::Tcp),
            "udp" => Ok(Self::Udp),
            other => Err(AppError::Config(format!(
                "unknown sink protocol {other:?} (expected tcp or udp)"
            ))),
        }
    }
}

impl Display for SinkProto {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Tcp => write!(f, "tcp"),
            Self::Udp => write!(f, "udp"),
        }
    }
}

/// Validated runtime configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Coordination store address, `host:port`.
    pub consul_addr: String,
    /// Sink host.
    pub sink_host: String,
    /// Sink port.
    pub sink_port: u16,
    /// Sink transport protocol.
    pub sink_proto: SinkProto,
    /// How frequently events are posted to the sink; also bounds each
    /// Leading iteration and every health long-poll.
    pub update_interval: Duration,
    /// Time the lock remains held after its session is judged dead;
    /// also the wait time for acquisition long-polls.
    pub lock_delay: Duration,
    /// Name this daemon registers itself under in the store.
    pub service_name: String,
    /// KV path of the leader lock.
    pub key_path: String,
}

impl RelayConfig {
    /// Validate cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Config`] if the update interval does not
    /// exceed the lock delay (the acquisition long-poll must fit
    /// inside one loop iteration) or if the service name is empty.
    pub fn validate(&self) -> Result<()> {
        if self.update_interval <= self.lock_delay {
            return Err(AppError::Config(format!(
                "update interval ({:?}) must be greater than lock delay ({:?})",
                self.update_interval, self.lock_delay
            )));
        }
        if self.service_name.is_empty() {
            return Err(AppError::Config("service name must not be empty".into()));
        }
        Ok(())
    }

    /// TTL assigned to this daemon's own liveness check and to every
    /// sink event: three times the update interval.
    #[must_use]
    pub fn check_ttl(&self) -> Duration {
        self.update_interval * 3
    }
}

/// Parse a duration string of `<number><unit>` segments, e.g. `90s`,
/// `1m`, `1h30m`, `250ms`. Units: `h`, `m`, `s`, `ms`.
///
/// # Errors
///
/// Returns [`AppError::Config`] for empty input, bare numbers, unknown
/// units, or segments without a numeric part.
pub fn parse_duration(input: &str) -> Result<Duration> {
    let bad = |msg: String| AppError::Config(format!("invalid duration {input:?}: {msg}"));

    if input.is_empty() {
        return Err(bad("empty".into()));
    }

    let mut total = Duration::ZERO;
    let mut rest = input;

    while !rest.is_empty() {
        let digits = rest.len() - rest.trim_start_matches(|c: char| c.is_ascii_digit()).len();
        if digits == 0 {
            return Err(bad("expected a number".into()));
        }
        let value: u64 = rest[..digits]
            .parse()
            .map_err(|_| bad("number out of range".into()))?;
        rest = &rest[digits..];

        let unit_len =
            rest.len() - rest.trim_start_matches(|c: char| c.is_ascii_alphabetic()).len();
        let unit = &rest[..unit_len];
        rest = &rest[unit_len..];

        total += match unit {
            "h" => Duration::from_secs(value * 3600),
            "m" => Duration::from_secs(value * 60),
            "s" => Duration::from_secs(value),
            "ms" => Duration::from_millis(value),
            "" => return Err(bad("missing unit (h, m, s, or ms)".into())),
            other => return Err(bad(format!("unknown unit {other:?}"))),
        };
    }

    Ok(total)
}
