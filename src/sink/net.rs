//! NDJSON network sink over TCP or UDP.
//!
//! Each event is serialised to a compact single-line JSON string
//! terminated by `\n`. TCP delivery writes to a connected stream; UDP
//! delivery sends one datagram per event from a connected socket.

use tokio::io::AsyncWriteExt;
use tokio::net::{TcpStream, UdpSocket};
use tracing::info;

use super::{EventSink, SinkConnector, SinkEvent};
use crate::config::SinkProto;
use crate::store::BoxFuture;
use crate::{AppError, Result};

/// A connected network sink.
pub enum NetSink {
    /// NDJSON over a TCP stream.
    Tcp(TcpStream),
    /// One JSON datagram per event.
    Udp(UdpSocket),
}

impl EventSink for NetSink {
    fn send<'a>(&'a mut self, event: &'a SinkEvent) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let mut line = serde_json::to_vec(event)
                .map_err(|err| AppError::Sink(format!("serialise event: {err}")))?;
            line.push(b'\n');

            match self {
                Self::Tcp(stream) => {
                    stream
                        .write_all(&line)
                        .await
                        .map_err(|err| AppError::Sink(format!("tcp send: {err}")))?;
                }
                Self::Udp(socket) => {
                    socket
                        .send(&line)
                        .await
                        .map_err(|err| AppError::Sink(format!("udp send: {err}")))?;
                }
            }
            Ok(())
        })
    }
}

/// Connector producing [`NetSink`] connections for a fixed endpoint.
#[derive(Debug, Clone)]
pub struct NetConnector {
    host: String,
    port: u16,
    proto: SinkProto,
}

impl NetConnector {
    /// Create a connector for `host:port` over `proto`.
    #[must_use]
    pub fn new(host: String, port: u16, proto: SinkProto) -> Self {
        Self { host, port, proto }
    }
}

impl SinkConnector for NetConnector {
    fn connect(&self) -> BoxFuture<'_, Result<Box<dyn EventSink>>> {
        Box::pin(async move {
            let addr = format!("{}:{}", self.host, self.port);
            let sink = match self.proto {
                SinkProto::Tcp => {
                    let stream = TcpStream::connect(&addr)
                        .await
                        .map_err(|err| AppError::Sink(format!("tcp connect {addr}: {err}")))?;
                    NetSink::Tcp(stream)
                }
                SinkProto::Udp => {
                    let socket = UdpSocket::bind("0.0.0.0:0")
                        .await
                        .map_err(|err| AppError::Sink(format!("udp bind: {err}")))?;
                    socket
                        .connect(&addr)
                        .await
                        .map_err(|err| AppError::Sink(format!("udp connect {addr}: {err}")))?;
                    NetSink::Udp(socket)
                }
            };
            info!(%addr, proto = %self.proto, "sink connected");
            Ok(Box::new(sink) as Box<dyn EventSink>)
        })
    }
}
