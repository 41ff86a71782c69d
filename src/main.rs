#![forbid(unsafe_code)]

//! `consul-relay` daemon binary.
//!
//! Parses options, connects to the local Consul agent, establishes the
//! service registration and session, and runs the leadership loop
//! until a shutdown signal arrives.

use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use consul_relay::config::{parse_duration, RelayConfig, SinkProto};
use consul_relay::orchestrator::health_watcher::HealthWatcher;
use consul_relay::orchestrator::lock_coordinator::LockCoordinator;
use consul_relay::orchestrator::relay::ResultRelay;
use consul_relay::orchestrator::session_manager::SessionManager;
use consul_relay::orchestrator::Orchestrator;
use consul_relay::sink::net::NetConnector;
use consul_relay::store::consul::ConsulClient;
use consul_relay::store::{AgentClient, CatalogClient, HealthClient, KvClient, SessionClient};
use consul_relay::{AppError, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "consul-relay", about = "Forward Consul health state to an event sink", version, long_about = None)]
struct Cli {
    /// Consul agent host.
    #[arg(long, default_value = "127.0.0.1")]
    consul_host: String,

    /// Consul agent HTTP port.
    #[arg(long, default_value_t = 8500)]
    consul_port: u16,

    /// Sink host.
    #[arg(long)]
    sink_host: String,

    /// Sink port.
    #[arg(long, default_value_t = 5555)]
    sink_port: u16,

    /// Protocol to use when sending sink events (tcp or udp).
    #[arg(long, default_value = "udp")]
    proto: SinkProto,

    /// How frequently to post events to the sink, e.g. `1m`, `90s`.
    #[arg(long, default_value = "1m")]
    interval: String,

    /// How long the lock outlives a dead session, e.g. `15s`.
    #[arg(long, default_value = "15s")]
    lock_delay: String,

    /// Service name this daemon registers under.
    #[arg(long, default_value = "consul-relay")]
    service_name: String,

    /// KV path of the leader lock.
    #[arg(long, default_value = "services/consul-relay/leader")]
    key_path: String,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Enable debug logging.
    #[arg(long)]
    debug: bool,
}

fn main() -> Result<()> {
    let args = Cli::parse();

    let config = RelayConfig {
        consul_addr: format!("{}:{}", args.consul_host, args.consul_port),
        sink_host: args.sink_host.clone(),
        sink_port: args.sink_port,
        sink_proto: args.proto,
        update_interval: parse_duration(&args.interval)?,
        lock_delay: parse_duration(&args.lock_delay)?,
        service_name: args.service_name.clone(),
        key_path: args.key_path.clone(),
    };
    config.validate()?;

    init_tracing(args.log_format, args.debug)?;
    info!("consul-relay bootstrap");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(config))
}

async fn run(config: RelayConfig) -> Result<()> {
    info!(addr = %config.consul_addr, "connecting to Consul");
    let consul = Arc::new(ConsulClient::new(&config.consul_addr));

    let node_name = AgentClient::node_name(consul.as_ref()).await?;
    info!(node = %node_name, "agent identity resolved");

    let session_manager = SessionManager::new(
        Arc::clone(&consul) as Arc<dyn SessionClient>,
        Arc::clone(&consul) as Arc<dyn AgentClient>,
        node_name,
        config.service_name.clone(),
        config.lock_delay,
    );
    let lock = LockCoordinator::new(
        Arc::clone(&consul) as Arc<dyn KvClient>,
        Arc::clone(&consul) as Arc<dyn SessionClient>,
        config.key_path.clone(),
        config.lock_delay,
    );
    let health_watcher = HealthWatcher::new(
        Arc::clone(&consul) as Arc<dyn HealthClient>,
        Arc::clone(&consul) as Arc<dyn CatalogClient>,
        config.update_interval,
    );
    let relay = ResultRelay::new(config.check_ttl());
    let connector = NetConnector::new(
        config.sink_host.clone(),
        config.sink_port,
        config.sink_proto,
    );

    let mut orchestrator = Orchestrator::new(
        session_manager,
        lock,
        health_watcher,
        relay,
        Box::new(connector),
        config.update_interval,
    );

    orchestrator.bootstrap(config.check_ttl()).await?;

    let ct = CancellationToken::new();
    let signal_ct = ct.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("shutdown signal received");
        signal_ct.cancel();
    });

    let result = orchestrator.run(ct).await;
    if let Err(ref err) = result {
        error!(%err, "orchestrator failed");
    }
    info!("consul-relay shut down");
    result
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                tracing::warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            tracing::error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat, debug: bool) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if debug { "debug" } else { "info" }));
    let subscriber = fmt().with_env_filter(env_filter);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
