// MIT License - Copyright (c) 2026 agshub contributors
// agshubd: AGSHome hub control daemon

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::Parser;
use serde::Deserialize;
use tokio::signal::unix::{SignalKind, signal};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use agshub::link::simulated::{SimulatedHub, SimulatedOpener};
use agshub::{Hub, HubConfig, HubEvent, MonitorState, PointValue, ProtocolVersion, points};

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

#[derive(Parser)]
#[command(name = "agshubd")]
#[command(about = "AGSHome alarm hub control daemon")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, default_value = "config.toml")]
    config: String,
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct Config {
    hub: HubToml,
    #[serde(default)]
    transport: TransportToml,
    #[serde(default)]
    monitor: MonitorToml,
}

#[derive(Debug, Deserialize)]
struct HubToml {
    device_id: String,
    host: String,
    local_key: String,
    /// Protocol version ("3.3", "3.4", or "3.5")
    #[serde(default = "default_protocol_version")]
    protocol_version: String,
    #[serde(default = "default_poll_interval")]
    poll_interval_ms: u64,
    #[serde(default = "default_push_interval")]
    push_interval_ms: u64,
    #[serde(default = "default_reconnect_delay")]
    reconnect_delay_ms: u64,
    #[serde(default = "default_max_retries")]
    max_connect_retries: u32,
    /// Where to persist the last-known-good address across restarts
    #[serde(default)]
    cache_file: Option<PathBuf>,
}

fn default_protocol_version() -> String {
    "3.4".to_string()
}
fn default_poll_interval() -> u64 {
    5000
}
fn default_push_interval() -> u64 {
    300
}
fn default_reconnect_delay() -> u64 {
    10000
}
fn default_max_retries() -> u32 {
    3
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct TransportToml {
    /// Transport driver. This build ships the "simulated" transport; a real
    /// protocol driver plugs in through the link ports.
    kind: String,
    /// Simulated transport: trip a test sensor every N seconds (0 = never)
    trip_interval_secs: u64,
}

impl Default for TransportToml {
    fn default() -> Self {
        Self {
            kind: "simulated".to_string(),
            trip_interval_secs: 0,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct MonitorToml {
    /// Enter monitor mode as soon as the hub connects
    auto_start: bool,
    /// Mute the hub while monitoring (volume restored on stop)
    muted: bool,
    /// Re-arm through direct point writes (no beeps)
    silent_rearm: bool,
}

impl Default for MonitorToml {
    fn default() -> Self {
        Self {
            auto_start: false,
            muted: false,
            silent_rearm: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Simulated device
// ---------------------------------------------------------------------------

/// Seed the virtual hub with the point state of an idle, disarmed unit.
fn seed_simulator(device: &SimulatedHub) {
    device.set_point(points::ALARM_MODE, PointValue::from("2"));
    device.set_point(points::ALARM_TRIGGERED, PointValue::Bool(false));
    device.set_point(points::SIREN, PointValue::Bool(false));
    device.set_point(points::ALARM_DURATION, PointValue::Int(3));
    device.set_point(points::VOLUME, PointValue::from("5"));
    device.set_point(points::ENTRY_DELAY, PointValue::from("25"));
    device.set_point(points::ZONE_1_ENABLED, PointValue::Bool(true));
    device.set_point(points::ZONE_2_ENABLED, PointValue::Bool(true));
    device.set_point(points::ZONE_1_SENSITIVITY, PointValue::Int(5));
    device.set_point(points::ZONE_2_SENSITIVITY, PointValue::Int(5));
}

// ---------------------------------------------------------------------------
// Event log
// ---------------------------------------------------------------------------

fn log_event(event: &HubEvent) {
    match event {
        HubEvent::Connected { host } => info!("connected to hub at {host}"),
        HubEvent::Disconnected => warn!("hub disconnected"),
        HubEvent::PointChanged { point, new, old } => {
            info!("{} (was {old})", points::describe_point(point, new));
        }
        HubEvent::Sensor(sensor) => {
            info!("sensor: {} at {}", sensor.name, sensor.at.format("%H:%M:%S"));
        }
        HubEvent::Notification { message } => info!("notification: {message}"),
        HubEvent::Triggered { active } => info!("alarm triggered: {active}"),
        HubEvent::Mode { mode, raw } => match mode {
            Some(mode) => info!("mode: {mode}"),
            None => warn!("unknown mode value: {raw}"),
        },
        HubEvent::Monitor { kind, message } => info!("monitor [{kind:?}]: {message}"),
    }
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let text = std::fs::read_to_string(&cli.config)
        .with_context(|| format!("failed to read {}", cli.config))?;
    let config: Config =
        toml::from_str(&text).with_context(|| format!("failed to parse {}", cli.config))?;

    let version: ProtocolVersion = config.hub.protocol_version.parse()?;
    let mut builder = HubConfig::builder()
        .device_id(config.hub.device_id.clone())
        .host(config.hub.host.clone())
        .local_key(config.hub.local_key.clone())
        .version(version)
        .poll_interval_ms(config.hub.poll_interval_ms)
        .push_interval_ms(config.hub.push_interval_ms)
        .reconnect_delay_ms(config.hub.reconnect_delay_ms)
        .max_connect_retries(config.hub.max_connect_retries);
    if let Some(path) = &config.hub.cache_file {
        builder = builder.cache_path(path.clone());
    }
    let hub_config = builder.build();

    if config.transport.kind != "simulated" {
        bail!(
            "unsupported transport kind: {} (this build ships the simulated transport only)",
            config.transport.kind
        );
    }

    let device = SimulatedHub::new();
    seed_simulator(&device);
    let opener = SimulatedOpener::new();
    opener.register(&config.hub.host, device.clone());
    opener.announce(&config.hub.device_id, &config.hub.host);

    info!("connecting to hub at {} (v{version})...", config.hub.host);
    let hub = Hub::connect(hub_config, opener).await?;

    let mut events = hub.subscribe();
    tokio::spawn(async move {
        use tokio::sync::broadcast::error::RecvError;
        loop {
            match events.recv().await {
                Ok(event) => log_event(&event),
                Err(RecvError::Lagged(n)) => warn!("event log lagging, {n} events dropped"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    if config.monitor.auto_start {
        hub.start_monitor(config.monitor.muted, config.monitor.silent_rearm)
            .await;
    }

    if config.transport.trip_interval_secs > 0 {
        let device = device.clone();
        let period = std::time::Duration::from_secs(config.transport.trip_interval_secs);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await; // consume the immediate first tick
            loop {
                ticker.tick().await;
                device.trip_sensor("Test Sensor");
            }
        });
    }

    let mut sigterm = signal(SignalKind::terminate())?;
    tokio::select! {
        _ = hub.run() => {}
        _ = tokio::signal::ctrl_c() => info!("interrupt received"),
        _ = sigterm.recv() => info!("termination signal received"),
    }

    if hub.monitor_state() != MonitorState::Inactive {
        hub.stop_monitor().await;
    }
    hub.disconnect().await;
    Ok(())
}
