// MIT License - Copyright (c) 2026 agshub contributors

//! # agshub
//!
//! Local-network control for AGSHome security hubs over their encrypted
//! point-based protocol. No cloud dependency at runtime.
//!
//! The crate owns the single live session to the hub and everything that
//! contends for it: a periodic status poller, a high-frequency async event
//! listener, the monitor-mode state machine with its timed re-arm sequence,
//! and the zone suspension timer. The protocol transport itself is a
//! pluggable boundary ([`link::DeviceLink`] / [`link::LinkOpener`]); a
//! simulated implementation ships in [`link::simulated`] for tests and
//! hardware-free runs.
//!
//! ## Quick Start
//!
//! ```no_run
//! use agshub::link::simulated::{SimulatedHub, SimulatedOpener};
//! use agshub::{AlarmMode, Hub, HubConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = HubConfig::builder()
//!         .device_id("bf9a12c4e8")
//!         .host("192.168.1.50")
//!         .local_key("0123456789abcdef")
//!         .build();
//!
//!     let opener = SimulatedOpener::new();
//!     opener.register("192.168.1.50", SimulatedHub::new());
//!
//!     let hub = Hub::connect(config, opener).await?;
//!
//!     let mut events = hub.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     // Silent night watch: muted, re-armed without beeps.
//!     hub.start_monitor(true, true).await;
//!
//!     tokio::signal::ctrl_c().await?;
//!     hub.stop_monitor().await;
//!     hub.disconnect().await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod connection;
pub mod error;
pub mod event;
pub mod hub;
pub mod link;
pub mod listener;
pub mod monitor;
pub mod points;
pub mod poller;

// Re-exports for convenience
pub use config::{DeviceAddress, HubConfig, HubConfigBuilder, ProtocolVersion, RearmTimings};
pub use error::{DeviceErrorCode, HubError, Result};
pub use event::{EventReceiver, HubEvent, MonitorEventKind, SensorEvent};
pub use hub::{Hub, HubStatus};
pub use monitor::MonitorState;
pub use points::{AlarmMode, PointMap, PointValue, VolumeLevel};
