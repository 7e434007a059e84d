// MIT License - Copyright (c) 2026 agshub contributors

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{HubError, Result};

/// Local protocol version spoken by the hub. Negotiable 3.3–3.5.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProtocolVersion {
    #[serde(rename = "3.3")]
    V33,
    #[serde(rename = "3.4")]
    V34,
    #[serde(rename = "3.5")]
    V35,
}

impl ProtocolVersion {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::V33 => "3.3",
            Self::V34 => "3.4",
            Self::V35 => "3.5",
        }
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProtocolVersion {
    type Err = HubError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "3.3" => Ok(Self::V33),
            "3.4" => Ok(Self::V34),
            "3.5" => Ok(Self::V35),
            other => Err(HubError::InvalidResponse {
                details: format!("unsupported protocol version: {other}"),
            }),
        }
    }
}

/// Where and how to reach one hub.
///
/// The identifier and shared secret are fixed for the process lifetime; the
/// host may be rewritten after a successful discovery (DHCP re-leasing).
#[derive(Debug, Clone)]
pub struct DeviceAddress {
    /// Device identifier (stable across reboots and address changes)
    pub identifier: String,
    /// Network host (IP address or name)
    pub host: String,
    /// Shared secret for the encrypted session
    pub local_key: String,
    /// Protocol version to speak
    pub version: ProtocolVersion,
}

/// Delays used by the re-arm sequence, in milliseconds.
#[derive(Debug, Clone, Copy)]
pub struct RearmTimings {
    /// After the silence-siren write (debounce against re-triggering)
    pub siren_settle_ms: u64,
    /// After clearing the triggered flag (silent path)
    pub clear_settle_ms: u64,
    /// Between the two zone re-enable writes (silent path)
    pub zone_gap_ms: u64,
    /// Between disarm and re-arm (audible path)
    pub cycle_gap_ms: u64,
}

impl Default for RearmTimings {
    fn default() -> Self {
        Self {
            siren_settle_ms: 300,
            clear_settle_ms: 300,
            zone_gap_ms: 200,
            cycle_gap_ms: 1000,
        }
    }
}

impl RearmTimings {
    pub fn siren_settle(&self) -> Duration {
        Duration::from_millis(self.siren_settle_ms)
    }

    pub fn clear_settle(&self) -> Duration {
        Duration::from_millis(self.clear_settle_ms)
    }

    pub fn zone_gap(&self) -> Duration {
        Duration::from_millis(self.zone_gap_ms)
    }

    pub fn cycle_gap(&self) -> Duration {
        Duration::from_millis(self.cycle_gap_ms)
    }
}

/// Configuration for connecting to an AGSHome hub.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Device identifier (from the vendor pairing flow)
    pub device_id: String,
    /// Configured network host
    pub host: String,
    /// Shared secret for the encrypted session
    pub local_key: String,
    /// Protocol version (default: 3.4)
    pub version: ProtocolVersion,
    /// Session open timeout in milliseconds
    pub connect_timeout_ms: u64,
    /// Network discovery scan timeout in milliseconds
    pub discovery_timeout_ms: u64,
    /// Status poll interval in milliseconds
    pub poll_interval_ms: u64,
    /// Async push check interval in milliseconds (≥2 Hz)
    pub push_interval_ms: u64,
    /// Bounded wait for a single push receive in milliseconds
    pub push_timeout_ms: u64,
    /// Reconnection delay in milliseconds (base delay for exponential backoff)
    pub reconnect_delay_ms: u64,
    /// Maximum number of connection retries on transient errors (0 = no retries)
    pub max_connect_retries: u32,
    /// Event channel capacity
    pub event_capacity: usize,
    /// Re-arm sequence delays
    pub rearm: RearmTimings,
    /// Where to persist the last-known-good address (None = no cache)
    pub cache_path: Option<PathBuf>,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            device_id: String::new(),
            host: String::new(),
            local_key: String::new(),
            version: ProtocolVersion::V34,
            connect_timeout_ms: 5000,
            discovery_timeout_ms: 20000,
            poll_interval_ms: 5000,
            push_interval_ms: 300,
            push_timeout_ms: 100,
            reconnect_delay_ms: 10000,
            max_connect_retries: 3,
            event_capacity: 256,
            rearm: RearmTimings::default(),
            cache_path: None,
        }
    }
}

impl HubConfig {
    /// Create a new config builder starting from defaults.
    pub fn builder() -> HubConfigBuilder {
        HubConfigBuilder::default()
    }

    /// The configured device address.
    pub fn address(&self) -> DeviceAddress {
        DeviceAddress {
            identifier: self.device_id.clone(),
            host: self.host.clone(),
            local_key: self.local_key.clone(),
            version: self.version,
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_millis(self.discovery_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn push_interval(&self) -> Duration {
        Duration::from_millis(self.push_interval_ms)
    }

    pub fn push_timeout(&self) -> Duration {
        Duration::from_millis(self.push_timeout_ms)
    }
}

/// Builder for HubConfig.
#[derive(Debug, Clone, Default)]
pub struct HubConfigBuilder {
    config: HubConfig,
}

impl HubConfigBuilder {
    pub fn device_id(mut self, id: impl Into<String>) -> Self {
        self.config.device_id = id.into();
        self
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.host = host.into();
        self
    }

    pub fn local_key(mut self, key: impl Into<String>) -> Self {
        self.config.local_key = key.into();
        self
    }

    pub fn version(mut self, version: ProtocolVersion) -> Self {
        self.config.version = version;
        self
    }

    pub fn connect_timeout_ms(mut self, ms: u64) -> Self {
        self.config.connect_timeout_ms = ms;
        self
    }

    pub fn discovery_timeout_ms(mut self, ms: u64) -> Self {
        self.config.discovery_timeout_ms = ms;
        self
    }

    pub fn poll_interval_ms(mut self, ms: u64) -> Self {
        self.config.poll_interval_ms = ms;
        self
    }

    pub fn push_interval_ms(mut self, ms: u64) -> Self {
        self.config.push_interval_ms = ms;
        self
    }

    pub fn push_timeout_ms(mut self, ms: u64) -> Self {
        self.config.push_timeout_ms = ms;
        self
    }

    pub fn reconnect_delay_ms(mut self, ms: u64) -> Self {
        self.config.reconnect_delay_ms = ms;
        self
    }

    pub fn max_connect_retries(mut self, retries: u32) -> Self {
        self.config.max_connect_retries = retries;
        self
    }

    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.config.event_capacity = capacity;
        self
    }

    pub fn rearm_timings(mut self, timings: RearmTimings) -> Self {
        self.config.rearm = timings;
        self
    }

    pub fn cache_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.cache_path = Some(path.into());
        self
    }

    pub fn build(self) -> HubConfig {
        self.config
    }
}

/// The persisted shape of the last-known-good connection details.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedAddress {
    pub identifier: String,
    pub host: String,
    pub version: ProtocolVersion,
}

/// JSON file holding the last-known-good hub address.
///
/// Reconnection prefers this address over the configured one, so a hub that
/// moved to a new DHCP lease is found without a rescan after a restart.
#[derive(Debug, Clone)]
pub struct AddressCache {
    path: PathBuf,
}

impl AddressCache {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Load the cached address, if the file exists and parses.
    pub fn load(&self) -> Option<CachedAddress> {
        let text = std::fs::read_to_string(&self.path).ok()?;
        match serde_json::from_str(&text) {
            Ok(cached) => Some(cached),
            Err(e) => {
                warn!("ignoring malformed address cache {}: {e}", self.path.display());
                None
            }
        }
    }

    /// Persist the last-known-good address.
    pub fn store(&self, address: &DeviceAddress) -> Result<()> {
        let cached = CachedAddress {
            identifier: address.identifier.clone(),
            host: address.host.clone(),
            version: address.version,
        };
        let text = serde_json::to_string_pretty(&cached)?;
        std::fs::write(&self.path, text)?;
        Ok(())
    }
}
