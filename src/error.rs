// MIT License - Copyright (c) 2026 agshub contributors

use std::fmt;

/// Numeric error codes reported by the hub's protocol stack.
///
/// These are the codes the local transport surfaces when a session or a
/// single exchange fails (e.g. `901` for a plain network error, `905` when
/// the shared secret or protocol version is rejected).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceErrorCode {
    /// 901 - Network error, could not reach the device
    Connect,
    /// 902 - Timed out waiting for the device
    Timeout,
    /// 904 - Unexpected payload from the device
    Payload,
    /// 905 - Device offline or unreachable on its last known address
    Offline,
    /// 907 - Function not supported by this device
    Function,
    /// 910 - Invalid parameter in request
    Params,
    /// 914 - Shared secret or protocol version rejected
    KeyOrVersion,
}

impl DeviceErrorCode {
    /// Parse a numeric code string from the transport (e.g., "901").
    pub fn from_code(s: &str) -> Option<Self> {
        match s {
            "901" => Some(Self::Connect),
            "902" => Some(Self::Timeout),
            "904" => Some(Self::Payload),
            "905" => Some(Self::Offline),
            "907" => Some(Self::Function),
            "910" => Some(Self::Params),
            "914" => Some(Self::KeyOrVersion),
            _ => None,
        }
    }

    /// The numeric wire representation (e.g., "901").
    pub fn as_code(&self) -> &'static str {
        match self {
            Self::Connect => "901",
            Self::Timeout => "902",
            Self::Payload => "904",
            Self::Offline => "905",
            Self::Function => "907",
            Self::Params => "910",
            Self::KeyOrVersion => "914",
        }
    }

    /// Human-readable description of the error code.
    pub fn description(&self) -> &'static str {
        match self {
            Self::Connect => "Network error",
            Self::Timeout => "Timeout waiting for device",
            Self::Payload => "Unexpected payload from device",
            Self::Offline => "Device unreachable",
            Self::Function => "Function not supported by device",
            Self::Params => "Invalid parameter",
            Self::KeyOrVersion => "Check device key or protocol version",
        }
    }

    /// Whether a retry against the same session is worthwhile.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Connect | Self::Timeout | Self::Offline)
    }
}

impl fmt::Display for DeviceErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.as_code(), self.description())
    }
}

/// All errors that can occur in the agshub library.
#[derive(Debug, thiserror::Error)]
pub enum HubError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("connection to {host} timed out")]
    ConnectTimeout { host: String },

    #[error("not connected to the hub")]
    NotConnected,

    #[error("another connection attempt is already in progress")]
    ConnectInProgress,

    #[error("hub error: {0}")]
    Device(DeviceErrorCode),

    #[error("discovery failed: {reason}")]
    Discovery { reason: String },

    #[error("invalid response: {details}")]
    InvalidResponse { details: String },

    #[error("monitor mode is not active")]
    MonitorInactive,

    #[error("address cache: {0}")]
    Cache(#[from] serde_json::Error),
}

impl HubError {
    /// Whether this error is transient and the operation should be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            HubError::Io(_) | HubError::ConnectTimeout { .. } | HubError::NotConnected => true,
            HubError::Device(code) => code.is_transient(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, HubError>;
