// MIT License - Copyright (c) 2026 agshub contributors

use chrono::{DateTime, Utc};

use crate::points::{AlarmMode, PointValue};

/// A decoded sensor trip: the sensor's display name and when it was received.
///
/// Ephemeral; only the latest instance is retained, for the status snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorEvent {
    pub name: String,
    pub at: DateTime<Utc>,
}

/// Category of an informational monitor-mode event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorEventKind {
    /// Lifecycle notice (started, stopped, volume muted/restored, …)
    Info,
    /// The siren was silenced at the start of a re-arm sequence
    Silenced,
    /// A re-arm sequence completed
    Rearmed,
}

/// All events that can be emitted by the hub.
///
/// Subscribers receive a `tokio::sync::broadcast::Receiver<HubEvent>` via
/// `Hub::subscribe()`. The broadcast channel isolates subscribers from each
/// other: a slow, dropped, or panicking consumer cannot block other
/// consumers or the emitting operation.
#[derive(Debug, Clone, PartialEq)]
pub enum HubEvent {
    /// Session to the hub established
    Connected { host: String },
    /// Session to the hub lost or closed
    Disconnected,
    /// A polled point changed value between consecutive snapshots
    PointChanged {
        point: String,
        new: PointValue,
        old: PointValue,
    },
    /// A sensor trip was pushed by the hub
    Sensor(SensorEvent),
    /// A status notification was pushed by the hub
    Notification { message: String },
    /// The alarm triggered flag was pushed by the hub
    Triggered { active: bool },
    /// The hub reported an alarm mode value
    Mode {
        mode: Option<AlarmMode>,
        raw: String,
    },
    /// Informational monitor-mode event
    Monitor {
        kind: MonitorEventKind,
        message: String,
    },
}

/// Type alias for the broadcast sender.
pub type EventSender = tokio::sync::broadcast::Sender<HubEvent>;

/// Type alias for the broadcast receiver.
pub type EventReceiver = tokio::sync::broadcast::Receiver<HubEvent>;

/// Create a new event channel with the given capacity.
///
/// Sending with zero subscribers succeeds (the event is simply dropped).
pub fn event_channel(capacity: usize) -> (EventSender, EventReceiver) {
    tokio::sync::broadcast::channel(capacity)
}
