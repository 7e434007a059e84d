// MIT License - Copyright (c) 2026 agshub contributors

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, trace};

use crate::event::{EventSender, HubEvent, SensorEvent};
use crate::link::{DeviceLink, SharedLink};
use crate::monitor::MonitorController;
use crate::points::{self, AlarmMode, PointValue, decode_wide_text};

/// Non-blocking reader of the hub's push frames.
///
/// Call [`check_async`](Self::check_async) frequently (≥2 Hz) for responsive
/// monitoring: each call decodes at most one pending frame into typed
/// events. I/O errors are swallowed into an empty list; listener silence is
/// never evidence of disconnection. The poller and connection manager own
/// that determination.
pub struct AsyncEventListener<L> {
    link: SharedLink<L>,
    monitor: Arc<MonitorController<L>>,
    events: EventSender,
    push_timeout: Duration,
}

impl<L: DeviceLink> AsyncEventListener<L> {
    pub fn new(
        link: SharedLink<L>,
        monitor: Arc<MonitorController<L>>,
        events: EventSender,
        push_timeout: Duration,
    ) -> Self {
        Self {
            link,
            monitor,
            events,
            push_timeout,
        }
    }

    /// Receive and decode one pending push frame, if any.
    ///
    /// Each decoded event is broadcast and returned. A `triggered=true`
    /// while the monitor is active and not already rearming additionally
    /// starts the re-arm sequence, exactly once per trigger window (guarded
    /// by the rearming flag, not by event de-duplication).
    pub async fn check_async(&self) -> Vec<HubEvent> {
        let frame = match self.link.receive_push(self.push_timeout).await {
            Ok(Some(frame)) if !frame.points.is_empty() => frame,
            Ok(_) => return Vec::new(),
            Err(e) => {
                trace!("push receive failed: {e}");
                return Vec::new();
            }
        };
        debug!("async frame received: {} point(s)", frame.points.len());

        let mut out = Vec::new();

        if let Some(value) = frame.points.get(points::SENSOR_EVENT) {
            let name = decode_text(value);
            info!("monitor: sensor event — {name}");
            let sensor = SensorEvent {
                name,
                at: Utc::now(),
            };
            self.monitor.note_sensor(sensor.clone());
            out.push(HubEvent::Sensor(sensor));
        }

        if let Some(value) = frame.points.get(points::NOTIFICATION) {
            out.push(HubEvent::Notification {
                message: decode_text(value),
            });
        }

        if let Some(value) = frame.points.get(points::ALARM_TRIGGERED) {
            let active = value.as_bool().unwrap_or(false);
            out.push(HubEvent::Triggered { active });
            if active {
                let _ = self.monitor.clone().begin_rearm();
            }
        }

        if let Some(value) = frame.points.get(points::ALARM_MODE) {
            let raw = value.to_string();
            let mode = AlarmMode::from_wire(&raw);
            if let Some(mode) = mode {
                self.monitor.note_mode(mode);
            }
            out.push(HubEvent::Mode { mode, raw });
        }

        for event in &out {
            let _ = self.events.send(event.clone());
        }
        out
    }
}

/// Text points arrive base64-wrapped; a decode failure falls back to the
/// raw value rather than erroring.
fn decode_text(value: &PointValue) -> String {
    match value.as_str() {
        Some(s) => decode_wide_text(s),
        None => value.to_string(),
    }
}
