// MIT License - Copyright (c) 2026 agshub contributors

//! In-memory virtual hub.
//!
//! Implements [`DeviceLink`]/[`LinkOpener`] against a scripted device: point
//! state, queued push frames, fault injection, and a write journal. Used by
//! the test suite and by `agshubd`'s simulated transport.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::sleep;

use crate::config::DeviceAddress;
use crate::error::{DeviceErrorCode, HubError, Result};
use crate::link::{DeviceLink, LinkOpener, PushMessage};
use crate::points::{self, PointMap, PointValue};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Default)]
struct SimState {
    points: PointMap,
    pushes: VecDeque<PointMap>,
    writes: Vec<(String, PointValue)>,
    fail_queries: bool,
    fail_writes: bool,
    offline: bool,
    open_sessions: usize,
}

/// Handle to a simulated hub device. Cheap to clone; all clones share the
/// same device state.
#[derive(Clone, Default)]
pub struct SimulatedHub {
    state: Arc<Mutex<SimState>>,
}

impl SimulatedHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_points(points: PointMap) -> Self {
        let hub = Self::new();
        lock(&hub.state).points = points;
        hub
    }

    /// Set a point value directly on the device (no push frame).
    pub fn set_point(&self, index: &str, value: PointValue) {
        lock(&self.state).points.insert(index.to_string(), value);
    }

    pub fn get_point(&self, index: &str) -> Option<PointValue> {
        lock(&self.state).points.get(index).cloned()
    }

    /// Queue a push frame for the next `receive_push`.
    pub fn push(&self, points: PointMap) {
        lock(&self.state).pushes.push_back(points);
    }

    /// Simulate a sensor trip: sets the triggered point and queues the push
    /// frame a real hub sends (triggered flag + encoded sensor name +
    /// encoded notification text).
    pub fn trip_sensor(&self, name: &str) {
        let encoded = points::encode_wide_text(name);
        let mut frame = PointMap::new();
        frame.insert(
            points::ALARM_TRIGGERED.to_string(),
            PointValue::Bool(true),
        );
        frame.insert(
            points::SENSOR_EVENT.to_string(),
            PointValue::Text(encoded.clone()),
        );
        frame.insert(points::NOTIFICATION.to_string(), PointValue::Text(encoded));

        let mut state = lock(&self.state);
        state
            .points
            .insert(points::ALARM_TRIGGERED.to_string(), PointValue::Bool(true));
        state.pushes.push_back(frame);
    }

    pub fn set_offline(&self, offline: bool) {
        lock(&self.state).offline = offline;
    }

    pub fn fail_queries(&self, fail: bool) {
        lock(&self.state).fail_queries = fail;
    }

    pub fn fail_writes(&self, fail: bool) {
        lock(&self.state).fail_writes = fail;
    }

    /// All writes received so far, in order.
    pub fn writes(&self) -> Vec<(String, PointValue)> {
        lock(&self.state).writes.clone()
    }

    pub fn clear_writes(&self) {
        lock(&self.state).writes.clear();
    }

    pub fn open_sessions(&self) -> usize {
        lock(&self.state).open_sessions
    }

    /// Open a session on this device directly (bypassing an opener).
    pub fn open_link(&self) -> SimulatedLink {
        lock(&self.state).open_sessions += 1;
        SimulatedLink {
            hub: self.clone(),
            closed: false,
        }
    }
}

/// One session on a [`SimulatedHub`].
pub struct SimulatedLink {
    hub: SimulatedHub,
    closed: bool,
}

impl SimulatedLink {
    fn release(&mut self) {
        if !self.closed {
            self.closed = true;
            let mut state = lock(&self.hub.state);
            state.open_sessions = state.open_sessions.saturating_sub(1);
        }
    }
}

impl DeviceLink for SimulatedLink {
    async fn query(&mut self) -> Result<PointMap> {
        let state = lock(&self.hub.state);
        if state.offline {
            return Err(HubError::Device(DeviceErrorCode::Offline));
        }
        if state.fail_queries {
            return Err(HubError::Device(DeviceErrorCode::Timeout));
        }
        Ok(state.points.clone())
    }

    async fn write(&mut self, point: &str, value: PointValue) -> Result<()> {
        let mut state = lock(&self.hub.state);
        if state.offline {
            return Err(HubError::Device(DeviceErrorCode::Offline));
        }
        if state.fail_writes {
            return Err(HubError::Device(DeviceErrorCode::Timeout));
        }
        state.writes.push((point.to_string(), value.clone()));
        state.points.insert(point.to_string(), value);
        Ok(())
    }

    async fn receive_push(&mut self, timeout: Duration) -> Result<Option<PushMessage>> {
        {
            let mut state = lock(&self.hub.state);
            if state.offline {
                return Err(HubError::Device(DeviceErrorCode::Offline));
            }
            if let Some(points) = state.pushes.pop_front() {
                return Ok(Some(PushMessage { points }));
            }
        }
        sleep(timeout).await;
        let mut state = lock(&self.hub.state);
        Ok(state.pushes.pop_front().map(|points| PushMessage { points }))
    }

    async fn close(&mut self) -> Result<()> {
        self.release();
        Ok(())
    }
}

impl Drop for SimulatedLink {
    fn drop(&mut self) {
        self.release();
    }
}

/// Opener over a set of simulated hubs, with scripted discovery answers.
#[derive(Default)]
pub struct SimulatedOpener {
    hubs: Mutex<HashMap<String, SimulatedHub>>,
    announcements: Mutex<HashMap<String, String>>,
}

impl SimulatedOpener {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make a hub reachable at the given host.
    pub fn register(&self, host: &str, hub: SimulatedHub) {
        lock(&self.hubs).insert(host.to_string(), hub);
    }

    /// Script the discovery answer for a device identifier.
    pub fn announce(&self, device_id: &str, host: &str) {
        lock(&self.announcements).insert(device_id.to_string(), host.to_string());
    }

    pub fn hub_at(&self, host: &str) -> Option<SimulatedHub> {
        lock(&self.hubs).get(host).cloned()
    }
}

impl LinkOpener for SimulatedOpener {
    type Link = SimulatedLink;

    async fn open(&self, address: &DeviceAddress, _timeout: Duration) -> Result<SimulatedLink> {
        let hub = lock(&self.hubs).get(&address.host).cloned();
        match hub {
            Some(hub) => {
                if lock(&hub.state).offline {
                    return Err(HubError::Device(DeviceErrorCode::Offline));
                }
                Ok(hub.open_link())
            }
            None => Err(HubError::ConnectTimeout {
                host: address.host.clone(),
            }),
        }
    }

    async fn discover(&self, device_id: &str, _timeout: Duration) -> Result<Option<String>> {
        Ok(lock(&self.announcements).get(device_id).cloned())
    }
}
