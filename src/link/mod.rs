// MIT License - Copyright (c) 2026 agshub contributors

//! The Device Link boundary.
//!
//! A [`DeviceLink`] is one live, authenticated session to the hub, provided
//! by an external protocol driver. The core never touches the wire framing
//! or encryption; it consumes these ports only. [`SharedLink`] wraps the one
//! open session behind a single mutex so every concurrent caller (poller,
//! async listener, re-arm task, command handlers) is serialized onto it.

pub mod simulated;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;

use crate::config::DeviceAddress;
use crate::error::{HubError, Result};
use crate::points::{PointMap, PointValue};

/// One push frame received outside the query/response cycle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PushMessage {
    /// Points carried by the frame. May be empty.
    pub points: PointMap,
}

/// A live session to the hub.
///
/// Implementations are not required to be safe for concurrent use; all
/// callers go through [`SharedLink`].
pub trait DeviceLink: Send + 'static {
    /// Query the full point snapshot.
    fn query(&mut self) -> impl Future<Output = Result<PointMap>> + Send;

    /// Write a single point value.
    fn write(
        &mut self,
        point: &str,
        value: PointValue,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Receive one pending push frame, waiting at most `timeout`.
    ///
    /// Returns `Ok(None)` when nothing arrived in time.
    fn receive_push(
        &mut self,
        timeout: Duration,
    ) -> impl Future<Output = Result<Option<PushMessage>>> + Send;

    /// Close the session.
    fn close(&mut self) -> impl Future<Output = Result<()>> + Send;
}

/// Session factory and network discovery, provided by the protocol driver.
pub trait LinkOpener: Send + Sync + 'static {
    type Link: DeviceLink;

    /// Open a session at the given address.
    fn open(
        &self,
        address: &DeviceAddress,
        timeout: Duration,
    ) -> impl Future<Output = Result<Self::Link>> + Send;

    /// Scan the local network for the device, keyed by its identifier.
    ///
    /// Returns the host the device answered from, if any.
    fn discover(
        &self,
        device_id: &str,
        timeout: Duration,
    ) -> impl Future<Output = Result<Option<String>>> + Send;
}

/// The single shared session handle.
///
/// One tokio mutex guards all device I/O; at most one link is open at a
/// time. Installing a new link closes any previous one.
pub struct SharedLink<L> {
    inner: Arc<Mutex<Option<L>>>,
}

impl<L> Clone for SharedLink<L> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<L> Default for SharedLink<L> {
    fn default() -> Self {
        Self::new()
    }
}

impl<L> SharedLink<L> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(None)),
        }
    }

    /// Whether a session is currently installed.
    pub async fn is_connected(&self) -> bool {
        self.inner.lock().await.is_some()
    }
}

impl<L: DeviceLink> SharedLink<L> {
    /// Install a freshly opened session, closing any superseded one.
    pub async fn install(&self, link: L) {
        let mut guard = self.inner.lock().await;
        if let Some(mut old) = guard.replace(link) {
            let _ = old.close().await;
        }
    }

    /// Remove and close the current session. Returns whether one was open.
    pub async fn shutdown(&self) -> bool {
        let mut guard = self.inner.lock().await;
        match guard.take() {
            Some(mut link) => {
                let _ = link.close().await;
                true
            }
            None => false,
        }
    }

    pub async fn query(&self) -> Result<PointMap> {
        match &mut *self.inner.lock().await {
            Some(link) => link.query().await,
            None => Err(HubError::NotConnected),
        }
    }

    pub async fn write(&self, point: &str, value: PointValue) -> Result<()> {
        match &mut *self.inner.lock().await {
            Some(link) => link.write(point, value).await,
            None => Err(HubError::NotConnected),
        }
    }

    pub async fn receive_push(&self, timeout: Duration) -> Result<Option<PushMessage>> {
        match &mut *self.inner.lock().await {
            Some(link) => link.receive_push(timeout).await,
            None => Err(HubError::NotConnected),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::simulated::SimulatedHub;
    use super::*;
    use crate::points;

    #[tokio::test]
    async fn test_calls_without_link_fail_cleanly() {
        let link: SharedLink<super::simulated::SimulatedLink> = SharedLink::new();
        assert!(!link.is_connected().await);
        assert!(matches!(link.query().await, Err(HubError::NotConnected)));
        assert!(matches!(
            link.write(points::SIREN, false.into()).await,
            Err(HubError::NotConnected)
        ));
        assert!(!link.shutdown().await);
    }

    #[tokio::test]
    async fn test_install_replaces_previous_session() {
        let first = SimulatedHub::new();
        let second = SimulatedHub::new();
        second.set_point(points::SIREN, true.into());

        let shared = SharedLink::new();
        shared.install(first.open_link()).await;
        shared.install(second.open_link()).await;

        // Only one session stays open; queries now hit the second hub.
        assert_eq!(first.open_sessions(), 0);
        assert_eq!(second.open_sessions(), 1);
        let snapshot = shared.query().await.unwrap();
        assert_eq!(
            snapshot.get(points::SIREN),
            Some(&crate::points::PointValue::Bool(true))
        );
    }
}
