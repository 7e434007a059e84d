// MIT License - Copyright (c) 2026 agshub contributors

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::config::{AddressCache, DeviceAddress, HubConfig};
use crate::error::{HubError, Result};
use crate::event::{EventSender, HubEvent};
use crate::link::{LinkOpener, SharedLink};
use crate::points::PointMap;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Owns the device address and the lifecycle of the single live session.
///
/// Connection order: last-known-good (cached) address, then the configured
/// one, then network discovery keyed by the device identifier. A successful
/// discovery rewrites the stored host permanently and persists it, so DHCP
/// re-leasing survives process restarts.
pub struct ConnectionManager<O: LinkOpener> {
    opener: O,
    address: Mutex<DeviceAddress>,
    link: SharedLink<O::Link>,
    cache: Option<AddressCache>,
    connecting: AtomicBool,
    events: EventSender,
    connect_timeout: Duration,
    discovery_timeout: Duration,
}

/// Clears the connect-in-progress flag on every exit path.
struct ConnectGuard<'a>(&'a AtomicBool);

impl Drop for ConnectGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl<O: LinkOpener> ConnectionManager<O> {
    pub fn new(
        opener: O,
        config: &HubConfig,
        link: SharedLink<O::Link>,
        events: EventSender,
    ) -> Self {
        let cache = config.cache_path.clone().map(AddressCache::new);
        let mut address = config.address();

        if let Some(cache) = &cache
            && let Some(cached) = cache.load()
            && cached.identifier == address.identifier
        {
            if cached.host != address.host {
                info!(
                    "using cached hub address {} (configured {})",
                    cached.host, address.host
                );
                address.host = cached.host;
            }
            address.version = cached.version;
        }

        Self {
            opener,
            address: Mutex::new(address),
            link,
            cache,
            connecting: AtomicBool::new(false),
            events,
            connect_timeout: config.connect_timeout(),
            discovery_timeout: config.discovery_timeout(),
        }
    }

    /// The host the manager currently believes the hub lives at.
    pub fn current_host(&self) -> String {
        lock(&self.address).host.clone()
    }

    pub fn current_address(&self) -> DeviceAddress {
        lock(&self.address).clone()
    }

    /// The shared session handle used by every other component.
    pub fn link(&self) -> &SharedLink<O::Link> {
        &self.link
    }

    /// Open a session to the hub and return the initial point snapshot
    /// (the caller's new baseline).
    ///
    /// Only one attempt may be in flight at a time; a concurrent caller gets
    /// [`HubError::ConnectInProgress`] immediately. Failure is non-fatal:
    /// the caller stays in a disconnected state and may retry later.
    pub async fn connect(&self) -> Result<PointMap> {
        if self.connecting.swap(true, Ordering::AcqRel) {
            return Err(HubError::ConnectInProgress);
        }
        let _guard = ConnectGuard(&self.connecting);
        self.connect_inner().await
    }

    async fn connect_inner(&self) -> Result<PointMap> {
        // Drop any stale session before opening a new one; two sessions must
        // never fight over the same device.
        if self.link.shutdown().await {
            let _ = self.events.send(HubEvent::Disconnected);
        }

        let address = self.current_address();
        let first_err = match self.try_connect(&address).await {
            Ok(snapshot) => {
                self.persist(&address);
                return Ok(snapshot);
            }
            Err(e) => {
                warn!("connection to {} failed: {e}", address.host);
                e
            }
        };

        info!("configured address failed, scanning network for hub...");
        let discovered = match self
            .opener
            .discover(&address.identifier, self.discovery_timeout)
            .await
        {
            Ok(found) => found,
            Err(e) => {
                error!("discovery failed: {e}");
                None
            }
        };

        let Some(host) = discovered else {
            warn!("device {} not found on network", address.identifier);
            return Err(first_err);
        };
        if host == address.host {
            debug!("discovery returned the already-failing address {host}");
            return Err(first_err);
        }

        info!("hub discovered at new address: {host}");
        let moved = DeviceAddress {
            host: host.clone(),
            ..address
        };
        let snapshot = self.try_connect(&moved).await?;
        lock(&self.address).host = host;
        self.persist(&moved);
        Ok(snapshot)
    }

    /// Single connection attempt at a specific address. The session is only
    /// kept if the initial query succeeds.
    async fn try_connect(&self, address: &DeviceAddress) -> Result<PointMap> {
        let link = self.opener.open(address, self.connect_timeout).await?;
        self.link.install(link).await;

        match self.link.query().await {
            Ok(snapshot) => {
                info!("hub connected at {} (v{})", address.host, address.version);
                let _ = self.events.send(HubEvent::Connected {
                    host: address.host.clone(),
                });
                Ok(snapshot)
            }
            Err(e) => {
                self.link.shutdown().await;
                Err(e)
            }
        }
    }

    fn persist(&self, address: &DeviceAddress) {
        if let Some(cache) = &self.cache
            && let Err(e) = cache.store(address)
        {
            warn!("failed to persist address cache: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::event_channel;
    use crate::link::simulated::{SimulatedHub, SimulatedLink, SimulatedOpener};
    use crate::points::{self, PointValue};
    use std::sync::Arc;

    fn config_for(host: &str) -> HubConfig {
        HubConfig::builder()
            .device_id("bf9a12c4e8")
            .host(host)
            .local_key("0123456789abcdef")
            .build()
    }

    #[tokio::test]
    async fn test_connect_at_configured_address() {
        let hub = SimulatedHub::new();
        hub.set_point(points::ALARM_MODE, PointValue::from("2"));
        let opener = SimulatedOpener::new();
        opener.register("192.168.1.50", hub);

        let (tx, mut rx) = event_channel(16);
        let manager =
            ConnectionManager::new(opener, &config_for("192.168.1.50"), SharedLink::new(), tx);

        let baseline = manager.connect().await.unwrap();
        assert_eq!(baseline.get(points::ALARM_MODE), Some(&PointValue::from("2")));
        assert!(manager.link().is_connected().await);
        assert_eq!(
            rx.recv().await.unwrap(),
            HubEvent::Connected {
                host: "192.168.1.50".into()
            }
        );
    }

    #[tokio::test]
    async fn test_discovery_fallback_rewrites_host() {
        let hub = SimulatedHub::new();
        let opener = SimulatedOpener::new();
        opener.register("192.168.1.77", hub);
        opener.announce("bf9a12c4e8", "192.168.1.77");

        let (tx, _rx) = event_channel(16);
        let manager =
            ConnectionManager::new(opener, &config_for("192.168.1.50"), SharedLink::new(), tx);

        manager.connect().await.unwrap();
        assert_eq!(manager.current_host(), "192.168.1.77");
    }

    #[tokio::test]
    async fn test_total_failure_is_reported() {
        let opener = SimulatedOpener::new();
        let (tx, _rx) = event_channel(16);
        let manager =
            ConnectionManager::new(opener, &config_for("192.168.1.50"), SharedLink::new(), tx);

        let err = manager.connect().await.unwrap_err();
        assert!(err.is_retryable());
        assert!(!manager.link().is_connected().await);
    }

    #[tokio::test]
    async fn test_discovery_of_same_failing_address_is_not_retried() {
        let opener = SimulatedOpener::new();
        // Announced, but no hub actually reachable there.
        opener.announce("bf9a12c4e8", "192.168.1.50");
        let (tx, _rx) = event_channel(16);
        let manager =
            ConnectionManager::new(opener, &config_for("192.168.1.50"), SharedLink::new(), tx);

        assert!(manager.connect().await.is_err());
    }

    #[tokio::test]
    async fn test_discovered_address_is_cached_for_next_process() {
        let cache_path = std::env::temp_dir().join(format!(
            "agshub-conn-cache-{}.json",
            std::process::id()
        ));
        let _ = std::fs::remove_file(&cache_path);

        let make_config = || {
            HubConfig::builder()
                .device_id("bf9a12c4e8")
                .host("192.168.1.50")
                .local_key("0123456789abcdef")
                .cache_path(cache_path.clone())
                .build()
        };

        let opener = SimulatedOpener::new();
        opener.register("192.168.1.77", SimulatedHub::new());
        opener.announce("bf9a12c4e8", "192.168.1.77");
        let (tx, _rx) = event_channel(16);
        let manager = ConnectionManager::new(opener, &make_config(), SharedLink::new(), tx);
        manager.connect().await.unwrap();

        // A fresh manager (fresh process) starts from the cached host.
        let opener = SimulatedOpener::new();
        opener.register("192.168.1.77", SimulatedHub::new());
        let (tx, _rx) = event_channel(16);
        let manager = ConnectionManager::new(opener, &make_config(), SharedLink::new(), tx);
        assert_eq!(manager.current_host(), "192.168.1.77");
        manager.connect().await.unwrap();

        let _ = std::fs::remove_file(&cache_path);
    }

    /// Opener that takes a while, to hold the connect guard open.
    struct SlowOpener {
        inner: SimulatedOpener,
        delay: Duration,
    }

    impl LinkOpener for SlowOpener {
        type Link = SimulatedLink;

        async fn open(&self, address: &DeviceAddress, timeout: Duration) -> Result<SimulatedLink> {
            tokio::time::sleep(self.delay).await;
            self.inner.open(address, timeout).await
        }

        async fn discover(&self, device_id: &str, timeout: Duration) -> Result<Option<String>> {
            self.inner.discover(device_id, timeout).await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_connect_is_rejected() {
        let inner = SimulatedOpener::new();
        inner.register("192.168.1.50", SimulatedHub::new());
        let opener = SlowOpener {
            inner,
            delay: Duration::from_millis(500),
        };

        let (tx, _rx) = event_channel(16);
        let manager = Arc::new(ConnectionManager::new(
            opener,
            &config_for("192.168.1.50"),
            SharedLink::new(),
            tx,
        ));

        let first = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.connect().await })
        };
        tokio::task::yield_now().await;

        // Second caller while the first is still opening.
        assert!(matches!(
            manager.connect().await,
            Err(HubError::ConnectInProgress)
        ));

        assert!(first.await.unwrap().is_ok());
        // Guard released: a later connect is allowed again.
        assert!(manager.connect().await.is_ok());
    }
}
