// MIT License - Copyright (c) 2026 agshub contributors

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::time::{MissedTickBehavior, interval, sleep};
use tracing::{debug, info, warn};

use crate::config::HubConfig;
use crate::connection::ConnectionManager;
use crate::error::{HubError, Result};
use crate::event::{EventReceiver, EventSender, HubEvent, SensorEvent, event_channel};
use crate::link::{LinkOpener, SharedLink};
use crate::listener::AsyncEventListener;
use crate::monitor::{MonitorController, MonitorState};
use crate::poller::StatusPoller;
use crate::points::{self, AlarmMode, PointMap, PointValue, VolumeLevel};

/// Locally cached view of the hub, for collaborators that must not block on
/// device I/O (web layer, GUI).
#[derive(Debug, Clone)]
pub struct HubStatus {
    pub connected: bool,
    pub host: String,
    pub mode: Option<AlarmMode>,
    pub monitor: MonitorState,
    pub suspended_until: Option<DateTime<Utc>>,
    pub last_sensor: Option<SensorEvent>,
}

/// The main public API for interacting with an AGSHome hub.
///
/// # Example
///
/// ```no_run
/// use agshub::link::simulated::{SimulatedHub, SimulatedOpener};
/// use agshub::{Hub, HubConfig};
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let config = HubConfig::builder()
///         .device_id("bf9a12c4e8")
///         .host("192.168.1.50")
///         .local_key("0123456789abcdef")
///         .build();
///
///     let opener = SimulatedOpener::new();
///     opener.register("192.168.1.50", SimulatedHub::new());
///
///     let hub = Hub::connect(config, opener).await?;
///
///     let mut events = hub.subscribe();
///     tokio::spawn(async move {
///         while let Ok(event) = events.recv().await {
///             println!("Event: {:?}", event);
///         }
///     });
///
///     hub.start_monitor(true, true).await;
///
///     tokio::signal::ctrl_c().await?;
///     hub.stop_monitor().await;
///     hub.disconnect().await;
///     Ok(())
/// }
/// ```
pub struct Hub<O: LinkOpener> {
    config: HubConfig,
    manager: Arc<ConnectionManager<O>>,
    poller: Arc<StatusPoller<O::Link>>,
    listener: Arc<AsyncEventListener<O::Link>>,
    monitor: Arc<MonitorController<O::Link>>,
    link: SharedLink<O::Link>,
    event_tx: EventSender,
    shutdown_tx: watch::Sender<bool>,
}

impl<O: LinkOpener> std::fmt::Debug for Hub<O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hub")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<O: LinkOpener> Hub<O> {
    /// Build a hub in the disconnected state. All components are fully
    /// initialized; callers may operate disconnected and call
    /// [`reconnect`](Self::reconnect) whenever they choose.
    pub fn new(config: HubConfig, opener: O) -> Self {
        let (event_tx, _rx) = event_channel(config.event_capacity);
        let link: SharedLink<O::Link> = SharedLink::new();
        let manager = Arc::new(ConnectionManager::new(
            opener,
            &config,
            link.clone(),
            event_tx.clone(),
        ));
        let monitor = Arc::new(MonitorController::new(
            link.clone(),
            event_tx.clone(),
            config.rearm,
        ));
        let poller = Arc::new(StatusPoller::new(link.clone(), event_tx.clone()));
        let listener = Arc::new(AsyncEventListener::new(
            link.clone(),
            monitor.clone(),
            event_tx.clone(),
            config.push_timeout(),
        ));
        let (shutdown_tx, _) = watch::channel(false);

        Self {
            config,
            manager,
            poller,
            listener,
            monitor,
            link,
            event_tx,
            shutdown_tx,
        }
    }

    /// Connect to a hub with the given configuration.
    ///
    /// Retries on transient errors with exponential backoff. The base delay
    /// is `reconnect_delay_ms` and the maximum number of retries is
    /// `max_connect_retries`.
    pub async fn connect(config: HubConfig, opener: O) -> Result<Self> {
        let max_retries = config.max_connect_retries;
        let base_delay_ms = config.reconnect_delay_ms;
        let hub = Self::new(config, opener);

        let mut last_error = None;

        for attempt in 0..=max_retries {
            if attempt > 0 {
                let delay_ms = base_delay_ms * (1 << (attempt - 1).min(4));
                warn!(
                    "connection attempt {} failed, retrying in {:.1}s...",
                    attempt,
                    delay_ms as f64 / 1000.0
                );
                sleep(Duration::from_millis(delay_ms)).await;
            }

            match hub.reconnect().await {
                Ok(()) => {
                    info!("hub initialization complete");
                    return Ok(hub);
                }
                Err(e) => {
                    if !e.is_retryable() || attempt == max_retries {
                        return Err(e);
                    }
                    warn!("connection error (attempt {}): {e}", attempt + 1);
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or(HubError::NotConnected))
    }

    /// Single (re)connection attempt: configured/cached address first, then
    /// discovery. Guarded against concurrent attempts.
    pub async fn reconnect(&self) -> Result<()> {
        let baseline = self.manager.connect().await?;
        self.adopt_baseline(baseline);
        Ok(())
    }

    fn adopt_baseline(&self, baseline: PointMap) {
        if let Some(mode) = baseline
            .get(points::ALARM_MODE)
            .and_then(|v| v.as_str())
            .and_then(AlarmMode::from_wire)
        {
            self.monitor.note_mode(mode);
        }
        self.poller.reset_baseline(baseline);
    }

    /// Subscribe to hub events.
    pub fn subscribe(&self) -> EventReceiver {
        self.event_tx.subscribe()
    }

    pub async fn connected(&self) -> bool {
        self.link.is_connected().await
    }

    /// Current-mode / monitor-state snapshot. Never touches the device.
    pub async fn status(&self) -> HubStatus {
        let overview = self.monitor.overview();
        HubStatus {
            connected: self.link.is_connected().await,
            host: self.manager.current_host(),
            mode: overview.mode,
            monitor: overview.state,
            suspended_until: overview.suspended_until,
            last_sensor: overview.last_sensor,
        }
    }

    /// Query the hub's live point snapshot (does not touch the poller
    /// baseline).
    pub async fn query_points(&self) -> Result<PointMap> {
        self.link.query().await
    }

    // --- Commands ---

    /// Set the alarm mode (away, home, disarmed).
    pub async fn set_mode(&self, mode: AlarmMode) -> Result<()> {
        debug!("setting alarm mode to {mode}");
        self.link
            .write(points::ALARM_MODE, PointValue::from(mode.as_wire()))
            .await?;
        self.monitor.note_mode(mode);
        Ok(())
    }

    /// Turn the siren on or off.
    pub async fn trigger_siren(&self, on: bool) -> Result<()> {
        debug!("setting siren {}", if on { "on" } else { "off" });
        self.link.write(points::SIREN, PointValue::Bool(on)).await
    }

    /// Turn the night light on or off (shared output with the siren).
    pub async fn set_night_light(&self, on: bool) -> Result<()> {
        self.trigger_siren(on).await
    }

    /// Set the hub volume level.
    pub async fn set_volume(&self, level: VolumeLevel) -> Result<()> {
        debug!("setting volume to {level}");
        self.link
            .write(points::VOLUME, PointValue::from(level.as_wire()))
            .await
    }

    /// Write an arbitrary point value (for testing/point discovery).
    pub async fn set_point(&self, point: &str, value: PointValue) -> Result<()> {
        info!("set point {point} = {value}");
        self.link.write(point, value).await
    }

    /// Enter monitor mode. See [`MonitorController::start`].
    pub async fn start_monitor(&self, muted: bool, silent_rearm: bool) {
        self.monitor.start(muted, silent_rearm).await;
    }

    /// Exit monitor mode and disarm the hub.
    pub async fn stop_monitor(&self) {
        self.monitor.stop().await;
    }

    pub fn monitor_state(&self) -> MonitorState {
        self.monitor.state()
    }

    /// Suspend both zones for the given window. Returns the generation
    /// token accepted by [`cancel_suspension`](Self::cancel_suspension).
    pub async fn suspend_zones(&self, duration: Duration) -> Result<u64> {
        self.monitor.clone().suspend_zones(duration).await
    }

    pub async fn cancel_suspension(&self, token: u64) -> bool {
        self.monitor.cancel_suspension(token).await
    }

    pub async fn resume_zones(&self) {
        self.monitor.resume_zones().await;
    }

    /// Poll the hub once, emitting change events and refreshing the cached
    /// mode.
    pub async fn poll_once(&self) -> Result<PointMap> {
        let snapshot = self.poller.poll_once().await?;
        if let Some(mode) = snapshot
            .get(points::ALARM_MODE)
            .and_then(|v| v.as_str())
            .and_then(AlarmMode::from_wire)
        {
            self.monitor.note_mode(mode);
        }
        Ok(snapshot)
    }

    /// Check for pending async events once. See
    /// [`AsyncEventListener::check_async`].
    pub async fn check_async(&self) -> Vec<HubEvent> {
        self.listener.check_async().await
    }

    /// Drive the periodic poll and the high-frequency async check until
    /// [`disconnect`](Self::disconnect) is called.
    ///
    /// A failed poll triggers one guarded reconnection attempt; the loop
    /// itself never exits on errors.
    pub async fn run(&self) {
        let mut poll = interval(self.config.poll_interval());
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut push = interval(self.config.push_interval());
        push.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut shutdown = self.shutdown_tx.subscribe();

        info!(
            "hub loop started (poll every {:.1}s, async check every {}ms)",
            self.config.poll_interval().as_secs_f64(),
            self.config.push_interval_ms
        );

        loop {
            tokio::select! {
                _ = poll.tick() => self.poll_and_recover().await,
                _ = push.tick() => {
                    let _ = self.listener.check_async().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        debug!("hub loop stopping");
                        break;
                    }
                }
            }
        }
    }

    async fn poll_and_recover(&self) {
        match self.poll_once().await {
            Ok(_) => {}
            Err(e) if e.is_retryable() => {
                warn!("poll failed: {e}; attempting reconnection");
                match self.reconnect().await {
                    Ok(()) => {}
                    Err(HubError::ConnectInProgress) => {
                        debug!("reconnection already in progress");
                    }
                    Err(e) => warn!("reconnection failed: {e}"),
                }
            }
            Err(e) => warn!("poll failed: {e}"),
        }
    }

    /// Stop the run loop and close the session.
    pub async fn disconnect(&self) {
        info!("disconnecting from hub");
        let _ = self.shutdown_tx.send(true);
        if self.link.shutdown().await {
            let _ = self.event_tx.send(HubEvent::Disconnected);
        }
    }
}

impl<O: LinkOpener> Drop for Hub<O> {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::simulated::{SimulatedHub, SimulatedOpener};

    const HOST: &str = "192.168.1.50";

    fn seeded() -> (SimulatedOpener, SimulatedHub) {
        let sim = SimulatedHub::new();
        sim.set_point(points::ALARM_MODE, PointValue::from("2"));
        sim.set_point(points::VOLUME, PointValue::from("5"));
        sim.set_point(points::SIREN, PointValue::Bool(false));
        let opener = SimulatedOpener::new();
        opener.register(HOST, sim.clone());
        (opener, sim)
    }

    fn config() -> HubConfig {
        HubConfig::builder()
            .device_id("bf9a12c4e8")
            .host(HOST)
            .local_key("0123456789abcdef")
            .build()
    }

    #[tokio::test]
    async fn test_connect_adopts_initial_mode() {
        let (opener, _sim) = seeded();
        let hub = Hub::connect(config(), opener).await.unwrap();

        let status = hub.status().await;
        assert!(status.connected);
        assert_eq!(status.host, HOST);
        assert_eq!(status.mode, Some(AlarmMode::Disarmed));
        assert_eq!(status.monitor, MonitorState::Inactive);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_gives_up_after_retries() {
        let opener = SimulatedOpener::new();
        let err = Hub::connect(config(), opener).await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_set_mode_updates_cache() {
        let (opener, sim) = seeded();
        let hub = Hub::connect(config(), opener).await.unwrap();
        sim.clear_writes();

        hub.set_mode(AlarmMode::Away).await.unwrap();
        assert_eq!(
            sim.writes(),
            vec![(points::ALARM_MODE.to_string(), PointValue::from("1"))]
        );
        assert_eq!(hub.status().await.mode, Some(AlarmMode::Away));
    }

    #[tokio::test]
    async fn test_commands_fail_cleanly_when_disconnected() {
        let opener = SimulatedOpener::new();
        let hub = Hub::new(config(), opener);
        assert!(matches!(
            hub.set_mode(AlarmMode::Away).await,
            Err(HubError::NotConnected)
        ));
        assert!(!hub.status().await.connected);
    }

    #[tokio::test]
    async fn test_poll_failure_then_recovery() {
        let (opener, sim) = seeded();
        let hub = Hub::connect(config(), opener).await.unwrap();

        sim.set_offline(true);
        hub.poll_and_recover().await;
        assert!(!hub.connected().await);

        sim.set_offline(false);
        hub.poll_and_recover().await;
        assert!(hub.connected().await);
    }

    #[tokio::test]
    async fn test_disconnect_emits_event_once() {
        let (opener, _sim) = seeded();
        let hub = Hub::connect(config(), opener).await.unwrap();
        let mut rx = hub.subscribe();

        hub.disconnect().await;
        assert_eq!(rx.try_recv().unwrap(), HubEvent::Disconnected);
        assert!(!hub.connected().await);

        // A second disconnect finds no open session.
        hub.disconnect().await;
        assert!(rx.try_recv().is_err());
    }
}
