// MIT License - Copyright (c) 2026 agshub contributors

//! Monitor mode: a silent-tracking arm state where sensor trips are handled
//! automatically (siren silenced, zones re-armed) instead of waiting for a
//! human. Also owns the zone suspension timer.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::config::RearmTimings;
use crate::error::{HubError, Result};
use crate::event::{EventSender, HubEvent, MonitorEventKind, SensorEvent};
use crate::link::{DeviceLink, SharedLink};
use crate::points::{self, AlarmMode, PointValue, VolumeLevel};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Externally visible monitor state.
///
/// `Rearming` is transient: entered only from `Active`/`ActiveMuted` and
/// always returning to one of those (or `Inactive` if stopped concurrently).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    Inactive,
    Active,
    ActiveMuted,
    Rearming,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Inactive,
    Active,
    ActiveMuted,
}

/// The controller's entire mutable state. Fully initialized by the
/// constructor; there is no "initialized yet" distinction.
#[derive(Debug)]
struct MonitorInner {
    phase: Phase,
    silent_rearm: bool,
    rearming: bool,
    saved_volume: Option<PointValue>,
    suspend_gen: u64,
    suspension: Option<u64>,
    suspended_until: Option<DateTime<Utc>>,
    last_mode: Option<AlarmMode>,
    last_sensor: Option<SensorEvent>,
}

impl MonitorInner {
    fn new() -> Self {
        Self {
            phase: Phase::Inactive,
            silent_rearm: true,
            rearming: false,
            saved_volume: None,
            suspend_gen: 0,
            suspension: None,
            suspended_until: None,
            last_mode: None,
            last_sensor: None,
        }
    }
}

/// Point-in-time view of the controller, for the status accessor.
#[derive(Debug, Clone)]
pub struct MonitorOverview {
    pub state: MonitorState,
    pub mode: Option<AlarmMode>,
    pub suspended_until: Option<DateTime<Utc>>,
    pub last_sensor: Option<SensorEvent>,
}

/// Clears the rearming flag on every exit path of the re-arm task,
/// including panics.
struct RearmGuard<'a>(&'a Mutex<MonitorInner>);

impl Drop for RearmGuard<'_> {
    fn drop(&mut self) {
        lock(self.0).rearming = false;
    }
}

/// The arm/disarm/monitor state machine.
///
/// State transitions hold the state lock briefly and never across a device
/// write; every should-I-still-proceed check inside the re-arm sequence
/// re-acquires the lock rather than trusting a value captured before a
/// delay. Device writes are best-effort: failures are logged and the
/// sequence continues.
pub struct MonitorController<L> {
    link: SharedLink<L>,
    events: EventSender,
    timings: RearmTimings,
    inner: Mutex<MonitorInner>,
}

impl<L: DeviceLink> MonitorController<L> {
    pub fn new(link: SharedLink<L>, events: EventSender, timings: RearmTimings) -> Self {
        Self {
            link,
            events,
            timings,
            inner: Mutex::new(MonitorInner::new()),
        }
    }

    pub fn state(&self) -> MonitorState {
        let inner = lock(&self.inner);
        if inner.rearming {
            return MonitorState::Rearming;
        }
        match inner.phase {
            Phase::Inactive => MonitorState::Inactive,
            Phase::Active => MonitorState::Active,
            Phase::ActiveMuted => MonitorState::ActiveMuted,
        }
    }

    pub fn is_active(&self) -> bool {
        lock(&self.inner).phase != Phase::Inactive
    }

    pub fn overview(&self) -> MonitorOverview {
        let state = self.state();
        let inner = lock(&self.inner);
        MonitorOverview {
            state,
            mode: inner.last_mode,
            suspended_until: inner.suspended_until,
            last_sensor: inner.last_sensor.clone(),
        }
    }

    /// Record the hub's authoritative mode (from a poll, a push, or an
    /// issued command). Local cache only.
    pub(crate) fn note_mode(&self, mode: AlarmMode) {
        lock(&self.inner).last_mode = Some(mode);
    }

    pub(crate) fn note_sensor(&self, sensor: SensorEvent) {
        lock(&self.inner).last_sensor = Some(sensor);
    }

    /// Enter monitor mode: arm to HOME so sensors are active, then handle
    /// trips automatically. No-op if already active.
    ///
    /// With `muted`, the current volume is snapshotted and the hub muted
    /// until [`stop`](Self::stop) restores it. With `silent_rearm`, trips
    /// are re-armed through direct point writes (no beeps); otherwise a
    /// full disarm/re-arm cycle is used (audible, and resets more hub-side
    /// state; useful for daytime awareness).
    pub async fn start(&self, muted: bool, silent_rearm: bool) {
        {
            let mut inner = lock(&self.inner);
            if inner.phase != Phase::Inactive {
                warn!("monitor mode already active");
                return;
            }
            inner.phase = if muted { Phase::ActiveMuted } else { Phase::Active };
            inner.silent_rearm = silent_rearm;
        }

        if muted {
            match self.link.query().await {
                Ok(snapshot) => {
                    lock(&self.inner).saved_volume = snapshot.get(points::VOLUME).cloned();
                }
                Err(e) => warn!("could not read current volume: {e}"),
            }
            self.write_point(points::VOLUME, PointValue::from(VolumeLevel::Mute.as_wire()))
                .await;
            info!("monitor: volume muted");
            self.notify(MonitorEventKind::Info, "Volume muted");
        }

        self.write_mode(AlarmMode::Home).await;
        let label = if muted { "Monitor mode (muted)" } else { "Monitor mode" };
        info!("{label} started (hub set to HOME)");
        self.notify(MonitorEventKind::Info, format!("{label} started"));
    }

    /// Exit monitor mode and disarm the hub. No-op if already inactive.
    pub async fn stop(&self) {
        let saved = {
            let mut inner = lock(&self.inner);
            if inner.phase == Phase::Inactive {
                return;
            }
            inner.phase = Phase::Inactive;
            inner.suspension = None;
            inner.suspended_until = None;
            // Taken exactly once: a second stop finds None and is a true no-op.
            inner.saved_volume.take()
        };

        if let Some(volume) = saved {
            self.write_point(points::VOLUME, volume.clone()).await;
            info!("monitor: volume restored to {volume}");
            self.notify(MonitorEventKind::Info, "Volume restored");
        }

        self.write_mode(AlarmMode::Disarmed).await;
        info!("monitor mode stopped (hub disarmed)");
        self.notify(MonitorEventKind::Info, "Monitor mode stopped");
    }

    /// Start the re-arm sequence in a background task, exactly once per
    /// trigger window.
    ///
    /// Returns `None` when the trigger is ignored: monitor inactive, or a
    /// sequence already in flight. Second triggers are dropped, not queued:
    /// queuing would turn a false-trigger storm into an alternating flood of
    /// partial re-arms.
    pub(crate) fn begin_rearm(self: Arc<Self>) -> Option<JoinHandle<()>> {
        let silent = {
            let mut inner = lock(&self.inner);
            if inner.phase == Phase::Inactive {
                debug!("trigger ignored: monitor inactive");
                return None;
            }
            if inner.rearming {
                debug!("trigger ignored: re-arm already in flight");
                return None;
            }
            inner.rearming = true;
            inner.silent_rearm
        };

        Some(tokio::spawn(async move {
            let _guard = RearmGuard(&self.inner);
            self.run_rearm(silent).await;
        }))
    }

    async fn run_rearm(&self, silent: bool) {
        info!("monitor: silencing siren...");
        self.write_point(points::SIREN, PointValue::Bool(false)).await;
        self.notify(MonitorEventKind::Silenced, "Siren silenced");

        // Debounce against the same physical event re-triggering mid-sequence.
        sleep(self.timings.siren_settle()).await;

        if silent {
            info!("monitor: clearing trigger (silent)...");
            self.write_point(points::ALARM_TRIGGERED, PointValue::Bool(false))
                .await;
            sleep(self.timings.clear_settle()).await;

            if !self.still_armed() {
                info!("monitor: stopped mid-sequence, leaving zones as-is");
                return;
            }
            info!("monitor: re-enabling zones...");
            self.write_point(points::ZONE_1_ENABLED, PointValue::Bool(true))
                .await;
            sleep(self.timings.zone_gap()).await;

            if !self.still_armed() {
                info!("monitor: stopped mid-sequence, leaving zone 2 as-is");
                return;
            }
            self.write_point(points::ZONE_2_ENABLED, PointValue::Bool(true))
                .await;
            self.notify(MonitorEventKind::Rearmed, "Re-armed (silent)");
            info!("monitor: re-arm complete (silent)");
        } else {
            info!("monitor: normal disarm/re-arm cycle...");
            self.write_mode(AlarmMode::Disarmed).await;
            sleep(self.timings.cycle_gap()).await;

            if !self.still_armed() {
                info!("monitor: stopped mid-sequence, staying disarmed");
                return;
            }
            self.write_mode(AlarmMode::Home).await;
            self.notify(MonitorEventKind::Rearmed, "Re-armed");
            info!("monitor: re-arm complete (normal)");
        }
    }

    fn still_armed(&self) -> bool {
        lock(&self.inner).phase != Phase::Inactive
    }

    /// Disable both zones for a bounded window without any mode change (the
    /// hub stays silent), scheduling an automatic resume.
    ///
    /// Returns a generation token. A newer suspension or a cancellation
    /// invalidates the token, turning the scheduled resume into a no-op.
    pub async fn suspend_zones(self: Arc<Self>, duration: Duration) -> Result<u64> {
        let token = {
            let mut inner = lock(&self.inner);
            if inner.phase == Phase::Inactive {
                return Err(HubError::MonitorInactive);
            }
            inner.suspend_gen += 1;
            let token = inner.suspend_gen;
            inner.suspension = Some(token);
            inner.suspended_until = chrono::Duration::from_std(duration)
                .ok()
                .and_then(|d| Utc::now().checked_add_signed(d));
            token
        };

        info!("monitor: suspending zones for {}s", duration.as_secs());
        self.write_point(points::ZONE_1_ENABLED, PointValue::Bool(false))
            .await;
        self.write_point(points::ZONE_2_ENABLED, PointValue::Bool(false))
            .await;
        self.notify(
            MonitorEventKind::Info,
            format!("Zones suspended for {}s", duration.as_secs()),
        );

        let this = Arc::clone(&self);
        tokio::spawn(async move {
            sleep(duration).await;
            this.finish_suspension(token).await;
        });

        Ok(token)
    }

    /// Deferred resume: fires only when its token still stands and the
    /// monitor is still active; otherwise a silent no-op.
    async fn finish_suspension(&self, token: u64) {
        {
            let mut inner = lock(&self.inner);
            if inner.suspension != Some(token) {
                debug!("suspension resume superseded, ignoring");
                return;
            }
            if inner.phase == Phase::Inactive {
                debug!("suspension resume after monitor stop, ignoring");
                return;
            }
            inner.suspension = None;
            inner.suspended_until = None;
        }
        info!("monitor: suspension window elapsed, re-enabling zones");
        self.enable_zones().await;
        self.notify(MonitorEventKind::Info, "Zones resumed");
    }

    /// Cancel a standing suspension and resume zones immediately. Returns
    /// false when the token no longer stands (superseded or already done).
    pub async fn cancel_suspension(&self, token: u64) -> bool {
        {
            let mut inner = lock(&self.inner);
            if inner.suspension != Some(token) {
                return false;
            }
            inner.suspension = None;
            inner.suspended_until = None;
        }
        info!("monitor: suspension cancelled, re-enabling zones");
        self.enable_zones().await;
        self.notify(MonitorEventKind::Info, "Zone suspension cancelled");
        true
    }

    /// Re-enable both zones directly, defusing any pending resume.
    pub async fn resume_zones(&self) {
        {
            let mut inner = lock(&self.inner);
            inner.suspension = None;
            inner.suspended_until = None;
        }
        self.enable_zones().await;
        self.notify(MonitorEventKind::Info, "Zones resumed");
    }

    async fn enable_zones(&self) {
        self.write_point(points::ZONE_1_ENABLED, PointValue::Bool(true))
            .await;
        self.write_point(points::ZONE_2_ENABLED, PointValue::Bool(true))
            .await;
    }

    async fn write_point(&self, point: &str, value: PointValue) {
        if let Err(e) = self.link.write(point, value).await {
            warn!("write to point {point} failed: {e}");
        }
    }

    pub(crate) async fn write_mode(&self, mode: AlarmMode) {
        match self
            .link
            .write(points::ALARM_MODE, PointValue::from(mode.as_wire()))
            .await
        {
            Ok(()) => lock(&self.inner).last_mode = Some(mode),
            Err(e) => warn!("mode change to {mode} failed: {e}"),
        }
    }

    fn notify(&self, kind: MonitorEventKind, message: impl Into<String>) {
        let _ = self.events.send(HubEvent::Monitor {
            kind,
            message: message.into(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::event_channel;
    use crate::link::simulated::{SimulatedHub, SimulatedLink};
    use crate::points::{
        ALARM_MODE, ALARM_TRIGGERED, SIREN, VOLUME, ZONE_1_ENABLED, ZONE_2_ENABLED,
    };

    type Controller = Arc<MonitorController<SimulatedLink>>;

    async fn controller() -> (Controller, SimulatedHub) {
        let hub = SimulatedHub::new();
        hub.set_point(ALARM_MODE, PointValue::from("2"));
        hub.set_point(VOLUME, PointValue::from("5"));
        let link = SharedLink::new();
        link.install(hub.open_link()).await;
        let (tx, _rx) = event_channel(64);
        let ctl = Arc::new(MonitorController::new(link, tx, RearmTimings::default()));
        (ctl, hub)
    }

    async fn armed_controller(muted: bool, silent: bool) -> (Controller, SimulatedHub) {
        let (ctl, hub) = controller().await;
        ctl.start(muted, silent).await;
        hub.clear_writes();
        (ctl, hub)
    }

    fn writes_to(hub: &SimulatedHub, point: &str) -> Vec<PointValue> {
        hub.writes()
            .into_iter()
            .filter(|(p, _)| p == point)
            .map(|(_, v)| v)
            .collect()
    }

    #[tokio::test]
    async fn test_start_muted_then_stop_restores_volume_exactly_once() {
        let (ctl, hub) = controller().await;

        ctl.start(true, true).await;
        assert_eq!(ctl.state(), MonitorState::ActiveMuted);
        assert_eq!(
            hub.writes(),
            vec![
                (VOLUME.to_string(), PointValue::from("0")),
                (ALARM_MODE.to_string(), PointValue::from("3")),
            ]
        );

        hub.clear_writes();
        ctl.stop().await;
        assert_eq!(ctl.state(), MonitorState::Inactive);
        assert_eq!(
            hub.writes(),
            vec![
                (VOLUME.to_string(), PointValue::from("5")),
                (ALARM_MODE.to_string(), PointValue::from("2")),
            ]
        );

        // A second stop is a true no-op: no duplicate volume restore.
        hub.clear_writes();
        ctl.stop().await;
        assert!(hub.writes().is_empty());
    }

    #[tokio::test]
    async fn test_start_is_noop_when_already_active() {
        let (ctl, hub) = armed_controller(false, true).await;
        ctl.start(true, false).await;
        assert!(hub.writes().is_empty());
        assert_eq!(ctl.state(), MonitorState::Active);
    }

    #[tokio::test]
    async fn test_trigger_while_inactive_never_rearms() {
        let (ctl, hub) = controller().await;
        assert!(ctl.clone().begin_rearm().is_none());
        assert!(hub.writes().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_trigger_during_rearm_is_ignored() {
        let (ctl, hub) = armed_controller(false, true).await;

        let first = ctl.clone().begin_rearm().expect("first trigger starts a re-arm");
        assert_eq!(ctl.state(), MonitorState::Rearming);
        assert!(ctl.clone().begin_rearm().is_none());

        first.await.unwrap();
        assert_eq!(ctl.state(), MonitorState::Active);
        // Exactly one sequence ran.
        assert_eq!(writes_to(&hub, SIREN).len(), 1);
        assert_eq!(writes_to(&hub, ZONE_1_ENABLED).len(), 1);

        // After the guard is released a new trigger starts a new sequence.
        ctl.clone().begin_rearm().expect("guard released").await.unwrap();
        assert_eq!(writes_to(&hub, SIREN).len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_rearm_order_and_no_mode_writes() {
        let (ctl, hub) = armed_controller(false, true).await;

        ctl.clone().begin_rearm().unwrap().await.unwrap();

        assert_eq!(
            hub.writes(),
            vec![
                (SIREN.to_string(), PointValue::Bool(false)),
                (ALARM_TRIGGERED.to_string(), PointValue::Bool(false)),
                (ZONE_1_ENABLED.to_string(), PointValue::Bool(true)),
                (ZONE_2_ENABLED.to_string(), PointValue::Bool(true)),
            ]
        );
        assert!(writes_to(&hub, ALARM_MODE).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_audible_rearm_is_one_disarm_then_one_home() {
        let (ctl, hub) = armed_controller(false, false).await;

        ctl.clone().begin_rearm().unwrap().await.unwrap();

        assert_eq!(
            hub.writes(),
            vec![
                (SIREN.to_string(), PointValue::Bool(false)),
                (ALARM_MODE.to_string(), PointValue::from("2")),
                (ALARM_MODE.to_string(), PointValue::from("3")),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_mid_rearm_skips_final_zone_enable() {
        let (ctl, hub) = armed_controller(false, true).await;

        let rearm = ctl.clone().begin_rearm().unwrap();
        ctl.stop().await;
        rearm.await.unwrap();

        assert!(writes_to(&hub, ZONE_1_ENABLED).is_empty());
        assert!(writes_to(&hub, ZONE_2_ENABLED).is_empty());
        assert_eq!(ctl.state(), MonitorState::Inactive);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rearm_continues_past_failed_siren_write() {
        let (ctl, hub) = armed_controller(false, true).await;

        hub.fail_writes(true);
        let rearm = ctl.clone().begin_rearm().unwrap();
        // Let the silence write fail, then heal the device.
        tokio::task::yield_now().await;
        hub.fail_writes(false);
        rearm.await.unwrap();

        // The sequence still ran to completion and the guard was released.
        assert_eq!(writes_to(&hub, ZONE_2_ENABLED), vec![PointValue::Bool(true)]);
        assert_eq!(ctl.state(), MonitorState::Active);
    }

    #[tokio::test(start_paused = true)]
    async fn test_newer_suspension_supersedes_older_resume() {
        let (ctl, hub) = armed_controller(false, true).await;

        let first = ctl.clone().suspend_zones(Duration::from_secs(600)).await.unwrap();
        sleep(Duration::from_secs(100)).await;
        let second = ctl.clone().suspend_zones(Duration::from_secs(600)).await.unwrap();
        assert_ne!(first, second);

        // t=600: first window's resume fires and must be a no-op.
        sleep(Duration::from_secs(550)).await;
        assert!(writes_to(&hub, ZONE_1_ENABLED).is_empty());

        // t=700: second window's resume re-enables the zones, once.
        sleep(Duration::from_secs(100)).await;
        assert_eq!(writes_to(&hub, ZONE_1_ENABLED), vec![PointValue::Bool(true)]);
        assert_eq!(writes_to(&hub, ZONE_2_ENABLED), vec![PointValue::Bool(true)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_resumes_immediately_and_defuses_timer() {
        let (ctl, hub) = armed_controller(false, true).await;

        let token = ctl.clone().suspend_zones(Duration::from_secs(600)).await.unwrap();
        assert!(ctl.cancel_suspension(token).await);
        assert_eq!(writes_to(&hub, ZONE_1_ENABLED), vec![PointValue::Bool(true)]);

        // A second cancel finds no standing window.
        assert!(!ctl.cancel_suspension(token).await);

        // The original timer fires into a dead token: no extra writes.
        sleep(Duration::from_secs(700)).await;
        assert_eq!(writes_to(&hub, ZONE_1_ENABLED), vec![PointValue::Bool(true)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_defuses_pending_resume() {
        let (ctl, hub) = armed_controller(false, true).await;

        ctl.clone().suspend_zones(Duration::from_secs(600)).await.unwrap();
        ctl.stop().await;
        hub.clear_writes();

        sleep(Duration::from_secs(700)).await;
        assert!(hub.writes().is_empty());
    }

    #[tokio::test]
    async fn test_suspend_requires_active_monitor() {
        let (ctl, _hub) = controller().await;
        assert!(matches!(
            ctl.clone().suspend_zones(Duration::from_secs(60)).await,
            Err(HubError::MonitorInactive)
        ));
    }

    #[tokio::test]
    async fn test_overview_reflects_mode_cache_and_sensor() {
        let (ctl, _hub) = controller().await;
        ctl.note_mode(AlarmMode::Disarmed);
        ctl.note_sensor(SensorEvent {
            name: "Front Door".into(),
            at: Utc::now(),
        });

        let overview = ctl.overview();
        assert_eq!(overview.state, MonitorState::Inactive);
        assert_eq!(overview.mode, Some(AlarmMode::Disarmed));
        assert_eq!(overview.last_sensor.unwrap().name, "Front Door");
        assert!(overview.suspended_until.is_none());
    }
}
