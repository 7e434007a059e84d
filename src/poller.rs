// MIT License - Copyright (c) 2026 agshub contributors

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::event::{EventSender, HubEvent};
use crate::link::{DeviceLink, SharedLink};
use crate::points::{PointMap, PointValue, describe_point};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Periodic snapshot poller.
///
/// Level-triggered: it only sees differences between consecutive snapshots,
/// so a value that changes and changes back between polls is missed. Callers
/// needing edge-triggered detection use the async event listener instead.
pub struct StatusPoller<L> {
    link: SharedLink<L>,
    baseline: Mutex<PointMap>,
    events: EventSender,
}

impl<L: DeviceLink> StatusPoller<L> {
    pub fn new(link: SharedLink<L>, events: EventSender) -> Self {
        Self {
            link,
            baseline: Mutex::new(PointMap::new()),
            events,
        }
    }

    /// Replace the baseline snapshot without emitting events (used after a
    /// (re)connect, with the initial query result).
    pub fn reset_baseline(&self, snapshot: PointMap) {
        *lock(&self.baseline) = snapshot;
    }

    /// Poll the hub once, emitting a change event for every point present in
    /// both the previous and the new snapshot with a different value.
    ///
    /// The baseline is replaced unconditionally on success, even when no
    /// changes were found. On error the baseline is left untouched so the
    /// next poll diffs against the same state.
    pub async fn poll_once(&self) -> Result<PointMap> {
        let current = self.link.query().await?;

        let changes: Vec<(String, PointValue, PointValue)> = {
            let mut baseline = lock(&self.baseline);
            let changes = current
                .iter()
                .filter_map(|(key, new)| {
                    baseline
                        .get(key)
                        .filter(|old| *old != new)
                        .map(|old| (key.clone(), new.clone(), old.clone()))
                })
                .collect();
            *baseline = current.clone();
            changes
        };

        for (point, new, old) in changes {
            debug!("point change: {} (was {old})", describe_point(&point, &new));
            let _ = self.events.send(HubEvent::PointChanged { point, new, old });
        }

        Ok(current)
    }

    /// Blocking convenience loop: poll at a fixed interval until the task is
    /// dropped. Poll failures are logged and do not stop the loop; session
    /// recovery belongs to the caller driving reconnection.
    pub async fn poll_loop(&self, interval: Duration) {
        info!("polling hub every {:.1}s", interval.as_secs_f64());
        loop {
            if let Err(e) = self.poll_once().await {
                warn!("poll failed: {e}");
            }
            sleep(interval).await;
        }
    }
}
