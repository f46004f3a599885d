//! Rest countdown between sets.
//!
//! The timer is anchored to the wall clock: `remaining` is always
//! recomputed as `total - (now - started_at)`, so ticks only drive UI
//! refreshes and a suspended process picks up exactly where real time is.

use crate::clock::TickHandle;
use crate::services::{RestAnchor, Services};
use chrono::{DateTime, Duration, Utc};

/// Identifier of the one-shot "rest is over" notification
pub const REST_NOTIFICATION_ID: &str = "repset.rest-timer";

/// Result of delivering a tick to the rest timer
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RestTick {
    /// The tick does not belong to the running timer
    Stale,
    Running { remaining_seconds: u32 },
    Finished,
}

/// Result of restoring the timer after suspension
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RestRestore {
    /// No rest timer was persisted
    Idle,
    Resumed { remaining_seconds: u32 },
    /// The rest ran out while suspended
    Expired,
}

#[derive(Clone, Debug)]
struct ActiveRest {
    started_at: DateTime<Utc>,
    total_seconds: u32,
    remaining_seconds: u32,
    handle: Option<TickHandle>,
}

/// Countdown state for the rest interval between sets
#[derive(Clone, Debug, Default)]
pub struct RestTimer {
    active: Option<ActiveRest>,
}

impl RestTimer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    pub fn remaining_seconds(&self) -> u32 {
        self.active.as_ref().map_or(0, |a| a.remaining_seconds)
    }

    pub fn total_seconds(&self) -> u32 {
        self.active.as_ref().map_or(0, |a| a.total_seconds)
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.active.as_ref().map(|a| a.started_at)
    }

    pub fn handle(&self) -> Option<TickHandle> {
        self.active.as_ref().and_then(|a| a.handle)
    }

    /// Start a new countdown, replacing any running one
    pub fn start(&mut self, seconds: u32, label: &str, services: &mut Services) {
        self.stop(services);

        let now = services.now();
        let handle = services.ticker.schedule_repeating(1);

        if let Some(notifications) = services.notifications.as_mut() {
            let body = format!("Rest over - time for {}", label);
            if let Err(e) = notifications.schedule_one_shot(seconds, REST_NOTIFICATION_ID, &body) {
                tracing::warn!("Failed to schedule rest notification: {}", e);
            }
        }
        start_countdown(services, now + Duration::seconds(seconds as i64), label);

        self.active = Some(ActiveRest {
            started_at: now,
            total_seconds: seconds,
            remaining_seconds: seconds,
            handle: Some(handle),
        });
        tracing::info!("Rest timer started: {}s", seconds);
    }

    /// Apply one tick; ticks from cancelled sources are ignored
    pub fn tick(&mut self, handle: TickHandle, services: &mut Services) -> RestTick {
        let now = services.now();
        let Some(active) = self.active.as_mut() else {
            return RestTick::Stale;
        };
        if active.handle != Some(handle) {
            return RestTick::Stale;
        }

        let remaining = remaining_at(active.started_at, active.total_seconds, now);
        active.remaining_seconds = remaining;

        if remaining == 0 {
            self.stop(services);
            tracing::info!("Rest timer finished");
            RestTick::Finished
        } else {
            RestTick::Running {
                remaining_seconds: remaining,
            }
        }
    }

    /// Cancel the countdown and everything attached to it
    ///
    /// Returns whether a timer was running.
    pub fn stop(&mut self, services: &mut Services) -> bool {
        let Some(active) = self.active.take() else {
            return false;
        };

        if let Some(handle) = active.handle {
            services.ticker.cancel(handle);
        }
        teardown(services);
        tracing::debug!("Rest timer stopped");
        true
    }

    /// Persist the anchor and drop the tick source before suspension
    pub fn suspend(&mut self, services: &mut Services) {
        let Some(active) = self.active.as_mut() else {
            return;
        };

        let anchor = RestAnchor {
            started_at: active.started_at,
            duration_seconds: active.total_seconds,
        };
        if let Err(e) = services.anchors.write_rest(anchor) {
            tracing::warn!("Failed to persist rest timer anchor: {}", e);
        }
        if let Some(handle) = active.handle.take() {
            services.ticker.cancel(handle);
        }
    }

    /// Recompute the countdown from the persisted anchor
    pub fn restore(&mut self, label: &str, services: &mut Services) -> RestRestore {
        let anchor = match services.anchors.read() {
            Ok(anchors) => anchors.rest,
            Err(e) => {
                tracing::warn!("Failed to read rest timer anchor: {}", e);
                None
            }
        };
        // A failed write on suspend leaves only the in-memory countdown
        let anchor = anchor.or_else(|| {
            self.active.as_ref().map(|active| RestAnchor {
                started_at: active.started_at,
                duration_seconds: active.total_seconds,
            })
        });
        let Some(anchor) = anchor else {
            return RestRestore::Idle;
        };

        let remaining = remaining_at(anchor.started_at, anchor.duration_seconds, services.now());
        if remaining == 0 {
            if !self.stop(services) {
                teardown(services);
            }
            tracing::info!("Rest timer expired while suspended");
            return RestRestore::Expired;
        }

        if let Some(handle) = self.handle() {
            services.ticker.cancel(handle);
        }
        let handle = services.ticker.schedule_repeating(1);
        start_countdown(
            services,
            anchor.started_at + Duration::seconds(anchor.duration_seconds as i64),
            label,
        );

        self.active = Some(ActiveRest {
            started_at: anchor.started_at,
            total_seconds: anchor.duration_seconds,
            remaining_seconds: remaining,
            handle: Some(handle),
        });
        tracing::info!("Rest timer resumed with {}s remaining", remaining);
        RestRestore::Resumed {
            remaining_seconds: remaining,
        }
    }
}

fn remaining_at(started_at: DateTime<Utc>, total_seconds: u32, now: DateTime<Utc>) -> u32 {
    let elapsed = (now - started_at).num_seconds().max(0);
    (total_seconds as i64 - elapsed).max(0) as u32
}

fn start_countdown(services: &mut Services, ends_at: DateTime<Utc>, label: &str) {
    if let Some(countdown) = services.countdown.as_mut() {
        if let Err(e) = countdown.start(ends_at, label) {
            tracing::warn!("Failed to start live countdown: {}", e);
        }
    }
}

fn teardown(services: &mut Services) {
    if let Some(notifications) = services.notifications.as_mut() {
        if let Err(e) = notifications.cancel(REST_NOTIFICATION_ID) {
            tracing::warn!("Failed to cancel rest notification: {}", e);
        }
    }
    if let Some(countdown) = services.countdown.as_mut() {
        if let Err(e) = countdown.end("Rest complete") {
            tracing::warn!("Failed to end live countdown: {}", e);
        }
    }
    if let Err(e) = services.anchors.clear_rest() {
        tracing::warn!("Failed to clear rest timer anchor: {}", e);
    }
}
