//! Collaborator interfaces the session engine talks through.
//!
//! Every external concern (durable store, health tracking, notifications,
//! lock-screen countdown, timer anchors, wrist-device channel) is a narrow
//! trait. The controller receives them explicitly through [`Services`].
//!
//! The in-memory implementations here are clonable handles over shared
//! state so a test can keep one clone for inspection. The engine is confined
//! to one thread, hence `Rc<RefCell<_>>`.

use crate::clock::{Clock, ManualTicker, SystemClock, Ticker};
use crate::watch::WatchMessage;
use crate::{Error, Exercise, Result, Routine, WorkoutSession};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};
use std::rc::Rc;
use uuid::Uuid;

// ============================================================================
// Traits
// ============================================================================

/// Durable store for the plan tree and workout sessions
pub trait Store {
    fn save_exercise(&mut self, exercise: &Exercise) -> Result<()>;
    fn delete_exercise(&mut self, id: Uuid) -> Result<()>;
    /// All exercises ordered by name
    fn exercises(&self) -> Result<Vec<Exercise>>;

    fn save_routine(&mut self, routine: &Routine) -> Result<()>;
    /// Deleting a routine deletes its routine exercises and planned sets
    fn delete_routine(&mut self, id: Uuid) -> Result<()>;
    fn routines(&self) -> Result<Vec<Routine>>;

    /// Insert or replace a session (in progress or finished)
    fn save_session(&mut self, session: &WorkoutSession) -> Result<()>;
    fn delete_session(&mut self, id: Uuid) -> Result<()>;
    /// All sessions ordered by start time, newest first
    fn sessions(&self) -> Result<Vec<WorkoutSession>>;

    fn routine(&self, id: Uuid) -> Result<Option<Routine>> {
        Ok(self.routines()?.into_iter().find(|r| r.id == id))
    }

    fn exercise(&self, id: Uuid) -> Result<Option<Exercise>> {
        Ok(self.exercises()?.into_iter().find(|e| e.id == id))
    }
}

/// External health-tracking service (all calls best-effort)
pub trait HealthService {
    fn start_session(&mut self) -> Result<()>;
    /// Returns the external record id on success
    fn end_session(&mut self, energy_kcal: f64, metadata: &BTreeMap<String, String>) -> Result<String>;
    fn discard_session(&mut self) -> Result<()>;
    fn estimate_energy(&self, duration_seconds: i64) -> f64;
}

/// Local one-shot notification scheduler
pub trait NotificationScheduler {
    fn schedule_one_shot(&mut self, after_seconds: u32, identifier: &str, body: &str) -> Result<()>;
    fn cancel(&mut self, identifier: &str) -> Result<()>;
}

/// Lock-screen style live countdown surface
pub trait CountdownSurface {
    fn start(&mut self, ends_at: DateTime<Utc>, label: &str) -> Result<()>;
    fn end(&mut self, final_message: &str) -> Result<()>;
}

/// Rest timer anchor written on suspend
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct RestAnchor {
    pub started_at: DateTime<Utc>,
    pub duration_seconds: u32,
}

/// Everything needed to recompute timers after suspension
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TimerAnchors {
    pub workout_started_at: Option<DateTime<Utc>>,
    pub rest: Option<RestAnchor>,
}

/// Durable key/value storage for timer anchors
pub trait AnchorStore {
    fn read(&self) -> Result<TimerAnchors>;
    fn write_workout_start(&mut self, at: DateTime<Utc>) -> Result<()>;
    fn write_rest(&mut self, anchor: RestAnchor) -> Result<()>;
    fn clear_workout_start(&mut self) -> Result<()>;
    fn clear_rest(&mut self) -> Result<()>;
}

/// Message channel to the wrist device
///
/// `send_fast` only works while the counterpart is reachable;
/// `send_guaranteed` queues for delivery whenever it next wakes up.
pub trait WatchChannel {
    fn is_reachable(&self) -> bool;
    fn send_fast(&mut self, message: &WatchMessage) -> Result<()>;
    fn send_guaranteed(&mut self, message: &WatchMessage) -> Result<()>;
    /// Messages that arrived since the last call
    fn drain_incoming(&mut self) -> Vec<WatchMessage>;
}

// ============================================================================
// Bundle
// ============================================================================

/// The collaborators a `SessionController` works with
///
/// Integrations are optional: a missing one is simply not called.
pub struct Services {
    pub clock: Box<dyn Clock>,
    pub ticker: Box<dyn Ticker>,
    pub store: Box<dyn Store>,
    pub anchors: Box<dyn AnchorStore>,
    pub health: Option<Box<dyn HealthService>>,
    pub notifications: Option<Box<dyn NotificationScheduler>>,
    pub countdown: Option<Box<dyn CountdownSurface>>,
}

impl Services {
    /// System clock, manual ticker, no integrations
    pub fn new(store: Box<dyn Store>, anchors: Box<dyn AnchorStore>) -> Self {
        Self {
            clock: Box::new(SystemClock),
            ticker: Box::new(ManualTicker::new()),
            store,
            anchors,
            health: None,
            notifications: None,
            countdown: None,
        }
    }

    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    pub fn with_ticker(mut self, ticker: impl Ticker + 'static) -> Self {
        self.ticker = Box::new(ticker);
        self
    }

    pub fn with_health(mut self, health: impl HealthService + 'static) -> Self {
        self.health = Some(Box::new(health));
        self
    }

    pub fn with_notifications(mut self, notifications: impl NotificationScheduler + 'static) -> Self {
        self.notifications = Some(Box::new(notifications));
        self
    }

    pub fn with_countdown(mut self, countdown: impl CountdownSurface + 'static) -> Self {
        self.countdown = Some(Box::new(countdown));
        self
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }
}

// ============================================================================
// In-memory implementations
// ============================================================================

/// In-memory store
#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    inner: Rc<RefCell<MemoryStoreState>>,
}

#[derive(Debug, Default)]
struct MemoryStoreState {
    exercises: Vec<Exercise>,
    routines: Vec<Routine>,
    sessions: Vec<WorkoutSession>,
    reject_writes: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail (reads keep working)
    pub fn set_reject_writes(&self, reject: bool) {
        self.inner.borrow_mut().reject_writes = reject;
    }

    fn check_writable(&self) -> Result<()> {
        if self.inner.borrow().reject_writes {
            Err(Error::Persistence("store rejected write".into()))
        } else {
            Ok(())
        }
    }
}

fn upsert<T: Clone>(items: &mut Vec<T>, item: &T, same: impl Fn(&T) -> bool) {
    match items.iter_mut().find(|existing| same(existing)) {
        Some(existing) => *existing = item.clone(),
        None => items.push(item.clone()),
    }
}

impl Store for MemoryStore {
    fn save_exercise(&mut self, exercise: &Exercise) -> Result<()> {
        self.check_writable()?;
        upsert(&mut self.inner.borrow_mut().exercises, exercise, |e| e.id == exercise.id);
        Ok(())
    }

    fn delete_exercise(&mut self, id: Uuid) -> Result<()> {
        self.check_writable()?;
        self.inner.borrow_mut().exercises.retain(|e| e.id != id);
        Ok(())
    }

    fn exercises(&self) -> Result<Vec<Exercise>> {
        let mut exercises = self.inner.borrow().exercises.clone();
        exercises.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
        Ok(exercises)
    }

    fn save_routine(&mut self, routine: &Routine) -> Result<()> {
        self.check_writable()?;
        upsert(&mut self.inner.borrow_mut().routines, routine, |r| r.id == routine.id);
        Ok(())
    }

    fn delete_routine(&mut self, id: Uuid) -> Result<()> {
        self.check_writable()?;
        self.inner.borrow_mut().routines.retain(|r| r.id != id);
        Ok(())
    }

    fn routines(&self) -> Result<Vec<Routine>> {
        Ok(self.inner.borrow().routines.clone())
    }

    fn save_session(&mut self, session: &WorkoutSession) -> Result<()> {
        self.check_writable()?;
        upsert(&mut self.inner.borrow_mut().sessions, session, |s| s.id == session.id);
        Ok(())
    }

    fn delete_session(&mut self, id: Uuid) -> Result<()> {
        self.check_writable()?;
        self.inner.borrow_mut().sessions.retain(|s| s.id != id);
        Ok(())
    }

    fn sessions(&self) -> Result<Vec<WorkoutSession>> {
        let mut sessions = self.inner.borrow().sessions.clone();
        sessions.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        Ok(sessions)
    }
}

/// Health service fake that records calls
#[derive(Clone, Debug, Default)]
pub struct MemoryHealth {
    inner: Rc<RefCell<MemoryHealthState>>,
}

#[derive(Debug, Default)]
struct MemoryHealthState {
    fail: bool,
    started: usize,
    discarded: usize,
    ended: Vec<(f64, BTreeMap<String, String>)>,
}

impl MemoryHealth {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an unauthorized / unavailable service
    pub fn set_failing(&self, fail: bool) {
        self.inner.borrow_mut().fail = fail;
    }

    pub fn started(&self) -> usize {
        self.inner.borrow().started
    }

    pub fn discarded(&self) -> usize {
        self.inner.borrow().discarded
    }

    pub fn ended(&self) -> Vec<(f64, BTreeMap<String, String>)> {
        self.inner.borrow().ended.clone()
    }

    fn check(&self) -> Result<()> {
        if self.inner.borrow().fail {
            Err(Error::Integration("health tracking not authorized".into()))
        } else {
            Ok(())
        }
    }
}

impl HealthService for MemoryHealth {
    fn start_session(&mut self) -> Result<()> {
        self.check()?;
        self.inner.borrow_mut().started += 1;
        Ok(())
    }

    fn end_session(&mut self, energy_kcal: f64, metadata: &BTreeMap<String, String>) -> Result<String> {
        self.check()?;
        self.inner
            .borrow_mut()
            .ended
            .push((energy_kcal, metadata.clone()));
        Ok(format!("health-{}", Uuid::new_v4()))
    }

    fn discard_session(&mut self) -> Result<()> {
        self.check()?;
        self.inner.borrow_mut().discarded += 1;
        Ok(())
    }

    fn estimate_energy(&self, duration_seconds: i64) -> f64 {
        // Flat 6 kcal/min
        duration_seconds.max(0) as f64 / 10.0
    }
}

/// Notification scheduler fake
#[derive(Clone, Debug, Default)]
pub struct MemoryNotifications {
    inner: Rc<RefCell<MemoryNotificationsState>>,
}

#[derive(Debug, Default)]
struct MemoryNotificationsState {
    fail: bool,
    pending: BTreeMap<String, (u32, String)>,
    scheduled_total: usize,
}

impl MemoryNotifications {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, fail: bool) {
        self.inner.borrow_mut().fail = fail;
    }

    /// Delay of a pending notification
    pub fn pending(&self, identifier: &str) -> Option<u32> {
        self.inner.borrow().pending.get(identifier).map(|(after, _)| *after)
    }

    pub fn scheduled_total(&self) -> usize {
        self.inner.borrow().scheduled_total
    }
}

impl NotificationScheduler for MemoryNotifications {
    fn schedule_one_shot(&mut self, after_seconds: u32, identifier: &str, body: &str) -> Result<()> {
        let mut state = self.inner.borrow_mut();
        if state.fail {
            return Err(Error::Integration("notifications not permitted".into()));
        }
        state
            .pending
            .insert(identifier.to_string(), (after_seconds, body.to_string()));
        state.scheduled_total += 1;
        Ok(())
    }

    fn cancel(&mut self, identifier: &str) -> Result<()> {
        self.inner.borrow_mut().pending.remove(identifier);
        Ok(())
    }
}

/// Countdown surface fake
#[derive(Clone, Debug, Default)]
pub struct MemoryCountdown {
    inner: Rc<RefCell<MemoryCountdownState>>,
}

#[derive(Debug, Default)]
struct MemoryCountdownState {
    active: Option<(DateTime<Utc>, String)>,
    last_message: Option<String>,
}

impl MemoryCountdown {
    pub fn new() -> Self {
        Self::default()
    }

    /// End instant and label of the countdown currently shown
    pub fn active(&self) -> Option<(DateTime<Utc>, String)> {
        self.inner.borrow().active.clone()
    }

    pub fn last_message(&self) -> Option<String> {
        self.inner.borrow().last_message.clone()
    }
}

impl CountdownSurface for MemoryCountdown {
    fn start(&mut self, ends_at: DateTime<Utc>, label: &str) -> Result<()> {
        self.inner.borrow_mut().active = Some((ends_at, label.to_string()));
        Ok(())
    }

    fn end(&mut self, final_message: &str) -> Result<()> {
        let mut state = self.inner.borrow_mut();
        state.active = None;
        state.last_message = Some(final_message.to_string());
        Ok(())
    }
}

/// Anchor store fake
#[derive(Clone, Debug, Default)]
pub struct MemoryAnchors {
    inner: Rc<RefCell<AnchorState>>,
}

#[derive(Debug, Default)]
struct AnchorState {
    anchors: TimerAnchors,
    reject_writes: bool,
}

impl MemoryAnchors {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail (reads keep working)
    pub fn set_reject_writes(&self, reject: bool) {
        self.inner.borrow_mut().reject_writes = reject;
    }

    fn update(&mut self, f: impl FnOnce(&mut TimerAnchors)) -> Result<()> {
        let mut state = self.inner.borrow_mut();
        if state.reject_writes {
            return Err(Error::Persistence("anchor store rejected write".into()));
        }
        f(&mut state.anchors);
        Ok(())
    }
}

impl AnchorStore for MemoryAnchors {
    fn read(&self) -> Result<TimerAnchors> {
        Ok(self.inner.borrow().anchors.clone())
    }

    fn write_workout_start(&mut self, at: DateTime<Utc>) -> Result<()> {
        self.update(|a| a.workout_started_at = Some(at))
    }

    fn write_rest(&mut self, anchor: RestAnchor) -> Result<()> {
        self.update(|a| a.rest = Some(anchor))
    }

    fn clear_workout_start(&mut self) -> Result<()> {
        self.update(|a| a.workout_started_at = None)
    }

    fn clear_rest(&mut self) -> Result<()> {
        self.update(|a| a.rest = None)
    }
}

/// One end of an in-memory phone/watch link
#[derive(Clone, Debug)]
pub struct MemoryWatchChannel {
    link: Rc<RefCell<WatchLink>>,
    is_phone: bool,
}

#[derive(Debug, Default)]
struct WatchLink {
    reachable: bool,
    to_phone: VecDeque<WatchMessage>,
    to_watch: VecDeque<WatchMessage>,
    fast_sent: usize,
    guaranteed_sent: usize,
}

impl MemoryWatchChannel {
    /// Create connected (phone, watch) ends; the link starts reachable
    pub fn pair() -> (Self, Self) {
        let link = Rc::new(RefCell::new(WatchLink {
            reachable: true,
            ..WatchLink::default()
        }));
        (
            Self {
                link: Rc::clone(&link),
                is_phone: true,
            },
            Self {
                link,
                is_phone: false,
            },
        )
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.link.borrow_mut().reachable = reachable;
    }

    /// (fast, guaranteed) message counts sent over this link
    pub fn sent_counts(&self) -> (usize, usize) {
        let link = self.link.borrow();
        (link.fast_sent, link.guaranteed_sent)
    }

    fn enqueue(&self, message: &WatchMessage) {
        let mut link = self.link.borrow_mut();
        if self.is_phone {
            link.to_watch.push_back(message.clone());
        } else {
            link.to_phone.push_back(message.clone());
        }
    }
}

impl WatchChannel for MemoryWatchChannel {
    fn is_reachable(&self) -> bool {
        self.link.borrow().reachable
    }

    fn send_fast(&mut self, message: &WatchMessage) -> Result<()> {
        if !self.is_reachable() {
            return Err(Error::Channel("counterpart not reachable".into()));
        }
        self.enqueue(message);
        self.link.borrow_mut().fast_sent += 1;
        Ok(())
    }

    fn send_guaranteed(&mut self, message: &WatchMessage) -> Result<()> {
        self.enqueue(message);
        self.link.borrow_mut().guaranteed_sent += 1;
        Ok(())
    }

    fn drain_incoming(&mut self) -> Vec<WatchMessage> {
        let mut link = self.link.borrow_mut();
        let queue = if self.is_phone {
            &mut link.to_phone
        } else {
            &mut link.to_watch
        };
        let messages = queue.drain(..).collect();
        messages
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_memory_store_sessions_newest_first() {
        let mut store = MemoryStore::new();
        let older = WorkoutSession::new(None, "A", Utc::now() - Duration::days(2));
        let newer = WorkoutSession::new(None, "B", Utc::now());
        store.save_session(&older).unwrap();
        store.save_session(&newer).unwrap();

        let sessions = store.sessions().unwrap();
        assert_eq!(sessions[0].routine_name, "B");
        assert_eq!(sessions[1].routine_name, "A");
    }

    #[test]
    fn test_memory_store_upsert_replaces() {
        let mut store = MemoryStore::new();
        let mut routine = Routine::new("Legs");
        store.save_routine(&routine).unwrap();
        routine.name = "Leg Day".into();
        store.save_routine(&routine).unwrap();

        let routines = store.routines().unwrap();
        assert_eq!(routines.len(), 1);
        assert_eq!(routines[0].name, "Leg Day");
    }

    #[test]
    fn test_memory_store_rejects_writes_when_told() {
        let mut store = MemoryStore::new();
        store.set_reject_writes(true);
        let result = store.save_exercise(&Exercise::new("Squat", vec![], Default::default()));
        assert!(matches!(result, Err(Error::Persistence(_))));
    }

    #[test]
    fn test_exercises_sorted_by_name() {
        let mut store = MemoryStore::new();
        for name in ["Squat", "bench", "Deadlift"] {
            store.save_exercise(&Exercise::new(name, vec![], Default::default())).unwrap();
        }
        let names: Vec<_> = store.exercises().unwrap().into_iter().map(|e| e.name).collect();
        assert_eq!(names, vec!["bench", "Deadlift", "Squat"]);
    }

    #[test]
    fn test_watch_channel_fast_requires_reachability() {
        let (mut phone, mut watch) = MemoryWatchChannel::pair();
        phone.set_reachable(false);

        let message = WatchMessage::Snapshot { routines: vec![] };
        assert!(phone.send_fast(&message).is_err());
        phone.send_guaranteed(&message).unwrap();

        assert_eq!(watch.drain_incoming().len(), 1);
        assert!(watch.drain_incoming().is_empty());
        assert_eq!(phone.sent_counts(), (0, 1));
    }
}
