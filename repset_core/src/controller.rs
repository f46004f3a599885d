//! Live workout session controller.
//!
//! Owns the one in-progress [`WorkoutSession`] and is the only thing that
//! mutates it. All calls happen on a single (UI) context; timers reach the
//! controller through [`SessionController::handle_tick`].
//!
//! Failure policy:
//! - Store writes that fail are logged; the in-memory session is kept
//! - Health, notification and countdown failures are logged and ignored
//! - Operations without a current session, or with ids that no longer
//!   resolve, do nothing

use crate::clock::TickHandle;
use crate::events::{HealthSyncStatus, SessionEvent, SessionObserver};
use crate::rest_timer::{RestRestore, RestTick, RestTimer};
use crate::sequencing::{self, AdvanceDecision};
use crate::services::{Services, Store, WatchChannel};
use crate::watch::{self, CompletedWorkoutRecord, Delivery, WatchMessage};
use crate::{
    template, Error, Exercise, Result, Routine, SetDefaults, SetRef, WorkoutExercise,
    WorkoutSession, WorkoutSet,
};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Build a fresh session snapshot from a routine
///
/// Exercises and sets are copied in routine order; actual values start
/// equal to the planned ones and nothing is completed.
pub fn snapshot_routine(routine: &Routine, exercises: &[Exercise], now: DateTime<Utc>) -> WorkoutSession {
    let mut session = WorkoutSession::new(Some(routine.id), routine.name.clone(), now);

    for (idx, planned) in routine.sorted_exercises().into_iter().enumerate() {
        let definition = exercises.iter().find(|e| e.id == planned.exercise_id);
        if definition.is_none() {
            tracing::warn!(
                "Routine {:?} references missing exercise {}",
                routine.name,
                planned.exercise_id
            );
        }

        let mut exercise = WorkoutExercise::new(
            definition.map_or("Unknown exercise", |e| e.name.as_str()),
            definition.map(|e| e.muscle_groups.clone()).unwrap_or_default(),
            idx as u32,
        );
        exercise.exercise_id = definition.map(|e| e.id);
        exercise.superset_group = planned.superset_group.clone();
        exercise.superset_order = planned.superset_order;
        exercise.sets = planned
            .sorted_sets()
            .into_iter()
            .enumerate()
            .map(|(order, s)| WorkoutSet::planned(order as u32, s.reps, s.weight, s.rest_seconds))
            .collect();

        session.exercises.push(exercise);
    }

    session
}

/// Drives the current workout session
pub struct SessionController {
    services: Services,
    defaults: SetDefaults,
    current: Option<WorkoutSession>,
    current_set: Option<SetRef>,
    rest: RestTimer,
    workout_tick: Option<TickHandle>,
    health_status: HealthSyncStatus,
    observers: Vec<Box<dyn SessionObserver>>,
}

impl SessionController {
    pub fn new(services: Services, defaults: SetDefaults) -> Self {
        Self {
            services,
            defaults,
            current: None,
            current_set: None,
            rest: RestTimer::new(),
            workout_tick: None,
            health_status: HealthSyncStatus::Idle,
            observers: Vec::new(),
        }
    }

    pub fn add_observer(&mut self, observer: impl SessionObserver + 'static) {
        self.observers.push(Box::new(observer));
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub fn session(&self) -> Option<&WorkoutSession> {
        self.current.as_ref()
    }

    pub fn has_session(&self) -> bool {
        self.current.is_some()
    }

    /// The set the UI should focus
    pub fn current_set(&self) -> Option<SetRef> {
        self.current_set
    }

    pub fn rest_timer(&self) -> &RestTimer {
        &self.rest
    }

    pub fn health_status(&self) -> &HealthSyncStatus {
        &self.health_status
    }

    /// Seconds since the session started (0 without a session)
    pub fn elapsed_seconds(&self) -> i64 {
        let now = self.services.now();
        self.current.as_ref().map_or(0, |s| s.duration_seconds(now))
    }

    pub fn next_incomplete_set(&self) -> Option<SetRef> {
        self.current.as_ref().and_then(sequencing::find_next_incomplete_set)
    }

    pub fn next_in_superset(&self, after: SetRef) -> Option<SetRef> {
        self.current
            .as_ref()
            .and_then(|s| sequencing::find_next_in_superset(s, after))
    }

    pub fn store(&self) -> &dyn Store {
        self.services.store.as_ref()
    }

    pub fn store_mut(&mut self) -> &mut dyn Store {
        self.services.store.as_mut()
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Start a workout from a stored routine
    pub fn start(&mut self, routine_id: Uuid) -> Result<Uuid> {
        self.ensure_idle()?;

        let routine = self
            .services
            .store
            .routine(routine_id)?
            .ok_or_else(|| Error::State(format!("Unknown routine {}", routine_id)))?;
        let exercises = self.services.store.exercises()?;

        let session = snapshot_routine(&routine, &exercises, self.services.now());
        tracing::info!(
            "Starting workout {:?} ({} exercises, {} sets)",
            routine.name,
            session.exercises.len(),
            session.total_sets()
        );
        Ok(self.begin(session))
    }

    /// Start an empty workout not tied to any routine
    pub fn start_freestyle(&mut self, name: &str) -> Result<Uuid> {
        self.ensure_idle()?;
        let session = WorkoutSession::new(None, name, self.services.now());
        tracing::info!("Starting freestyle workout {:?}", name);
        Ok(self.begin(session))
    }

    /// Abandon the current workout; nothing is kept in history
    pub fn cancel(&mut self) -> bool {
        let Some(session) = self.current.take() else {
            return false;
        };

        self.stop_timers();
        if let Some(health) = self.services.health.as_mut() {
            if let Err(e) = health.discard_session() {
                tracing::warn!("Failed to discard health session: {}", e);
            }
        }
        if let Err(e) = self.services.store.delete_session(session.id) {
            tracing::warn!("Failed to delete cancelled session {}: {}", session.id, e);
        }
        self.clear_workout_anchor();
        self.current_set = None;

        tracing::info!(
            "Cancelled workout {} after {} completed set(s)",
            session.id,
            session.completed_sets()
        );
        self.emit(SessionEvent::SessionCancelled {
            session_id: session.id,
        });
        true
    }

    /// Stop the clock while the user decides how to finish
    pub fn pause_for_completion(&mut self) -> bool {
        if self.current.is_none() {
            return false;
        }

        self.stop_timers();
        let now = self.services.now();
        if let Some(session) = self.current.as_mut() {
            session.end_time = Some(now);
        }
        self.persist();
        self.emit(SessionEvent::SessionPaused);
        true
    }

    /// The user declined to finish; keep going
    pub fn resume_after_completion_prompt(&mut self) -> bool {
        let Some(session) = self.current.as_mut() else {
            return false;
        };

        session.end_time = None;
        self.schedule_workout_tick();
        self.persist();
        self.emit(SessionEvent::SessionResumed);
        true
    }

    /// Finish the workout and move it into history
    ///
    /// With `update_template`, performed values are written back to the
    /// originating routine. Returns the finished session's id.
    ///
    /// If the store rejects the finished session it stays current (paused,
    /// as after `pause_for_completion`) and `None` is returned, so the call
    /// can be retried.
    pub fn complete_workout(&mut self, update_template: bool, notes: &str) -> Option<Uuid> {
        self.current.as_ref()?;

        self.stop_timers();
        let now = self.services.now();
        let mut session = self.current.take()?;
        session.notes = notes.to_string();
        session.updated_template = update_template;
        session.end_time.get_or_insert(now);

        if update_template {
            self.update_template_from(&session);
        }
        if session.health_record_id.is_none() {
            self.sync_health(&mut session, now);
        }

        if let Err(e) = self.services.store.save_session(&session) {
            tracing::warn!("Failed to save finished session {}: {}", session.id, e);
            self.current = Some(session);
            return None;
        }
        self.clear_workout_anchor();
        self.current_set = None;

        tracing::info!(
            "Completed workout {:?}: {}/{} sets, volume {:.1}",
            session.routine_name,
            session.completed_sets(),
            session.total_sets(),
            session.total_volume()
        );
        self.emit(SessionEvent::SessionCompleted {
            session_id: session.id,
        });
        Some(session.id)
    }

    /// Adopt an in-progress session left in the store (e.g. after a crash)
    pub fn recover(&mut self) -> Option<Uuid> {
        if self.current.is_some() {
            return None;
        }

        let sessions = match self.services.store.sessions() {
            Ok(sessions) => sessions,
            Err(e) => {
                tracing::warn!("Failed to read sessions for recovery: {}", e);
                return None;
            }
        };
        let session = sessions.into_iter().find(WorkoutSession::is_active)?;
        let id = session.id;
        tracing::info!("Recovered in-progress workout {}", id);

        self.current_set = sequencing::find_next_incomplete_set(&session);
        self.current = Some(session);
        self.schedule_workout_tick();
        self.restore_rest();
        self.emit(SessionEvent::SessionResumed);
        self.emit(SessionEvent::CurrentSetChanged {
            set: self.current_set,
        });
        Some(id)
    }

    // ------------------------------------------------------------------
    // Set and exercise mutation
    // ------------------------------------------------------------------

    /// Mark a set done and decide on rest and navigation
    ///
    /// Completing an already completed set does nothing.
    pub fn complete_set(&mut self, set: SetRef) -> Option<AdvanceDecision> {
        let now = self.services.now();
        let target = self
            .current
            .as_mut()?
            .exercise_mut(set.exercise_id)?
            .set_mut(set.set_id)?;
        if target.completed {
            return None;
        }
        target.mark_completed(now);

        self.persist();
        self.emit(SessionEvent::SetCompleted { set });

        let decision = sequencing::decide_after_completion(self.current.as_ref()?, set)?;
        tracing::debug!("Advance decision after {:?}: {:?}", set, decision);

        match &decision {
            AdvanceDecision::Continue { next, rest_seconds }
            | AdvanceDecision::NextExercise { next, rest_seconds } => {
                if let Some(seconds) = rest_seconds {
                    self.start_rest(*seconds, *next);
                }
                self.set_current(Some(*next));
            }
            AdvanceDecision::WorkoutComplete => {
                self.set_current(None);
                self.cancel_workout_tick();
                if let Some(session) = self.current.as_mut() {
                    session.end_time = Some(now);
                }
                self.persist();
                tracing::info!("All sets done");
                self.emit(SessionEvent::WorkoutReadyToFinish);
            }
        }

        Some(decision)
    }

    /// Clear a set's completion; timers and navigation are untouched
    pub fn uncomplete_set(&mut self, set: SetRef) -> bool {
        let Some(target) = self.set_mut(set) else {
            return false;
        };
        target.mark_incomplete();
        self.persist();
        self.emit(SessionEvent::SetUncompleted { set });
        true
    }

    /// Overwrite the actual reps and weight of a set
    pub fn update_set(&mut self, set: SetRef, reps: u32, weight: f64) -> bool {
        let Some(target) = self.set_mut(set) else {
            return false;
        };
        target.actual_reps = reps;
        target.actual_weight = weight;
        self.persist();
        self.emit(SessionEvent::SetUpdated { set });
        true
    }

    /// Apply one rest interval to every set of an exercise
    pub fn update_rest_time_for_exercise(&mut self, exercise_id: Uuid, rest_seconds: u32) -> bool {
        let Some(exercise) = self.exercise_mut(exercise_id) else {
            return false;
        };
        for set in exercise.sets.iter_mut() {
            set.rest_seconds = rest_seconds;
        }
        self.persist();
        self.emit(SessionEvent::RestTimeChanged {
            exercise_id,
            rest_seconds,
        });
        true
    }

    /// Append a set copying the exercise's last one (or the defaults)
    pub fn add_set_to_exercise(&mut self, exercise_id: Uuid) -> Option<SetRef> {
        let defaults = self.defaults;
        let exercise = self.exercise_mut(exercise_id)?;

        let set = match exercise.last_set() {
            Some(last) => WorkoutSet {
                id: Uuid::new_v4(),
                planned_reps: last.planned_reps,
                planned_weight: last.planned_weight,
                actual_reps: last.actual_reps,
                actual_weight: last.actual_weight,
                rest_seconds: last.rest_seconds,
                completed: false,
                completed_at: None,
                order: last.order + 1,
            },
            None => WorkoutSet::planned(0, defaults.reps, defaults.weight, defaults.rest_seconds),
        };
        let set_ref = SetRef::new(exercise_id, set.id);
        exercise.sets.push(set);

        self.persist();
        self.emit(SessionEvent::SetAdded { set: set_ref });
        if self.current_set.is_none() {
            self.refresh_current();
        }
        Some(set_ref)
    }

    /// Append a standalone exercise seeded with one default set
    pub fn add_exercise_to_workout(&mut self, exercise: &Exercise) -> Option<Uuid> {
        let defaults = self.defaults;
        let session = self.current.as_mut()?;

        let mut added = WorkoutExercise::new(
            exercise.name.clone(),
            exercise.muscle_groups.clone(),
            session.next_exercise_order(),
        );
        added.exercise_id = Some(exercise.id);
        added.sets.push(WorkoutSet::planned(
            0,
            defaults.reps,
            defaults.weight,
            defaults.rest_seconds,
        ));
        let id = added.id;
        session.exercises.push(added);

        tracing::info!("Added {:?} to the workout", exercise.name);
        self.persist();
        self.emit(SessionEvent::ExerciseAdded { exercise_id: id });
        if self.current_set.is_none() {
            self.refresh_current();
        }
        Some(id)
    }

    pub fn remove_set_from_exercise(&mut self, set: SetRef) -> bool {
        let Some(exercise) = self.exercise_mut(set.exercise_id) else {
            return false;
        };
        let before = exercise.sets.len();
        exercise.sets.retain(|s| s.id != set.set_id);
        if exercise.sets.len() == before {
            return false;
        }

        self.persist();
        self.emit(SessionEvent::SetRemoved { set });
        if self.current_set == Some(set) {
            self.refresh_current();
        }
        true
    }

    /// Remove an exercise and all of its sets
    pub fn remove_exercise_from_workout(&mut self, exercise_id: Uuid) -> bool {
        let Some(session) = self.current.as_mut() else {
            return false;
        };
        let before = session.exercises.len();
        session.exercises.retain(|e| e.id != exercise_id);
        if session.exercises.len() == before {
            return false;
        }

        self.persist();
        self.emit(SessionEvent::ExerciseRemoved { exercise_id });
        if self.current_set.map(|s| s.exercise_id) == Some(exercise_id) {
            self.refresh_current();
        }
        true
    }

    // ------------------------------------------------------------------
    // Timers
    // ------------------------------------------------------------------

    /// Deliver a tick from the host's ticker
    ///
    /// Returns false for ticks that belong to no running timer.
    pub fn handle_tick(&mut self, handle: TickHandle) -> bool {
        if self.workout_tick == Some(handle) {
            let elapsed_seconds = self.elapsed_seconds();
            self.emit(SessionEvent::WorkoutTick { elapsed_seconds });
            return true;
        }

        match self.rest.tick(handle, &mut self.services) {
            RestTick::Stale => {
                tracing::trace!("Ignoring stale tick {:?}", handle);
                false
            }
            RestTick::Running { remaining_seconds } => {
                self.emit(SessionEvent::RestTick { remaining_seconds });
                true
            }
            RestTick::Finished => {
                self.emit(SessionEvent::RestFinished);
                true
            }
        }
    }

    /// End the rest interval early
    pub fn skip_rest(&mut self) -> bool {
        let stopped = self.rest.stop(&mut self.services);
        if stopped {
            self.emit(SessionEvent::RestStopped);
        }
        stopped
    }

    /// Persist timer anchors and drop tick sources before suspension
    pub fn suspend(&mut self) {
        let Some(started_at) = self.current.as_ref().map(|s| s.start_time) else {
            return;
        };

        if let Err(e) = self.services.anchors.write_workout_start(started_at) {
            tracing::warn!("Failed to persist workout anchor: {}", e);
        }
        self.cancel_workout_tick();
        self.rest.suspend(&mut self.services);
        tracing::debug!("Session suspended");
    }

    /// Recompute timers from the wall clock after suspension
    pub fn resume(&mut self) {
        let Some(active) = self.current.as_ref().map(WorkoutSession::is_active) else {
            return;
        };

        if active {
            self.schedule_workout_tick();
        }
        self.restore_rest();
        tracing::debug!("Session resumed");
    }

    // ------------------------------------------------------------------
    // Wrist device
    // ------------------------------------------------------------------

    /// Send the current routines to the watch
    pub fn sync_watch(&mut self, channel: &mut dyn WatchChannel) -> Result<Delivery> {
        let routines = self.services.store.routines()?;
        let exercises = self.services.store.exercises()?;
        watch::send_snapshot(channel, watch::build_snapshot(&routines, &exercises))
    }

    /// Reconcile a workout finished on the watch into history
    pub fn import_watch_workout(&mut self, record: &CompletedWorkoutRecord) -> Result<Uuid> {
        let exercises = self.services.store.exercises()?;
        let mut session = record.to_session(&exercises);

        let routine = match record.routine_id {
            Some(id) => self.services.store.routine(id)?,
            None => None,
        };
        let routine = match routine {
            Some(routine) => Some(routine),
            None => self
                .services
                .store
                .routines()?
                .into_iter()
                .find(|r| r.name == record.routine_name),
        };
        session.routine_id = routine.as_ref().map(|r| r.id);

        if record.update_template {
            match routine {
                Some(mut routine) => {
                    template::apply_session_to_routine(&mut routine, &session, &exercises);
                    if let Err(e) = self.services.store.save_routine(&routine) {
                        tracing::warn!("Failed to save updated routine {:?}: {}", routine.name, e);
                    }
                }
                None => tracing::warn!(
                    "No routine {:?} to update from watch workout",
                    record.routine_name
                ),
            }
        }

        self.services.store.save_session(&session)?;
        tracing::info!("Imported watch workout {} ({:?})", session.id, session.routine_name);
        Ok(session.id)
    }

    /// Handle everything the watch sent since the last call
    ///
    /// Returns how many workouts were imported.
    pub fn process_watch_messages(&mut self, channel: &mut dyn WatchChannel) -> usize {
        let mut imported = 0;
        for message in channel.drain_incoming() {
            match message {
                WatchMessage::CompletedWorkout { record } => match self.import_watch_workout(&record) {
                    Ok(_) => imported += 1,
                    Err(e) => tracing::warn!("Failed to import watch workout {}: {}", record.id, e),
                },
                WatchMessage::Snapshot { .. } => {
                    tracing::debug!("Ignoring snapshot message on the phone side");
                }
            }
        }
        imported
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn ensure_idle(&self) -> Result<()> {
        match &self.current {
            Some(session) => Err(Error::State(format!(
                "Workout {} is already in progress",
                session.id
            ))),
            None => Ok(()),
        }
    }

    fn begin(&mut self, session: WorkoutSession) -> Uuid {
        let id = session.id;
        self.current_set = sequencing::find_next_incomplete_set(&session);
        self.current = Some(session);
        self.health_status = HealthSyncStatus::Idle;

        self.persist();
        self.schedule_workout_tick();
        if let Some(health) = self.services.health.as_mut() {
            if let Err(e) = health.start_session() {
                tracing::warn!("Failed to start health session: {}", e);
            }
        }

        self.emit(SessionEvent::SessionStarted { session_id: id });
        self.emit(SessionEvent::CurrentSetChanged {
            set: self.current_set,
        });
        id
    }

    fn set_mut(&mut self, set: SetRef) -> Option<&mut WorkoutSet> {
        self.exercise_mut(set.exercise_id)?.set_mut(set.set_id)
    }

    fn exercise_mut(&mut self, exercise_id: Uuid) -> Option<&mut WorkoutExercise> {
        self.current.as_mut()?.exercise_mut(exercise_id)
    }

    fn persist(&mut self) {
        let Some(session) = self.current.as_ref() else {
            return;
        };
        if let Err(e) = self.services.store.save_session(session) {
            tracing::warn!("Failed to save session {}, keeping it in memory: {}", session.id, e);
        }
    }

    fn emit(&mut self, event: SessionEvent) {
        for observer in self.observers.iter_mut() {
            observer.on_event(&event);
        }
    }

    fn set_current(&mut self, set: Option<SetRef>) {
        if self.current_set != set {
            self.current_set = set;
            self.emit(SessionEvent::CurrentSetChanged { set });
        }
    }

    fn refresh_current(&mut self) {
        let next = self.next_incomplete_set();
        self.set_current(next);
    }

    fn start_rest(&mut self, seconds: u32, next: SetRef) {
        let label = self
            .current
            .as_ref()
            .and_then(|s| s.exercise(next.exercise_id))
            .map_or_else(|| "next set".to_string(), |e| e.name.clone());
        self.rest.start(seconds, &label, &mut self.services);
        self.emit(SessionEvent::RestStarted { seconds });
    }

    fn restore_rest(&mut self) {
        let label = self
            .current_set
            .and_then(|set| self.current.as_ref()?.exercise(set.exercise_id))
            .map_or_else(|| "next set".to_string(), |e| e.name.clone());

        match self.rest.restore(&label, &mut self.services) {
            RestRestore::Idle => {}
            RestRestore::Resumed { remaining_seconds } => {
                self.emit(SessionEvent::RestTick { remaining_seconds });
            }
            RestRestore::Expired => self.emit(SessionEvent::RestFinished),
        }
    }

    fn schedule_workout_tick(&mut self) {
        self.cancel_workout_tick();
        self.workout_tick = Some(self.services.ticker.schedule_repeating(1));
    }

    fn cancel_workout_tick(&mut self) {
        if let Some(handle) = self.workout_tick.take() {
            self.services.ticker.cancel(handle);
        }
    }

    fn stop_timers(&mut self) {
        self.cancel_workout_tick();
        if self.rest.stop(&mut self.services) {
            self.emit(SessionEvent::RestStopped);
        }
    }

    fn clear_workout_anchor(&mut self) {
        if let Err(e) = self.services.anchors.clear_workout_start() {
            tracing::warn!("Failed to clear workout anchor: {}", e);
        }
    }

    fn update_template_from(&mut self, session: &WorkoutSession) {
        let Some(routine_id) = session.routine_id else {
            tracing::debug!("Freestyle workout, no template to update");
            return;
        };

        let loaded = self
            .services
            .store
            .routine(routine_id)
            .and_then(|routine| Ok((routine, self.services.store.exercises()?)));
        match loaded {
            Ok((Some(mut routine), exercises)) => {
                template::apply_session_to_routine(&mut routine, session, &exercises);
                if let Err(e) = self.services.store.save_routine(&routine) {
                    tracing::warn!("Failed to save updated routine {:?}: {}", routine.name, e);
                }
            }
            Ok((None, _)) => tracing::warn!("Routine {} no longer exists", routine_id),
            Err(e) => tracing::warn!("Failed to load routine {}: {}", routine_id, e),
        }
    }

    fn sync_health(&mut self, session: &mut WorkoutSession, now: DateTime<Utc>) {
        if self.services.health.is_none() {
            return;
        }
        self.health_status = HealthSyncStatus::Syncing;
        self.emit(SessionEvent::HealthSync(HealthSyncStatus::Syncing));

        let Some(health) = self.services.health.as_mut() else {
            return;
        };
        let energy = health.estimate_energy(session.duration_seconds(now));
        let metadata = BTreeMap::from([
            ("routine".to_string(), session.routine_name.clone()),
            ("completed_sets".to_string(), session.completed_sets().to_string()),
            ("total_volume".to_string(), format!("{:.1}", session.total_volume())),
        ]);

        self.health_status = match health.end_session(energy, &metadata) {
            Ok(record_id) => {
                session.health_record_id = Some(record_id);
                HealthSyncStatus::Success
            }
            Err(e) => {
                tracing::warn!("Health sync failed: {}", e);
                HealthSyncStatus::Failed(e.to_string())
            }
        };

        let status = self.health_status.clone();
        self.emit(SessionEvent::HealthSync(status));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock, ManualTicker};
    use crate::events::EventLog;
    use crate::services::{
        AnchorStore, MemoryAnchors, MemoryCountdown, MemoryHealth, MemoryNotifications, MemoryStore,
        MemoryWatchChannel,
    };
    use crate::watch::WatchSession;
    use crate::{Equipment, ExerciseSet, RoutineExercise};

    struct Harness {
        clock: ManualClock,
        ticker: ManualTicker,
        store: MemoryStore,
        anchors: MemoryAnchors,
        health: MemoryHealth,
        countdown: MemoryCountdown,
        events: EventLog,
        controller: SessionController,
    }

    fn create_harness() -> Harness {
        crate::logging::init_test();
        let clock = ManualClock::default();
        let ticker = ManualTicker::new();
        let store = MemoryStore::new();
        let anchors = MemoryAnchors::new();
        let health = MemoryHealth::new();
        let countdown = MemoryCountdown::new();
        let events = EventLog::new();

        let services = Services::new(Box::new(store.clone()), Box::new(anchors.clone()))
            .with_clock(clock.clone())
            .with_ticker(ticker.clone())
            .with_health(health.clone())
            .with_notifications(MemoryNotifications::new())
            .with_countdown(countdown.clone());
        let mut controller = SessionController::new(services, SetDefaults::default());
        controller.add_observer(events.clone());

        Harness {
            clock,
            ticker,
            store,
            anchors,
            health,
            countdown,
            events,
            controller,
        }
    }

    /// (name, superset group, sets, reps, weight, rest)
    fn seed_routine(h: &mut Harness, spec: &[(&str, Option<&str>, u32, u32, f64, u32)]) -> Uuid {
        let mut routine = Routine::new("Test Day");
        for (idx, (name, group, sets, reps, weight, rest)) in spec.iter().enumerate() {
            let exercise = Exercise::new(*name, vec!["chest".into()], Equipment::Barbell);
            h.store.save_exercise(&exercise).unwrap();
            let mut planned = RoutineExercise::new(
                exercise.id,
                0,
                (0..*sets).map(|o| ExerciseSet::new(o, *reps, *weight, *rest)).collect(),
            );
            planned.superset_group = group.map(String::from);
            planned.superset_order = idx as u32;
            routine.push_exercise(planned);
        }
        h.store.save_routine(&routine).unwrap();
        routine.id
    }

    fn set_ref(h: &Harness, name: &str, order: u32) -> SetRef {
        let session = h.controller.session().unwrap();
        let exercise = session.exercises.iter().find(|e| e.name == name).unwrap();
        SetRef::new(exercise.id, exercise.set_at_level(order).unwrap().id)
    }

    #[test]
    fn test_start_copies_routine() {
        let mut h = create_harness();
        let routine_id = seed_routine(
            &mut h,
            &[("Bench", None, 3, 10, 45.0, 90), ("Row", None, 3, 8, 40.0, 60)],
        );

        h.controller.start(routine_id).unwrap();
        let session = h.controller.session().unwrap();

        assert_eq!(session.routine_id, Some(routine_id));
        assert_eq!(session.exercises.len(), 2);
        for exercise in &session.exercises {
            assert_eq!(exercise.sets.len(), 3);
            assert_eq!(exercise.muscle_groups, vec!["chest".to_string()]);
            for set in &exercise.sets {
                assert_eq!(set.actual_reps, set.planned_reps);
                assert_eq!(set.actual_weight, set.planned_weight);
                assert!(!set.completed);
            }
        }
        assert_eq!(h.controller.elapsed_seconds(), 0);
        assert_eq!(h.controller.current_set(), Some(set_ref(&h, "Bench", 0)));
        assert_eq!(h.health.started(), 1);
        assert_eq!(h.ticker.active_handles().len(), 1);
    }

    #[test]
    fn test_start_rejects_second_session() {
        let mut h = create_harness();
        let routine_id = seed_routine(&mut h, &[("Bench", None, 1, 10, 45.0, 90)]);

        h.controller.start(routine_id).unwrap();
        assert!(matches!(h.controller.start(routine_id), Err(Error::State(_))));
        assert!(matches!(h.controller.start_freestyle("Extra"), Err(Error::State(_))));
    }

    #[test]
    fn test_start_unknown_routine_fails() {
        let mut h = create_harness();
        assert!(h.controller.start(Uuid::new_v4()).is_err());
        assert!(!h.controller.has_session());
    }

    #[test]
    fn test_health_failure_does_not_block_start() {
        let mut h = create_harness();
        h.health.set_failing(true);
        let routine_id = seed_routine(&mut h, &[("Bench", None, 1, 10, 45.0, 90)]);

        assert!(h.controller.start(routine_id).is_ok());
        assert!(h.controller.has_session());
    }

    #[test]
    fn test_superset_rest_waits_for_round() {
        let mut h = create_harness();
        let routine_id = seed_routine(
            &mut h,
            &[("A", Some("g"), 2, 10, 20.0, 30), ("B", Some("g"), 2, 10, 20.0, 90)],
        );
        h.controller.start(routine_id).unwrap();

        let a0 = set_ref(&h, "A", 0);
        h.controller.complete_set(a0).unwrap();
        assert!(!h.controller.rest_timer().is_active());
        assert_eq!(h.controller.current_set(), Some(set_ref(&h, "B", 0)));

        let b0 = set_ref(&h, "B", 0);
        h.controller.complete_set(b0).unwrap();
        assert!(h.controller.rest_timer().is_active());
        assert_eq!(h.controller.rest_timer().total_seconds(), 90);
        assert!(h.events.contains(&SessionEvent::RestStarted { seconds: 90 }));
        assert_eq!(h.controller.current_set(), Some(set_ref(&h, "A", 1)));
        assert_eq!(h.countdown.active().unwrap().1, "A");
    }

    #[test]
    fn test_uneven_superset_continues_with_longer_member() {
        let mut h = create_harness();
        let routine_id = seed_routine(
            &mut h,
            &[("A", Some("g"), 1, 10, 20.0, 30), ("B", Some("g"), 2, 10, 20.0, 60)],
        );
        h.controller.start(routine_id).unwrap();

        h.controller.complete_set(set_ref(&h, "A", 0));
        h.controller.complete_set(set_ref(&h, "B", 0));

        assert!(h.controller.rest_timer().is_active());
        assert_eq!(h.controller.next_incomplete_set(), Some(set_ref(&h, "B", 1)));
    }

    #[test]
    fn test_finishing_all_sets_signals_ready() {
        let mut h = create_harness();
        let routine_id = seed_routine(
            &mut h,
            &[("E1", None, 3, 10, 45.0, 60), ("E2", None, 2, 10, 45.0, 60)],
        );
        h.controller.start(routine_id).unwrap();

        for order in 0..3 {
            h.controller.complete_set(set_ref(&h, "E1", order));
        }
        assert_eq!(h.controller.current_set(), Some(set_ref(&h, "E2", 0)));

        h.controller.complete_set(set_ref(&h, "E2", 0));
        h.clock.advance_seconds(600);
        let decision = h.controller.complete_set(set_ref(&h, "E2", 1));

        assert_eq!(decision, Some(AdvanceDecision::WorkoutComplete));
        assert_eq!(h.controller.current_set(), None);
        assert!(h.events.contains(&SessionEvent::WorkoutReadyToFinish));
        let session = h.controller.session().unwrap();
        assert_eq!(session.end_time, Some(h.clock.now()));
    }

    #[test]
    fn test_complete_twice_is_noop() {
        let mut h = create_harness();
        let routine_id = seed_routine(&mut h, &[("Bench", None, 2, 10, 45.0, 60)]);
        h.controller.start(routine_id).unwrap();

        let s0 = set_ref(&h, "Bench", 0);
        assert!(h.controller.complete_set(s0).is_some());
        assert!(h.controller.complete_set(s0).is_none());
    }

    #[test]
    fn test_operations_without_session_are_noops() {
        let mut h = create_harness();
        let bogus = SetRef::new(Uuid::new_v4(), Uuid::new_v4());

        assert!(h.controller.complete_set(bogus).is_none());
        assert!(!h.controller.uncomplete_set(bogus));
        assert!(!h.controller.update_set(bogus, 5, 5.0));
        assert!(!h.controller.update_rest_time_for_exercise(bogus.exercise_id, 30));
        assert!(h.controller.add_set_to_exercise(bogus.exercise_id).is_none());
        assert!(h
            .controller
            .add_exercise_to_workout(&Exercise::new("Dip", vec![], Equipment::Bodyweight))
            .is_none());
        assert!(!h.controller.remove_set_from_exercise(bogus));
        assert!(!h.controller.remove_exercise_from_workout(bogus.exercise_id));
        assert!(!h.controller.cancel());
        assert!(!h.controller.pause_for_completion());
        assert!(h.controller.complete_workout(true, "").is_none());
        assert!(h.events.events().is_empty());
    }

    #[test]
    fn test_stale_ids_are_noops_during_session() {
        let mut h = create_harness();
        let routine_id = seed_routine(&mut h, &[("Bench", None, 1, 10, 45.0, 60)]);
        h.controller.start(routine_id).unwrap();
        let before = h.controller.session().cloned();

        let bogus = SetRef::new(Uuid::new_v4(), Uuid::new_v4());
        assert!(h.controller.complete_set(bogus).is_none());
        assert!(!h.controller.update_set(bogus, 1, 1.0));
        assert_eq!(h.controller.session().cloned(), before);
    }

    #[test]
    fn test_uncomplete_and_update_leave_timers_alone() {
        let mut h = create_harness();
        let routine_id = seed_routine(&mut h, &[("Bench", None, 2, 10, 45.0, 60)]);
        h.controller.start(routine_id).unwrap();

        let s0 = set_ref(&h, "Bench", 0);
        h.controller.complete_set(s0);
        assert!(h.controller.rest_timer().is_active());
        let current = h.controller.current_set();

        assert!(h.controller.uncomplete_set(s0));
        assert!(h.controller.update_set(s0, 7, 50.0));

        let session = h.controller.session().unwrap();
        let (_, set) = session.resolve(s0).unwrap();
        assert!(!set.completed);
        assert_eq!(set.completed_at, None);
        assert_eq!((set.actual_reps, set.actual_weight), (7, 50.0));
        assert_eq!((set.planned_reps, set.planned_weight), (10, 45.0));
        assert!(h.controller.rest_timer().is_active());
        assert_eq!(h.controller.current_set(), current);
    }

    #[test]
    fn test_update_rest_time_applies_to_every_set() {
        let mut h = create_harness();
        let routine_id = seed_routine(&mut h, &[("Bench", None, 3, 10, 45.0, 60)]);
        h.controller.start(routine_id).unwrap();
        let exercise_id = set_ref(&h, "Bench", 0).exercise_id;

        assert!(h.controller.update_rest_time_for_exercise(exercise_id, 150));
        let session = h.controller.session().unwrap();
        assert!(session.exercises[0].sets.iter().all(|s| s.rest_seconds == 150));
    }

    #[test]
    fn test_add_set_copies_last_set() {
        let mut h = create_harness();
        let routine_id = seed_routine(&mut h, &[("Bench", None, 2, 8, 60.0, 120)]);
        h.controller.start(routine_id).unwrap();
        let last = set_ref(&h, "Bench", 1);
        h.controller.update_set(last, 6, 65.0);

        let added = h.controller.add_set_to_exercise(last.exercise_id).unwrap();
        let session = h.controller.session().unwrap();
        let (_, set) = session.resolve(added).unwrap();

        assert_eq!(set.order, 2);
        assert_eq!((set.planned_reps, set.planned_weight), (8, 60.0));
        assert_eq!((set.actual_reps, set.actual_weight), (6, 65.0));
        assert_eq!(set.rest_seconds, 120);
        assert!(!set.completed);
    }

    #[test]
    fn test_add_exercise_and_empty_add_set_use_defaults() {
        let mut h = create_harness();
        h.controller.start_freestyle("Quick").unwrap();
        assert_eq!(h.controller.current_set(), None);

        let dip = Exercise::new("Dip", vec!["triceps".into()], Equipment::Bodyweight);
        let exercise_id = h.controller.add_exercise_to_workout(&dip).unwrap();
        let second = h
            .controller
            .add_exercise_to_workout(&Exercise::new("Curl", vec![], Equipment::Dumbbell))
            .unwrap();

        let session = h.controller.session().unwrap();
        let added = session.exercise(exercise_id).unwrap();
        assert_eq!(added.order, 0);
        assert_eq!(session.exercise(second).unwrap().order, 1);
        assert_eq!(added.group_id(), None);
        assert_eq!(added.exercise_id, Some(dip.id));
        assert_eq!(added.sets.len(), 1);
        let set = &added.sets[0];
        assert_eq!((set.planned_reps, set.planned_weight, set.rest_seconds), (10, 0.0, 60));
        assert_eq!(h.controller.current_set().map(|s| s.exercise_id), Some(exercise_id));

        // Empty exercise falls back to defaults
        let only = SetRef::new(exercise_id, set.id);
        assert!(h.controller.remove_set_from_exercise(only));
        let fresh = h.controller.add_set_to_exercise(exercise_id).unwrap();
        let (_, set) = h.controller.session().unwrap().resolve(fresh).unwrap();
        assert_eq!((set.order, set.planned_reps, set.rest_seconds), (0, 10, 60));
    }

    #[test]
    fn test_remove_exercise_moves_pointer() {
        let mut h = create_harness();
        let routine_id = seed_routine(
            &mut h,
            &[("E1", None, 1, 10, 45.0, 60), ("E2", None, 1, 10, 45.0, 60)],
        );
        h.controller.start(routine_id).unwrap();
        let e1 = set_ref(&h, "E1", 0);
        let e2 = set_ref(&h, "E2", 0);

        assert!(h.controller.remove_exercise_from_workout(e1.exercise_id));
        assert_eq!(h.controller.session().unwrap().exercises.len(), 1);
        assert_eq!(h.controller.current_set(), Some(e2));
    }

    #[test]
    fn test_cancel_discards_session() {
        let mut h = create_harness();
        let routine_id = seed_routine(&mut h, &[("Bench", None, 3, 10, 45.0, 60)]);
        let session_id = h.controller.start(routine_id).unwrap();
        h.controller.complete_set(set_ref(&h, "Bench", 0));
        h.controller.complete_set(set_ref(&h, "Bench", 1));
        assert!(!h.store.sessions().unwrap().is_empty());

        assert!(h.controller.cancel());

        assert!(!h.controller.has_session());
        assert!(h.store.sessions().unwrap().iter().all(|s| s.id != session_id));
        assert!(!h.controller.rest_timer().is_active());
        assert!(h.ticker.active_handles().is_empty());
        assert_eq!(h.health.discarded(), 1);
    }

    #[test]
    fn test_complete_workout_updates_template() {
        let mut h = create_harness();
        let routine_id = seed_routine(&mut h, &[("Bench", None, 2, 10, 45.0, 60)]);
        h.controller.start(routine_id).unwrap();

        let exercise_id = set_ref(&h, "Bench", 0).exercise_id;
        h.controller.update_rest_time_for_exercise(exercise_id, 100);
        let s0 = set_ref(&h, "Bench", 0);
        h.controller.update_set(s0, 8, 50.0);
        h.controller.complete_set(s0);
        h.controller.update_set(set_ref(&h, "Bench", 1), 4, 70.0);

        let session_id = h.controller.complete_workout(true, "good day").unwrap();

        let routine = h.store.routine(routine_id).unwrap().unwrap();
        let sets = routine.exercises[0].sorted_sets();
        assert_eq!((sets[0].reps, sets[0].weight), (8, 50.0));
        assert_eq!((sets[1].reps, sets[1].weight), (10, 45.0));
        assert!(sets.iter().all(|s| s.rest_seconds == 100));

        let stored = h.store.sessions().unwrap();
        let finished = stored.iter().find(|s| s.id == session_id).unwrap();
        assert_eq!(finished.notes, "good day");
        assert!(finished.updated_template);
        assert!(finished.end_time.is_some());
        assert!(finished.health_record_id.is_some());
        assert_eq!(h.controller.health_status(), &HealthSyncStatus::Success);
        assert!(!h.controller.has_session());
    }

    #[test]
    fn test_complete_workout_without_template_update() {
        let mut h = create_harness();
        let routine_id = seed_routine(&mut h, &[("Bench", None, 1, 10, 45.0, 60)]);
        let before = h.store.routine(routine_id).unwrap();
        h.controller.start(routine_id).unwrap();
        let s0 = set_ref(&h, "Bench", 0);
        h.controller.update_set(s0, 3, 99.0);
        h.controller.complete_set(s0);

        h.controller.complete_workout(false, "");
        assert_eq!(h.store.routine(routine_id).unwrap(), before);
    }

    #[test]
    fn test_health_sync_failure_still_saves_history() {
        let mut h = create_harness();
        let routine_id = seed_routine(&mut h, &[("Bench", None, 1, 10, 45.0, 60)]);
        h.controller.start(routine_id).unwrap();
        h.health.set_failing(true);

        let id = h.controller.complete_workout(false, "").unwrap();

        assert!(matches!(h.controller.health_status(), HealthSyncStatus::Failed(_)));
        let stored = h.store.sessions().unwrap();
        assert!(stored.iter().any(|s| s.id == id && s.health_record_id.is_none()));
    }

    #[test]
    fn test_store_failure_keeps_progress_in_memory() {
        let mut h = create_harness();
        let routine_id = seed_routine(&mut h, &[("Bench", None, 2, 10, 45.0, 60)]);
        h.controller.start(routine_id).unwrap();
        h.store.set_reject_writes(true);

        let s0 = set_ref(&h, "Bench", 0);
        assert!(h.controller.complete_set(s0).is_some());

        let (_, set) = h.controller.session().unwrap().resolve(s0).unwrap();
        assert!(set.completed);
        assert!(h.controller.has_session());
    }

    #[test]
    fn test_complete_workout_keeps_session_when_save_fails() {
        let mut h = create_harness();
        let routine_id = seed_routine(&mut h, &[("Bench", None, 2, 10, 45.0, 60)]);
        h.controller.start(routine_id).unwrap();
        h.controller.complete_set(set_ref(&h, "Bench", 0));
        h.store.set_reject_writes(true);

        assert_eq!(h.controller.complete_workout(false, "great session"), None);

        let session = h.controller.session().unwrap();
        assert_eq!(session.notes, "great session");
        assert_eq!(session.end_time, Some(h.clock.now()));
        assert!(h.ticker.active_handles().is_empty());
        assert!(!h
            .events
            .events()
            .iter()
            .any(|e| matches!(e, SessionEvent::SessionCompleted { .. })));

        // Once the store recovers the same session lands in history
        h.store.set_reject_writes(false);
        let id = h.controller.complete_workout(false, "great session").unwrap();
        assert!(!h.controller.has_session());
        let stored = h.store.sessions().unwrap().into_iter().find(|s| s.id == id).unwrap();
        assert_eq!(stored.notes, "great session");
        assert!(stored.end_time.is_some());
        assert_eq!(stored.completed_sets(), 1);
    }

    #[test]
    fn test_pause_and_resume_for_completion_prompt() {
        let mut h = create_harness();
        let routine_id = seed_routine(&mut h, &[("Bench", None, 2, 10, 45.0, 60)]);
        h.controller.start(routine_id).unwrap();
        h.controller.complete_set(set_ref(&h, "Bench", 0));

        assert!(h.controller.pause_for_completion());
        assert!(h.controller.session().unwrap().end_time.is_some());
        assert!(!h.controller.rest_timer().is_active());
        assert!(h.ticker.active_handles().is_empty());

        assert!(h.controller.resume_after_completion_prompt());
        assert!(h.controller.session().unwrap().end_time.is_none());
        assert_eq!(h.ticker.active_handles().len(), 1);
    }

    #[test]
    fn test_ticks_drive_events_and_stale_ticks_are_ignored() {
        let mut h = create_harness();
        let routine_id = seed_routine(&mut h, &[("Bench", None, 2, 10, 45.0, 2)]);
        h.controller.start(routine_id).unwrap();
        let workout_tick = h.ticker.active_handles()[0];

        h.clock.advance_seconds(5);
        assert!(h.controller.handle_tick(workout_tick));
        assert!(h.events.contains(&SessionEvent::WorkoutTick { elapsed_seconds: 5 }));

        h.controller.complete_set(set_ref(&h, "Bench", 0));
        let rest_tick = h.controller.rest_timer().handle().unwrap();

        h.clock.advance_seconds(1);
        assert!(h.controller.handle_tick(rest_tick));
        assert!(h.events.contains(&SessionEvent::RestTick { remaining_seconds: 1 }));

        h.clock.advance_seconds(1);
        assert!(h.controller.handle_tick(rest_tick));
        assert!(h.events.contains(&SessionEvent::RestFinished));

        // The rest source is gone; late callbacks change nothing
        assert!(!h.controller.handle_tick(rest_tick));
    }

    #[test]
    fn test_skip_rest() {
        let mut h = create_harness();
        let routine_id = seed_routine(&mut h, &[("Bench", None, 2, 10, 45.0, 60)]);
        h.controller.start(routine_id).unwrap();
        h.controller.complete_set(set_ref(&h, "Bench", 0));
        let rest_tick = h.controller.rest_timer().handle().unwrap();

        assert!(h.controller.skip_rest());
        assert!(!h.controller.rest_timer().is_active());
        assert!(!h.controller.handle_tick(rest_tick));
        assert!(!h.controller.skip_rest());
    }

    #[test]
    fn test_suspend_resume_recomputes_rest() {
        let mut h = create_harness();
        let routine_id = seed_routine(&mut h, &[("Bench", None, 2, 10, 45.0, 90)]);
        h.controller.start(routine_id).unwrap();
        h.controller.complete_set(set_ref(&h, "Bench", 0));

        h.controller.suspend();
        let anchors = h.anchors.read().unwrap();
        assert!(anchors.workout_started_at.is_some());
        assert_eq!(anchors.rest.map(|r| r.duration_seconds), Some(90));
        assert!(h.ticker.active_handles().is_empty());

        h.clock.advance_seconds(30);
        h.controller.resume();

        assert!(h.controller.rest_timer().is_active());
        assert_eq!(h.controller.rest_timer().remaining_seconds(), 60);
        assert_eq!(h.ticker.active_handles().len(), 2);
    }

    #[test]
    fn test_rest_expires_during_long_suspension() {
        let mut h = create_harness();
        let routine_id = seed_routine(&mut h, &[("Bench", None, 2, 10, 45.0, 90)]);
        h.controller.start(routine_id).unwrap();
        h.controller.complete_set(set_ref(&h, "Bench", 0));

        h.controller.suspend();
        h.clock.advance_seconds(91);
        h.controller.resume();

        assert!(!h.controller.rest_timer().is_active());
        assert!(h.events.contains(&SessionEvent::RestFinished));
        assert!(h.anchors.read().unwrap().rest.is_none());
    }

    #[test]
    fn test_recover_adopts_in_progress_session() {
        let mut h = create_harness();
        let routine_id = seed_routine(&mut h, &[("Bench", None, 2, 10, 45.0, 60)]);
        let session_id = h.controller.start(routine_id).unwrap();
        h.controller.complete_set(set_ref(&h, "Bench", 0));
        h.controller.suspend();

        // A new process on the same store
        let services = Services::new(Box::new(h.store.clone()), Box::new(h.anchors.clone()))
            .with_clock(h.clock.clone())
            .with_ticker(h.ticker.clone());
        let mut revived = SessionController::new(services, SetDefaults::default());
        h.clock.advance_seconds(10);

        assert_eq!(revived.recover(), Some(session_id));
        let session = revived.session().unwrap();
        assert_eq!(session.completed_sets(), 1);
        assert_eq!(revived.rest_timer().remaining_seconds(), 50);
        assert_eq!(revived.recover(), None);
    }

    #[test]
    fn test_watch_workout_roundtrip_into_history() {
        let mut h = create_harness();
        let routine_id = seed_routine(&mut h, &[("Bench", None, 2, 10, 45.0, 60)]);
        let (mut phone, mut watch_end) = MemoryWatchChannel::pair();

        assert_eq!(h.controller.sync_watch(&mut phone).unwrap(), Delivery::Fast);
        let routines = match watch_end.drain_incoming().pop().unwrap() {
            WatchMessage::Snapshot { routines } => routines,
            other => panic!("unexpected message {:?}", other),
        };

        let start = h.clock.now();
        let mut session = WatchSession::start(routines[0].clone(), start);
        session.complete_current(12, 47.5, start);
        let record = session.finish(start + chrono::Duration::minutes(20), true);
        watch::send_completed_workout(&mut watch_end, record.clone()).unwrap();

        assert_eq!(h.controller.process_watch_messages(&mut phone), 1);

        let stored = h.store.sessions().unwrap();
        let imported = stored.iter().find(|s| s.id == record.id).unwrap();
        assert_eq!(imported.routine_id, Some(routine_id));
        assert_eq!(imported.completed_sets(), 1);

        let routine = h.store.routine(routine_id).unwrap().unwrap();
        let sets = routine.exercises[0].sorted_sets();
        assert_eq!((sets[0].reps, sets[0].weight), (12, 47.5));
        assert_eq!((sets[1].reps, sets[1].weight), (10, 45.0));
    }
}
