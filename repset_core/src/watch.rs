//! Companion wrist-device mirror.
//!
//! The watch works on a reduced plan: flat exercises with a single muscle
//! group string and no supersets. It runs its own sequential set loop with a
//! wall-clock rest countdown and, when done, sends a
//! [`CompletedWorkoutRecord`] back to the phone over the guaranteed channel.

use crate::services::WatchChannel;
use crate::{Exercise, Result, Routine, WorkoutExercise, WorkoutSession, WorkoutSet};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

// ============================================================================
// Wire Types
// ============================================================================

/// A planned set as the watch sees it
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct WatchSet {
    pub reps: u32,
    pub weight: f64,
    pub rest_seconds: u32,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct WatchExercise {
    pub name: String,
    pub muscle_group: String,
    pub sets: Vec<WatchSet>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct WatchRoutine {
    pub id: Uuid,
    pub name: String,
    pub exercises: Vec<WatchExercise>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct CompletedSetRecord {
    pub planned_reps: u32,
    pub planned_weight: f64,
    pub actual_reps: u32,
    pub actual_weight: f64,
    pub rest_seconds: u32,
    pub completed: bool,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct CompletedExerciseRecord {
    pub name: String,
    pub muscle_group: String,
    pub sets: Vec<CompletedSetRecord>,
}

/// A workout finished on the watch, waiting to be reconciled on the phone
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct CompletedWorkoutRecord {
    pub id: Uuid,
    pub routine_id: Option<Uuid>,
    pub routine_name: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    #[serde(default)]
    pub update_template: bool,
    pub exercises: Vec<CompletedExerciseRecord>,
}

/// Messages exchanged between phone and watch
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WatchMessage {
    Snapshot { routines: Vec<WatchRoutine> },
    CompletedWorkout { record: CompletedWorkoutRecord },
}

/// How a message ended up being delivered
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Delivery {
    Fast,
    Guaranteed,
}

// ============================================================================
// Phone side
// ============================================================================

/// Flatten routines into the watch's reduced schema
pub fn build_snapshot(routines: &[Routine], exercises: &[Exercise]) -> Vec<WatchRoutine> {
    let by_id: HashMap<Uuid, &Exercise> = exercises.iter().map(|e| (e.id, e)).collect();

    routines
        .iter()
        .map(|routine| WatchRoutine {
            id: routine.id,
            name: routine.name.clone(),
            exercises: routine
                .sorted_exercises()
                .into_iter()
                .filter_map(|re| {
                    let Some(exercise) = by_id.get(&re.exercise_id) else {
                        tracing::warn!(
                            "Routine {:?} references missing exercise {}",
                            routine.name,
                            re.exercise_id
                        );
                        return None;
                    };
                    Some(WatchExercise {
                        name: exercise.name.clone(),
                        muscle_group: exercise.muscle_groups.first().cloned().unwrap_or_default(),
                        sets: re
                            .sorted_sets()
                            .into_iter()
                            .map(|s| WatchSet {
                                reps: s.reps,
                                weight: s.weight,
                                rest_seconds: s.rest_seconds,
                            })
                            .collect(),
                    })
                })
                .collect(),
        })
        .collect()
}

/// Send a snapshot, preferring the fast channel
///
/// Falls back to guaranteed delivery when the watch is unreachable or the
/// fast send fails.
pub fn send_snapshot(channel: &mut dyn WatchChannel, routines: Vec<WatchRoutine>) -> Result<Delivery> {
    let message = WatchMessage::Snapshot { routines };

    if channel.is_reachable() {
        match channel.send_fast(&message) {
            Ok(()) => {
                tracing::debug!("Snapshot sent over fast channel");
                return Ok(Delivery::Fast);
            }
            Err(e) => tracing::warn!("Fast snapshot send failed, queueing instead: {}", e),
        }
    }

    channel.send_guaranteed(&message)?;
    tracing::debug!("Snapshot queued for guaranteed delivery");
    Ok(Delivery::Guaranteed)
}

impl CompletedWorkoutRecord {
    /// Rebuild a finished session from the record
    ///
    /// Exercise ids and full muscle-group lists are recovered by name from the
    /// phone's exercise library when possible.
    pub fn to_session(&self, exercises: &[Exercise]) -> WorkoutSession {
        let by_name: HashMap<&str, &Exercise> = exercises.iter().map(|e| (e.name.as_str(), e)).collect();

        let mut session = WorkoutSession::new(self.routine_id, self.routine_name.clone(), self.started_at);
        session.id = self.id;
        session.end_time = Some(self.ended_at);
        session.updated_template = self.update_template;

        for (idx, record) in self.exercises.iter().enumerate() {
            let known = by_name.get(record.name.as_str());
            let muscle_groups = match known {
                Some(exercise) => exercise.muscle_groups.clone(),
                None if record.muscle_group.is_empty() => Vec::new(),
                None => vec![record.muscle_group.clone()],
            };

            let mut exercise = WorkoutExercise::new(record.name.clone(), muscle_groups, idx as u32);
            exercise.exercise_id = known.map(|e| e.id);
            exercise.sets = record
                .sets
                .iter()
                .enumerate()
                .map(|(order, s)| WorkoutSet {
                    id: Uuid::new_v4(),
                    planned_reps: s.planned_reps,
                    planned_weight: s.planned_weight,
                    actual_reps: s.actual_reps,
                    actual_weight: s.actual_weight,
                    rest_seconds: s.rest_seconds,
                    completed: s.completed,
                    completed_at: if s.completed { s.completed_at } else { None },
                    order: order as u32,
                })
                .collect();
            session.exercises.push(exercise);
        }

        session
    }
}

// ============================================================================
// Watch side
// ============================================================================

#[derive(Clone, Debug)]
struct SetProgress {
    actual_reps: u32,
    actual_weight: f64,
    completed_at: Option<DateTime<Utc>>,
}

/// What the watch UI should show after a set
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WatchStep {
    Rest { seconds: u32 },
    Next,
    Finished,
}

/// Sequential session controller running on the watch
#[derive(Clone, Debug)]
pub struct WatchSession {
    routine: WatchRoutine,
    started_at: DateTime<Utc>,
    progress: Vec<Vec<SetProgress>>,
    cursor: Option<(usize, usize)>,
    rest: Option<(DateTime<Utc>, u32)>,
}

impl WatchSession {
    pub fn start(routine: WatchRoutine, now: DateTime<Utc>) -> Self {
        let progress = routine
            .exercises
            .iter()
            .map(|e| {
                e.sets
                    .iter()
                    .map(|s| SetProgress {
                        actual_reps: s.reps,
                        actual_weight: s.weight,
                        completed_at: None,
                    })
                    .collect()
            })
            .collect();

        let mut session = Self {
            routine,
            started_at: now,
            progress,
            cursor: None,
            rest: None,
        };
        session.cursor = session.first_pending();
        tracing::info!("Watch session started for {:?}", session.routine.name);
        session
    }

    pub fn routine(&self) -> &WatchRoutine {
        &self.routine
    }

    /// (exercise index, set index) of the set to perform next
    pub fn cursor(&self) -> Option<(usize, usize)> {
        self.cursor
    }

    pub fn current(&self) -> Option<(&WatchExercise, &WatchSet)> {
        let (ex, set) = self.cursor?;
        let exercise = self.routine.exercises.get(ex)?;
        Some((exercise, exercise.sets.get(set)?))
    }

    /// Record the current set and move to the next one in sequence
    pub fn complete_current(&mut self, reps: u32, weight: f64, now: DateTime<Utc>) -> WatchStep {
        let Some((ex, set)) = self.cursor else {
            return WatchStep::Finished;
        };
        let rest_seconds = self
            .routine
            .exercises
            .get(ex)
            .and_then(|e| e.sets.get(set))
            .map_or(0, |s| s.rest_seconds);

        if let Some(progress) = self.progress.get_mut(ex).and_then(|p| p.get_mut(set)) {
            progress.actual_reps = reps;
            progress.actual_weight = weight;
            progress.completed_at = Some(now);
        }

        self.cursor = self.first_pending();
        match self.cursor {
            None => {
                self.rest = None;
                WatchStep::Finished
            }
            Some(_) if rest_seconds > 0 => {
                self.rest = Some((now, rest_seconds));
                WatchStep::Rest {
                    seconds: rest_seconds,
                }
            }
            Some(_) => WatchStep::Next,
        }
    }

    /// Seconds of rest left, computed from the wall clock
    pub fn rest_remaining(&self, now: DateTime<Utc>) -> u32 {
        self.rest.map_or(0, |(started, seconds)| {
            let end = started + Duration::seconds(seconds as i64);
            (end - now).num_seconds().max(0) as u32
        })
    }

    pub fn skip_rest(&mut self) {
        self.rest = None;
    }

    pub fn is_finished(&self) -> bool {
        self.cursor.is_none()
    }

    /// Produce the record sent back to the phone
    pub fn finish(self, now: DateTime<Utc>, update_template: bool) -> CompletedWorkoutRecord {
        let exercises = self
            .routine
            .exercises
            .iter()
            .zip(self.progress.iter())
            .map(|(exercise, progress)| CompletedExerciseRecord {
                name: exercise.name.clone(),
                muscle_group: exercise.muscle_group.clone(),
                sets: exercise
                    .sets
                    .iter()
                    .zip(progress.iter())
                    .map(|(planned, done)| CompletedSetRecord {
                        planned_reps: planned.reps,
                        planned_weight: planned.weight,
                        actual_reps: done.actual_reps,
                        actual_weight: done.actual_weight,
                        rest_seconds: planned.rest_seconds,
                        completed: done.completed_at.is_some(),
                        completed_at: done.completed_at,
                    })
                    .collect(),
            })
            .collect();

        tracing::info!("Watch session finished for {:?}", self.routine.name);
        CompletedWorkoutRecord {
            id: Uuid::new_v4(),
            routine_id: Some(self.routine.id),
            routine_name: self.routine.name,
            started_at: self.started_at,
            ended_at: now,
            update_template,
            exercises,
        }
    }

    fn first_pending(&self) -> Option<(usize, usize)> {
        self.progress.iter().enumerate().find_map(|(ex, sets)| {
            sets.iter()
                .position(|s| s.completed_at.is_none())
                .map(|set| (ex, set))
        })
    }
}

/// Send a finished workout to the phone
pub fn send_completed_workout(channel: &mut dyn WatchChannel, record: CompletedWorkoutRecord) -> Result<()> {
    channel.send_guaranteed(&WatchMessage::CompletedWorkout { record })
}
