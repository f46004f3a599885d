//! Core domain types for Repset.
//!
//! Two separate ownership trees live here:
//! - The plan: `Routine` → `RoutineExercise` → `ExerciseSet`, with `Exercise`
//!   definitions shared by reference (id)
//! - The session snapshot: `WorkoutSession` → `WorkoutExercise` → `WorkoutSet`,
//!   denormalized so history survives edits to the plan

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Plan Types
// ============================================================================

/// Equipment an exercise is performed with
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Equipment {
    Barbell,
    Dumbbell,
    Kettlebell,
    Machine,
    Cable,
    Band,
    #[default]
    Bodyweight,
    Other,
}

impl std::str::FromStr for Equipment {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "barbell" => Ok(Equipment::Barbell),
            "dumbbell" => Ok(Equipment::Dumbbell),
            "kettlebell" => Ok(Equipment::Kettlebell),
            "machine" => Ok(Equipment::Machine),
            "cable" => Ok(Equipment::Cable),
            "band" => Ok(Equipment::Band),
            "bodyweight" => Ok(Equipment::Bodyweight),
            "other" => Ok(Equipment::Other),
            other => Err(crate::Error::Other(format!("Unknown equipment: {}", other))),
        }
    }
}

/// An exercise definition (e.g., "Bench Press")
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Exercise {
    pub id: Uuid,
    pub name: String,
    pub muscle_groups: Vec<String>,
    #[serde(default)]
    pub equipment: Equipment,
}

impl Exercise {
    pub fn new(name: impl Into<String>, muscle_groups: Vec<String>, equipment: Equipment) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            muscle_groups,
            equipment,
        }
    }
}

/// A planned set within a routine exercise
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ExerciseSet {
    pub id: Uuid,
    pub reps: u32,
    pub weight: f64,
    pub rest_seconds: u32,
    pub order: u32,
}

impl ExerciseSet {
    pub fn new(order: u32, reps: u32, weight: f64, rest_seconds: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            reps,
            weight,
            rest_seconds,
            order,
        }
    }
}

/// An exercise slot inside a routine
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct RoutineExercise {
    pub id: Uuid,
    pub exercise_id: Uuid,
    pub order: u32,
    pub sets: Vec<ExerciseSet>,
    /// Exercises sharing a non-empty group are performed as a superset
    #[serde(default)]
    pub superset_group: Option<String>,
    #[serde(default)]
    pub superset_order: u32,
}

impl RoutineExercise {
    pub fn new(exercise_id: Uuid, order: u32, sets: Vec<ExerciseSet>) -> Self {
        Self {
            id: Uuid::new_v4(),
            exercise_id,
            order,
            sets,
            superset_group: None,
            superset_order: 0,
        }
    }

    /// Planned sets sorted by their order field
    pub fn sorted_sets(&self) -> Vec<&ExerciseSet> {
        let mut sets: Vec<_> = self.sets.iter().collect();
        sets.sort_by_key(|s| s.order);
        sets
    }
}

/// A reusable workout template
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Routine {
    pub id: Uuid,
    pub name: String,
    pub exercises: Vec<RoutineExercise>,
    pub created_at: DateTime<Utc>,
}

impl Routine {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            exercises: Vec::new(),
            created_at: Utc::now(),
        }
    }

    /// Append an exercise at the next order position
    pub fn push_exercise(&mut self, mut exercise: RoutineExercise) -> Uuid {
        exercise.order = self.next_order();
        let id = exercise.id;
        self.exercises.push(exercise);
        id
    }

    /// Routine exercises sorted by order
    pub fn sorted_exercises(&self) -> Vec<&RoutineExercise> {
        let mut exercises: Vec<_> = self.exercises.iter().collect();
        exercises.sort_by_key(|e| e.order);
        exercises
    }

    fn next_order(&self) -> u32 {
        self.exercises
            .iter()
            .map(|e| e.order + 1)
            .max()
            .unwrap_or(0)
    }
}

// ============================================================================
// Session Snapshot Types
// ============================================================================

/// A performed (or pending) set in a live or historical workout
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct WorkoutSet {
    pub id: Uuid,
    pub planned_reps: u32,
    pub planned_weight: f64,
    pub actual_reps: u32,
    pub actual_weight: f64,
    pub rest_seconds: u32,
    pub completed: bool,
    pub completed_at: Option<DateTime<Utc>>,
    /// Set level: sets sharing an order across a superset form one round
    pub order: u32,
}

impl WorkoutSet {
    /// New pending set whose actual values start equal to the planned ones
    pub fn planned(order: u32, reps: u32, weight: f64, rest_seconds: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            planned_reps: reps,
            planned_weight: weight,
            actual_reps: reps,
            actual_weight: weight,
            rest_seconds,
            completed: false,
            completed_at: None,
            order,
        }
    }

    pub fn mark_completed(&mut self, at: DateTime<Utc>) {
        self.completed = true;
        self.completed_at = Some(at);
    }

    pub fn mark_incomplete(&mut self) {
        self.completed = false;
        self.completed_at = None;
    }

    /// Actual reps × actual weight for a completed set, zero otherwise
    pub fn volume(&self) -> f64 {
        if self.completed {
            self.actual_reps as f64 * self.actual_weight
        } else {
            0.0
        }
    }
}

/// An exercise inside a workout session (denormalized from the plan)
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct WorkoutExercise {
    pub id: Uuid,
    /// Source exercise, if it still exists
    pub exercise_id: Option<Uuid>,
    pub name: String,
    pub muscle_groups: Vec<String>,
    pub order: u32,
    #[serde(default)]
    pub superset_group: Option<String>,
    #[serde(default)]
    pub superset_order: u32,
    pub sets: Vec<WorkoutSet>,
}

impl WorkoutExercise {
    pub fn new(name: impl Into<String>, muscle_groups: Vec<String>, order: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            exercise_id: None,
            name: name.into(),
            muscle_groups,
            order,
            superset_group: None,
            superset_order: 0,
            sets: Vec::new(),
        }
    }

    /// Superset group id, treating an empty string as standalone
    pub fn group_id(&self) -> Option<&str> {
        self.superset_group
            .as_deref()
            .filter(|g| !g.trim().is_empty())
    }

    /// Sets sorted by order
    pub fn sorted_sets(&self) -> Vec<&WorkoutSet> {
        let mut sets: Vec<_> = self.sets.iter().collect();
        sets.sort_by_key(|s| s.order);
        sets
    }

    /// The set at a given level, if this exercise has one
    pub fn set_at_level(&self, level: u32) -> Option<&WorkoutSet> {
        self.sets.iter().find(|s| s.order == level)
    }

    pub fn set(&self, set_id: Uuid) -> Option<&WorkoutSet> {
        self.sets.iter().find(|s| s.id == set_id)
    }

    pub fn set_mut(&mut self, set_id: Uuid) -> Option<&mut WorkoutSet> {
        self.sets.iter_mut().find(|s| s.id == set_id)
    }

    /// Last set by order
    pub fn last_set(&self) -> Option<&WorkoutSet> {
        self.sets.iter().max_by_key(|s| s.order)
    }

    /// Rest interval of the first set, used as the exercise-wide rest value
    pub fn rest_seconds(&self) -> Option<u32> {
        self.sorted_sets().first().map(|s| s.rest_seconds)
    }

    pub fn has_incomplete_sets(&self) -> bool {
        self.sets.iter().any(|s| !s.completed)
    }
}

/// The root of a live or historical workout
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct WorkoutSession {
    pub id: Uuid,
    pub routine_id: Option<Uuid>,
    pub routine_name: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub notes: String,
    /// Whether completion was written back to the routine
    #[serde(default)]
    pub updated_template: bool,
    /// Correlation id of the health-tracking record, once synced
    #[serde(default)]
    pub health_record_id: Option<String>,
    pub exercises: Vec<WorkoutExercise>,
}

impl WorkoutSession {
    pub fn new(routine_id: Option<Uuid>, routine_name: impl Into<String>, start_time: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            routine_id,
            routine_name: routine_name.into(),
            start_time,
            end_time: None,
            notes: String::new(),
            updated_template: false,
            health_record_id: None,
            exercises: Vec::new(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.end_time.is_none()
    }

    /// Exercises sorted by order
    pub fn sorted_exercises(&self) -> Vec<&WorkoutExercise> {
        let mut exercises: Vec<_> = self.exercises.iter().collect();
        exercises.sort_by_key(|e| e.order);
        exercises
    }

    pub fn exercise(&self, exercise_id: Uuid) -> Option<&WorkoutExercise> {
        self.exercises.iter().find(|e| e.id == exercise_id)
    }

    pub fn exercise_mut(&mut self, exercise_id: Uuid) -> Option<&mut WorkoutExercise> {
        self.exercises.iter_mut().find(|e| e.id == exercise_id)
    }

    /// Resolve a set reference to the exercise and set it points at
    pub fn resolve(&self, set_ref: SetRef) -> Option<(&WorkoutExercise, &WorkoutSet)> {
        let exercise = self.exercise(set_ref.exercise_id)?;
        let set = exercise.set(set_ref.set_id)?;
        Some((exercise, set))
    }

    pub fn next_exercise_order(&self) -> u32 {
        self.exercises
            .iter()
            .map(|e| e.order + 1)
            .max()
            .unwrap_or(0)
    }

    pub fn total_sets(&self) -> usize {
        self.exercises.iter().map(|e| e.sets.len()).sum()
    }

    pub fn completed_sets(&self) -> usize {
        self.exercises
            .iter()
            .flat_map(|e| e.sets.iter())
            .filter(|s| s.completed)
            .count()
    }

    pub fn total_volume(&self) -> f64 {
        self.exercises
            .iter()
            .flat_map(|e| e.sets.iter())
            .map(WorkoutSet::volume)
            .sum()
    }

    /// Wall-clock duration in whole seconds (up to `now` while still active)
    pub fn duration_seconds(&self, now: DateTime<Utc>) -> i64 {
        let end = self.end_time.unwrap_or(now);
        (end - self.start_time).num_seconds().max(0)
    }
}

/// Identifies one set inside a session by its exercise and set ids
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SetRef {
    pub exercise_id: Uuid,
    pub set_id: Uuid,
}

impl SetRef {
    pub fn new(exercise_id: Uuid, set_id: Uuid) -> Self {
        Self {
            exercise_id,
            set_id,
        }
    }
}

/// Values used when the engine has to invent a set
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SetDefaults {
    pub reps: u32,
    pub weight: f64,
    pub rest_seconds: u32,
}

impl Default for SetDefaults {
    fn default() -> Self {
        Self {
            reps: 10,
            weight: 0.0,
            rest_seconds: 60,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_id_ignores_blank() {
        let mut exercise = WorkoutExercise::new("Row", vec![], 0);
        assert_eq!(exercise.group_id(), None);

        exercise.superset_group = Some("  ".into());
        assert_eq!(exercise.group_id(), None);

        exercise.superset_group = Some("A".into());
        assert_eq!(exercise.group_id(), Some("A"));
    }

    #[test]
    fn test_completion_timestamp_follows_flag() {
        let mut set = WorkoutSet::planned(0, 10, 45.0, 90);
        let now = Utc::now();

        set.mark_completed(now);
        assert!(set.completed);
        assert_eq!(set.completed_at, Some(now));

        set.mark_incomplete();
        assert!(!set.completed);
        assert_eq!(set.completed_at, None);
    }

    #[test]
    fn test_volume_counts_completed_sets_only() {
        let mut session = WorkoutSession::new(None, "Push", Utc::now());
        let mut exercise = WorkoutExercise::new("Bench", vec![], 0);
        exercise.sets.push(WorkoutSet::planned(0, 10, 50.0, 60));
        exercise.sets.push(WorkoutSet::planned(1, 10, 50.0, 60));
        exercise.sets[0].mark_completed(Utc::now());
        session.exercises.push(exercise);

        assert_eq!(session.total_volume(), 500.0);
        assert_eq!(session.completed_sets(), 1);
        assert_eq!(session.total_sets(), 2);
    }

    #[test]
    fn test_routine_push_assigns_next_order() {
        let mut routine = Routine::new("Pull");
        routine.push_exercise(RoutineExercise::new(Uuid::new_v4(), 0, vec![]));
        routine.push_exercise(RoutineExercise::new(Uuid::new_v4(), 0, vec![]));

        let orders: Vec<_> = routine.sorted_exercises().iter().map(|e| e.order).collect();
        assert_eq!(orders, vec![0, 1]);
    }

    #[test]
    fn test_equipment_parse() {
        assert_eq!("Barbell".parse::<Equipment>().unwrap(), Equipment::Barbell);
        assert!("spaceship".parse::<Equipment>().is_err());
    }
}
