//! Workout history queries and export.
//!
//! Finished sessions come from the store newest first. Progress is compared
//! per exercise name against the most recent earlier session that contains
//! the same exercise.

use crate::services::Store;
use crate::{Result, WorkoutExercise, WorkoutSession};
use std::fs::OpenOptions;
use std::path::Path;

/// Finished sessions, newest first
pub fn finished_sessions(store: &dyn Store) -> Result<Vec<WorkoutSession>> {
    let mut sessions: Vec<WorkoutSession> = store
        .sessions()?
        .into_iter()
        .filter(|s| s.end_time.is_some())
        .collect();
    sessions.sort_by(|a, b| b.start_time.cmp(&a.start_time));
    Ok(sessions)
}

/// What was done for one exercise in one session
#[derive(Clone, Debug, PartialEq)]
pub struct ExerciseSummary {
    pub name: String,
    pub completed_sets: usize,
    pub volume: f64,
    pub top_weight: f64,
}

impl ExerciseSummary {
    pub fn from_exercise(exercise: &WorkoutExercise) -> Self {
        let completed: Vec<_> = exercise.sets.iter().filter(|s| s.completed).collect();
        Self {
            name: exercise.name.clone(),
            completed_sets: completed.len(),
            volume: completed.iter().map(|s| s.volume()).sum(),
            top_weight: completed.iter().map(|s| s.actual_weight).fold(0.0, f64::max),
        }
    }
}

/// An exercise compared with its previous appearance
#[derive(Clone, Debug, PartialEq)]
pub struct ProgressComparison {
    pub current: ExerciseSummary,
    pub previous: Option<ExerciseSummary>,
}

impl ProgressComparison {
    pub fn volume_delta(&self) -> Option<f64> {
        self.previous.as_ref().map(|p| self.current.volume - p.volume)
    }

    pub fn top_weight_delta(&self) -> Option<f64> {
        self.previous.as_ref().map(|p| self.current.top_weight - p.top_weight)
    }

    pub fn completed_sets_delta(&self) -> Option<i64> {
        self.previous
            .as_ref()
            .map(|p| self.current.completed_sets as i64 - p.completed_sets as i64)
    }
}

/// Compare every exercise of `session` with earlier history
///
/// `history` must be newest first; only sessions that started before
/// `session` are considered, and at most `window` of them are scanned.
pub fn compare_with_previous(
    session: &WorkoutSession,
    history: &[WorkoutSession],
    window: usize,
) -> Vec<ProgressComparison> {
    let earlier: Vec<&WorkoutSession> = history
        .iter()
        .filter(|s| s.id != session.id && s.start_time < session.start_time)
        .take(window)
        .collect();

    session
        .sorted_exercises()
        .into_iter()
        .map(|exercise| {
            let previous = earlier
                .iter()
                .find_map(|s| s.exercises.iter().find(|e| e.name == exercise.name))
                .map(ExerciseSummary::from_exercise);
            ProgressComparison {
                current: ExerciseSummary::from_exercise(exercise),
                previous,
            }
        })
        .collect()
}

/// A row in the exported CSV
#[derive(Debug, serde::Serialize)]
struct SetRow<'a> {
    session_id: String,
    date: String,
    routine: &'a str,
    exercise: &'a str,
    set_order: u32,
    planned_reps: u32,
    planned_weight: f64,
    actual_reps: u32,
    actual_weight: f64,
    completed: bool,
}

/// Write one CSV row per set of the given sessions
///
/// The file is replaced. Returns the number of rows written.
pub fn export_sets_csv(sessions: &[WorkoutSession], path: &Path) -> Result<usize> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)?;
    let mut writer = csv::Writer::from_writer(file);

    let mut rows = 0;
    for session in sessions {
        let date = session.start_time.to_rfc3339();
        for exercise in session.sorted_exercises() {
            for set in exercise.sorted_sets() {
                writer.serialize(SetRow {
                    session_id: session.id.to_string(),
                    date: date.clone(),
                    routine: &session.routine_name,
                    exercise: &exercise.name,
                    set_order: set.order,
                    planned_reps: set.planned_reps,
                    planned_weight: set.planned_weight,
                    actual_reps: set.actual_reps,
                    actual_weight: set.actual_weight,
                    completed: set.completed,
                })?;
                rows += 1;
            }
        }
    }

    writer.flush()?;
    tracing::info!("Exported {} set(s) from {} session(s) to {:?}", rows, sessions.len(), path);
    Ok(rows)
}
