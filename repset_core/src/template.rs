//! Template back-propagation.
//!
//! After a workout the user may choose to write what they actually did back
//! into the routine. Matching is by exercise name, sets pair up by position.
//! Only completed sets overwrite planned reps and weight; the exercise's rest
//! interval (its first set's) is applied to every planned set.

use crate::{Exercise, ExerciseSet, Routine, WorkoutSession};
use std::collections::HashMap;
use uuid::Uuid;

/// Apply a finished session to its routine
///
/// Returns the number of routine exercises that were touched.
pub fn apply_session_to_routine(
    routine: &mut Routine,
    session: &WorkoutSession,
    exercises: &[Exercise],
) -> usize {
    let names: HashMap<Uuid, &str> = exercises.iter().map(|e| (e.id, e.name.as_str())).collect();
    let mut touched = 0;

    for performed in session.sorted_exercises() {
        let Some(planned) = routine
            .exercises
            .iter_mut()
            .find(|re| names.get(&re.exercise_id).copied() == Some(performed.name.as_str()))
        else {
            tracing::debug!("No routine exercise named {:?}, skipping", performed.name);
            continue;
        };

        let rest = performed.rest_seconds();
        if let Some(rest) = rest {
            for set in planned.sets.iter_mut() {
                set.rest_seconds = rest;
            }
        }

        let mut planned_ids: Vec<(u32, Uuid)> = planned.sets.iter().map(|s| (s.order, s.id)).collect();
        planned_ids.sort_by_key(|(order, _)| *order);
        let mut next_order = planned_ids.last().map_or(0, |(order, _)| order + 1);

        for (position, done) in performed.sorted_sets().into_iter().enumerate() {
            if !done.completed {
                continue;
            }

            match planned_ids.get(position) {
                Some((_, set_id)) => {
                    if let Some(set) = planned.sets.iter_mut().find(|s| s.id == *set_id) {
                        set.reps = done.actual_reps;
                        set.weight = done.actual_weight;
                    }
                }
                None => {
                    planned.sets.push(ExerciseSet::new(
                        next_order,
                        done.actual_reps,
                        done.actual_weight,
                        rest.unwrap_or(done.rest_seconds),
                    ));
                    next_order += 1;
                }
            }
        }

        touched += 1;
    }

    tracing::info!(
        "Updated {} exercise(s) of routine {:?} from session {}",
        touched,
        routine.name,
        session.id
    );
    touched
}
