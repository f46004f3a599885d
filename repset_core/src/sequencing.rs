//! Superset-aware set sequencing.
//!
//! A session's exercises are partitioned into groups: exercises sharing a
//! non-empty superset id form one group (ordered by their intra-group order),
//! every other exercise is a singleton group. Groups keep the position of
//! their first member in session order.
//!
//! Inside a multi-member group sets are worked round-robin by set level
//! (the set's `order`): A-0, B-0, A-1, B-1, ... Members without a set at a
//! level simply sit that round out. Rest is owed only once a whole round is
//! done, and the round's rest interval is taken from the last member that
//! has a set at that level.

use crate::{SetRef, WorkoutExercise, WorkoutSession, WorkoutSet};
use std::collections::{BTreeSet, HashMap};

/// What should happen after a set has been completed
#[derive(Clone, Debug, PartialEq)]
pub enum AdvanceDecision {
    /// More work remains in the same exercise or superset
    Continue {
        next: SetRef,
        rest_seconds: Option<u32>,
    },
    /// The exercise (or superset) is done; move on to the next incomplete set
    NextExercise {
        next: SetRef,
        rest_seconds: Option<u32>,
    },
    /// Nothing left to do
    WorkoutComplete,
}

/// Partition the session into superset groups in traversal order
pub fn superset_groups(session: &WorkoutSession) -> Vec<Vec<&WorkoutExercise>> {
    let mut groups: Vec<Vec<&WorkoutExercise>> = Vec::new();
    let mut positions: HashMap<&str, usize> = HashMap::new();

    for exercise in session.sorted_exercises() {
        match exercise.group_id() {
            Some(group_id) => match positions.get(group_id) {
                Some(&idx) => groups[idx].push(exercise),
                None => {
                    positions.insert(group_id, groups.len());
                    groups.push(vec![exercise]);
                }
            },
            None => groups.push(vec![exercise]),
        }
    }

    for group in &mut groups {
        group.sort_by_key(|e| (e.superset_order, e.order));
    }

    groups
}

/// The group an exercise belongs to (a singleton for standalone exercises)
pub fn group_containing(session: &WorkoutSession, exercise_id: uuid::Uuid) -> Vec<&WorkoutExercise> {
    superset_groups(session)
        .into_iter()
        .find(|group| group.iter().any(|e| e.id == exercise_id))
        .unwrap_or_default()
}

/// The next set the user should work on, or `None` when everything is done
pub fn find_next_incomplete_set(session: &WorkoutSession) -> Option<SetRef> {
    for group in superset_groups(session) {
        let found = if group.len() > 1 {
            next_in_group(&group)
        } else {
            group.first().and_then(|e| first_incomplete(e))
        };

        if found.is_some() {
            return found;
        }
    }

    None
}

/// The literal next set after `current` within its superset
///
/// Finishes the remaining members at the current level, then walks later
/// levels across all members. Standalone exercises fall back to the next
/// incomplete set of the same exercise.
pub fn find_next_in_superset(session: &WorkoutSession, current: SetRef) -> Option<SetRef> {
    let (exercise, set) = session.resolve(current)?;
    let group = group_containing(session, exercise.id);

    if group.len() < 2 {
        return next_in_exercise(exercise, set.order);
    }

    let position = group.iter().position(|e| e.id == exercise.id)?;
    let level = set.order;

    for member in group.iter().skip(position + 1) {
        if let Some(found) = incomplete_at_level(member, level) {
            return Some(found);
        }
    }

    for next_level in set_levels(&group).into_iter().filter(|l| *l > level) {
        for member in &group {
            if let Some(found) = incomplete_at_level(member, next_level) {
                return Some(found);
            }
        }
    }

    None
}

/// Whether completing `completed` closed its superset round
///
/// Always true for standalone exercises. For a real superset every member
/// that has a set at the completed level must show it completed; members
/// without a set at that level are ignored.
pub fn is_end_of_superset_round(session: &WorkoutSession, completed: SetRef) -> bool {
    let Some((exercise, set)) = session.resolve(completed) else {
        return false;
    };

    let group = group_containing(session, exercise.id);
    if group.len() < 2 {
        return true;
    }

    let level = set.order;
    group.iter().all(|member| {
        member
            .sets
            .iter()
            .filter(|s| s.order == level)
            .all(|s| s.completed)
    })
}

/// Rest owed after the round containing `completed`
///
/// Standalone sets use their own rest value; a superset round uses the rest
/// stored on its last member with a set at that level.
pub fn superset_round_rest(session: &WorkoutSession, completed: SetRef) -> u32 {
    let Some((exercise, set)) = session.resolve(completed) else {
        return 0;
    };

    let group = group_containing(session, exercise.id);
    if group.len() < 2 {
        return set.rest_seconds;
    }

    group
        .iter()
        .rev()
        .find_map(|member| member.set_at_level(set.order))
        .map(|s| s.rest_seconds)
        .unwrap_or(set.rest_seconds)
}

/// Decide rest and navigation after `completed` was marked done
///
/// Returns `None` when the reference no longer resolves.
pub fn decide_after_completion(session: &WorkoutSession, completed: SetRef) -> Option<AdvanceDecision> {
    let (exercise, set) = session.resolve(completed)?;
    let has_more_work = find_next_incomplete_set(session);

    if group_containing(session, exercise.id).len() > 1 {
        if let Some(next) = find_next_in_superset(session, completed) {
            let rest_seconds = if is_end_of_superset_round(session, completed) {
                non_zero(superset_round_rest(session, completed))
            } else {
                None
            };
            tracing::debug!(
                "Superset continues at {:?} (round closed: {})",
                next,
                rest_seconds.is_some()
            );
            return Some(AdvanceDecision::Continue { next, rest_seconds });
        }

        return Some(match has_more_work {
            Some(next) => AdvanceDecision::NextExercise {
                next,
                rest_seconds: non_zero(superset_round_rest(session, completed)),
            },
            None => AdvanceDecision::WorkoutComplete,
        });
    }

    if let Some(next) = next_in_exercise(exercise, set.order) {
        return Some(AdvanceDecision::Continue {
            next,
            rest_seconds: non_zero(set.rest_seconds),
        });
    }

    Some(match has_more_work {
        Some(next) => AdvanceDecision::NextExercise {
            next,
            rest_seconds: non_zero(set.rest_seconds),
        },
        None => AdvanceDecision::WorkoutComplete,
    })
}

fn non_zero(seconds: u32) -> Option<u32> {
    (seconds > 0).then_some(seconds)
}

/// Distinct set levels present in a group, ascending
fn set_levels(group: &[&WorkoutExercise]) -> BTreeSet<u32> {
    group
        .iter()
        .flat_map(|e| e.sets.iter().map(|s| s.order))
        .collect()
}

fn next_in_group(group: &[&WorkoutExercise]) -> Option<SetRef> {
    for level in set_levels(group) {
        for member in group {
            if let Some(found) = incomplete_at_level(member, level) {
                return Some(found);
            }
        }
    }
    None
}

fn incomplete_at_level(exercise: &WorkoutExercise, level: u32) -> Option<SetRef> {
    exercise
        .sets
        .iter()
        .filter(|s| s.order == level)
        .find(|s| !s.completed)
        .map(|s| SetRef::new(exercise.id, s.id))
}

fn first_incomplete(exercise: &WorkoutExercise) -> Option<SetRef> {
    exercise
        .sorted_sets()
        .into_iter()
        .find(|s| !s.completed)
        .map(|s| SetRef::new(exercise.id, s.id))
}

/// Next incomplete set after `after_order`, wrapping to earlier skipped sets
fn next_in_exercise(exercise: &WorkoutExercise, after_order: u32) -> Option<SetRef> {
    let sets = exercise.sorted_sets();
    let pending = |s: &&&WorkoutSet| !s.completed;

    sets.iter()
        .filter(|s| s.order > after_order)
        .find(pending)
        .or_else(|| sets.iter().find(pending))
        .map(|s| SetRef::new(exercise.id, s.id))
}
