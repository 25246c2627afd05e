//! Persisted rows and the loaded workout aggregate.
//!
//! Storage keeps one flat table per level keyed by identity. A
//! [`StoredAggregate`] is the slice of those tables belonging to one workout,
//! soft-deleted rows included, in insertion order.

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::id::{SetId, UserId, WorkoutExerciseId, WorkoutId};
use crate::workout::{ExerciseNode, ExerciseRef, RowState, SetNode, WeightUnit, WorkoutTree};

/// A persisted workout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkoutRow {
    pub id: WorkoutId,
    pub owner_id: UserId,
    pub title: String,
    pub notes: String,
    pub date: NaiveDate,
    pub state: RowState,
    /// Starts at 1 and increases by one on every commit touching the workout.
    pub revision: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A persisted exercise entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExerciseRow {
    pub id: WorkoutExerciseId,
    pub workout_id: WorkoutId,
    pub exercise: ExerciseRef,
    pub notes: String,
    pub weight_unit: WeightUnit,
    pub state: RowState,
}

/// A persisted set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetRow {
    pub id: SetId,
    pub workout_exercise_id: WorkoutExerciseId,
    pub weight: Option<f64>,
    pub reps: Option<u32>,
    pub rpe: Option<f64>,
    pub state: RowState,
}

/// The persisted state of one workout, as loaded for reconciliation.
///
/// `workout` is `None` for a workout that has not been created yet.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoredAggregate {
    pub workout: Option<WorkoutRow>,
    pub exercises: Vec<ExerciseRow>,
    pub sets: Vec<SetRow>,
}

impl StoredAggregate {
    /// The aggregate of a workout that does not exist yet.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Returns true when there is no persisted workout.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.workout.is_none()
    }

    /// Revision of the persisted workout, if any.
    #[must_use]
    pub fn revision(&self) -> Option<u64> {
        self.workout.as_ref().map(|w| w.revision)
    }

    /// Sets belonging to one exercise entry, in insertion order.
    pub fn sets_of(&self, exercise_id: WorkoutExerciseId) -> impl Iterator<Item = &SetRow> {
        self.sets
            .iter()
            .filter(move |s| s.workout_exercise_id == exercise_id)
    }

    /// Identity map of exercise rows.
    #[must_use]
    pub fn exercise_map(&self) -> HashMap<WorkoutExerciseId, &ExerciseRow> {
        self.exercises.iter().map(|e| (e.id, e)).collect()
    }

    /// Identity map of set rows.
    #[must_use]
    pub fn set_map(&self) -> HashMap<SetId, &SetRow> {
        self.sets.iter().map(|s| (s.id, s)).collect()
    }

    /// Builds the client-facing tree, dropping soft-deleted rows.
    ///
    /// Returns `None` if the workout is missing or itself soft-deleted.
    #[must_use]
    pub fn to_tree(&self) -> Option<WorkoutTree> {
        let workout = self.workout.as_ref().filter(|w| !w.state.is_deleted())?;

        let mut sets_by_parent: HashMap<WorkoutExerciseId, Vec<SetNode>> = HashMap::new();
        for set in self.sets.iter().filter(|s| !s.state.is_deleted()) {
            sets_by_parent
                .entry(set.workout_exercise_id)
                .or_default()
                .push(SetNode {
                    id: set.id,
                    weight: set.weight,
                    reps: set.reps,
                    rpe: set.rpe,
                });
        }

        let exercises = self
            .exercises
            .iter()
            .filter(|e| !e.state.is_deleted())
            .map(|e| ExerciseNode {
                id: e.id,
                exercise: e.exercise,
                notes: e.notes.clone(),
                weight_unit: e.weight_unit,
                sets: sets_by_parent.remove(&e.id).unwrap_or_default(),
            })
            .collect();

        Some(WorkoutTree {
            id: workout.id,
            owner_id: workout.owner_id,
            title: workout.title.clone(),
            notes: workout.notes.clone(),
            date: workout.date,
            revision: workout.revision,
            updated_at: workout.updated_at,
            exercises,
        })
    }
}
