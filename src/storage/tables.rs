//! Flat identity-map tables shared by every backend.
//!
//! Each level of the workout tree lives in its own map keyed by identity.
//! Child order per parent is kept separately as insertion order.
//!
//! Committing is split in two: [`WorkoutTables::check_batch`] performs every
//! check that can fail, [`WorkoutTables::apply_batch`] cannot fail. Backends
//! run both under one write lock, so a rejected batch leaves no trace.

use std::collections::{HashMap, HashSet};

#[cfg(feature = "persistent")]
use serde::{Deserialize, Serialize};

use crate::aggregate::{ExerciseRow, SetRow, StoredAggregate, WorkoutRow};
use crate::catalog::{CatalogExercise, UserExercise};
use crate::id::{CatalogExerciseId, SetId, UserExerciseId, UserId, WorkoutExerciseId, WorkoutId};
use crate::storage::traits::{CommitBatch, HistoryEntry, Mutation, StorageError};
use crate::workout::{EntityLevel, ExerciseRef, SetNode};

#[derive(Debug, Default, Clone)]
pub(crate) struct WorkoutTables {
    workouts: HashMap<WorkoutId, WorkoutRow>,
    exercises: HashMap<WorkoutExerciseId, ExerciseRow>,
    sets: HashMap<SetId, SetRow>,
    exercise_order: HashMap<WorkoutId, Vec<WorkoutExerciseId>>,
    set_order: HashMap<WorkoutExerciseId, Vec<SetId>>,
    catalog: HashMap<CatalogExerciseId, CatalogExercise>,
    user_exercises: HashMap<UserExerciseId, UserExercise>,
}

/// Serializable image of [`WorkoutTables`].
///
/// Rows are listed parent-first in insertion order so that rebuilding the
/// tables reproduces child order.
#[cfg(feature = "persistent")]
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub(crate) struct TablesSnapshot {
    pub workouts: Vec<WorkoutRow>,
    pub exercises: Vec<ExerciseRow>,
    pub sets: Vec<SetRow>,
    pub catalog: Vec<CatalogExercise>,
    pub user_exercises: Vec<UserExercise>,
}

fn foreign(level: EntityLevel, id: impl ToString, parent: impl ToString) -> StorageError {
    StorageError::ForeignParent {
        level,
        id: id.to_string(),
        parent: parent.to_string(),
    }
}

fn duplicate(level: EntityLevel, id: impl ToString) -> StorageError {
    StorageError::DuplicateKey {
        level,
        id: id.to_string(),
    }
}

fn missing(level: EntityLevel, id: impl ToString) -> StorageError {
    StorageError::NotFound {
        level,
        id: id.to_string(),
    }
}

impl WorkoutTables {
    /// Validate a batch against the current tables without changing them.
    pub fn check_batch(&self, batch: &CommitBatch) -> Result<(), StorageError> {
        let current = self.workouts.get(&batch.workout_id);
        match (batch.expected_revision, current) {
            (None, None) => {}
            (Some(expected), Some(row)) if row.revision == expected => {}
            (expected, row) => {
                return Err(StorageError::RevisionMismatch {
                    workout_id: batch.workout_id,
                    expected,
                    actual: row.map(|r| r.revision),
                });
            }
        }

        let mut created_workout = false;
        let mut new_exercises: HashSet<WorkoutExerciseId> = HashSet::new();
        let mut new_sets: HashSet<SetId> = HashSet::new();

        for mutation in &batch.mutations {
            match mutation {
                Mutation::InsertWorkout(row) => {
                    if row.id != batch.workout_id {
                        return Err(foreign(EntityLevel::Workout, row.id, batch.workout_id));
                    }
                    if current.is_some() || created_workout {
                        return Err(duplicate(EntityLevel::Workout, row.id));
                    }
                    created_workout = true;
                }
                Mutation::UpdateWorkout(row) => {
                    if row.id != batch.workout_id {
                        return Err(foreign(EntityLevel::Workout, row.id, batch.workout_id));
                    }
                    let stored = current.ok_or_else(|| missing(EntityLevel::Workout, row.id))?;
                    if stored.owner_id != row.owner_id {
                        return Err(foreign(
                            EntityLevel::Workout,
                            row.id,
                            format!("owner {}", stored.owner_id),
                        ));
                    }
                }
                Mutation::InsertExercise(row) => {
                    if row.workout_id != batch.workout_id {
                        return Err(foreign(EntityLevel::WorkoutExercise, row.id, row.workout_id));
                    }
                    if self.exercises.contains_key(&row.id) || !new_exercises.insert(row.id) {
                        return Err(duplicate(EntityLevel::WorkoutExercise, row.id));
                    }
                }
                Mutation::UpdateExercise(row) => {
                    let stored = self
                        .exercises
                        .get(&row.id)
                        .ok_or_else(|| missing(EntityLevel::WorkoutExercise, row.id))?;
                    if stored.workout_id != row.workout_id || row.workout_id != batch.workout_id {
                        return Err(foreign(EntityLevel::WorkoutExercise, row.id, row.workout_id));
                    }
                }
                Mutation::InsertSet(row) => {
                    let parent = row.workout_exercise_id;
                    let parent_ok = new_exercises.contains(&parent)
                        || self
                            .exercises
                            .get(&parent)
                            .is_some_and(|e| e.workout_id == batch.workout_id);
                    if !parent_ok {
                        return Err(foreign(EntityLevel::Set, row.id, parent));
                    }
                    if self.sets.contains_key(&row.id) || !new_sets.insert(row.id) {
                        return Err(duplicate(EntityLevel::Set, row.id));
                    }
                }
                Mutation::UpdateSet(row) => {
                    let stored = self
                        .sets
                        .get(&row.id)
                        .ok_or_else(|| missing(EntityLevel::Set, row.id))?;
                    let parent = row.workout_exercise_id;
                    let parent_ok = stored.workout_exercise_id == parent
                        && self
                            .exercises
                            .get(&parent)
                            .is_some_and(|e| e.workout_id == batch.workout_id);
                    if !parent_ok {
                        return Err(foreign(EntityLevel::Set, row.id, parent));
                    }
                }
            }
        }

        if current.is_none() && !created_workout {
            return Err(missing(EntityLevel::Workout, batch.workout_id));
        }
        Ok(())
    }

    /// Apply a batch that passed [`Self::check_batch`].
    ///
    /// Re-applying the same batch yields the same tables, which keeps log
    /// replay over a snapshot safe.
    pub fn apply_batch(&mut self, batch: CommitBatch) {
        let revision = batch.next_revision();
        for mutation in batch.mutations {
            match mutation {
                Mutation::InsertWorkout(row) | Mutation::UpdateWorkout(row) => {
                    self.workouts.insert(row.id, row);
                }
                Mutation::InsertExercise(row) | Mutation::UpdateExercise(row) => {
                    if !self.exercises.contains_key(&row.id) {
                        self.exercise_order
                            .entry(row.workout_id)
                            .or_default()
                            .push(row.id);
                    }
                    self.exercises.insert(row.id, row);
                }
                Mutation::InsertSet(row) | Mutation::UpdateSet(row) => {
                    if !self.sets.contains_key(&row.id) {
                        self.set_order
                            .entry(row.workout_exercise_id)
                            .or_default()
                            .push(row.id);
                    }
                    self.sets.insert(row.id, row);
                }
            }
        }

        if let Some(workout) = self.workouts.get_mut(&batch.workout_id) {
            workout.revision = revision;
            workout.updated_at = batch.committed_at;
        }
    }

    /// Every row of one workout, in insertion order.
    pub fn aggregate(&self, id: WorkoutId) -> Option<StoredAggregate> {
        let workout = self.workouts.get(&id)?.clone();
        let mut exercises = Vec::new();
        let mut sets = Vec::new();
        for exercise_id in self.exercise_order.get(&id).into_iter().flatten() {
            if let Some(exercise) = self.exercises.get(exercise_id) {
                exercises.push(exercise.clone());
            }
            for set_id in self.set_order.get(exercise_id).into_iter().flatten() {
                if let Some(set) = self.sets.get(set_id) {
                    sets.push(set.clone());
                }
            }
        }
        Some(StoredAggregate {
            workout: Some(workout),
            exercises,
            sets,
        })
    }

    pub fn list_workouts(&self, owner: UserId) -> Vec<WorkoutRow> {
        let mut rows: Vec<WorkoutRow> = self
            .workouts
            .values()
            .filter(|w| w.owner_id == owner && !w.state.is_deleted())
            .cloned()
            .collect();
        rows.sort_by(|a, b| {
            b.date
                .cmp(&a.date)
                .then_with(|| b.created_at.cmp(&a.created_at))
        });
        rows
    }

    pub fn exercise_history(&self, owner: UserId, exercise: ExerciseRef) -> Vec<HistoryEntry> {
        let mut workouts: Vec<&WorkoutRow> = self
            .workouts
            .values()
            .filter(|w| w.owner_id == owner && !w.state.is_deleted())
            .collect();
        workouts.sort_by(|a, b| {
            a.date
                .cmp(&b.date)
                .then_with(|| a.created_at.cmp(&b.created_at))
        });

        let mut entries = Vec::new();
        for workout in workouts {
            for exercise_id in self.exercise_order.get(&workout.id).into_iter().flatten() {
                let Some(row) = self.exercises.get(exercise_id) else {
                    continue;
                };
                if row.state.is_deleted() || row.exercise != exercise {
                    continue;
                }
                let sets = self
                    .set_order
                    .get(exercise_id)
                    .into_iter()
                    .flatten()
                    .filter_map(|id| self.sets.get(id))
                    .filter(|s| !s.state.is_deleted())
                    .map(|s| SetNode {
                        id: s.id,
                        weight: s.weight,
                        reps: s.reps,
                        rpe: s.rpe,
                    })
                    .collect();
                entries.push(HistoryEntry {
                    workout_id: workout.id,
                    workout_title: workout.title.clone(),
                    date: workout.date,
                    workout_exercise_id: row.id,
                    weight_unit: row.weight_unit,
                    sets,
                });
            }
        }
        entries
    }

    pub fn insert_catalog_exercise(&mut self, exercise: CatalogExercise) -> Result<(), StorageError> {
        if self.catalog.contains_key(&exercise.id) {
            return Err(StorageError::DuplicateExercise(exercise.id.to_string()));
        }
        self.catalog.insert(exercise.id, exercise);
        Ok(())
    }

    pub fn catalog_exercise(&self, id: CatalogExerciseId) -> Option<CatalogExercise> {
        self.catalog.get(&id).cloned()
    }

    pub fn insert_user_exercise(&mut self, exercise: UserExercise) -> Result<(), StorageError> {
        if self.user_exercises.contains_key(&exercise.id) {
            return Err(StorageError::DuplicateExercise(exercise.id.to_string()));
        }
        self.user_exercises.insert(exercise.id, exercise);
        Ok(())
    }

    pub fn user_exercise(&self, id: UserExerciseId) -> Option<UserExercise> {
        self.user_exercises.get(&id).cloned()
    }

    pub fn list_user_exercises(&self, owner: UserId) -> Vec<UserExercise> {
        let mut rows: Vec<UserExercise> = self
            .user_exercises
            .values()
            .filter(|e| e.owner_id == owner && !e.state.is_deleted())
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.name.cmp(&b.name));
        rows
    }

    #[cfg(feature = "persistent")]
    pub fn row_count(&self) -> usize {
        self.workouts.len() + self.exercises.len() + self.sets.len()
    }

    #[cfg(feature = "persistent")]
    pub fn snapshot(&self) -> TablesSnapshot {
        let mut snapshot = TablesSnapshot {
            workouts: self.workouts.values().cloned().collect(),
            catalog: self.catalog.values().cloned().collect(),
            user_exercises: self.user_exercises.values().cloned().collect(),
            ..TablesSnapshot::default()
        };
        for workout in &snapshot.workouts {
            for exercise_id in self.exercise_order.get(&workout.id).into_iter().flatten() {
                let Some(exercise) = self.exercises.get(exercise_id) else {
                    continue;
                };
                snapshot.exercises.push(exercise.clone());
                for set_id in self.set_order.get(exercise_id).into_iter().flatten() {
                    if let Some(set) = self.sets.get(set_id) {
                        snapshot.sets.push(set.clone());
                    }
                }
            }
        }
        snapshot
    }

    #[cfg(feature = "persistent")]
    pub fn from_snapshot(snapshot: TablesSnapshot) -> Self {
        let mut tables = Self::default();
        for row in snapshot.workouts {
            tables.workouts.insert(row.id, row);
        }
        for row in snapshot.exercises {
            tables
                .exercise_order
                .entry(row.workout_id)
                .or_default()
                .push(row.id);
            tables.exercises.insert(row.id, row);
        }
        for row in snapshot.sets {
            tables
                .set_order
                .entry(row.workout_exercise_id)
                .or_default()
                .push(row.id);
            tables.sets.insert(row.id, row);
        }
        for row in snapshot.catalog {
            tables.catalog.insert(row.id, row);
        }
        for row in snapshot.user_exercises {
            tables.user_exercises.insert(row.id, row);
        }
        tables
    }
}
