//! In-memory storage backend.
//!
//! Thread-safe implementation of [`WorkoutStore`] over [`WorkoutTables`].
//! It is intended for embedded usage, tests, and as a reference implementation.

use std::sync::{Arc, RwLock};

use uuid::Uuid;

use crate::aggregate::{StoredAggregate, WorkoutRow};
use crate::catalog::{CatalogExercise, UserExercise};
use crate::id::{CatalogExerciseId, UserExerciseId, UserId, WorkoutId};
use crate::storage::identity::{IdentityGenerator, RandomIdentities};
use crate::storage::tables::WorkoutTables;
use crate::storage::traits::{CommitBatch, HistoryEntry, StorageError, WorkoutStore};
use crate::workout::ExerciseRef;

fn lock_err(context: &'static str) -> StorageError {
    StorageError::Backend(format!("poisoned lock: {context}"))
}

/// Thread-safe in-memory workout store.
#[derive(Debug)]
pub struct InMemoryWorkoutStore {
    state: RwLock<WorkoutTables>,
    identities: Arc<dyn IdentityGenerator>,
}

impl Default for InMemoryWorkoutStore {
    fn default() -> Self {
        Self::with_identities(Arc::new(RandomIdentities))
    }
}

impl InMemoryWorkoutStore {
    /// Create a new empty store issuing random identities.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new empty store with an explicit identity generator.
    #[must_use]
    pub fn with_identities(identities: Arc<dyn IdentityGenerator>) -> Self {
        Self {
            state: RwLock::new(WorkoutTables::default()),
            identities,
        }
    }
}

impl WorkoutStore for InMemoryWorkoutStore {
    fn issue_identity(&self) -> Uuid {
        self.identities.next_identity()
    }

    fn load_aggregate(&self, id: WorkoutId) -> Result<Option<StoredAggregate>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("workout.load"))?;
        Ok(state.aggregate(id))
    }

    fn list_workouts(&self, owner: UserId) -> Result<Vec<WorkoutRow>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("workout.list"))?;
        Ok(state.list_workouts(owner))
    }

    fn commit(&self, batch: CommitBatch) -> Result<StoredAggregate, StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("workout.commit"))?;
        state.check_batch(&batch)?;
        let workout_id = batch.workout_id;
        state.apply_batch(batch);
        state.aggregate(workout_id).ok_or_else(|| {
            StorageError::Backend(format!("workout {workout_id} missing after commit"))
        })
    }

    fn exercise_history(
        &self,
        owner: UserId,
        exercise: ExerciseRef,
    ) -> Result<Vec<HistoryEntry>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("workout.history"))?;
        Ok(state.exercise_history(owner, exercise))
    }

    fn insert_catalog_exercise(&self, exercise: CatalogExercise) -> Result<(), StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("catalog.insert"))?;
        state.insert_catalog_exercise(exercise)
    }

    fn get_catalog_exercise(
        &self,
        id: CatalogExerciseId,
    ) -> Result<Option<CatalogExercise>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("catalog.get"))?;
        Ok(state.catalog_exercise(id))
    }

    fn insert_user_exercise(&self, exercise: UserExercise) -> Result<(), StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("user_exercise.insert"))?;
        state.insert_user_exercise(exercise)
    }

    fn get_user_exercise(&self, id: UserExerciseId) -> Result<Option<UserExercise>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("user_exercise.get"))?;
        Ok(state.user_exercise(id))
    }

    fn list_user_exercises(&self, owner: UserId) -> Result<Vec<UserExercise>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("user_exercise.list"))?;
        Ok(state.list_user_exercises(owner))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, Utc};

    use crate::aggregate::ExerciseRow;
    use crate::id::WorkoutExerciseId;
    use crate::storage::identity::SequentialIdentities;
    use crate::storage::traits::Mutation;
    use crate::workout::{RowState, WeightUnit};

    fn new_workout(owner: UserId) -> WorkoutRow {
        let now = Utc::now();
        WorkoutRow {
            id: WorkoutId::new(),
            owner_id: owner,
            title: "Conditioning".to_string(),
            notes: String::new(),
            date: NaiveDate::from_ymd_opt(2024, 2, 29).unwrap(),
            state: RowState::Active,
            revision: 0,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_commit_then_load() {
        let store = InMemoryWorkoutStore::new();
        let owner = UserId::new();
        let workout = new_workout(owner);
        let committed = store
            .commit(CommitBatch {
                workout_id: workout.id,
                expected_revision: None,
                committed_at: Utc::now(),
                mutations: vec![Mutation::InsertWorkout(workout.clone())],
            })
            .unwrap();
        assert_eq!(committed.revision(), Some(1));

        let loaded = store.load_aggregate(workout.id).unwrap().unwrap();
        assert_eq!(loaded, committed);
        assert_eq!(store.list_workouts(owner).unwrap().len(), 1);
        assert!(store.list_workouts(UserId::new()).unwrap().is_empty());
    }

    #[test]
    fn test_failed_commit_leaves_no_trace() {
        let store = InMemoryWorkoutStore::new();
        let workout = new_workout(UserId::new());
        let orphan = ExerciseRow {
            id: WorkoutExerciseId::new(),
            workout_id: WorkoutId::new(),
            exercise: ExerciseRef::Catalog(CatalogExerciseId::new()),
            notes: String::new(),
            weight_unit: WeightUnit::Lbs,
            state: RowState::Active,
        };

        let result = store.commit(CommitBatch {
            workout_id: workout.id,
            expected_revision: None,
            committed_at: Utc::now(),
            mutations: vec![
                Mutation::InsertWorkout(workout.clone()),
                Mutation::InsertExercise(orphan),
            ],
        });
        assert!(matches!(result, Err(StorageError::ForeignParent { .. })));
        assert!(store.load_aggregate(workout.id).unwrap().is_none());
    }

    #[test]
    fn test_sequential_identities_are_used() {
        let store = InMemoryWorkoutStore::with_identities(Arc::new(SequentialIdentities::default()));
        assert_eq!(store.issue_identity(), Uuid::from_u128(1));
        assert_eq!(store.issue_identity(), Uuid::from_u128(2));
    }

    #[test]
    fn test_duplicate_catalog_exercise_rejected() {
        let store = InMemoryWorkoutStore::new();
        let squat = CatalogExercise::new("Back Squat");
        store.insert_catalog_exercise(squat.clone()).unwrap();
        assert!(matches!(
            store.insert_catalog_exercise(squat),
            Err(StorageError::DuplicateExercise(_))
        ));
    }
}
