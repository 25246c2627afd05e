//! Write side of a reconciliation.
//!
//! [`AggregatePersister::apply`] turns a [`ChangePlan`] into one
//! [`CommitBatch`]. Plan keys are resolved to store-issued identities in plan
//! order, which places every parent create before its children. The store
//! commits the batch atomically and rechecks the base revision under its
//! write lock.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::aggregate::{ExerciseRow, SetRow, StoredAggregate, WorkoutRow};
use crate::error::{LedgerError, LedgerResult};
use crate::id::{SetId, UserId, WorkoutExerciseId, WorkoutId};
use crate::plan::{ChangePlan, ParentRef, PlanKey, PlannedOp};
use crate::storage::{CommitBatch, Mutation, WorkoutStore};
use crate::workout::{EntityLevel, RowState};

/// Applies change plans as single atomic commits.
#[derive(Clone)]
pub struct AggregatePersister {
    store: Arc<dyn WorkoutStore>,
}

struct KeyMap<'a> {
    store: &'a dyn WorkoutStore,
    issued: HashMap<PlanKey, Uuid>,
}

impl KeyMap<'_> {
    fn issue(&mut self, key: PlanKey) -> Uuid {
        let id = self.store.issue_identity();
        self.issued.insert(key, id);
        id
    }

    fn resolve<I: From<Uuid>>(&self, parent: ParentRef<I>) -> LedgerResult<I> {
        match parent {
            ParentRef::Existing(id) => Ok(id),
            ParentRef::Planned(key) => self
                .issued
                .get(&key)
                .copied()
                .map(I::from)
                .ok_or_else(|| LedgerError::internal(format!("plan key {key} used before its create"))),
        }
    }
}

fn vanished(level: EntityLevel, id: impl ToString) -> LedgerError {
    LedgerError::Persistence {
        level: Some(level),
        id: Some(id.to_string()),
        message: "row missing from the loaded aggregate".to_string(),
    }
}

impl AggregatePersister {
    #[must_use]
    pub fn new(store: Arc<dyn WorkoutStore>) -> Self {
        Self { store }
    }

    /// Commit `plan`, computed from `persisted`, on behalf of `owner`.
    ///
    /// Returns every row of the workout as committed.
    ///
    /// # Errors
    /// - `Conflict` if the workout changed since `persisted` was loaded
    /// - `Persistence` for any other storage failure; nothing is written
    pub fn apply(
        &self,
        owner: UserId,
        persisted: &StoredAggregate,
        plan: ChangePlan,
    ) -> LedgerResult<StoredAggregate> {
        let batch = self.build_batch(owner, persisted, plan)?;
        let workout_id = batch.workout_id;
        let mutations = batch.mutations.len();

        match self.store.commit(batch) {
            Ok(committed) => {
                tracing::info!(
                    %workout_id,
                    revision = ?committed.revision(),
                    mutations,
                    "committed workout"
                );
                Ok(committed)
            }
            Err(e) => {
                let err = LedgerError::from(e);
                if err.is_conflict() {
                    tracing::warn!(%workout_id, error = %err, "commit lost a concurrent update");
                } else {
                    tracing::error!(%workout_id, error = %err, "commit failed, workout unchanged");
                }
                Err(err)
            }
        }
    }

    fn build_batch(
        &self,
        owner: UserId,
        persisted: &StoredAggregate,
        plan: ChangePlan,
    ) -> LedgerResult<CommitBatch> {
        let now = Utc::now();
        let exercises = persisted.exercise_map();
        let sets = persisted.set_map();
        let mut keys = KeyMap {
            store: self.store.as_ref(),
            issued: HashMap::new(),
        };
        let mut mutations = Vec::with_capacity(plan.ops.len());

        for op in plan.ops {
            let mutation = match op {
                PlannedOp::CreateWorkout { key, fields } => Mutation::InsertWorkout(WorkoutRow {
                    id: WorkoutId::from(keys.issue(key)),
                    owner_id: owner,
                    title: fields.title,
                    notes: fields.notes,
                    date: fields.date,
                    state: RowState::Active,
                    revision: 0,
                    created_at: now,
                    updated_at: now,
                }),
                PlannedOp::UpdateWorkout { id, fields } => {
                    let row = persisted
                        .workout
                        .as_ref()
                        .filter(|w| w.id == id)
                        .ok_or_else(|| vanished(EntityLevel::Workout, id))?;
                    Mutation::UpdateWorkout(WorkoutRow {
                        title: fields.title,
                        notes: fields.notes,
                        date: fields.date,
                        ..row.clone()
                    })
                }
                PlannedOp::SoftDeleteWorkout { id } => {
                    let row = persisted
                        .workout
                        .as_ref()
                        .filter(|w| w.id == id)
                        .ok_or_else(|| vanished(EntityLevel::Workout, id))?;
                    Mutation::UpdateWorkout(WorkoutRow {
                        state: RowState::Deleted,
                        ..row.clone()
                    })
                }
                PlannedOp::CreateExercise { key, workout, fields } => {
                    let workout_id = keys.resolve(workout)?;
                    Mutation::InsertExercise(ExerciseRow {
                        id: WorkoutExerciseId::from(keys.issue(key)),
                        workout_id,
                        exercise: fields.exercise,
                        notes: fields.notes,
                        weight_unit: fields.weight_unit,
                        state: RowState::Active,
                    })
                }
                PlannedOp::UpdateExercise { id, workout, fields, .. } => {
                    Mutation::UpdateExercise(ExerciseRow {
                        id,
                        workout_id: workout,
                        exercise: fields.exercise,
                        notes: fields.notes,
                        weight_unit: fields.weight_unit,
                        state: RowState::Active,
                    })
                }
                PlannedOp::SoftDeleteExercise { id, .. } => {
                    let row = exercises
                        .get(&id)
                        .ok_or_else(|| vanished(EntityLevel::WorkoutExercise, id))?;
                    Mutation::UpdateExercise(ExerciseRow {
                        state: RowState::Deleted,
                        ..(*row).clone()
                    })
                }
                PlannedOp::CreateSet { key, exercise, fields } => {
                    let workout_exercise_id = keys.resolve(exercise)?;
                    Mutation::InsertSet(SetRow {
                        id: SetId::from(keys.issue(key)),
                        workout_exercise_id,
                        weight: fields.weight,
                        reps: fields.reps,
                        rpe: fields.rpe,
                        state: RowState::Active,
                    })
                }
                PlannedOp::UpdateSet { id, exercise, fields, .. } => Mutation::UpdateSet(SetRow {
                    id,
                    workout_exercise_id: exercise,
                    weight: fields.weight,
                    reps: fields.reps,
                    rpe: fields.rpe,
                    state: RowState::Active,
                }),
                PlannedOp::SoftDeleteSet { id, .. } => {
                    let row = sets.get(&id).ok_or_else(|| vanished(EntityLevel::Set, id))?;
                    Mutation::UpdateSet(SetRow {
                        state: RowState::Deleted,
                        ..(*row).clone()
                    })
                }
            };
            mutations.push(mutation);
        }

        Ok(CommitBatch {
            workout_id: keys.resolve(plan.workout)?,
            expected_revision: plan.base_revision,
            committed_at: now,
            mutations,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    use crate::id::CatalogExerciseId;
    use crate::plan::{ExerciseFields, SetFields, WorkoutFields};
    use crate::storage::{InMemoryWorkoutStore, SequentialIdentities};
    use crate::workout::{ExerciseRef, WeightUnit};

    fn create_plan() -> ChangePlan {
        let (w, e, s) = (PlanKey(0), PlanKey(1), PlanKey(2));
        ChangePlan {
            workout: ParentRef::Planned(w),
            base_revision: None,
            ops: vec![
                PlannedOp::CreateWorkout {
                    key: w,
                    fields: WorkoutFields {
                        title: "Deadlift".to_string(),
                        notes: String::new(),
                        date: NaiveDate::from_ymd_opt(2024, 8, 8).unwrap(),
                    },
                },
                PlannedOp::CreateExercise {
                    key: e,
                    workout: ParentRef::Planned(w),
                    fields: ExerciseFields {
                        exercise: ExerciseRef::Catalog(CatalogExerciseId::new()),
                        notes: String::new(),
                        weight_unit: WeightUnit::Kg,
                    },
                },
                PlannedOp::CreateSet {
                    key: s,
                    exercise: ParentRef::Planned(e),
                    fields: SetFields {
                        weight: Some(180.0),
                        reps: Some(3),
                        rpe: Some(8.5),
                    },
                },
            ],
        }
    }

    #[test]
    fn test_generated_identities_thread_into_children() {
        let store = Arc::new(InMemoryWorkoutStore::with_identities(Arc::new(
            SequentialIdentities::starting_at(100),
        )));
        let persister = AggregatePersister::new(store);
        let owner = UserId::new();

        let committed = persister
            .apply(owner, &StoredAggregate::empty(), create_plan())
            .unwrap();

        let workout = committed.workout.as_ref().unwrap();
        assert_eq!(workout.id, WorkoutId::from(Uuid::from_u128(100)));
        assert_eq!(workout.owner_id, owner);
        assert_eq!(committed.exercises[0].workout_id, workout.id);
        assert_eq!(committed.sets[0].workout_exercise_id, committed.exercises[0].id);
        assert_eq!(committed.sets[0].id, SetId::from(Uuid::from_u128(102)));
    }

    #[test]
    fn test_stale_base_revision_is_conflict() {
        let store = Arc::new(InMemoryWorkoutStore::new());
        let persister = AggregatePersister::new(store);
        let owner = UserId::new();
        let committed = persister
            .apply(owner, &StoredAggregate::empty(), create_plan())
            .unwrap();
        let row = committed.workout.clone().unwrap();

        persister
            .apply(owner, &committed, ChangePlan::soft_delete(&row))
            .unwrap();
        let err = persister
            .apply(owner, &committed, ChangePlan::soft_delete(&row))
            .unwrap_err();
        assert!(err.is_conflict());
        assert!(err.is_retryable());
    }

    #[test]
    fn test_unresolved_plan_key_is_internal() {
        let store = Arc::new(InMemoryWorkoutStore::new());
        let persister = AggregatePersister::new(store);
        let mut plan = create_plan();
        plan.ops.remove(0);
        let err = persister
            .apply(UserId::new(), &StoredAggregate::empty(), plan)
            .unwrap_err();
        assert!(matches!(err, LedgerError::Internal { .. }));
    }
}
