//! Reconciliation of a submitted workout against its persisted aggregate.
//!
//! [`ReconciliationPlanner::plan`] is pure. It compares the rows a store
//! returned (soft-deleted ones included) with a validated submission and
//! produces a [`ChangePlan`]: creates, updates and soft deletes at each of
//! the three levels, in an order the persister can apply front to back.
//!
//! Per level the rules are:
//! - an incoming child with an identity must match a persisted child of the
//!   same parent; it is updated and, if it was deleted, resurrected
//! - an incoming child without an identity is created under its parent
//! - a persisted child missing from the submission is soft deleted, and a
//!   dropped exercise takes its active sets with it
//!
//! Identities of rows created by the plan are not known until the persister
//! asks the store for them, so creates carry a [`PlanKey`] and children refer
//! to new parents through [`ParentRef::Planned`].

use std::collections::{HashMap, HashSet};
use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::aggregate::{ExerciseRow, SetRow, StoredAggregate, WorkoutRow};
use crate::error::{LedgerError, LedgerResult, ValidationError};
use crate::id::{SetId, WorkoutExerciseId, WorkoutId};
use crate::validation::{ValidatedExercise, ValidatedSet, ValidatedWorkout};
use crate::workout::{EntityLevel, ExerciseRef, WeightUnit};

/// Handle for a row created by a plan, unique within that plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PlanKey(pub u32);

impl fmt::Display for PlanKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "new#{}", self.0)
    }
}

/// Parent of a planned row: already persisted, or created earlier in the plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParentRef<I> {
    Existing(I),
    Planned(PlanKey),
}

impl<I: fmt::Display> fmt::Display for ParentRef<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Existing(id) => id.fmt(f),
            Self::Planned(key) => key.fmt(f),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkoutFields {
    pub title: String,
    pub notes: String,
    pub date: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExerciseFields {
    pub exercise: ExerciseRef,
    pub notes: String,
    pub weight_unit: WeightUnit,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SetFields {
    pub weight: Option<f64>,
    pub reps: Option<u32>,
    pub rpe: Option<f64>,
}

impl From<&WorkoutRow> for WorkoutFields {
    fn from(row: &WorkoutRow) -> Self {
        Self {
            title: row.title.clone(),
            notes: row.notes.clone(),
            date: row.date,
        }
    }
}

impl From<&ExerciseRow> for ExerciseFields {
    fn from(row: &ExerciseRow) -> Self {
        Self {
            exercise: row.exercise,
            notes: row.notes.clone(),
            weight_unit: row.weight_unit,
        }
    }
}

impl From<&SetRow> for SetFields {
    fn from(row: &SetRow) -> Self {
        Self {
            weight: row.weight,
            reps: row.reps,
            rpe: row.rpe,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Create,
    Update,
    SoftDelete,
}

/// One step of a [`ChangePlan`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum PlannedOp {
    CreateWorkout {
        key: PlanKey,
        fields: WorkoutFields,
    },
    UpdateWorkout {
        id: WorkoutId,
        fields: WorkoutFields,
    },
    SoftDeleteWorkout {
        id: WorkoutId,
    },
    CreateExercise {
        key: PlanKey,
        workout: ParentRef<WorkoutId>,
        fields: ExerciseFields,
    },
    UpdateExercise {
        id: WorkoutExerciseId,
        workout: WorkoutId,
        fields: ExerciseFields,
        /// The row was soft deleted and comes back with this update.
        resurrects: bool,
    },
    SoftDeleteExercise {
        id: WorkoutExerciseId,
        workout: WorkoutId,
    },
    CreateSet {
        key: PlanKey,
        exercise: ParentRef<WorkoutExerciseId>,
        fields: SetFields,
    },
    UpdateSet {
        id: SetId,
        exercise: WorkoutExerciseId,
        fields: SetFields,
        resurrects: bool,
    },
    SoftDeleteSet {
        id: SetId,
        exercise: WorkoutExerciseId,
    },
}

impl PlannedOp {
    #[must_use]
    pub const fn kind(&self) -> ChangeKind {
        match self {
            Self::CreateWorkout { .. } | Self::CreateExercise { .. } | Self::CreateSet { .. } => {
                ChangeKind::Create
            }
            Self::UpdateWorkout { .. } | Self::UpdateExercise { .. } | Self::UpdateSet { .. } => {
                ChangeKind::Update
            }
            Self::SoftDeleteWorkout { .. }
            | Self::SoftDeleteExercise { .. }
            | Self::SoftDeleteSet { .. } => ChangeKind::SoftDelete,
        }
    }

    #[must_use]
    pub const fn level(&self) -> EntityLevel {
        match self {
            Self::CreateWorkout { .. }
            | Self::UpdateWorkout { .. }
            | Self::SoftDeleteWorkout { .. } => EntityLevel::Workout,
            Self::CreateExercise { .. }
            | Self::UpdateExercise { .. }
            | Self::SoftDeleteExercise { .. } => EntityLevel::WorkoutExercise,
            Self::CreateSet { .. } | Self::UpdateSet { .. } | Self::SoftDeleteSet { .. } => {
                EntityLevel::Set
            }
        }
    }

    /// Persisted identity or plan key of the row, for logs and errors.
    #[must_use]
    pub fn target(&self) -> String {
        match self {
            Self::CreateWorkout { key, .. }
            | Self::CreateExercise { key, .. }
            | Self::CreateSet { key, .. } => key.to_string(),
            Self::UpdateWorkout { id, .. } | Self::SoftDeleteWorkout { id } => id.to_string(),
            Self::UpdateExercise { id, .. } | Self::SoftDeleteExercise { id, .. } => id.to_string(),
            Self::UpdateSet { id, .. } | Self::SoftDeleteSet { id, .. } => id.to_string(),
        }
    }
}

/// Operation counts of a plan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanSummary {
    pub creates: usize,
    pub updates: usize,
    pub soft_deletes: usize,
    pub resurrections: usize,
}

/// Ordered operations that move a persisted aggregate to a submitted one.
///
/// Creates of a parent always precede creates of its children.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangePlan {
    /// The workout the plan commits against.
    pub workout: ParentRef<WorkoutId>,
    /// Revision the plan was computed from; `None` for a new workout.
    pub base_revision: Option<u64>,
    pub ops: Vec<PlannedOp>,
}

impl ChangePlan {
    /// Plan that soft deletes a persisted workout, leaving its children alone.
    #[must_use]
    pub fn soft_delete(workout: &WorkoutRow) -> Self {
        Self {
            workout: ParentRef::Existing(workout.id),
            base_revision: Some(workout.revision),
            ops: vec![PlannedOp::SoftDeleteWorkout { id: workout.id }],
        }
    }

    #[must_use]
    pub const fn creates_workout(&self) -> bool {
        matches!(self.workout, ParentRef::Planned(_))
    }

    #[must_use]
    pub fn summary(&self) -> PlanSummary {
        let mut summary = PlanSummary::default();
        for op in &self.ops {
            match op.kind() {
                ChangeKind::Create => summary.creates += 1,
                ChangeKind::Update => summary.updates += 1,
                ChangeKind::SoftDelete => summary.soft_deletes += 1,
            }
            if matches!(
                op,
                PlannedOp::UpdateExercise { resurrects: true, .. }
                    | PlannedOp::UpdateSet { resurrects: true, .. }
            ) {
                summary.resurrections += 1;
            }
        }
        summary
    }

    /// Operations at one level, in plan order.
    pub fn ops_at(&self, level: EntityLevel) -> impl Iterator<Item = &PlannedOp> {
        self.ops.iter().filter(move |op| op.level() == level)
    }
}

/// Computes [`ChangePlan`]s. Holds no state.
#[derive(Debug, Default, Clone, Copy)]
pub struct ReconciliationPlanner;

impl ReconciliationPlanner {
    /// Plan the changes that turn `persisted` into `incoming`.
    ///
    /// `persisted` must be empty when `incoming` has no identity, and must
    /// hold the active workout named by `incoming.id` otherwise.
    ///
    /// # Errors
    /// - `Validation` if an identity appears twice in the submission
    /// - `Reference` if an identity is not a persisted child of its parent
    /// - `NotFound` if `persisted` does not hold the submitted workout
    pub fn plan(persisted: &StoredAggregate, incoming: &ValidatedWorkout) -> LedgerResult<ChangePlan> {
        check_unique_identities(incoming)?;
        let mut builder = PlanBuilder::default();

        let Some(workout_id) = incoming.id else {
            let key = builder.next_key();
            builder.ops.push(PlannedOp::CreateWorkout {
                key,
                fields: incoming.fields.clone(),
            });
            for (i, exercise) in incoming.exercises.iter().enumerate() {
                builder.create_exercise(ParentRef::Planned(key), i, exercise)?;
            }
            return Ok(ChangePlan {
                workout: ParentRef::Planned(key),
                base_revision: None,
                ops: builder.ops,
            });
        };

        let row = persisted
            .workout
            .as_ref()
            .filter(|row| row.id == workout_id && !row.state.is_deleted())
            .ok_or_else(|| LedgerError::not_found("workout", workout_id))?;

        builder.ops.push(PlannedOp::UpdateWorkout {
            id: workout_id,
            fields: incoming.fields.clone(),
        });

        let persisted_exercises = persisted.exercise_map();
        let mut kept: HashSet<WorkoutExerciseId> = HashSet::new();
        let mut new_exercises = Vec::new();

        for (i, exercise) in incoming.exercises.iter().enumerate() {
            let Some(id) = exercise.id else {
                new_exercises.push((i, exercise));
                continue;
            };
            let stored = persisted_exercises
                .get(&id)
                .filter(|row| row.workout_id == workout_id)
                .ok_or_else(|| reference(EntityLevel::WorkoutExercise, id, workout_id))?;
            kept.insert(id);

            builder.ops.push(PlannedOp::UpdateExercise {
                id,
                workout: workout_id,
                fields: exercise.fields.clone(),
                resurrects: stored.state.is_deleted(),
            });
            builder.reconcile_sets(persisted, id, &exercise.sets)?;
        }

        for stored in &persisted.exercises {
            if !kept.contains(&stored.id) && !stored.state.is_deleted() {
                builder.ops.push(PlannedOp::SoftDeleteExercise {
                    id: stored.id,
                    workout: workout_id,
                });
                builder.soft_delete_sets(persisted, stored.id);
            }
        }

        for (i, exercise) in new_exercises {
            builder.create_exercise(ParentRef::Existing(workout_id), i, exercise)?;
        }

        Ok(ChangePlan {
            workout: ParentRef::Existing(workout_id),
            base_revision: Some(row.revision),
            ops: builder.ops,
        })
    }
}

#[derive(Default)]
struct PlanBuilder {
    ops: Vec<PlannedOp>,
    next_key: u32,
}

impl PlanBuilder {
    fn next_key(&mut self) -> PlanKey {
        let key = PlanKey(self.next_key);
        self.next_key += 1;
        key
    }

    /// Create an exercise and all of its sets. None of them may carry an
    /// identity, since nothing can be persisted under a row that does not
    /// exist yet.
    fn create_exercise(
        &mut self,
        workout: ParentRef<WorkoutId>,
        index: usize,
        exercise: &ValidatedExercise,
    ) -> LedgerResult<()> {
        if let Some(id) = exercise.id {
            return Err(reference(EntityLevel::WorkoutExercise, id, workout));
        }
        let key = self.next_key();
        self.ops.push(PlannedOp::CreateExercise {
            key,
            workout,
            fields: exercise.fields.clone(),
        });
        for set in &exercise.sets {
            if let Some(id) = set.id {
                return Err(reference(
                    EntityLevel::Set,
                    id,
                    format!("exercises[{index}] ({key})"),
                ));
            }
            let set_key = self.next_key();
            self.ops.push(PlannedOp::CreateSet {
                key: set_key,
                exercise: ParentRef::Planned(key),
                fields: set.fields,
            });
        }
        Ok(())
    }

    /// Soft delete every active set of an exercise that left the workout.
    fn soft_delete_sets(&mut self, persisted: &StoredAggregate, exercise_id: WorkoutExerciseId) {
        for row in persisted.sets_of(exercise_id).filter(|s| !s.state.is_deleted()) {
            self.ops.push(PlannedOp::SoftDeleteSet {
                id: row.id,
                exercise: exercise_id,
            });
        }
    }

    fn reconcile_sets(
        &mut self,
        persisted: &StoredAggregate,
        exercise_id: WorkoutExerciseId,
        incoming: &[ValidatedSet],
    ) -> LedgerResult<()> {
        let stored: HashMap<SetId, &SetRow> =
            persisted.sets_of(exercise_id).map(|s| (s.id, s)).collect();
        let mut kept: HashSet<SetId> = HashSet::new();
        let mut created = Vec::new();

        for set in incoming {
            let Some(id) = set.id else {
                created.push(set.fields);
                continue;
            };
            let row = stored
                .get(&id)
                .ok_or_else(|| reference(EntityLevel::Set, id, exercise_id))?;
            kept.insert(id);
            self.ops.push(PlannedOp::UpdateSet {
                id,
                exercise: exercise_id,
                fields: set.fields,
                resurrects: row.state.is_deleted(),
            });
        }

        for row in persisted.sets_of(exercise_id) {
            if !kept.contains(&row.id) && !row.state.is_deleted() {
                self.ops.push(PlannedOp::SoftDeleteSet {
                    id: row.id,
                    exercise: exercise_id,
                });
            }
        }

        for fields in created {
            let key = self.next_key();
            self.ops.push(PlannedOp::CreateSet {
                key,
                exercise: ParentRef::Existing(exercise_id),
                fields,
            });
        }
        Ok(())
    }
}

fn reference(level: EntityLevel, id: impl ToString, parent: impl ToString) -> LedgerError {
    LedgerError::Reference {
        level,
        id: id.to_string(),
        parent: parent.to_string(),
    }
}

fn check_unique_identities(incoming: &ValidatedWorkout) -> Result<(), ValidationError> {
    let mut exercises = HashSet::new();
    let mut sets = HashSet::new();
    for (i, exercise) in incoming.exercises.iter().enumerate() {
        if let Some(id) = exercise.id {
            if !exercises.insert(id) {
                return Err(duplicate(format!("exercises[{i}].id"), id));
            }
        }
        for (j, set) in exercise.sets.iter().enumerate() {
            if let Some(id) = set.id {
                if !sets.insert(id) {
                    return Err(duplicate(format!("exercises[{i}].sets[{j}].id"), id));
                }
            }
        }
    }
    Ok(())
}

fn duplicate(field: String, id: impl fmt::Display) -> ValidationError {
    ValidationError::InvalidField {
        field,
        reason: format!("identity {id} appears more than once"),
    }
}
