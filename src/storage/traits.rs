//! Abstract storage traits for the ledger.
//!
//! These traits define the contract that storage backends must implement:
//! - In-memory backend for tests and embedded use
//! - Persistent (write-ahead logged) backend behind the `persistent` feature

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::aggregate::{ExerciseRow, SetRow, StoredAggregate, WorkoutRow};
use crate::catalog::{CatalogExercise, UserExercise};
use crate::id::{CatalogExerciseId, UserExerciseId, UserId, WorkoutExerciseId, WorkoutId};
use crate::workout::{EntityLevel, ExerciseRef, SetNode, WeightUnit};

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// A row a mutation expects to exist is missing.
    #[error("{level} not found: {id}")]
    NotFound { level: EntityLevel, id: String },

    /// A created row reuses an identity that is already taken.
    #[error("Duplicate {level} identity: {id}")]
    DuplicateKey { level: EntityLevel, id: String },

    /// A row is attached to a parent outside the committing workout.
    #[error("{level} {id} does not belong to {parent}")]
    ForeignParent {
        level: EntityLevel,
        id: String,
        parent: String,
    },

    /// The workout changed since the batch's base revision was loaded.
    #[error("Revision mismatch for workout {workout_id}: expected {expected:?}, found {actual:?}")]
    RevisionMismatch {
        workout_id: WorkoutId,
        expected: Option<u64>,
        actual: Option<u64>,
    },

    /// A catalog or user exercise identity is already taken.
    #[error("Duplicate exercise identity: {0}")]
    DuplicateExercise(String),

    /// Backend error.
    #[error("Storage backend error: {0}")]
    Backend(String),

    /// Serialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// One row-level change inside a [`CommitBatch`].
///
/// Soft deletes are updates whose row state is `Deleted`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", content = "row", rename_all = "snake_case")]
pub enum Mutation {
    InsertWorkout(WorkoutRow),
    UpdateWorkout(WorkoutRow),
    InsertExercise(ExerciseRow),
    UpdateExercise(ExerciseRow),
    InsertSet(SetRow),
    UpdateSet(SetRow),
}

impl Mutation {
    /// Level of the row this mutation touches.
    #[must_use]
    pub const fn level(&self) -> EntityLevel {
        match self {
            Self::InsertWorkout(_) | Self::UpdateWorkout(_) => EntityLevel::Workout,
            Self::InsertExercise(_) | Self::UpdateExercise(_) => EntityLevel::WorkoutExercise,
            Self::InsertSet(_) | Self::UpdateSet(_) => EntityLevel::Set,
        }
    }

    /// Identity of the row this mutation touches.
    #[must_use]
    pub fn row_id(&self) -> Uuid {
        match self {
            Self::InsertWorkout(row) | Self::UpdateWorkout(row) => row.id.into(),
            Self::InsertExercise(row) | Self::UpdateExercise(row) => row.id.into(),
            Self::InsertSet(row) | Self::UpdateSet(row) => row.id.into(),
        }
    }
}

/// Every row change of one reconciliation, applied all-or-nothing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitBatch {
    /// The workout whose aggregate is being changed.
    pub workout_id: WorkoutId,
    /// Revision the batch was planned against; `None` creates the workout.
    pub expected_revision: Option<u64>,
    /// Commit timestamp stamped on the workout row.
    pub committed_at: DateTime<Utc>,
    /// Row changes in dependency order.
    pub mutations: Vec<Mutation>,
}

impl CommitBatch {
    /// Revision the workout will carry once this batch is applied.
    #[must_use]
    pub fn next_revision(&self) -> u64 {
        self.expected_revision.map_or(1, |r| r + 1)
    }
}

/// One exercise entry as it appears in an exercise's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub workout_id: WorkoutId,
    pub workout_title: String,
    pub date: NaiveDate,
    pub workout_exercise_id: WorkoutExerciseId,
    pub weight_unit: WeightUnit,
    pub sets: Vec<SetNode>,
}

/// Storage trait for workout aggregates and the exercises they reference.
///
/// # Consistency
/// - `commit` is atomic: every mutation of the batch becomes visible or none does
/// - `commit` rejects a batch whose `expected_revision` differs from the
///   stored revision, which serializes writers per workout
pub trait WorkoutStore: Send + Sync {
    /// Issue a fresh row identity.
    fn issue_identity(&self) -> Uuid;

    /// Load every row of a workout, soft-deleted rows included.
    fn load_aggregate(&self, id: WorkoutId) -> Result<Option<StoredAggregate>, StorageError>;

    /// Active workouts of an owner, newest date first.
    fn list_workouts(&self, owner: UserId) -> Result<Vec<WorkoutRow>, StorageError>;

    /// Apply a batch atomically and return the aggregate as committed.
    fn commit(&self, batch: CommitBatch) -> Result<StoredAggregate, StorageError>;

    /// Active sets performed for an exercise across an owner's active workouts,
    /// oldest workout first.
    fn exercise_history(
        &self,
        owner: UserId,
        exercise: ExerciseRef,
    ) -> Result<Vec<HistoryEntry>, StorageError>;

    /// Add a catalog exercise.
    fn insert_catalog_exercise(&self, exercise: CatalogExercise) -> Result<(), StorageError>;

    /// Get a catalog exercise by ID.
    fn get_catalog_exercise(
        &self,
        id: CatalogExerciseId,
    ) -> Result<Option<CatalogExercise>, StorageError>;

    /// Add a user exercise.
    fn insert_user_exercise(&self, exercise: UserExercise) -> Result<(), StorageError>;

    /// Get a user exercise by ID (deleted ones included).
    fn get_user_exercise(&self, id: UserExerciseId) -> Result<Option<UserExercise>, StorageError>;

    /// Active user exercises of an owner, by name.
    fn list_user_exercises(&self, owner: UserId) -> Result<Vec<UserExercise>, StorageError>;
}
