//! # liftledger - workout aggregate reconciliation and persistence
//!
//! A workout is a three-level aggregate: the workout itself, the exercises
//! performed in it, and the sets of each exercise. Clients submit the whole
//! tree on every save, with identities on the nodes they loaded earlier and
//! without identities on new ones. The engine reconciles that submission with
//! the persisted rows and commits creates, updates and soft deletes as one
//! atomic unit.
//!
//! ## Core Concepts
//!
//! - **Draft**: the tree a client submits ([`WorkoutDraft`])
//! - **Aggregate**: every persisted row of one workout, deleted ones included
//! - **Change plan**: the ordered operations that turn the aggregate into the
//!   draft ([`ChangePlan`])
//! - **Soft delete**: rows missing from a draft are marked deleted, never
//!   removed, so history survives
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use chrono::NaiveDate;
//! use liftledger::{
//!     CatalogExercise, ExerciseDraft, ExerciseRef, InMemoryWorkoutStore, SetDraft, UserId,
//!     WorkoutDraft, WorkoutEngine, WorkoutStore,
//! };
//!
//! let store = Arc::new(InMemoryWorkoutStore::new());
//! let squat = CatalogExercise::new("Back Squat");
//! let squat_ref = ExerciseRef::Catalog(squat.id);
//! store.insert_catalog_exercise(squat)?;
//!
//! let engine = WorkoutEngine::with_store(store);
//! let owner = UserId::new();
//! let saved = engine.reconcile_and_save(
//!     owner,
//!     &WorkoutDraft::new("Leg day", NaiveDate::from_ymd_opt(2024, 4, 2).unwrap())
//!         .exercise(ExerciseDraft::new(squat_ref).set(SetDraft::new(Some(140.0), Some(5), Some(8.0)))),
//! )?;
//!
//! // Edit the saved tree and submit it again: known rows are updated in place.
//! let mut draft = saved.to_draft();
//! draft.exercises[0].sets[0].reps = Some(6);
//! engine.reconcile_and_save(owner, &draft)?;
//! ```

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod aggregate;
pub mod catalog;
pub mod config;
pub mod engine;
pub mod error;
pub mod id;
pub mod ownership;
pub mod plan;
pub mod storage;
pub mod validation;
pub mod workout;

pub use aggregate::{ExerciseRow, SetRow, StoredAggregate, WorkoutRow};
pub use catalog::{
    CatalogExercise, ExerciseResolver, ResolvedExercise, StoreExerciseResolver, UserExercise,
};
pub use config::{EngineConfig, RuntimeConfig};
pub use engine::runtime::{LedgerRequest, LedgerResponse, LedgerRuntime, PendingRequest};
pub use engine::{AggregateLoader, AggregatePersister, CancelToken, WorkoutEngine};
pub use error::{LedgerError, LedgerResult, ValidationError};
pub use id::{
    CatalogExerciseId, SetId, UserExerciseId, UserId, WorkoutExerciseId, WorkoutId,
};
pub use ownership::OwnershipGuard;
pub use plan::{
    ChangeKind, ChangePlan, ExerciseFields, ParentRef, PlanKey, PlanSummary, PlannedOp,
    ReconciliationPlanner, SetFields, WorkoutFields,
};
pub use storage::{
    CommitBatch, HistoryEntry, IdentityGenerator, InMemoryWorkoutStore, Mutation,
    RandomIdentities, SequentialIdentities, StorageError, WorkoutStore,
};
pub use validation::{ValidatedExercise, ValidatedSet, ValidatedWorkout, ValidationGate};
pub use workout::{
    EntityLevel, ExerciseDraft, ExerciseNode, ExerciseRef, RowState, SetDraft, SetNode,
    WeightUnit, WorkoutDraft, WorkoutTree,
};

#[cfg(feature = "persistent")]
pub use storage::{open_ledger, PersistentConfig, PersistentWorkoutStore};
