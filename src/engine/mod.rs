//! Execution engine for workout requests.
//!
//! [`WorkoutEngine`] is a synchronous facade over pluggable storage. A save
//! runs the components in a fixed order:
//!
//! ```text
//! AggregateLoader -> OwnershipGuard -> ValidationGate -> OwnershipGuard (refs)
//!     -> ReconciliationPlanner -> [cancellation point] -> AggregatePersister
//! ```
//!
//! Everything before the persister is read-only, so any failure there leaves
//! the store untouched.

mod loader;
mod persister;

/// Bounded worker pool in front of the engine.
pub mod runtime;

pub use loader::AggregateLoader;
pub use persister::AggregatePersister;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::aggregate::{StoredAggregate, WorkoutRow};
use crate::catalog::{ExerciseResolver, StoreExerciseResolver, UserExercise};
use crate::config::EngineConfig;
use crate::error::{LedgerError, LedgerResult};
use crate::id::{UserId, WorkoutId};
use crate::ownership::OwnershipGuard;
use crate::plan::{ChangePlan, ReconciliationPlanner};
use crate::storage::{HistoryEntry, WorkoutStore};
use crate::validation::{validate_exercise_name, ValidationGate};
use crate::workout::{ExerciseRef, WorkoutDraft, WorkoutTree};

/// Cooperative cancellation flag shared with whoever may abort a request.
///
/// The engine checks it once, right before committing. A commit that has
/// started always runs to completion or fails as a whole.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Synchronous workout engine.
#[derive(Clone)]
pub struct WorkoutEngine {
    store: Arc<dyn WorkoutStore>,
    resolver: Arc<dyn ExerciseResolver>,
    loader: AggregateLoader,
    guard: OwnershipGuard,
    gate: ValidationGate,
    persister: AggregatePersister,
}

impl WorkoutEngine {
    /// Create an engine with explicit collaborators.
    #[must_use]
    pub fn new(
        store: Arc<dyn WorkoutStore>,
        resolver: Arc<dyn ExerciseResolver>,
        config: EngineConfig,
    ) -> Self {
        Self {
            loader: AggregateLoader::new(Arc::clone(&store)),
            guard: OwnershipGuard::new(Arc::clone(&resolver)),
            gate: ValidationGate::new(config),
            persister: AggregatePersister::new(Arc::clone(&store)),
            store,
            resolver,
        }
    }

    /// Engine resolving exercises from the store's own catalog tables.
    #[must_use]
    pub fn with_store(store: Arc<dyn WorkoutStore>) -> Self {
        let resolver = Arc::new(StoreExerciseResolver::new(Arc::clone(&store)));
        Self::new(store, resolver, EngineConfig::default())
    }

    /// Returns the underlying store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn WorkoutStore> {
        &self.store
    }

    /// Reconcile a submitted workout with its persisted version and save it.
    ///
    /// A draft without an identity creates a new workout owned by
    /// `requester`. Returns the saved tree with every identity filled in.
    ///
    /// # Errors
    /// `Validation`, `Unauthorized`, `NotFound`, `Reference`, `Conflict` or
    /// `Persistence`; in every case nothing was written.
    pub fn reconcile_and_save(
        &self,
        requester: UserId,
        draft: &WorkoutDraft,
    ) -> LedgerResult<WorkoutTree> {
        self.reconcile_and_save_cancellable(requester, draft, &CancelToken::new())
    }

    /// Like [`Self::reconcile_and_save`], abandoning the request with
    /// `Cancelled` if `token` fires before the commit begins.
    pub fn reconcile_and_save_cancellable(
        &self,
        requester: UserId,
        draft: &WorkoutDraft,
        token: &CancelToken,
    ) -> LedgerResult<WorkoutTree> {
        let (persisted, plan) = self.prepare(requester, draft)?;

        if token.is_cancelled() {
            tracing::info!(%requester, workout_id = ?draft.id, "save cancelled before commit");
            return Err(LedgerError::Cancelled);
        }

        let committed = self.persister.apply(requester, &persisted, plan)?;
        committed
            .to_tree()
            .ok_or_else(|| LedgerError::internal("committed workout is not visible"))
    }

    /// Compute the plan a save would commit, without writing anything.
    pub fn plan(&self, requester: UserId, draft: &WorkoutDraft) -> LedgerResult<ChangePlan> {
        self.prepare(requester, draft).map(|(_, plan)| plan)
    }

    fn prepare(
        &self,
        requester: UserId,
        draft: &WorkoutDraft,
    ) -> LedgerResult<(StoredAggregate, ChangePlan)> {
        let persisted = self.loader.load(draft.id)?;
        if let Some(row) = &persisted.workout {
            self.guard.check_workout(requester, row)?;
        }

        let validated = self.gate.validate(draft).map_err(|e| {
            tracing::debug!(%requester, field = e.field(), "rejected invalid workout");
            LedgerError::from(e)
        })?;
        self.guard.check_exercise_refs(requester, &validated)?;

        let plan = ReconciliationPlanner::plan(&persisted, &validated).map_err(|e| {
            if e.is_reference() {
                tracing::warn!(%requester, workout_id = ?draft.id, error = %e, "rejected stale or foreign identity");
            }
            e
        })?;

        let summary = plan.summary();
        tracing::debug!(
            workout_id = ?draft.id,
            base_revision = ?plan.base_revision,
            creates = summary.creates,
            updates = summary.updates,
            soft_deletes = summary.soft_deletes,
            resurrections = summary.resurrections,
            "planned reconciliation"
        );
        Ok((persisted, plan))
    }

    /// Load a workout owned by `requester`, without soft-deleted rows.
    ///
    /// # Errors
    /// `NotFound` for a missing or deleted workout, `Unauthorized` for a
    /// workout owned by someone else.
    pub fn load_workout(&self, requester: UserId, id: WorkoutId) -> LedgerResult<WorkoutTree> {
        let persisted = self.loader.load(Some(id))?;
        let row = persisted
            .workout
            .as_ref()
            .ok_or_else(|| LedgerError::not_found("workout", id))?;
        self.guard.check_workout(requester, row)?;
        persisted
            .to_tree()
            .ok_or_else(|| LedgerError::not_found("workout", id))
    }

    /// Soft delete a workout. Its exercises and sets are left as they are.
    ///
    /// # Errors
    /// `NotFound`, `Unauthorized`, `Conflict` or `Persistence`.
    pub fn soft_delete_workout(&self, requester: UserId, id: WorkoutId) -> LedgerResult<()> {
        let persisted = self.loader.load(Some(id))?;
        let row = persisted
            .workout
            .as_ref()
            .ok_or_else(|| LedgerError::not_found("workout", id))?;
        self.guard.check_workout(requester, row)?;

        let plan = ChangePlan::soft_delete(row);
        self.persister.apply(requester, &persisted, plan)?;
        tracing::info!(%requester, workout_id = %id, "soft deleted workout");
        Ok(())
    }

    /// Active workouts of `requester`, newest date first.
    pub fn list_workouts(&self, requester: UserId) -> LedgerResult<Vec<WorkoutRow>> {
        Ok(self.store.list_workouts(requester)?)
    }

    /// Create a user-defined exercise owned by `requester`.
    ///
    /// # Errors
    /// `Validation` for a blank name or one longer than 100 characters.
    pub fn create_user_exercise(
        &self,
        requester: UserId,
        name: &str,
    ) -> LedgerResult<UserExercise> {
        let name = validate_exercise_name(name)?;
        let mut exercise = UserExercise::new(requester, name);
        exercise.id = self.store.issue_identity().into();
        self.store.insert_user_exercise(exercise.clone())?;
        tracing::info!(%requester, exercise_id = %exercise.id, "created user exercise");
        Ok(exercise)
    }

    /// The requester's active user-defined exercises, by name.
    pub fn list_user_exercises(&self, requester: UserId) -> LedgerResult<Vec<UserExercise>> {
        Ok(self.store.list_user_exercises(requester)?)
    }

    /// Every active set performed for `exercise` across the requester's
    /// active workouts, oldest workout first.
    ///
    /// # Errors
    /// `NotFound` or `Unauthorized` from exercise resolution.
    pub fn exercise_history(
        &self,
        requester: UserId,
        exercise: ExerciseRef,
    ) -> LedgerResult<Vec<HistoryEntry>> {
        self.resolver.resolve_exercise_ref(exercise, requester)?;
        Ok(self.store.exercise_history(requester, exercise)?)
    }
}
