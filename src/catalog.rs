//! Exercise catalog collaborators.
//!
//! Catalog exercises are global and immutable. User exercises belong to one
//! user and are created on demand. Both are looked up through
//! [`ExerciseResolver`], which also enforces ownership of user exercises.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{LedgerError, LedgerResult};
use crate::id::{CatalogExerciseId, UserExerciseId, UserId};
use crate::storage::WorkoutStore;
use crate::workout::{ExerciseRef, RowState};

/// A global catalog exercise.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogExercise {
    pub id: CatalogExerciseId,
    pub name: String,
}

impl CatalogExercise {
    /// Creates a catalog entry with a fresh identity.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: CatalogExerciseId::new(),
            name: name.into(),
        }
    }
}

/// An exercise defined by a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserExercise {
    pub id: UserExerciseId,
    pub owner_id: UserId,
    pub name: String,
    pub state: RowState,
    pub created_at: DateTime<Utc>,
}

impl UserExercise {
    /// Creates a user exercise with a fresh identity.
    #[must_use]
    pub fn new(owner_id: UserId, name: impl Into<String>) -> Self {
        Self {
            id: UserExerciseId::new(),
            owner_id,
            name: name.into(),
            state: RowState::Active,
            created_at: Utc::now(),
        }
    }
}

/// The exercise an [`ExerciseRef`] points at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedExercise {
    pub exercise: ExerciseRef,
    pub name: String,
}

/// Looks up exercise references on behalf of a requester.
pub trait ExerciseResolver: Send + Sync {
    /// Resolve a reference.
    ///
    /// # Errors
    /// - `NotFound` if the exercise does not exist (or the user exercise is deleted)
    /// - `Unauthorized` if a user exercise belongs to someone else
    fn resolve_exercise_ref(
        &self,
        exercise: ExerciseRef,
        requester: UserId,
    ) -> LedgerResult<ResolvedExercise>;
}

/// Resolver backed by the catalog and user-exercise tables of a [`WorkoutStore`].
#[derive(Clone)]
pub struct StoreExerciseResolver {
    store: Arc<dyn WorkoutStore>,
}

impl StoreExerciseResolver {
    /// Creates a resolver over the given store.
    #[must_use]
    pub fn new(store: Arc<dyn WorkoutStore>) -> Self {
        Self { store }
    }
}

impl ExerciseResolver for StoreExerciseResolver {
    fn resolve_exercise_ref(
        &self,
        exercise: ExerciseRef,
        requester: UserId,
    ) -> LedgerResult<ResolvedExercise> {
        match exercise {
            ExerciseRef::Catalog(id) => {
                let entry = self
                    .store
                    .get_catalog_exercise(id)?
                    .ok_or_else(|| LedgerError::not_found("catalog exercise", id))?;
                Ok(ResolvedExercise {
                    exercise,
                    name: entry.name,
                })
            }
            ExerciseRef::User(id) => {
                let entry = self
                    .store
                    .get_user_exercise(id)?
                    .filter(|e| !e.state.is_deleted())
                    .ok_or_else(|| LedgerError::not_found("user exercise", id))?;
                if entry.owner_id != requester {
                    return Err(LedgerError::unauthorized(requester, "user exercise", id));
                }
                Ok(ResolvedExercise {
                    exercise,
                    name: entry.name,
                })
            }
        }
    }
}
