//! Read side of a reconciliation.

use std::sync::Arc;

use crate::aggregate::StoredAggregate;
use crate::error::{LedgerError, LedgerResult};
use crate::id::WorkoutId;
use crate::storage::WorkoutStore;

/// Loads the persisted aggregate a submission is reconciled against.
#[derive(Clone)]
pub struct AggregateLoader {
    store: Arc<dyn WorkoutStore>,
}

impl AggregateLoader {
    #[must_use]
    pub fn new(store: Arc<dyn WorkoutStore>) -> Self {
        Self { store }
    }

    /// Every row of the workout, soft-deleted children included.
    ///
    /// `None` stands for a workout that does not exist yet and yields an
    /// empty aggregate.
    ///
    /// # Errors
    /// `NotFound` if the workout is missing or soft deleted.
    pub fn load(&self, id: Option<WorkoutId>) -> LedgerResult<StoredAggregate> {
        let Some(id) = id else {
            return Ok(StoredAggregate::empty());
        };
        let aggregate = self
            .store
            .load_aggregate(id)?
            .filter(|a| a.workout.as_ref().is_some_and(|w| !w.state.is_deleted()))
            .ok_or_else(|| LedgerError::not_found("workout", id))?;
        tracing::debug!(
            workout_id = %id,
            revision = ?aggregate.revision(),
            exercises = aggregate.exercises.len(),
            sets = aggregate.sets.len(),
            "loaded aggregate"
        );
        Ok(aggregate)
    }
}
