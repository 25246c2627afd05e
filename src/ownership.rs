//! Ownership checks run before any planning or write.

use std::collections::HashSet;
use std::sync::Arc;

use crate::aggregate::WorkoutRow;
use crate::catalog::ExerciseResolver;
use crate::error::{LedgerError, LedgerResult};
use crate::id::UserId;
use crate::validation::ValidatedWorkout;
use crate::workout::ExerciseRef;

/// Confirms a requester owns the workout and every user exercise it names.
#[derive(Clone)]
pub struct OwnershipGuard {
    resolver: Arc<dyn ExerciseResolver>,
}

impl OwnershipGuard {
    #[must_use]
    pub fn new(resolver: Arc<dyn ExerciseResolver>) -> Self {
        Self { resolver }
    }

    /// # Errors
    /// `Unauthorized` if `workout` belongs to someone else.
    pub fn check_workout(&self, requester: UserId, workout: &WorkoutRow) -> LedgerResult<()> {
        if workout.owner_id != requester {
            tracing::warn!(
                %requester,
                workout_id = %workout.id,
                "rejected access to workout owned by another user"
            );
            return Err(LedgerError::unauthorized(requester, "workout", workout.id));
        }
        Ok(())
    }

    /// Resolves every distinct exercise reference in the submission.
    ///
    /// # Errors
    /// `NotFound` for a missing exercise, `Unauthorized` for a user exercise
    /// owned by someone else.
    pub fn check_exercise_refs(
        &self,
        requester: UserId,
        workout: &ValidatedWorkout,
    ) -> LedgerResult<()> {
        let mut seen: HashSet<ExerciseRef> = HashSet::new();
        for exercise in &workout.exercises {
            let exercise_ref = exercise.fields.exercise;
            if !seen.insert(exercise_ref) {
                continue;
            }
            if let Err(e) = self.resolver.resolve_exercise_ref(exercise_ref, requester) {
                if e.is_unauthorized() {
                    tracing::warn!(%requester, exercise = %exercise_ref, "rejected foreign user exercise");
                }
                return Err(e);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, Utc};

    use crate::catalog::{ResolvedExercise, UserExercise};
    use crate::id::{CatalogExerciseId, UserExerciseId, WorkoutId};
    use crate::plan::{ExerciseFields, WorkoutFields};
    use crate::validation::ValidatedExercise;
    use crate::workout::{RowState, WeightUnit};

    /// Knows one user exercise; every catalog exercise exists.
    struct OneUserExercise {
        id: UserExerciseId,
        owner: UserId,
    }

    impl ExerciseResolver for OneUserExercise {
        fn resolve_exercise_ref(
            &self,
            exercise: ExerciseRef,
            requester: UserId,
        ) -> LedgerResult<ResolvedExercise> {
            match exercise {
                ExerciseRef::User(id) if id != self.id => Err(LedgerError::not_found("user exercise", id)),
                ExerciseRef::User(id) if requester != self.owner => {
                    Err(LedgerError::unauthorized(requester, "user exercise", id))
                }
                _ => Ok(ResolvedExercise {
                    exercise,
                    name: "Any".to_string(),
                }),
            }
        }
    }

    fn guard(owner: UserId) -> (OwnershipGuard, UserExercise) {
        let exercise = UserExercise::new(owner, "Belt squat");
        let resolver = OneUserExercise {
            id: exercise.id,
            owner,
        };
        (OwnershipGuard::new(Arc::new(resolver)), exercise)
    }

    fn submission(refs: &[ExerciseRef]) -> ValidatedWorkout {
        ValidatedWorkout {
            id: None,
            fields: WorkoutFields {
                title: "t".to_string(),
                notes: String::new(),
                date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            },
            exercises: refs
                .iter()
                .map(|r| ValidatedExercise {
                    id: None,
                    fields: ExerciseFields {
                        exercise: *r,
                        notes: String::new(),
                        weight_unit: WeightUnit::Lbs,
                    },
                    sets: Vec::new(),
                })
                .collect(),
        }
    }

    #[test]
    fn test_workout_owner_must_match() {
        let owner = UserId::new();
        let (guard, _) = guard(owner);
        let now = Utc::now();
        let row = WorkoutRow {
            id: WorkoutId::new(),
            owner_id: owner,
            title: "Mine".to_string(),
            notes: String::new(),
            date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            state: RowState::Active,
            revision: 1,
            created_at: now,
            updated_at: now,
        };
        assert!(guard.check_workout(owner, &row).is_ok());
        let err = guard.check_workout(UserId::new(), &row).unwrap_err();
        assert!(err.is_unauthorized());
        assert_eq!(err.status_code(), 403);
    }

    #[test]
    fn test_user_exercise_refs_checked_transitively() {
        let owner = UserId::new();
        let (guard, exercise) = guard(owner);
        let refs = [
            ExerciseRef::Catalog(CatalogExerciseId::new()),
            ExerciseRef::User(exercise.id),
        ];

        assert!(guard.check_exercise_refs(owner, &submission(&refs)).is_ok());
        assert!(guard
            .check_exercise_refs(UserId::new(), &submission(&refs))
            .unwrap_err()
            .is_unauthorized());
        assert!(guard
            .check_exercise_refs(owner, &submission(&[ExerciseRef::User(UserExerciseId::new())]))
            .unwrap_err()
            .is_not_found());
    }
}
