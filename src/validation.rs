//! Boundary validation of submitted workouts.
//!
//! [`ValidationGate::validate`] turns a [`WorkoutDraft`] into a
//! [`ValidatedWorkout`]: every scalar is range and step checked, reps become
//! unsigned, and each exercise carries exactly one [`ExerciseRef`]. The first
//! violation wins.

use crate::config::EngineConfig;
use crate::error::ValidationError;
use crate::id::{SetId, WorkoutExerciseId, WorkoutId};
use crate::plan::{ExerciseFields, SetFields, WorkoutFields};
use crate::workout::{ExerciseDraft, SetDraft, WorkoutDraft};

pub const MAX_TITLE_CHARS: usize = 50;
pub const MAX_WORKOUT_NOTES_CHARS: usize = 250;
pub const MAX_EXERCISE_NOTES_CHARS: usize = 100;
pub const MAX_EXERCISE_NAME_CHARS: usize = 100;

pub const MAX_WEIGHT: f64 = 9999.0;
pub const MAX_REPS: i64 = 9999;
pub const MAX_RPE: f64 = 10.0;
const STEP: f64 = 0.5;

/// A workout that passed validation.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedWorkout {
    pub id: Option<WorkoutId>,
    pub fields: WorkoutFields,
    pub exercises: Vec<ValidatedExercise>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedExercise {
    pub id: Option<WorkoutExerciseId>,
    pub fields: ExerciseFields,
    pub sets: Vec<ValidatedSet>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedSet {
    pub id: Option<SetId>,
    pub fields: SetFields,
}

/// Rejects drafts that break the domain rules.
#[derive(Debug, Clone, Copy, Default)]
pub struct ValidationGate {
    config: EngineConfig,
}

impl ValidationGate {
    #[must_use]
    pub const fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    /// Validate a whole draft.
    ///
    /// The title is trimmed before its length is checked, and the trimmed
    /// title is what [`ValidatedWorkout`] carries. A title of only whitespace
    /// is reported as missing.
    ///
    /// # Errors
    /// Returns the first [`ValidationError`] found, naming the field path.
    pub fn validate(&self, draft: &WorkoutDraft) -> Result<ValidatedWorkout, ValidationError> {
        let title = draft.title.trim();
        if title.is_empty() {
            return Err(ValidationError::MissingField {
                field: "title".to_string(),
            });
        }
        check_length("title", title, MAX_TITLE_CHARS)?;
        check_length("notes", &draft.notes, MAX_WORKOUT_NOTES_CHARS)?;
        check_count("exercises", draft.exercises.len(), self.config.max_exercises_per_workout)?;

        let exercises = draft
            .exercises
            .iter()
            .enumerate()
            .map(|(i, exercise)| self.validate_exercise(&format!("exercises[{i}]"), exercise))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(ValidatedWorkout {
            id: draft.id,
            fields: WorkoutFields {
                title: title.to_string(),
                notes: draft.notes.clone(),
                date: draft.date,
            },
            exercises,
        })
    }

    fn validate_exercise(
        &self,
        path: &str,
        draft: &ExerciseDraft,
    ) -> Result<ValidatedExercise, ValidationError> {
        let exercise = draft.exercise_ref(path)?;
        check_length(&format!("{path}.notes"), &draft.notes, MAX_EXERCISE_NOTES_CHARS)?;
        check_count(
            &format!("{path}.sets"),
            draft.sets.len(),
            self.config.max_sets_per_exercise,
        )?;

        let sets = draft
            .sets
            .iter()
            .enumerate()
            .map(|(j, set)| validate_set(&format!("{path}.sets[{j}]"), set))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(ValidatedExercise {
            id: draft.id,
            fields: ExerciseFields {
                exercise,
                notes: draft.notes.clone(),
                weight_unit: draft.weight_unit,
            },
            sets,
        })
    }
}

fn validate_set(path: &str, draft: &SetDraft) -> Result<ValidatedSet, ValidationError> {
    if let Some(weight) = draft.weight {
        check_stepped(&format!("{path}.weight"), weight, MAX_WEIGHT)?;
    }
    let reps = draft
        .reps
        .map(|reps| check_reps(&format!("{path}.reps"), reps))
        .transpose()?;
    if let Some(rpe) = draft.rpe {
        check_stepped(&format!("{path}.rpe"), rpe, MAX_RPE)?;
    }

    Ok(ValidatedSet {
        id: draft.id,
        fields: SetFields {
            weight: draft.weight,
            reps,
            rpe: draft.rpe,
        },
    })
}

/// Validates the name of a user-defined exercise, returning it trimmed.
///
/// # Errors
/// `MissingField` for a blank name, `FieldTooLong` past 100 characters.
pub fn validate_exercise_name(name: &str) -> Result<String, ValidationError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(ValidationError::MissingField {
            field: "name".to_string(),
        });
    }
    check_length("name", name, MAX_EXERCISE_NAME_CHARS)?;
    Ok(name.to_string())
}

fn check_length(field: &str, value: &str, max_length: usize) -> Result<(), ValidationError> {
    if value.chars().count() > max_length {
        return Err(ValidationError::FieldTooLong {
            field: field.to_string(),
            max_length,
        });
    }
    Ok(())
}

fn check_count(field: &str, actual: usize, max: usize) -> Result<(), ValidationError> {
    if actual > max {
        return Err(ValidationError::TooManyEntries {
            field: field.to_string(),
            max,
            actual,
        });
    }
    Ok(())
}

/// Range `[0, max]` and a multiple of 0.5.
fn check_stepped(field: &str, value: f64, max: f64) -> Result<(), ValidationError> {
    if !value.is_finite() {
        return Err(ValidationError::NotFinite {
            field: field.to_string(),
        });
    }
    if !(0.0..=max).contains(&value) {
        return Err(ValidationError::OutOfRange {
            field: field.to_string(),
            value,
            min: 0.0,
            max,
        });
    }
    if (value / STEP).fract() != 0.0 {
        return Err(ValidationError::InvalidStep {
            field: field.to_string(),
            value,
            step: STEP,
        });
    }
    Ok(())
}

#[allow(clippy::cast_precision_loss)]
fn check_reps(field: &str, reps: i64) -> Result<u32, ValidationError> {
    if !(0..=MAX_REPS).contains(&reps) {
        return Err(ValidationError::OutOfRange {
            field: field.to_string(),
            value: reps as f64,
            min: 0.0,
            max: MAX_REPS as f64,
        });
    }
    u32::try_from(reps).map_err(|_| ValidationError::InvalidField {
        field: field.to_string(),
        reason: format!("{reps} does not fit a rep count"),
    })
}
