//! Workout tree types.
//!
//! Two shapes of the same three-level tree live here:
//! - [`WorkoutDraft`]: what a client submits. Any node may lack an identity.
//! - [`WorkoutTree`]: what the ledger returns. Every node carries its identity
//!   and soft-deleted rows are filtered out.

use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::id::{CatalogExerciseId, SetId, UserExerciseId, UserId, WorkoutExerciseId, WorkoutId};

/// Unit the weights of an exercise entry are recorded in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WeightUnit {
    /// Pounds.
    #[default]
    Lbs,
    /// Kilograms.
    Kg,
}

impl fmt::Display for WeightUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Lbs => write!(f, "lbs"),
            Self::Kg => write!(f, "kg"),
        }
    }
}

/// Reference from a workout exercise to the exercise it performs.
///
/// Exactly one kind is always present; the both-or-neither state of the
/// relational shape cannot be expressed here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum ExerciseRef {
    /// A global catalog exercise.
    Catalog(CatalogExerciseId),
    /// An exercise defined by the workout's owner.
    User(UserExerciseId),
}

impl fmt::Display for ExerciseRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Catalog(id) => write!(f, "catalog:{id}"),
            Self::User(id) => write!(f, "user:{id}"),
        }
    }
}

/// Lifecycle state of a persisted row.
///
/// Only the reconciliation absence rule and explicit workout deletion move a
/// row to `Deleted`; client payloads never set it directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RowState {
    /// Visible to listing and history queries.
    #[default]
    Active,
    /// Soft-deleted; kept for history.
    Deleted,
}

impl RowState {
    /// Returns true for soft-deleted rows.
    #[must_use]
    pub const fn is_deleted(self) -> bool {
        matches!(self, Self::Deleted)
    }
}

/// The three levels of the workout aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityLevel {
    /// The aggregate root.
    Workout,
    /// An exercise entry inside a workout.
    WorkoutExercise,
    /// A set inside an exercise entry.
    Set,
}

impl fmt::Display for EntityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Workout => write!(f, "workout"),
            Self::WorkoutExercise => write!(f, "workout exercise"),
            Self::Set => write!(f, "set"),
        }
    }
}

/// A client-submitted workout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkoutDraft {
    /// Absent for a workout that has never been saved.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<WorkoutId>,
    /// Workout title (1-50 characters).
    pub title: String,
    /// Free-text notes (up to 250 characters).
    #[serde(default)]
    pub notes: String,
    /// Calendar date the workout was performed.
    pub date: NaiveDate,
    /// Exercise entries, in submission order.
    #[serde(default)]
    pub exercises: Vec<ExerciseDraft>,
}

impl WorkoutDraft {
    /// Creates a draft for a new workout.
    #[must_use]
    pub fn new(title: impl Into<String>, date: NaiveDate) -> Self {
        Self {
            id: None,
            title: title.into(),
            notes: String::new(),
            date,
            exercises: Vec::new(),
        }
    }

    /// Targets an existing workout.
    #[must_use]
    pub fn with_id(mut self, id: WorkoutId) -> Self {
        self.id = Some(id);
        self
    }

    /// Sets the notes.
    #[must_use]
    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = notes.into();
        self
    }

    /// Appends an exercise entry.
    #[must_use]
    pub fn exercise(mut self, exercise: ExerciseDraft) -> Self {
        self.exercises.push(exercise);
        self
    }
}

/// A client-submitted exercise entry.
///
/// The exercise may be named either through the tagged `exercise_ref` or
/// through the flat `catalog_exercise_id` / `user_exercise_id` columns.
/// [`ExerciseDraft::exercise_ref`] collapses them into one [`ExerciseRef`]
/// and rejects anything other than exactly one reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExerciseDraft {
    /// Present when the entry was loaded from the ledger.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<WorkoutExerciseId>,
    /// Tagged exercise reference.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exercise_ref: Option<ExerciseRef>,
    /// Flat catalog reference column.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub catalog_exercise_id: Option<CatalogExerciseId>,
    /// Flat user-exercise reference column.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_exercise_id: Option<UserExerciseId>,
    /// Free-text notes (up to 100 characters).
    #[serde(default)]
    pub notes: String,
    /// Unit for every set in this entry.
    #[serde(default)]
    pub weight_unit: WeightUnit,
    /// Sets, in submission order.
    #[serde(default)]
    pub sets: Vec<SetDraft>,
    /// Echoed back by clients; ignored by reconciliation.
    #[serde(default)]
    pub deleted: bool,
}

impl ExerciseDraft {
    /// Creates a new entry for the given exercise.
    #[must_use]
    pub fn new(exercise: ExerciseRef) -> Self {
        Self {
            id: None,
            exercise_ref: Some(exercise),
            catalog_exercise_id: None,
            user_exercise_id: None,
            notes: String::new(),
            weight_unit: WeightUnit::default(),
            sets: Vec::new(),
            deleted: false,
        }
    }

    /// Targets an existing entry.
    #[must_use]
    pub fn with_id(mut self, id: WorkoutExerciseId) -> Self {
        self.id = Some(id);
        self
    }

    /// Sets the notes.
    #[must_use]
    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = notes.into();
        self
    }

    /// Sets the weight unit.
    #[must_use]
    pub fn with_unit(mut self, unit: WeightUnit) -> Self {
        self.weight_unit = unit;
        self
    }

    /// Appends a set.
    #[must_use]
    pub fn set(mut self, set: SetDraft) -> Self {
        self.sets.push(set);
        self
    }

    /// Resolves the single exercise reference this entry names.
    ///
    /// `field` is the path used in the error (e.g. `exercises[2]`).
    ///
    /// # Errors
    /// - `MissingField` when no reference is present
    /// - `AmbiguousExerciseRef` when more than one is present
    pub fn exercise_ref(&self, field: &str) -> Result<ExerciseRef, ValidationError> {
        let candidates = [
            self.exercise_ref,
            self.catalog_exercise_id.map(ExerciseRef::Catalog),
            self.user_exercise_id.map(ExerciseRef::User),
        ];
        let mut present = candidates.into_iter().flatten();
        let Some(first) = present.next() else {
            return Err(ValidationError::MissingField {
                field: format!("{field}.exercise_ref"),
            });
        };
        let extra = present.count();
        if extra > 0 {
            return Err(ValidationError::AmbiguousExerciseRef {
                field: format!("{field}.exercise_ref"),
                found: extra + 1,
            });
        }
        Ok(first)
    }
}

/// A client-submitted set.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SetDraft {
    /// Present when the set was loaded from the ledger.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<SetId>,
    /// Weight lifted, in the entry's unit.
    #[serde(default)]
    pub weight: Option<f64>,
    /// Repetitions. Signed so negative input surfaces as a validation error.
    #[serde(default)]
    pub reps: Option<i64>,
    /// Rate of perceived exertion.
    #[serde(default)]
    pub rpe: Option<f64>,
    /// Echoed back by clients; ignored by reconciliation.
    #[serde(default)]
    pub deleted: bool,
}

impl SetDraft {
    /// Creates a new set with the given scalars.
    #[must_use]
    pub fn new(weight: Option<f64>, reps: Option<i64>, rpe: Option<f64>) -> Self {
        Self {
            id: None,
            weight,
            reps,
            rpe,
            deleted: false,
        }
    }

    /// Targets an existing set.
    #[must_use]
    pub fn with_id(mut self, id: SetId) -> Self {
        self.id = Some(id);
        self
    }
}

/// A resolved workout as returned by the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkoutTree {
    /// Workout identity.
    pub id: WorkoutId,
    /// Owning user.
    pub owner_id: UserId,
    /// Title.
    pub title: String,
    /// Notes.
    pub notes: String,
    /// Calendar date.
    pub date: NaiveDate,
    /// Revision after the last commit.
    pub revision: u64,
    /// Time of the last commit.
    pub updated_at: DateTime<Utc>,
    /// Active exercise entries in insertion order.
    pub exercises: Vec<ExerciseNode>,
}

/// A resolved exercise entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExerciseNode {
    /// Entry identity.
    pub id: WorkoutExerciseId,
    /// The exercise performed.
    pub exercise: ExerciseRef,
    /// Notes.
    pub notes: String,
    /// Weight unit.
    pub weight_unit: WeightUnit,
    /// Active sets in insertion order.
    pub sets: Vec<SetNode>,
}

/// A resolved set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetNode {
    /// Set identity.
    pub id: SetId,
    /// Weight lifted.
    pub weight: Option<f64>,
    /// Repetitions.
    pub reps: Option<u32>,
    /// Rate of perceived exertion.
    pub rpe: Option<f64>,
}

impl WorkoutTree {
    /// Converts the tree back into a draft that targets the same rows.
    ///
    /// Submitting the result unchanged is a no-op apart from the revision bump.
    #[must_use]
    pub fn to_draft(&self) -> WorkoutDraft {
        WorkoutDraft {
            id: Some(self.id),
            title: self.title.clone(),
            notes: self.notes.clone(),
            date: self.date,
            exercises: self
                .exercises
                .iter()
                .map(|exercise| ExerciseDraft {
                    id: Some(exercise.id),
                    exercise_ref: Some(exercise.exercise),
                    catalog_exercise_id: None,
                    user_exercise_id: None,
                    notes: exercise.notes.clone(),
                    weight_unit: exercise.weight_unit,
                    sets: exercise
                        .sets
                        .iter()
                        .map(|set| SetDraft {
                            id: Some(set.id),
                            weight: set.weight,
                            reps: set.reps.map(i64::from),
                            rpe: set.rpe,
                            deleted: false,
                        })
                        .collect(),
                    deleted: false,
                })
                .collect(),
        }
    }

    /// Total number of active sets across all entries.
    #[must_use]
    pub fn set_count(&self) -> usize {
        self.exercises.iter().map(|e| e.sets.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 14).unwrap()
    }

    #[test]
    fn test_exercise_ref_from_tagged_field() {
        let id = CatalogExerciseId::new();
        let draft = ExerciseDraft::new(ExerciseRef::Catalog(id));
        assert_eq!(draft.exercise_ref("exercises[0]").unwrap(), ExerciseRef::Catalog(id));
    }

    #[test]
    fn test_exercise_ref_from_flat_column() {
        let id = UserExerciseId::new();
        let mut draft = ExerciseDraft::new(ExerciseRef::User(id));
        draft.exercise_ref = None;
        draft.user_exercise_id = Some(id);
        assert_eq!(draft.exercise_ref("exercises[0]").unwrap(), ExerciseRef::User(id));
    }

    #[test]
    fn test_exercise_ref_rejects_both_kinds() {
        let mut draft = ExerciseDraft::new(ExerciseRef::Catalog(CatalogExerciseId::new()));
        draft.exercise_ref = None;
        draft.catalog_exercise_id = Some(CatalogExerciseId::new());
        draft.user_exercise_id = Some(UserExerciseId::new());

        let err = draft.exercise_ref("exercises[1]").unwrap_err();
        assert!(matches!(err, ValidationError::AmbiguousExerciseRef { found: 2, .. }));
        assert_eq!(err.field(), "exercises[1].exercise_ref");
    }

    #[test]
    fn test_exercise_ref_rejects_neither_kind() {
        let mut draft = ExerciseDraft::new(ExerciseRef::Catalog(CatalogExerciseId::new()));
        draft.exercise_ref = None;
        let err = draft.exercise_ref("exercises[0]").unwrap_err();
        assert!(matches!(err, ValidationError::MissingField { .. }));
    }

    #[test]
    fn test_draft_deserializes_request_shape() {
        let catalog = CatalogExerciseId::new();
        let json = format!(
            r#"{{
                "title": "Push day",
                "date": "2024-03-14",
                "exercises": [
                    {{
                        "exercise_ref": {{"kind": "catalog", "id": "{catalog}"}},
                        "weight_unit": "kg",
                        "sets": [{{"weight": 60.5, "reps": 8, "rpe": 7.5}}, {{}}]
                    }}
                ]
            }}"#
        );
        let draft: WorkoutDraft = serde_json::from_str(&json).unwrap();
        assert!(draft.id.is_none());
        assert_eq!(draft.date, date());
        assert_eq!(draft.exercises[0].weight_unit, WeightUnit::Kg);
        assert_eq!(draft.exercises[0].sets.len(), 2);
        assert_eq!(draft.exercises[0].sets[1], SetDraft::default());
        assert_eq!(
            draft.exercises[0].exercise_ref("exercises[0]").unwrap(),
            ExerciseRef::Catalog(catalog)
        );
    }

    #[test]
    fn test_tree_to_draft_keeps_identities() {
        let set_id = SetId::new();
        let exercise_id = WorkoutExerciseId::new();
        let tree = WorkoutTree {
            id: WorkoutId::new(),
            owner_id: UserId::new(),
            title: "Legs".to_string(),
            notes: String::new(),
            date: date(),
            revision: 3,
            updated_at: Utc::now(),
            exercises: vec![ExerciseNode {
                id: exercise_id,
                exercise: ExerciseRef::Catalog(CatalogExerciseId::new()),
                notes: String::new(),
                weight_unit: WeightUnit::Kg,
                sets: vec![SetNode { id: set_id, weight: Some(100.0), reps: Some(5), rpe: None }],
            }],
        };

        let draft = tree.to_draft();
        assert_eq!(draft.id, Some(tree.id));
        assert_eq!(draft.exercises[0].id, Some(exercise_id));
        assert_eq!(draft.exercises[0].sets[0].id, Some(set_id));
        assert_eq!(draft.exercises[0].sets[0].reps, Some(5));
        assert_eq!(tree.set_count(), 1);
    }
}
