//! End-to-end reconciliation tests against the in-memory store.
//!
//! Each test drives `WorkoutEngine` the way a client would: save a tree,
//! edit the returned tree, save again, and inspect what the store holds.

use std::sync::Arc;

use chrono::NaiveDate;
use liftledger::{
    CatalogExercise, ChangeKind, EntityLevel, ExerciseDraft, ExerciseRef, InMemoryWorkoutStore,
    PlannedOp, RowState, SetDraft, SetId, UserExercise, UserId, WorkoutDraft, WorkoutEngine, WorkoutStore,
    WorkoutTree,
};
use uuid::Uuid;

struct Ledger {
    store: Arc<InMemoryWorkoutStore>,
    engine: WorkoutEngine,
    squat: ExerciseRef,
    bench: ExerciseRef,
}

fn ledger() -> Ledger {
    let store = Arc::new(InMemoryWorkoutStore::new());
    let squat = CatalogExercise::new("Back Squat");
    let bench = CatalogExercise::new("Bench Press");
    let (squat_ref, bench_ref) = (ExerciseRef::Catalog(squat.id), ExerciseRef::Catalog(bench.id));
    store.insert_catalog_exercise(squat).unwrap();
    store.insert_catalog_exercise(bench).unwrap();
    Ledger {
        engine: WorkoutEngine::with_store(store.clone()),
        store,
        squat: squat_ref,
        bench: bench_ref,
    }
}

fn date(day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 4, day).unwrap()
}

fn squat_session(l: &Ledger) -> WorkoutDraft {
    WorkoutDraft::new("Squat day", date(1)).exercise(
        ExerciseDraft::new(l.squat)
            .set(SetDraft::new(Some(140.0), Some(5), Some(7.0)))
            .set(SetDraft::new(Some(150.0), Some(5), Some(8.5))),
    )
}

fn stored_rows(l: &Ledger, tree: &WorkoutTree) -> liftledger::StoredAggregate {
    l.store.load_aggregate(tree.id).unwrap().unwrap()
}

#[test]
fn test_update_softdelete_create_in_one_save() {
    let l = ledger();
    let owner = UserId::new();
    let saved = l.engine.reconcile_and_save(owner, &squat_session(&l)).unwrap();
    let e1 = saved.exercises[0].id;
    let (s1, s2) = (saved.exercises[0].sets[0].id, saved.exercises[0].sets[1].id);

    let mut draft = saved.to_draft();
    draft.exercises[0].sets[0].weight = Some(142.5);
    draft.exercises[0].sets.remove(1);
    draft.exercises[0].sets.push(SetDraft::new(Some(160.0), Some(3), Some(9.0)));

    let plan = l.engine.plan(owner, &draft).unwrap();
    let below_root: Vec<(ChangeKind, EntityLevel)> =
        plan.ops.iter().skip(1).map(|op| (op.kind(), op.level())).collect();
    assert_eq!(
        below_root,
        vec![
            (ChangeKind::Update, EntityLevel::WorkoutExercise),
            (ChangeKind::Update, EntityLevel::Set),
            (ChangeKind::SoftDelete, EntityLevel::Set),
            (ChangeKind::Create, EntityLevel::Set),
        ]
    );

    let updated = l.engine.reconcile_and_save(owner, &draft).unwrap();
    assert_eq!(updated.revision, 2);
    assert_eq!(updated.exercises.len(), 1);
    assert_eq!(updated.exercises[0].id, e1);
    let sets = &updated.exercises[0].sets;
    assert_eq!(sets.len(), 2);
    assert_eq!(sets[0].id, s1);
    assert_eq!(sets[0].weight, Some(142.5));
    assert_eq!(sets[1].weight, Some(160.0));
    assert_ne!(sets[1].id, s2);

    // The removed set is still stored, only marked deleted.
    let rows = stored_rows(&l, &updated);
    let s2_row = rows.sets.iter().find(|s| s.id == s2).unwrap();
    assert!(s2_row.state.is_deleted());
}

#[test]
fn test_unknown_set_identity_writes_nothing() {
    let l = ledger();
    let owner = UserId::new();
    let saved = l.engine.reconcile_and_save(owner, &squat_session(&l)).unwrap();
    let before = stored_rows(&l, &saved);

    let mut draft = saved.to_draft();
    draft.exercises[0].sets[0].id = Some(SetId::from_uuid(Uuid::from_u128(99)));
    draft.title = "Renamed".to_string();

    let err = l.engine.reconcile_and_save(owner, &draft).unwrap_err();
    assert!(err.is_reference());
    assert_eq!(err.status_code(), 400);
    assert_eq!(stored_rows(&l, &saved), before);
}

#[test]
fn test_exercise_from_other_workout_is_reference_error() {
    let l = ledger();
    let owner = UserId::new();
    let first = l.engine.reconcile_and_save(owner, &squat_session(&l)).unwrap();
    let second = l.engine.reconcile_and_save(owner, &squat_session(&l)).unwrap();

    let mut draft = second.to_draft();
    draft.exercises[0].id = Some(first.exercises[0].id);
    let err = l.engine.reconcile_and_save(owner, &draft).unwrap_err();
    assert!(err.is_reference());
}

#[test]
fn test_both_or_neither_exercise_refs_rejected_before_write() {
    let l = ledger();
    let owner = UserId::new();
    let mine = UserExercise::new(owner, "Pin squat");
    let mine_id = mine.id;
    l.store.insert_user_exercise(mine).unwrap();

    let mut both = squat_session(&l);
    both.exercises[0].user_exercise_id = Some(mine_id);
    let err = l.engine.reconcile_and_save(owner, &both).unwrap_err();
    assert!(err.is_validation());

    let mut neither = squat_session(&l);
    neither.exercises[0].exercise_ref = None;
    let err = l.engine.reconcile_and_save(owner, &neither).unwrap_err();
    assert!(err.is_validation());

    assert!(l.engine.list_workouts(owner).unwrap().is_empty());
}

#[test]
fn test_flat_user_exercise_column_is_accepted() {
    let l = ledger();
    let owner = UserId::new();
    let mine = UserExercise::new(owner, "Pin squat");
    let mine_id = mine.id;
    l.store.insert_user_exercise(mine).unwrap();

    let mut draft = squat_session(&l);
    draft.exercises[0].exercise_ref = None;
    draft.exercises[0].user_exercise_id = Some(mine_id);
    let saved = l.engine.reconcile_and_save(owner, &draft).unwrap();
    assert_eq!(saved.exercises[0].exercise, ExerciseRef::User(mine_id));
}

#[test]
fn test_soft_deleted_exercise_resurrects_with_same_identity() {
    let l = ledger();
    let owner = UserId::new();
    let saved = l.engine.reconcile_and_save(owner, &squat_session(&l)).unwrap();
    let original = saved.to_draft();
    let e1 = saved.exercises[0].id;

    let mut emptied = original.clone();
    emptied.exercises.clear();
    let after_delete = l.engine.reconcile_and_save(owner, &emptied).unwrap();
    assert!(after_delete.exercises.is_empty());
    assert!(l.engine.exercise_history(owner, l.squat).unwrap().is_empty());
    let rows = stored_rows(&l, &after_delete);
    assert!(rows.sets.iter().all(|s| s.state == RowState::Deleted));

    // Submitting the old tree again brings the same rows back.
    let mut resubmitted = original;
    resubmitted.exercises[0].deleted = true;
    let plan = l.engine.plan(owner, &resubmitted).unwrap();
    // The entry and both of its sets come back.
    assert_eq!(plan.summary().resurrections, 3);
    assert!(plan
        .ops
        .iter()
        .all(|op| !matches!(op, PlannedOp::CreateExercise { .. })));

    let restored = l.engine.reconcile_and_save(owner, &resubmitted).unwrap();
    assert_eq!(restored.exercises[0].id, e1);
    assert_eq!(restored.exercises[0].sets.len(), 2);
    assert_eq!(restored.revision, 3);
}

#[test]
fn test_incoming_deleted_flag_is_not_authoritative() {
    let l = ledger();
    let owner = UserId::new();
    let saved = l.engine.reconcile_and_save(owner, &squat_session(&l)).unwrap();

    let mut draft = saved.to_draft();
    draft.exercises[0].sets[0].deleted = true;
    let resaved = l.engine.reconcile_and_save(owner, &draft).unwrap();
    assert_eq!(resaved.exercises[0].sets.len(), 2);
}

#[test]
fn test_new_exercise_with_sets_added_to_existing_workout() {
    let l = ledger();
    let owner = UserId::new();
    let saved = l.engine.reconcile_and_save(owner, &squat_session(&l)).unwrap();

    let draft = saved.to_draft().exercise(
        ExerciseDraft::new(l.bench)
            .with_notes("paused")
            .set(SetDraft::new(Some(100.0), Some(3), None)),
    );
    let updated = l.engine.reconcile_and_save(owner, &draft).unwrap();
    assert_eq!(updated.exercises.len(), 2);
    assert_eq!(updated.exercises[1].exercise, l.bench);
    assert_eq!(updated.exercises[1].notes, "paused");
    assert_eq!(updated.exercises[1].sets.len(), 1);
}

#[test]
fn test_foreign_workout_cannot_be_saved_over() {
    let l = ledger();
    let owner = UserId::new();
    let saved = l.engine.reconcile_and_save(owner, &squat_session(&l)).unwrap();

    let mut draft = saved.to_draft();
    draft.title = "Hijacked".to_string();
    let err = l.engine.reconcile_and_save(UserId::new(), &draft).unwrap_err();
    assert!(err.is_unauthorized());
    assert_eq!(l.engine.load_workout(owner, saved.id).unwrap().title, "Squat day");
}

#[test]
fn test_foreign_user_exercise_rejected() {
    let l = ledger();
    let someone_else = UserExercise::new(UserId::new(), "Secret lift");
    let id = someone_else.id;
    l.store.insert_user_exercise(someone_else).unwrap();

    let draft = WorkoutDraft::new("Copycat", date(3))
        .exercise(ExerciseDraft::new(ExerciseRef::User(id)));
    let err = l.engine.reconcile_and_save(UserId::new(), &draft).unwrap_err();
    assert!(err.is_unauthorized());
}

#[test]
fn test_saving_unchanged_tree_twice_is_stable() {
    let l = ledger();
    let owner = UserId::new();
    let saved = l.engine.reconcile_and_save(owner, &squat_session(&l)).unwrap();
    let draft = saved.to_draft();

    let once = l.engine.reconcile_and_save(owner, &draft).unwrap();
    let twice = l.engine.reconcile_and_save(owner, &once.to_draft()).unwrap();

    let plan = l.engine.plan(owner, &twice.to_draft()).unwrap();
    assert!(plan.ops.iter().all(|op| op.kind() == ChangeKind::Update));
    assert_eq!(once.exercises, twice.exercises);
    assert_eq!(saved.exercises, twice.exercises);
    assert_eq!(twice.revision, 3);
}

#[test]
fn test_history_reads_across_workouts_in_date_order() {
    let l = ledger();
    let owner = UserId::new();
    let mut later = squat_session(&l);
    later.date = date(20);
    l.engine.reconcile_and_save(owner, &later).unwrap();
    l.engine.reconcile_and_save(owner, &squat_session(&l)).unwrap();

    let history = l.engine.exercise_history(owner, l.squat).unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].date, date(1));
    assert_eq!(history[1].date, date(20));
    assert!(l.engine.exercise_history(owner, l.bench).unwrap().is_empty());

    let listed = l.engine.list_workouts(owner).unwrap();
    assert_eq!(listed[0].date, date(20));
}
