//! Concurrent saves against the same workout.
//!
//! Saves are serialized per workout by an optimistic revision check: a save
//! computed from a stale base loses with a conflict instead of silently
//! overwriting the winner.

use std::sync::{Arc, Barrier};
use std::thread;

use chrono::NaiveDate;
use liftledger::{
    AggregateLoader, AggregatePersister, CatalogExercise, ExerciseDraft, ExerciseRef,
    InMemoryWorkoutStore, LedgerError, ReconciliationPlanner, SetDraft, UserId, ValidationGate,
    WorkoutDraft, WorkoutEngine, WorkoutStore,
};

fn setup() -> (Arc<InMemoryWorkoutStore>, WorkoutEngine, ExerciseRef) {
    let store = Arc::new(InMemoryWorkoutStore::new());
    let row = CatalogExercise::new("Deadlift");
    let exercise = ExerciseRef::Catalog(row.id);
    store.insert_catalog_exercise(row).unwrap();
    let engine = WorkoutEngine::with_store(store.clone());
    (store, engine, exercise)
}

fn session(exercise: ExerciseRef) -> WorkoutDraft {
    WorkoutDraft::new("Pull", NaiveDate::from_ymd_opt(2024, 7, 4).unwrap()).exercise(
        ExerciseDraft::new(exercise)
            .set(SetDraft::new(Some(200.0), Some(3), None))
            .set(SetDraft::new(Some(210.0), Some(2), None)),
    )
}

#[test]
fn test_second_committer_from_same_base_gets_conflict() {
    let (store, engine, exercise) = setup();
    let owner = UserId::new();
    let saved = engine.reconcile_and_save(owner, &session(exercise)).unwrap();

    let loader = AggregateLoader::new(store.clone());
    let persister = AggregatePersister::new(store.clone());
    let gate = ValidationGate::default();

    // Both requests load revision 1 before either commits.
    let base_a = loader.load(Some(saved.id)).unwrap();
    let base_b = loader.load(Some(saved.id)).unwrap();

    let mut drop_second_set = saved.to_draft();
    drop_second_set.exercises[0].sets.pop();
    let mut add_a_set = saved.to_draft();
    add_a_set.exercises[0].sets.push(SetDraft::new(Some(220.0), Some(1), None));

    let plan_a =
        ReconciliationPlanner::plan(&base_a, &gate.validate(&drop_second_set).unwrap()).unwrap();
    let plan_b =
        ReconciliationPlanner::plan(&base_b, &gate.validate(&add_a_set).unwrap()).unwrap();

    persister.apply(owner, &base_a, plan_a).unwrap();
    let err = persister.apply(owner, &base_b, plan_b).unwrap_err();
    assert!(err.is_conflict());
    assert!(err.is_retryable());

    // The winner's tree is intact: the second set stays deleted, no third set.
    let current = engine.load_workout(owner, saved.id).unwrap();
    assert_eq!(current.revision, 2);
    assert_eq!(current.exercises[0].sets.len(), 1);
}

#[test]
fn test_parallel_saves_from_one_base_have_one_winner() {
    const WRITERS: usize = 8;
    let (store, engine, exercise) = setup();
    let owner = UserId::new();
    let saved = engine.reconcile_and_save(owner, &session(exercise)).unwrap();
    let base = saved.to_draft();

    let barrier = Arc::new(Barrier::new(WRITERS));
    let handles: Vec<_> = (0..WRITERS)
        .map(|i| {
            let store = store.clone();
            let barrier = Arc::clone(&barrier);
            let mut draft = base.clone();
            draft.title = format!("Writer {i}");
            thread::spawn(move || {
                let loader = AggregateLoader::new(store.clone());
                let persister = AggregatePersister::new(store);
                let persisted = loader.load(draft.id).unwrap();
                let validated = ValidationGate::default().validate(&draft).unwrap();
                let plan = ReconciliationPlanner::plan(&persisted, &validated).unwrap();
                assert_eq!(plan.base_revision, Some(1));
                // Every writer has planned against revision 1 before any commits.
                barrier.wait();
                persister.apply(owner, &persisted, plan)
            })
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let winners = results.iter().filter(|r| r.is_ok()).count();
    let conflicts = results
        .iter()
        .filter(|r| r.as_ref().is_err_and(LedgerError::is_conflict))
        .count();
    assert_eq!(winners, 1);
    assert_eq!(conflicts, WRITERS - 1);

    let row = store.load_aggregate(saved.id).unwrap().unwrap();
    assert_eq!(row.revision(), Some(2));
    assert_eq!(row.exercises.len(), 1);
    assert_eq!(row.sets.len(), 2);
}

#[test]
fn test_reload_after_conflict_succeeds() {
    let (store, engine, exercise) = setup();
    let owner = UserId::new();
    let saved = engine.reconcile_and_save(owner, &session(exercise)).unwrap();

    let loader = AggregateLoader::new(store.clone());
    let persister = AggregatePersister::new(store);
    let stale = loader.load(Some(saved.id)).unwrap();

    let mut first = saved.to_draft();
    first.title = "First".to_string();
    engine.reconcile_and_save(owner, &first).unwrap();

    let mut second = saved.to_draft();
    second.title = "Second".to_string();
    let validated = ValidationGate::default().validate(&second).unwrap();
    let stale_plan = ReconciliationPlanner::plan(&stale, &validated).unwrap();
    assert!(persister.apply(owner, &stale, stale_plan).unwrap_err().is_conflict());

    // Resubmitting re-loads the current base.
    let resolved = engine.reconcile_and_save(owner, &second).unwrap();
    assert_eq!(resolved.title, "Second");
    assert_eq!(resolved.revision, 3);
}
