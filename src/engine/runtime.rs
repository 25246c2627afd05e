//! Bounded worker runtime for the workout engine.
//!
//! Requests are queued on a bounded channel and each one is handled to
//! completion by a single worker thread. A full queue refuses new work
//! instead of blocking the caller. A request cancelled while queued or
//! planning is abandoned before it commits.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};

use crate::aggregate::WorkoutRow;
use crate::config::RuntimeConfig;
use crate::engine::{CancelToken, WorkoutEngine};
use crate::error::{LedgerError, LedgerResult};
use crate::id::{UserId, WorkoutId};
use crate::workout::{WorkoutDraft, WorkoutTree};

/// A request the runtime can execute.
#[derive(Debug, Clone, PartialEq)]
pub enum LedgerRequest {
    Save { requester: UserId, draft: WorkoutDraft },
    Load { requester: UserId, workout_id: WorkoutId },
    Delete { requester: UserId, workout_id: WorkoutId },
    List { requester: UserId },
}

/// Result of a [`LedgerRequest`].
#[derive(Debug, Clone, PartialEq)]
pub enum LedgerResponse {
    Saved(WorkoutTree),
    Loaded(WorkoutTree),
    Deleted,
    Listed(Vec<WorkoutRow>),
}

enum Job {
    Execute {
        request: LedgerRequest,
        token: CancelToken,
        reply: Sender<LedgerResult<LedgerResponse>>,
    },

    #[cfg(test)]
    Sleep {
        duration: Duration,
        reply: Sender<()>,
    },
}

fn execute(engine: &WorkoutEngine, request: LedgerRequest, token: &CancelToken) -> LedgerResult<LedgerResponse> {
    if token.is_cancelled() {
        return Err(LedgerError::Cancelled);
    }
    match request {
        LedgerRequest::Save { requester, draft } => engine
            .reconcile_and_save_cancellable(requester, &draft, token)
            .map(LedgerResponse::Saved),
        LedgerRequest::Load { requester, workout_id } => engine
            .load_workout(requester, workout_id)
            .map(LedgerResponse::Loaded),
        LedgerRequest::Delete { requester, workout_id } => engine
            .soft_delete_workout(requester, workout_id)
            .map(|()| LedgerResponse::Deleted),
        LedgerRequest::List { requester } => {
            engine.list_workouts(requester).map(LedgerResponse::Listed)
        }
    }
}

struct WorkerPool {
    tx: Sender<Job>,
    workers: Vec<JoinHandle<()>>,
    queue_capacity: usize,
}

impl WorkerPool {
    fn start(config: RuntimeConfig, engine: &Arc<WorkoutEngine>) -> LedgerResult<Self> {
        let (tx, rx) = bounded::<Job>(config.queue_capacity);

        let mut workers = Vec::with_capacity(config.workers);
        for idx in 0..config.workers {
            let rx: Receiver<Job> = rx.clone();
            let engine = Arc::clone(engine);
            let handle = thread::Builder::new()
                .name(format!("liftledger-worker-{idx}"))
                .spawn(move || {
                    while let Ok(job) = rx.recv() {
                        match job {
                            Job::Execute { request, token, reply } => {
                                let _ = reply.send(execute(&engine, request, &token));
                            }
                            #[cfg(test)]
                            Job::Sleep { duration, reply } => {
                                thread::sleep(duration);
                                let _ = reply.send(());
                            }
                        }
                    }
                })
                .map_err(|e| LedgerError::internal(format!("failed to spawn worker {idx}: {e}")))?;
            workers.push(handle);
        }
        tracing::debug!(workers = workers.len(), queue_capacity = config.queue_capacity, "started worker pool");

        Ok(Self {
            tx,
            workers,
            queue_capacity: config.queue_capacity,
        })
    }

    fn try_submit(&self, job: Job) -> LedgerResult<()> {
        match self.tx.try_send(job) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                tracing::warn!(capacity = self.queue_capacity, "request queue full");
                Err(LedgerError::internal(format!(
                    "queue full (capacity {})",
                    self.queue_capacity
                )))
            }
            Err(TrySendError::Disconnected(_)) => {
                Err(LedgerError::internal("worker pool disconnected"))
            }
        }
    }

    fn shutdown(self) {
        // Workers drain queued jobs, then see the closed channel and exit.
        drop(self.tx);
        for handle in self.workers {
            let _ = handle.join();
        }
    }
}

/// Handle to a submitted request.
pub struct PendingRequest {
    token: CancelToken,
    rx: Receiver<LedgerResult<LedgerResponse>>,
}

impl PendingRequest {
    /// Abandon the request unless its commit has already begun.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Waits for the request to finish.
    pub fn wait(self) -> LedgerResult<LedgerResponse> {
        self.rx
            .recv()
            .map_err(|_| LedgerError::internal("worker dropped the request"))?
    }

    /// Waits at most `timeout`. The request keeps running after a timeout.
    pub fn wait_timeout(self, timeout: Duration) -> LedgerResult<LedgerResponse> {
        self.rx.recv_timeout(timeout).map_err(|err| match err {
            RecvTimeoutError::Timeout => {
                LedgerError::internal(format!("no response within {}ms", timeout.as_millis()))
            }
            RecvTimeoutError::Disconnected => LedgerError::internal("worker dropped the request"),
        })?
    }
}

/// Thread pool executing [`LedgerRequest`]s against one engine.
pub struct LedgerRuntime {
    engine: Arc<WorkoutEngine>,
    pool: Option<WorkerPool>,
}

impl LedgerRuntime {
    /// Start the workers.
    ///
    /// # Errors
    /// Invalid configuration or a worker thread that cannot be spawned.
    pub fn new(engine: WorkoutEngine, config: RuntimeConfig) -> LedgerResult<Self> {
        let config = config.validate()?;
        let engine = Arc::new(engine);
        let pool = WorkerPool::start(config, &engine)?;
        Ok(Self {
            engine,
            pool: Some(pool),
        })
    }

    fn pool(&self) -> LedgerResult<&WorkerPool> {
        self.pool
            .as_ref()
            .ok_or_else(|| LedgerError::internal("runtime is shut down"))
    }

    /// Queue a request without waiting for it.
    ///
    /// # Errors
    /// `Internal` if the queue is full.
    pub fn submit(&self, request: LedgerRequest) -> LedgerResult<PendingRequest> {
        let token = CancelToken::new();
        let (reply, rx) = bounded(1);
        self.pool()?.try_submit(Job::Execute {
            request,
            token: token.clone(),
            reply,
        })?;
        Ok(PendingRequest { token, rx })
    }

    /// Queue a request and wait for its result.
    pub fn execute(&self, request: LedgerRequest) -> LedgerResult<LedgerResponse> {
        self.submit(request)?.wait()
    }

    #[must_use]
    pub fn engine(&self) -> &WorkoutEngine {
        &self.engine
    }

    #[cfg(test)]
    fn submit_sleep(&self, duration: Duration) -> LedgerResult<Receiver<()>> {
        let (reply, rx) = bounded(1);
        self.pool()?.try_submit(Job::Sleep { duration, reply })?;
        Ok(rx)
    }
}

impl Drop for LedgerRuntime {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.take() {
            pool.shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    use crate::catalog::CatalogExercise;
    use crate::storage::{InMemoryWorkoutStore, WorkoutStore};
    use crate::workout::{ExerciseDraft, ExerciseRef, SetDraft};

    fn runtime(workers: usize, queue_capacity: usize) -> (LedgerRuntime, ExerciseRef) {
        let store = Arc::new(InMemoryWorkoutStore::new());
        let row = CatalogExercise::new("Overhead Press");
        let exercise = ExerciseRef::Catalog(row.id);
        store.insert_catalog_exercise(row).unwrap();
        let runtime = LedgerRuntime::new(
            WorkoutEngine::with_store(store),
            RuntimeConfig {
                workers,
                queue_capacity,
            },
        )
        .unwrap();
        (runtime, exercise)
    }

    fn save(requester: UserId, exercise: ExerciseRef) -> LedgerRequest {
        LedgerRequest::Save {
            requester,
            draft: WorkoutDraft::new("Shoulders", NaiveDate::from_ymd_opt(2024, 10, 1).unwrap())
                .exercise(ExerciseDraft::new(exercise).set(SetDraft::new(Some(60.0), Some(8), None))),
        }
    }

    #[test]
    fn test_save_then_list_through_workers() {
        let (runtime, exercise) = runtime(2, 16);
        let owner = UserId::new();

        let LedgerResponse::Saved(tree) = runtime.execute(save(owner, exercise)).unwrap() else {
            panic!("expected Saved");
        };
        let LedgerResponse::Listed(rows) = runtime.execute(LedgerRequest::List { requester: owner }).unwrap() else {
            panic!("expected Listed");
        };
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, tree.id);

        assert_eq!(
            runtime
                .execute(LedgerRequest::Delete {
                    requester: owner,
                    workout_id: tree.id,
                })
                .unwrap(),
            LedgerResponse::Deleted
        );
    }

    #[test]
    fn test_full_queue_refuses_work() {
        let (runtime, exercise) = runtime(1, 1);
        let busy = runtime.submit_sleep(Duration::from_millis(200)).unwrap();
        // Give the worker time to pick up the sleep so the queue slot is free.
        thread::sleep(Duration::from_millis(50));
        let queued = runtime.submit(save(UserId::new(), exercise)).unwrap();

        let err = runtime
            .submit(save(UserId::new(), exercise))
            .err()
            .expect("second request must be refused");
        assert!(err.to_string().contains("queue full"));

        busy.recv_timeout(Duration::from_secs(1)).unwrap();
        assert!(queued.wait().is_ok());
    }

    #[test]
    fn test_cancelled_while_queued_never_commits() {
        let (runtime, exercise) = runtime(1, 4);
        let owner = UserId::new();
        let busy = runtime.submit_sleep(Duration::from_millis(100)).unwrap();

        let pending = runtime.submit(save(owner, exercise)).unwrap();
        pending.cancel();
        assert!(matches!(pending.wait(), Err(LedgerError::Cancelled)));

        busy.recv_timeout(Duration::from_secs(1)).unwrap();
        assert!(runtime.engine().store().list_workouts(owner).unwrap().is_empty());
    }

    #[test]
    fn test_wait_reports_dropped_reply() {
        let (tx, rx) = bounded::<LedgerResult<LedgerResponse>>(1);
        drop(tx);
        let pending = PendingRequest {
            token: CancelToken::new(),
            rx,
        };
        let err = pending.wait_timeout(Duration::from_millis(10)).unwrap_err();
        assert!(err.to_string().contains("dropped"));
    }
}
