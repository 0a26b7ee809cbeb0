//! Executors: how a batch of experiments actually runs
//!
//! An executor takes the (experiment, point) pairs a design produced and
//! runs them — in order on the calling thread, across a local thread
//! pool, or on a detached worker pool that hands back opaque job ids for
//! later reconciliation. The remote variant is the only one that
//! introduces pending state: its batches return immediately and the
//! results are collected by polling, which keeps working from a client
//! that reattaches after the submitting one has gone away.

use std::collections::{HashMap, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::mpsc;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{info, warn};
use rayon::prelude::*;

use sweeplab_core::error::{Error, Result};
use sweeplab_core::experiment::{Experiment, ExperimentExt};
use sweeplab_core::record::ResultsRecord;
use sweeplab_core::value::Point;

use crate::config::ExecutorConfig;
use crate::design::ExperimentalConfiguration;

/// Opaque identifier for a job submitted to a deferred executor.
pub type JobId = String;

/// The state of one submitted job, as seen by a poll.
#[derive(Debug, Clone)]
pub enum JobStatus {
    Pending,
    Completed(ResultsRecord),
    Failed(String),
}

/// What submitting a batch produced: records right away, or job ids
/// that will resolve later.
#[derive(Debug)]
pub enum Submission {
    Completed(Vec<ResultsRecord>),
    Submitted(Vec<(JobId, Point)>),
}

/// Runs batches of experiments. Synchronous executors return records
/// from [`Executor::submit_batch`] directly and never have pending
/// state; deferred executors return job ids and answer [`Executor::poll`].
pub trait Executor: Send {
    fn submit_batch(&mut self, batch: ExperimentalConfiguration) -> Result<Submission>;

    /// Query a submitted job. Synchronous executors know no job ids.
    fn poll(&mut self, job_id: &str) -> Result<JobStatus> {
        Err(Error::PendingResult(job_id.to_string()))
    }

    /// Request best-effort termination of the given jobs. A job that
    /// completes before the request takes effect stays completed.
    fn cancel(&mut self, _job_ids: &[JobId]) -> Result<()> {
        Ok(())
    }

    /// The sleep interval between polls while waiting on this executor.
    fn waiting_time(&self) -> Duration {
        Duration::from_secs(30)
    }
}

/// Runs each experiment in submission order on the calling thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct SequentialExecutor;

impl Executor for SequentialExecutor {
    fn submit_batch(&mut self, batch: ExperimentalConfiguration) -> Result<Submission> {
        let records = batch
            .into_iter()
            .map(|(mut e, point)| e.run(point))
            .collect();
        Ok(Submission::Completed(records))
    }
}

/// Runs the batch across a local thread pool, returning the records in
/// completion order. Synchronous to the caller.
#[derive(Debug, Clone)]
pub struct ParallelExecutor {
    workers: usize,
}

impl ParallelExecutor {
    /// A pool sized by the same convention as [`ExecutorConfig::workers`]:
    /// positive capped at the physical cores, zero for all of them,
    /// negative to leave cores free.
    pub fn new(workers: i32) -> Self {
        let config = ExecutorConfig {
            workers,
            ..Default::default()
        };
        Self {
            workers: config.worker_count(),
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }
}

impl Executor for ParallelExecutor {
    fn submit_batch(&mut self, batch: ExperimentalConfiguration) -> Result<Submission> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.workers)
            .build()
            .map_err(|e| Error::Execution(e.to_string()))?;

        // funnel the records back through a single channel as they
        // finish; the notebook side consumes them on this thread only
        let (tx, rx) = mpsc::channel();
        pool.install(|| {
            batch.into_par_iter().for_each_with(tx, |tx, (mut e, point)| {
                let _ = tx.send(e.run(point));
            });
        });
        Ok(Submission::Completed(rx.into_iter().collect()))
    }
}

// ---- the detached worker pool ----

#[derive(Debug)]
enum JobState {
    Queued,
    Running,
    Done(ResultsRecord),
    Crashed(String),
    Cancelled,
}

struct Job {
    point: Point,
    experiment: Box<dyn Experiment>,
    state: JobState,
    attempts: u32,
}

#[derive(Default)]
struct Board {
    jobs: HashMap<JobId, Job>,
    queue: VecDeque<JobId>,
    next_id: u64,
    shutdown: bool,
}

type SharedBoard = Arc<(Mutex<Board>, Condvar)>;

/// A pool of worker threads detached from any one client. Clients
/// connect to get a [`RemoteExecutor`] handle, submit work, and may go
/// away entirely; a later client connected to the same pool polls the
/// same jobs. Crashed jobs are re-queued up to the configured retry
/// count before being marked failed.
pub struct WorkerPool {
    board: SharedBoard,
    handles: Vec<JoinHandle<()>>,
    config: ExecutorConfig,
}

impl WorkerPool {
    pub fn start(config: ExecutorConfig) -> Self {
        let board: SharedBoard = Arc::new((Mutex::new(Board::default()), Condvar::new()));
        let workers = config.worker_count();
        let handles = (0..workers)
            .map(|i| {
                let board = Arc::clone(&board);
                let retries = config.retries;
                thread::Builder::new()
                    .name(format!("sweeplab-worker-{i}"))
                    .spawn(move || worker_loop(board, retries))
                    .expect("failed to spawn worker thread")
            })
            .collect();
        info!("worker pool started with {workers} workers");
        Self {
            board,
            handles,
            config,
        }
    }

    /// Connect a client to the pool, retrying up to the configured
    /// reconnection count.
    pub fn connect(&self) -> Result<RemoteExecutor> {
        let attempts = self.config.reconnections.max(1);
        for attempt in 1..=attempts {
            if let Ok(state) = self.board.0.lock() {
                if !state.shutdown {
                    return Ok(RemoteExecutor {
                        board: Arc::clone(&self.board),
                        config: self.config.clone(),
                    });
                }
            }
            warn!("connection to worker pool failed, reconnecting ({attempt}/{attempts})");
            thread::sleep(Duration::from_millis(50));
        }
        Err(Error::Execution(
            "worker pool is not accepting connections".into(),
        ))
    }

    /// Stop the workers and wait for them to finish their current jobs.
    /// Queued jobs are left unstarted.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        {
            let (lock, cvar) = &*self.board;
            if let Ok(mut state) = lock.lock() {
                state.shutdown = true;
            }
            cvar.notify_all();
        }
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.stop();
    }
}

fn worker_loop(board: SharedBoard, retries: u32) {
    let (lock, cvar) = &*board;
    loop {
        let (job_id, mut experiment, point) = {
            let mut state = lock.lock().expect("board lock");
            loop {
                if state.shutdown {
                    return;
                }
                match claim_next(&mut state) {
                    Some(claim) => break claim,
                    None => state = cvar.wait(state).expect("board lock"),
                }
            }
        };

        // run with the lock released; a panic in user code counts as a
        // crashed attempt rather than killing the worker
        let outcome = catch_unwind(AssertUnwindSafe(|| experiment.run(point)));

        let mut state = lock.lock().expect("board lock");
        let job = state.jobs.get_mut(&job_id).expect("claimed job exists");
        match outcome {
            // completion wins over any cancellation race
            Ok(rc) => job.state = JobState::Done(rc),
            Err(panic) => {
                job.attempts += 1;
                let reason = panic_message(panic);
                if job.attempts <= retries {
                    warn!(
                        "job {job_id} crashed ({reason}), retrying (attempt {}/{retries})",
                        job.attempts
                    );
                    job.state = JobState::Queued;
                    state.queue.push_back(job_id.clone());
                    cvar.notify_one();
                } else {
                    warn!("job {job_id} crashed after {retries} retries: {reason}");
                    job.state = JobState::Crashed(reason);
                }
            }
        }
    }
}

fn claim_next(state: &mut Board) -> Option<(JobId, Box<dyn Experiment>, Point)> {
    while let Some(id) = state.queue.pop_front() {
        if let Some(job) = state.jobs.get_mut(&id) {
            if matches!(job.state, JobState::Queued) {
                job.state = JobState::Running;
                return Some((id, job.experiment.duplicate(), job.point.clone()));
            }
        }
    }
    None
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "experiment panicked".to_string()
    }
}

/// A client handle onto a [`WorkerPool`]. Submitting returns job ids
/// immediately; results are collected by polling, from this client or
/// any later one connected to the same pool.
pub struct RemoteExecutor {
    board: SharedBoard,
    config: ExecutorConfig,
}

impl RemoteExecutor {
    fn state(&self) -> Result<std::sync::MutexGuard<'_, Board>> {
        self.board
            .0
            .lock()
            .map_err(|_| Error::Execution("worker pool state is poisoned".into()))
    }
}

impl Executor for RemoteExecutor {
    fn submit_batch(&mut self, batch: ExperimentalConfiguration) -> Result<Submission> {
        let mut submitted = Vec::with_capacity(batch.len());
        {
            let mut state = self.state()?;
            if state.shutdown {
                return Err(Error::Execution("worker pool is shut down".into()));
            }
            for (experiment, point) in batch {
                state.next_id += 1;
                let id = format!("job-{:08x}", state.next_id);
                state.jobs.insert(
                    id.clone(),
                    Job {
                        point: point.clone(),
                        experiment,
                        state: JobState::Queued,
                        attempts: 0,
                    },
                );
                state.queue.push_back(id.clone());
                submitted.push((id, point));
            }
        }
        self.board.1.notify_all();
        Ok(Submission::Submitted(submitted))
    }

    fn poll(&mut self, job_id: &str) -> Result<JobStatus> {
        let state = self.state()?;
        let job = state
            .jobs
            .get(job_id)
            .ok_or_else(|| Error::PendingResult(job_id.to_string()))?;
        Ok(match &job.state {
            JobState::Queued | JobState::Running => JobStatus::Pending,
            JobState::Done(rc) => JobStatus::Completed(rc.clone()),
            JobState::Crashed(reason) => JobStatus::Failed(reason.clone()),
            JobState::Cancelled => JobStatus::Failed("cancelled by request".to_string()),
        })
    }

    fn cancel(&mut self, job_ids: &[JobId]) -> Result<()> {
        let mut state = self.state()?;
        for id in job_ids {
            if let Some(job) = state.jobs.get_mut(id) {
                if matches!(job.state, JobState::Queued) {
                    info!("cancelled queued job {id}");
                    job.state = JobState::Cancelled;
                }
            }
        }
        Ok(())
    }

    fn waiting_time(&self) -> Duration {
        self.config.waiting_time()
    }
}
