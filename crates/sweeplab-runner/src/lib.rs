//! Designs, labs, and executors for sweeplab campaigns
//!
//! The campaign layer of the workspace:
//!
//! 1. [`Design`]: parameter ranges → ordered experimental points
//!    ([`FactorialDesign`], [`PointwiseDesign`])
//! 2. [`Executor`]: how batches run — [`SequentialExecutor`] in order on
//!    the calling thread, [`ParallelExecutor`] over a local thread pool,
//!    [`RemoteExecutor`] against a detached [`WorkerPool`] with job ids
//!    and disconnected reattachment
//! 3. [`Lab`]: the campaign driver tying ranges, design, notebook, and
//!    executor together, with pending-job reconciliation across client
//!    restarts

pub mod config;
pub mod design;
pub mod executor;
pub mod lab;

pub use config::ExecutorConfig;
pub use design::{
    Design, ExperimentalConfiguration, FactorialDesign, ParameterRanges, PointwiseDesign,
};
pub use executor::{
    Executor, JobId, JobStatus, ParallelExecutor, RemoteExecutor, SequentialExecutor, Submission,
    WorkerPool,
};
pub use lab::{CreateOptions, IntoRange, Lab};
