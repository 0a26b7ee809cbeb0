//! Core types and the experiment protocol for sweeplab
//!
//! This crate provides the foundational vocabulary for running campaigns
//! of computational experiments over a multi-dimensional parameter space:
//!
//! 1. [`Value`] and [`Point`]: scalar values and parameter points
//! 2. [`ResultsRecord`]: the (parameters, metadata, results) triple
//!    produced by one run
//! 3. [`Experiment`]: the phase protocol (`set_up` → `perform` →
//!    `tear_down`) with failures captured into metadata
//! 4. [`Repeated`] and [`Summary`]: combinators for repetition and
//!    statistical summarisation
//!
//! Storage, campaign scheduling, and execution live in the companion
//! crates layered on top of this one.

pub mod combinator;
pub mod error;
pub mod experiment;
pub mod record;
pub mod value;

pub use combinator::{Repeated, Summary};
pub use error::{Error, Result};
pub use experiment::{Experiment, ExperimentExt, Outcome, Payload};
pub use record::{meta, Results, ResultsRecord};
pub use value::{FieldMap, Point, ScalarKind, StorageType, Value};
