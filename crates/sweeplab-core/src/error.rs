//! Error types shared across the workspace
//!
//! Structural misuse raises one of these to the caller. Failures inside
//! experiment phases are never raised: they are captured into the record's
//! metadata by the run protocol.

use thiserror::Error;

/// Errors raised by the experiment, store, and campaign layers.
#[derive(Debug, Error)]
pub enum Error {
    /// A results record (or collection of them) has a shape the store
    /// can't handle: missing parameters, unknown query fields, or a value
    /// that doesn't fit the column it targets.
    #[error("badly structured results: {0}")]
    ResultsStructure(String),

    /// A persistent notebook file carries a format version this build
    /// doesn't understand.
    #[error("expected notebook version {expected}, found {found}")]
    NotebookVersion { expected: String, found: String },

    /// A mutating operation was attempted on a finished notebook.
    #[error("lab notebook is locked")]
    NotebookLocked,

    /// A mutating operation was attempted on a finished result set.
    #[error("result set is locked")]
    ResultSetLocked,

    /// A job identifier that no result set knows about. A common cause is
    /// a pending result that failed on submission and never started.
    #[error("unrecognised pending result job id {0}")]
    PendingResult(String),

    /// A pending result was added under a job id already in use.
    #[error("duplicate pending result job id {0}")]
    DuplicateJob(String),

    /// A pending result was cancelled without completing its experiment.
    /// Stored in the synthesised record's exception field, so every
    /// submitted point ends as either a completed or a cancelled record.
    #[error("cancelled")]
    Cancelled,

    /// A set of parameter ranges can't be used as the basis for a design.
    #[error("unusable experimental design: {0}")]
    Design(String),

    /// There is no result set under the given tag.
    #[error("no result set tagged '{0}'")]
    UnknownResultSet(String),

    /// A result set was added under a tag already in use.
    #[error("result set '{0}' already exists")]
    DuplicateResultSet(String),

    /// An executor could not run or track a submitted batch.
    #[error("executor failure: {0}")]
    Execution(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// A persistent notebook file could not be parsed.
    #[error("malformed notebook file: {0}")]
    Format(String),
}

pub type Result<T> = std::result::Result<T, Error>;
