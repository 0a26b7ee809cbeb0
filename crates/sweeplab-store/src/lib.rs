//! Result sets, notebooks, and notebook persistence for sweeplab
//!
//! The storage layer of the workspace:
//!
//! 1. [`ResultSet`]: a typed, append-only columnar table of records with
//!    incremental schema inference, plus the pending-job table
//! 2. [`Notebook`]: tagged result sets, a current selection, and a
//!    notebook-wide pending index, with locking and a persistence hook
//! 3. [`JsonBackend`]: the versioned JSON on-disk codec
//!
//! Result sets own their records: records never move between sets, and
//! are destroyed only by deleting the containing set.

pub mod backend;
pub mod json;
pub mod notebook;
pub mod resultset;

pub use backend::PersistentBackend;
pub use json::JsonBackend;
pub use notebook::{Notebook, DEFAULT_RESULTSET};
pub use resultset::{Field, ResultSet, Table, JOB_ID};
