//! The persistence contract notebooks commit through
//!
//! A backend reconstructs a notebook in full on open (sets, schemas,
//! records, pending jobs, attributes, descriptions, lock flags, current
//! tag) and writes dirty result sets in full on commit — schema first
//! when the set's type changed, never a partially written schema. The
//! notebook clears the dirty flags only after a successful commit, so a
//! failed write leaves the in-memory state marked for retry.

use sweeplab_core::error::Result;

use crate::notebook::Notebook;

/// A storage backend for a notebook. Concrete codecs decide the bytes;
/// the notebook decides what is persisted.
pub trait PersistentBackend: Send {
    /// Write the notebook to storage. Must either write completely or
    /// fail leaving the previous contents usable.
    fn commit(&mut self, notebook: &Notebook) -> Result<()>;
}
