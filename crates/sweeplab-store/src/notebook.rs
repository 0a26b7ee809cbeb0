//! Lab notebooks: named collections of result sets
//!
//! A notebook groups result sets under unique tags, keeps one of them
//! selected as *current*, and indexes pending jobs across every set so a
//! lab can reconcile completions no matter which set a job was submitted
//! against. A notebook always holds at least one result set (the default
//! set, which can never be deleted), and may be attached to a persistent
//! backend that `commit` writes through.

use std::collections::BTreeMap;

use log::error;

use sweeplab_core::error::{Error, Result};
use sweeplab_core::record::ResultsRecord;
use sweeplab_core::value::Point;

use crate::backend::PersistentBackend;
use crate::resultset::{ResultSet, Table};

/// Tag of the result set every notebook starts with.
pub const DEFAULT_RESULTSET: &str = "default";

/// A named collection of result sets with a current selection and a
/// notebook-wide pending-job index.
pub struct Notebook {
    name: String,
    description: String,
    sets: BTreeMap<String, ResultSet>,
    current: String,
    pending: BTreeMap<String, String>, // job id -> owning tag
    locked: bool,
    backend: Option<Box<dyn PersistentBackend>>,
}

impl std::fmt::Debug for Notebook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notebook")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("sets", &self.sets)
            .field("current", &self.current)
            .field("pending", &self.pending)
            .field("locked", &self.locked)
            .field("backend", &self.backend.as_ref().map(|_| "<backend>"))
            .finish()
    }
}

impl Notebook {
    /// Create an in-memory notebook containing the default result set.
    pub fn new(name: &str, description: Option<&str>) -> Self {
        let mut sets = BTreeMap::new();
        sets.insert(DEFAULT_RESULTSET.to_string(), ResultSet::new(None));
        Self {
            name: name.to_string(),
            description: description.unwrap_or("A lab notebook").to_string(),
            sets,
            current: DEFAULT_RESULTSET.to_string(),
            pending: BTreeMap::new(),
            locked: false,
            backend: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn set_description(&mut self, description: &str) -> Result<()> {
        self.assert_unlocked()?;
        self.description = description.to_string();
        Ok(())
    }

    // ---- persistence ----

    /// Attach the backend this notebook commits through.
    pub fn set_backend(&mut self, backend: Box<dyn PersistentBackend>) {
        self.backend = Some(backend);
    }

    pub fn is_persistent(&self) -> bool {
        self.backend.is_some()
    }

    /// Write the notebook through its backend, if it has one. On
    /// success the per-set dirty and type-changed flags are cleared; on
    /// failure the in-memory notebook is unchanged.
    pub fn commit(&mut self) -> Result<()> {
        let mut backend = match self.backend.take() {
            Some(backend) => backend,
            None => return Ok(()),
        };
        let outcome = backend.commit(self);
        self.backend = Some(backend);
        outcome?;
        for rs in self.sets.values_mut() {
            rs.mark_clean();
        }
        Ok(())
    }

    // ---- result set management ----

    /// Create an empty result set under the given tag and make it
    /// current.
    pub fn add_result_set(&mut self, tag: &str, description: Option<&str>) -> Result<&mut ResultSet> {
        self.assert_unlocked()?;
        if self.sets.contains_key(tag) {
            return Err(Error::DuplicateResultSet(tag.to_string()));
        }
        self.sets.insert(tag.to_string(), ResultSet::new(description));
        self.current = tag.to_string();
        Ok(self.sets.get_mut(tag).expect("just inserted"))
    }

    /// Delete a result set. The default set and the current set can't
    /// be deleted, so a notebook always has at least one set.
    pub fn delete_result_set(&mut self, tag: &str) -> Result<()> {
        self.assert_unlocked()?;
        if !self.sets.contains_key(tag) {
            return Err(Error::UnknownResultSet(tag.to_string()));
        }
        if tag == DEFAULT_RESULTSET {
            return Err(Error::ResultsStructure(
                "cannot delete the default result set".into(),
            ));
        }
        if tag == self.current {
            return Err(Error::ResultsStructure(format!(
                "cannot delete the current result set ({tag})"
            )));
        }
        self.sets.remove(tag);
        self.pending.retain(|_, owner| owner != tag);
        Ok(())
    }

    pub fn result_sets(&self) -> Vec<String> {
        self.sets.keys().cloned().collect()
    }

    pub fn number_of_result_sets(&self) -> usize {
        self.sets.len()
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.sets.contains_key(tag)
    }

    pub fn result_set(&self, tag: &str) -> Result<&ResultSet> {
        self.sets
            .get(tag)
            .ok_or_else(|| Error::UnknownResultSet(tag.to_string()))
    }

    pub fn result_set_mut(&mut self, tag: &str) -> Result<&mut ResultSet> {
        self.sets
            .get_mut(tag)
            .ok_or_else(|| Error::UnknownResultSet(tag.to_string()))
    }

    /// Make the tagged result set current.
    pub fn select(&mut self, tag: &str) -> Result<&mut ResultSet> {
        if !self.sets.contains_key(tag) {
            return Err(Error::UnknownResultSet(tag.to_string()));
        }
        self.current = tag.to_string();
        Ok(self.sets.get_mut(tag).expect("selection exists"))
    }

    pub fn current(&self) -> &ResultSet {
        &self.sets[&self.current]
    }

    pub fn current_mut(&mut self) -> &mut ResultSet {
        self.sets.get_mut(&self.current).expect("current exists")
    }

    pub fn current_tag(&self) -> &str {
        &self.current
    }

    /// Select the tagged set if it exists (returning true); otherwise
    /// create and select it (returning false).
    pub fn already(&mut self, tag: &str, description: Option<&str>) -> Result<bool> {
        if self.contains(tag) {
            self.select(tag)?;
            Ok(true)
        } else {
            self.add_result_set(tag, description)?;
            Ok(false)
        }
    }

    // ---- locking ----

    /// Finish every result set (cancelling their pending jobs), lock
    /// the notebook, and — for persistent notebooks — commit, lock flag
    /// included.
    pub fn finish(&mut self, commit: bool) -> Result<()> {
        if !self.locked {
            for rs in self.sets.values_mut() {
                rs.finish()?;
            }
            self.pending.clear();
            self.locked = true;
            if commit {
                self.commit()?;
            }
        }
        Ok(())
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    fn assert_unlocked(&self) -> Result<()> {
        if self.locked {
            error!("operation attempted on locked notebook {}", self.name);
            return Err(Error::NotebookLocked);
        }
        Ok(())
    }

    // ---- adding results ----

    /// Add a record to the tagged (default: current) result set,
    /// flattening combinator output: a record whose results are a list
    /// of nested records contributes each of its leaves instead.
    pub fn add_result(&mut self, rc: ResultsRecord, tag: Option<&str>) -> Result<()> {
        self.assert_unlocked()?;
        let tag = tag.unwrap_or(&self.current).to_string();
        let rs = self.result_set_mut(&tag)?;
        for leaf in rc.flatten() {
            rs.add_single_result(&leaf)?;
        }
        Ok(())
    }

    /// Add a list of records, each flattened as in [`Notebook::add_result`].
    pub fn add_results(
        &mut self,
        rcs: impl IntoIterator<Item = ResultsRecord>,
        tag: Option<&str>,
    ) -> Result<()> {
        for rc in rcs {
            self.add_result(rc, tag)?;
        }
        Ok(())
    }

    pub fn number_of_results(&self, tag: Option<&str>) -> Result<usize> {
        Ok(self.tagged(tag)?.number_of_results())
    }

    pub fn dataframe(&self, tag: Option<&str>, only_successful: bool) -> Result<Table> {
        Ok(self.tagged(tag)?.dataframe(only_successful))
    }

    pub fn dataframe_for(
        &self,
        params: &Point,
        tag: Option<&str>,
        only_successful: bool,
    ) -> Result<Table> {
        self.tagged(tag)?.dataframe_for(params, only_successful)
    }

    pub fn results(&self, tag: Option<&str>) -> Result<Vec<ResultsRecord>> {
        Ok(self.tagged(tag)?.results())
    }

    pub fn results_for(&self, params: &Point, tag: Option<&str>) -> Result<Vec<ResultsRecord>> {
        self.tagged(tag)?.results_for(params)
    }

    fn tagged(&self, tag: Option<&str>) -> Result<&ResultSet> {
        match tag {
            Some(tag) => self.result_set(tag),
            None => Ok(self.current()),
        }
    }

    // ---- pending results ----

    /// Record a submitted job against the tagged (default: current)
    /// result set and index it notebook-wide. Job ids must be unique
    /// across the whole notebook.
    pub fn add_pending_result(
        &mut self,
        params: &Point,
        job_id: &str,
        tag: Option<&str>,
    ) -> Result<()> {
        self.assert_unlocked()?;
        if self.pending.contains_key(job_id) {
            return Err(Error::DuplicateJob(job_id.to_string()));
        }
        let tag = tag.unwrap_or(&self.current).to_string();
        self.result_set_mut(&tag)?
            .add_single_pending_result(params, job_id)?;
        self.pending.insert(job_id.to_string(), tag);
        Ok(())
    }

    /// Resolve a pending job with its completed record. The record goes
    /// to the set that owns the job, wherever that is; the current
    /// selection is unaffected.
    pub fn resolve_pending_result(&mut self, rc: ResultsRecord, job_id: &str) -> Result<()> {
        self.assert_unlocked()?;
        let tag = self
            .pending
            .get(job_id)
            .ok_or_else(|| Error::PendingResult(job_id.to_string()))?
            .clone();
        self.add_result(rc, Some(&tag))?;
        self.result_set_mut(&tag)?
            .resolve_single_pending_result(job_id)?;
        self.pending.remove(job_id);
        Ok(())
    }

    /// Cancel a pending job, leaving a synthesised failure record in the
    /// owning set.
    pub fn cancel_pending_result(&mut self, job_id: &str) -> Result<()> {
        self.assert_unlocked()?;
        let tag = self
            .pending
            .get(job_id)
            .ok_or_else(|| Error::PendingResult(job_id.to_string()))?
            .clone();
        self.result_set_mut(&tag)?
            .cancel_single_pending_result(job_id)?;
        self.pending.remove(job_id);
        Ok(())
    }

    /// True when the tagged (default: current) set has no pending
    /// results left.
    pub fn ready(&self, tag: Option<&str>) -> Result<bool> {
        Ok(self.tagged(tag)?.ready())
    }

    /// The fraction of the tagged set's results that are available
    /// rather than pending.
    pub fn ready_fraction(&self, tag: Option<&str>) -> Result<f64> {
        let rs = self.tagged(tag)?;
        let done = rs.number_of_results();
        let total = done + rs.number_of_pending_results();
        if total == 0 {
            Ok(1.0)
        } else {
            Ok(done as f64 / total as f64)
        }
    }

    pub fn pending_results(&self, tag: Option<&str>) -> Result<Vec<String>> {
        Ok(self.tagged(tag)?.pending_results())
    }

    pub fn number_of_pending_results(&self, tag: Option<&str>) -> Result<usize> {
        Ok(self.tagged(tag)?.number_of_pending_results())
    }

    pub fn pending_result_parameters(&self, job_id: &str) -> Result<Point> {
        let tag = self
            .pending
            .get(job_id)
            .ok_or_else(|| Error::PendingResult(job_id.to_string()))?;
        self.sets[tag].pending_result_parameters(job_id)
    }

    /// The job ids pending across every result set.
    pub fn all_pending_results(&self) -> Vec<String> {
        self.pending.keys().cloned().collect()
    }

    pub fn number_of_all_pending_results(&self) -> usize {
        self.pending.len()
    }

    /// The tag owning a pending job, for callers reconciling jobs
    /// across sets.
    pub fn pending_result_set(&self, job_id: &str) -> Result<&str> {
        self.pending
            .get(job_id)
            .map(String::as_str)
            .ok_or_else(|| Error::PendingResult(job_id.to_string()))
    }

    // ---- restore (persistence) ----

    /// Rebuild a notebook from persisted parts. The pending index is
    /// reconstructed from the sets' own pending tables.
    pub(crate) fn from_parts(
        name: String,
        description: String,
        sets: BTreeMap<String, ResultSet>,
        current: String,
        locked: bool,
    ) -> Result<Notebook> {
        if !sets.contains_key(DEFAULT_RESULTSET) {
            return Err(Error::Format(format!(
                "notebook is missing its default result set '{DEFAULT_RESULTSET}'"
            )));
        }
        if !sets.contains_key(&current) {
            return Err(Error::Format(format!(
                "current result set '{current}' does not exist"
            )));
        }
        let mut pending = BTreeMap::new();
        for (tag, rs) in &sets {
            for job in rs.pending_results() {
                if pending.insert(job.clone(), tag.clone()).is_some() {
                    return Err(Error::Format(format!(
                        "pending job id {job} appears in more than one result set"
                    )));
                }
            }
        }
        Ok(Notebook {
            name,
            description,
            sets,
            current,
            pending,
            locked,
            backend: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sweeplab_core::point;
    use sweeplab_core::record::{meta, Results};
    use sweeplab_core::value::{FieldMap, Value};

    fn record(params: Point, results: FieldMap) -> ResultsRecord {
        let mut metadata = FieldMap::new();
        metadata.insert(meta::STATUS.to_string(), Value::Bool(true));
        ResultsRecord::new(params, metadata, Results::Fields(results))
    }

    fn nested(records: Vec<ResultsRecord>) -> ResultsRecord {
        ResultsRecord::new(Point::new(), FieldMap::new(), Results::Nested(records))
    }

    #[test]
    fn test_notebook_always_has_a_default_set() {
        let nb = Notebook::new("test", None);
        assert_eq!(nb.number_of_result_sets(), 1);
        assert!(nb.contains(DEFAULT_RESULTSET));
        assert_eq!(nb.current_tag(), DEFAULT_RESULTSET);
    }

    #[test]
    fn test_add_select_delete_result_sets() {
        let mut nb = Notebook::new("test", None);
        nb.add_result_set("first", Some("one")).unwrap();
        assert_eq!(nb.current_tag(), "first");
        assert!(matches!(
            nb.add_result_set("first", None),
            Err(Error::DuplicateResultSet(_))
        ));

        nb.add_result_set("second", None).unwrap();
        // neither the current nor the default set can be deleted
        assert!(nb.delete_result_set("second").is_err());
        assert!(nb.delete_result_set(DEFAULT_RESULTSET).is_err());

        nb.select("first").unwrap();
        nb.delete_result_set("second").unwrap();
        assert!(!nb.contains("second"));
        assert!(matches!(
            nb.delete_result_set("second"),
            Err(Error::UnknownResultSet(_))
        ));
    }

    #[test]
    fn test_already_selects_or_creates() {
        let mut nb = Notebook::new("test", None);
        assert!(!nb.already("campaign", Some("fresh")).unwrap());
        assert_eq!(nb.current_tag(), "campaign");

        nb.select(DEFAULT_RESULTSET).unwrap();
        assert!(nb.already("campaign", None).unwrap());
        assert_eq!(nb.current_tag(), "campaign");
    }

    #[test]
    fn test_add_result_flattens_nested_records() {
        let mut nb = Notebook::new("test", None);
        let leaves = vec![
            record(point! { "a" => 1 }, point! { "v" => 1.0 }),
            record(point! { "a" => 2 }, point! { "v" => 2.0 }),
        ];
        nb.add_result(nested(leaves), None).unwrap();
        assert_eq!(nb.number_of_results(None).unwrap(), 2);
    }

    #[test]
    fn test_pending_index_spans_result_sets() {
        let mut nb = Notebook::new("test", None);
        nb.add_result_set("one", None).unwrap();
        nb.add_pending_result(&point! { "k" => 1 }, "J1", None).unwrap();
        nb.add_result_set("two", None).unwrap();
        nb.add_pending_result(&point! { "k" => 2 }, "J2", None).unwrap();

        // ids are unique notebook-wide
        assert!(matches!(
            nb.add_pending_result(&point! { "k" => 3 }, "J1", None),
            Err(Error::DuplicateJob(_))
        ));

        assert_eq!(nb.number_of_all_pending_results(), 2);
        assert_eq!(nb.pending_result_set("J1").unwrap(), "one");

        // resolving goes to the owning set without changing selection
        nb.resolve_pending_result(record(point! { "k" => 1 }, point! { "v" => 9.0 }), "J1")
            .unwrap();
        assert_eq!(nb.current_tag(), "two");
        assert_eq!(nb.number_of_results(Some("one")).unwrap(), 1);
        assert_eq!(nb.number_of_all_pending_results(), 1);

        // a job resolves exactly once
        assert!(matches!(
            nb.resolve_pending_result(record(point! { "k" => 1 }, point! {}), "J1"),
            Err(Error::PendingResult(_))
        ));
    }

    #[test]
    fn test_cancel_pending_result() {
        let mut nb = Notebook::new("test", None);
        nb.add_pending_result(&point! { "k" => 5 }, "J1", None).unwrap();
        nb.cancel_pending_result("J1").unwrap();

        assert_eq!(nb.number_of_all_pending_results(), 0);
        let rcs = nb.results(None).unwrap();
        assert_eq!(rcs.len(), 1);
        assert!(rcs[0].failed());
        assert!(rcs[0].is_cancelled());
        assert_eq!(rcs[0].parameters.get("k"), Some(&Value::Int(5)));
        assert!(matches!(
            nb.cancel_pending_result("J1"),
            Err(Error::PendingResult(_))
        ));
    }

    #[test]
    fn test_ready_fraction() {
        let mut nb = Notebook::new("test", None);
        assert_eq!(nb.ready_fraction(None).unwrap(), 1.0);

        nb.add_result(record(point! { "k" => 1 }, point! { "v" => 1.0 }), None)
            .unwrap();
        nb.add_pending_result(&point! { "k" => 2 }, "J1", None).unwrap();
        assert!(!nb.ready(None).unwrap());
        assert_eq!(nb.ready_fraction(None).unwrap(), 0.5);
    }

    #[test]
    fn test_finish_locks_everything() {
        let mut nb = Notebook::new("test", None);
        nb.add_result_set("one", None).unwrap();
        nb.add_pending_result(&point! { "k" => 1 }, "J1", None).unwrap();

        nb.finish(false).unwrap();
        assert!(nb.is_locked());
        assert_eq!(nb.number_of_all_pending_results(), 0);
        // the pending job became a cancellation record
        assert_eq!(nb.number_of_results(Some("one")).unwrap(), 1);

        assert!(matches!(
            nb.add_result_set("late", None),
            Err(Error::NotebookLocked)
        ));
        assert!(matches!(
            nb.add_result(record(point! {}, point! {}), None),
            Err(Error::NotebookLocked)
        ));
        assert!(matches!(nb.delete_result_set("one"), Err(Error::NotebookLocked)));
    }

    #[test]
    fn test_deleting_a_set_drops_its_pending_index_entries() {
        let mut nb = Notebook::new("test", None);
        nb.add_result_set("doomed", None).unwrap();
        nb.add_pending_result(&point! { "k" => 1 }, "J1", None).unwrap();
        nb.select(DEFAULT_RESULTSET).unwrap();
        nb.delete_result_set("doomed").unwrap();
        assert_eq!(nb.number_of_all_pending_results(), 0);
    }
}
