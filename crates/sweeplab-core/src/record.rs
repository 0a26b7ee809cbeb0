//! Results records: the three-section output of one experimental run

use chrono::Utc;

use crate::error::Error;
use crate::value::{FieldMap, Point, Value};

/// Standard metadata fields written on every record.
pub mod meta {
    use crate::value::{ScalarKind, StorageType};

    pub const EXPERIMENT_CLASS: &str = "experiment_class";
    pub const START_TIME: &str = "start_time";
    pub const END_TIME: &str = "end_time";
    pub const SETUP_TIME: &str = "setup_time";
    pub const EXPERIMENT_TIME: &str = "experiment_time";
    pub const TEARDOWN_TIME: &str = "teardown_time";
    pub const ELAPSED_TIME: &str = "elapsed_time";
    pub const STATUS: &str = "status";
    pub const EXCEPTION: &str = "exception";
    pub const TRACEBACK: &str = "traceback";

    // Added by combinators.
    pub const REPETITIONS: &str = "repetitions";
    pub const REPETITION_INDEX: &str = "i";
    pub const SUCCESSFUL_REPETITIONS: &str = "successful_repetitions";

    /// The standard fields in their canonical column order.
    pub const STANDARD_FIELDS: [&str; 10] = [
        EXPERIMENT_CLASS,
        START_TIME,
        END_TIME,
        SETUP_TIME,
        EXPERIMENT_TIME,
        TEARDOWN_TIME,
        ELAPSED_TIME,
        STATUS,
        EXCEPTION,
        TRACEBACK,
    ];

    /// The storage type of a standard metadata field, if `name` is one.
    pub fn standard_type(name: &str) -> Option<StorageType> {
        let ty = match name {
            EXPERIMENT_CLASS | START_TIME | END_TIME | EXCEPTION | TRACEBACK => {
                StorageType::Scalar(ScalarKind::String)
            }
            SETUP_TIME | EXPERIMENT_TIME | TEARDOWN_TIME | ELAPSED_TIME => {
                StorageType::Scalar(ScalarKind::Float)
            }
            STATUS => StorageType::Scalar(ScalarKind::Bool),
            _ => return None,
        };
        Some(ty)
    }
}

/// The results section of a record: either the experiment's own result
/// fields, or a list of fully-formed records produced by a combinator.
/// Nested records are flattened when the record reaches a notebook.
#[derive(Debug, Clone, PartialEq)]
pub enum Results {
    Fields(FieldMap),
    Nested(Vec<ResultsRecord>),
}

impl Results {
    pub fn empty() -> Self {
        Results::Fields(FieldMap::new())
    }
}

/// One experimental run: the parameter point it ran at, metadata on how
/// it ran, and the results it produced. Records are immutable once added
/// to a result set.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultsRecord {
    pub parameters: Point,
    pub metadata: FieldMap,
    pub results: Results,
}

impl ResultsRecord {
    pub fn new(parameters: Point, metadata: FieldMap, results: Results) -> Self {
        Self {
            parameters,
            metadata,
            results,
        }
    }

    /// Whether the run completed without an exception. False for records
    /// that never ran (no status yet).
    pub fn success(&self) -> bool {
        self.metadata
            .get(meta::STATUS)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    pub fn failed(&self) -> bool {
        self.metadata
            .get(meta::STATUS)
            .and_then(Value::as_bool)
            .map(|status| !status)
            .unwrap_or(false)
    }

    /// The captured exception message, if the run failed.
    pub fn exception(&self) -> Option<&str> {
        self.metadata.get(meta::EXCEPTION).and_then(Value::as_str)
    }

    /// Whether this is a synthesised cancellation record.
    pub fn is_cancelled(&self) -> bool {
        self.exception() == Some(Error::Cancelled.to_string().as_str())
    }

    /// The result fields, when the results section isn't nested.
    pub fn result_fields(&self) -> Option<&FieldMap> {
        match &self.results {
            Results::Fields(fields) => Some(fields),
            Results::Nested(_) => None,
        }
    }

    /// The nested records, when this is combinator output.
    pub fn nested(&self) -> Option<&[ResultsRecord]> {
        match &self.results {
            Results::Nested(records) => Some(records),
            Results::Fields(_) => None,
        }
    }

    /// Flatten to the leaf records: a record with plain result fields is
    /// its own leaf; nested records contribute their leaves in order, and
    /// the wrapper itself is discarded.
    pub fn flatten(self) -> Vec<ResultsRecord> {
        match self.results {
            Results::Fields(_) => vec![self],
            Results::Nested(records) => records
                .into_iter()
                .flat_map(ResultsRecord::flatten)
                .collect(),
        }
    }

    /// Synthesise the record for a pending job cancelled before it could
    /// complete: failed, with the distinguished cancellation exception.
    pub fn cancellation(parameters: Point) -> Self {
        let mut metadata = FieldMap::new();
        metadata.insert(meta::STATUS.to_string(), Value::Bool(false));
        metadata.insert(meta::END_TIME.to_string(), Value::Timestamp(Utc::now()));
        metadata.insert(
            meta::EXCEPTION.to_string(),
            Value::String(Error::Cancelled.to_string()),
        );
        metadata.insert(
            meta::TRACEBACK.to_string(),
            Value::String("pending result cancelled before completion".to_string()),
        );
        Self::new(parameters, metadata, Results::empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::point;

    fn leaf(status: bool) -> ResultsRecord {
        let mut metadata = FieldMap::new();
        metadata.insert(meta::STATUS.to_string(), Value::Bool(status));
        ResultsRecord::new(
            point! { "a" => 1 },
            metadata,
            Results::Fields(point! { "total" => 2 }),
        )
    }

    #[test]
    fn test_success_tracks_status() {
        assert!(leaf(true).success());
        assert!(!leaf(true).failed());
        assert!(leaf(false).failed());

        let unrun = ResultsRecord::new(Point::new(), FieldMap::new(), Results::empty());
        assert!(!unrun.success());
        assert!(!unrun.failed());
    }

    #[test]
    fn test_flatten_recurses_through_nesting() {
        let inner = ResultsRecord::new(
            Point::new(),
            FieldMap::new(),
            Results::Nested(vec![leaf(true), leaf(false)]),
        );
        let outer = ResultsRecord::new(
            Point::new(),
            FieldMap::new(),
            Results::Nested(vec![inner, leaf(true)]),
        );
        let leaves = outer.flatten();
        assert_eq!(leaves.len(), 3);
        assert!(leaves.iter().all(|r| r.result_fields().is_some()));
    }

    #[test]
    fn test_cancellation_record() {
        let rc = ResultsRecord::cancellation(point! { "k" => 5 });
        assert!(rc.failed());
        assert!(rc.is_cancelled());
        assert_eq!(rc.parameters.get("k"), Some(&Value::Int(5)));
        assert!(rc.metadata.contains_key(meta::END_TIME));
    }
}
