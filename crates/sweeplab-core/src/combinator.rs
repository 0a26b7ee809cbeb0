//! Experiment combinators
//!
//! A combinator wraps an underlying experiment to alter its control flow
//! while leaving its parameters untouched: [`Repeated`] runs it several
//! times at the same point, [`Summary`] reduces a list of runs to summary
//! statistics. Combinators compose — `Summary(Repeated(e, n))` is the
//! usual way to get statistics over repetitions.

use log::warn;
use statrs::statistics::Statistics;

use crate::experiment::{Experiment, ExperimentExt, Outcome};
use crate::record::{meta, ResultsRecord};
use crate::value::{FieldMap, Point, Value};

/// Runs the underlying experiment a fixed number of times at the same
/// parameter point. The outcome is the list of inner records, each
/// stamped with the repetition count and its 0-based index; a notebook
/// flattens the list on insertion. Nested lists produced by an inner
/// combinator are flattened before indexing.
#[derive(Clone)]
pub struct Repeated<E> {
    inner: E,
    repetitions: usize,
}

impl<E> Repeated<E> {
    pub fn new(inner: E, repetitions: usize) -> Self {
        Self { inner, repetitions }
    }

    pub fn repetitions(&self) -> usize {
        self.repetitions
    }

    pub fn inner(&self) -> &E {
        &self.inner
    }
}

impl<E: Experiment + Clone + 'static> Experiment for Repeated<E> {
    fn configure(&mut self, params: &Point) {
        self.inner.configure(params);
    }

    fn deconfigure(&mut self) {
        self.inner.deconfigure();
    }

    fn perform(&mut self, params: &Point) -> anyhow::Result<Outcome> {
        let mut records = Vec::with_capacity(self.repetitions);
        for _ in 0..self.repetitions {
            let rc = self.inner.run(params.clone());
            records.extend(rc.flatten());
        }
        let n = self.repetitions as i64;
        for (i, rc) in records.iter_mut().enumerate() {
            rc.metadata
                .insert(meta::REPETITIONS.to_string(), Value::Int(n));
            rc.metadata
                .insert(meta::REPETITION_INDEX.to_string(), Value::Int(i as i64));
        }
        Ok(Outcome::records(records))
    }

    fn duplicate(&self) -> Box<dyn Experiment> {
        Box::new(self.clone())
    }
}

/// Runs the underlying experiment once and reduces its (usually
/// repeated) results to summary statistics: for each numeric result
/// field `f` it emits `f_mean`, `f_median`, `f_variance`, `f_min`, and
/// `f_max` over the successful inner runs. Failed inner runs are
/// excluded from the statistics; fields that aren't numeric are skipped
/// with a warning rather than failing the summary.
#[derive(Clone)]
pub struct Summary<E> {
    inner: E,
    fields: Option<Vec<String>>,
}

pub const MEAN_SUFFIX: &str = "_mean";
pub const MEDIAN_SUFFIX: &str = "_median";
pub const VARIANCE_SUFFIX: &str = "_variance";
pub const MIN_SUFFIX: &str = "_min";
pub const MAX_SUFFIX: &str = "_max";

impl<E> Summary<E> {
    /// Summarise every numeric result field of the inner experiment.
    pub fn new(inner: E) -> Self {
        Self {
            inner,
            fields: None,
        }
    }

    /// Restrict the summary to the named result fields.
    pub fn with_fields(inner: E, fields: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            inner,
            fields: Some(fields.into_iter().map(Into::into).collect()),
        }
    }

    pub fn inner(&self) -> &E {
        &self.inner
    }
}

impl<E: Experiment + Clone + 'static> Experiment for Summary<E> {
    fn configure(&mut self, params: &Point) {
        self.inner.configure(params);
    }

    fn deconfigure(&mut self) {
        self.inner.deconfigure();
    }

    fn perform(&mut self, params: &Point) -> anyhow::Result<Outcome> {
        let rc = self.inner.run(params.clone());
        let all = rc.flatten();
        let total = all.len();
        let successful: Vec<ResultsRecord> =
            all.into_iter().filter(ResultsRecord::success).collect();

        let summary = summarise(&successful, self.fields.as_deref());
        Ok(Outcome::fields(summary)
            .with_metadata(meta::REPETITIONS, total)
            .with_metadata(meta::SUCCESSFUL_REPETITIONS, successful.len()))
    }

    fn duplicate(&self) -> Box<dyn Experiment> {
        Box::new(self.clone())
    }
}

/// Summary statistics over the successful records, keyed by suffixed
/// field name. Variance is the population variance.
fn summarise(records: &[ResultsRecord], fields: Option<&[String]>) -> FieldMap {
    let mut summary = FieldMap::new();
    let first = match records.first() {
        Some(first) => first,
        None => return summary,
    };

    let available: Vec<String> = match first.result_fields() {
        Some(fields) => fields.keys().cloned().collect(),
        None => return summary,
    };
    let chosen: Vec<String> = match fields {
        Some(fs) => fs
            .iter()
            .filter(|f| available.contains(*f))
            .cloned()
            .collect(),
        None => available,
    };

    for name in chosen {
        let mut values = Vec::with_capacity(records.len());
        for rc in records {
            let v = rc.result_fields().and_then(|fields| fields.get(&name));
            match v.and_then(Value::as_f64) {
                Some(x) => values.push(x),
                None => break,
            }
        }
        if values.len() != records.len() {
            warn!("cannot summarise non-numeric or missing field '{name}'");
            continue;
        }

        let data = values.as_slice();
        summary.insert(
            format!("{name}{MEAN_SUFFIX}"),
            Value::Float(data.mean()),
        );
        summary.insert(format!("{name}{MEDIAN_SUFFIX}"), Value::Float(median(&values)));
        summary.insert(
            format!("{name}{VARIANCE_SUFFIX}"),
            Value::Float(data.population_variance()),
        );
        summary.insert(format!("{name}{MIN_SUFFIX}"), Value::Float(data.min()));
        summary.insert(format!("{name}{MAX_SUFFIX}"), Value::Float(data.max()));
    }
    summary
}

fn median(values: &[f64]) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let n = sorted.len();
    if n % 2 == 1 {
        sorted[n / 2]
    } else {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::point;
    use anyhow::bail;

    /// Returns its parameter and a counter that increments per run.
    #[derive(Clone, Default)]
    struct Counter {
        runs: i64,
        fail_every: Option<i64>,
    }

    impl Experiment for Counter {
        fn perform(&mut self, params: &Point) -> anyhow::Result<Outcome> {
            self.runs += 1;
            if let Some(every) = self.fail_every {
                if self.runs % every == 0 {
                    bail!("scheduled failure");
                }
            }
            let x = params.get("x").cloned().unwrap_or(Value::Int(0));
            Ok(Outcome::fields(point! {
                "result" => x,
                "run" => self.runs,
                "label" => "text",
            }))
        }

        fn duplicate(&self) -> Box<dyn Experiment> {
            Box::new(self.clone())
        }
    }

    #[test]
    fn test_repeated_produces_indexed_records() {
        let mut e = Repeated::new(Counter::default(), 5);
        let rc = e.run(point! { "x" => 7 });
        assert!(rc.success());

        let inner = rc.nested().unwrap();
        assert_eq!(inner.len(), 5);
        for (i, rec) in inner.iter().enumerate() {
            assert_eq!(rec.metadata.get(meta::REPETITIONS), Some(&Value::Int(5)));
            assert_eq!(
                rec.metadata.get(meta::REPETITION_INDEX),
                Some(&Value::Int(i as i64))
            );
            assert_eq!(rec.parameters.get("x"), Some(&Value::Int(7)));
        }
    }

    #[test]
    fn test_repeated_flattens_nested_lists() {
        let mut e = Repeated::new(Repeated::new(Counter::default(), 3), 2);
        let rc = e.run(point! { "x" => 1 });

        let inner = rc.nested().unwrap();
        assert_eq!(inner.len(), 6);
        // indices run over the flattened list
        let indices: Vec<_> = inner
            .iter()
            .map(|r| r.metadata.get(meta::REPETITION_INDEX).cloned().unwrap())
            .collect();
        assert_eq!(indices, (0..6).map(Value::Int).collect::<Vec<_>>());
    }

    #[test]
    fn test_summary_statistics() {
        let mut e = Summary::with_fields(Repeated::new(Counter::default(), 10), ["run"]);
        let rc = e.run(point! { "x" => 5 });
        assert!(rc.success());

        let fields = rc.result_fields().unwrap();
        // runs are 1..=10
        assert_eq!(fields.get("run_mean"), Some(&Value::Float(5.5)));
        assert_eq!(fields.get("run_median"), Some(&Value::Float(5.5)));
        assert_eq!(fields.get("run_min"), Some(&Value::Float(1.0)));
        assert_eq!(fields.get("run_max"), Some(&Value::Float(10.0)));
        assert_eq!(fields.get("run_variance"), Some(&Value::Float(8.25)));

        assert_eq!(rc.metadata.get(meta::REPETITIONS), Some(&Value::Int(10)));
        assert_eq!(
            rc.metadata.get(meta::SUCCESSFUL_REPETITIONS),
            Some(&Value::Int(10))
        );
    }

    #[test]
    fn test_summary_skips_non_numeric_fields() {
        let mut e = Summary::new(Repeated::new(Counter::default(), 4));
        let rc = e.run(point! { "x" => 2 });

        let fields = rc.result_fields().unwrap();
        assert!(fields.contains_key("run_mean"));
        assert!(!fields.keys().any(|k| k.starts_with("label_")));
    }

    #[test]
    fn test_summary_excludes_failed_runs() {
        let counter = Counter {
            fail_every: Some(2),
            ..Default::default()
        };
        let mut e = Summary::with_fields(Repeated::new(counter, 6), ["run"]);
        let rc = e.run(point! { "x" => 1 });

        assert!(rc.success());
        assert_eq!(rc.metadata.get(meta::REPETITIONS), Some(&Value::Int(6)));
        assert_eq!(
            rc.metadata.get(meta::SUCCESSFUL_REPETITIONS),
            Some(&Value::Int(3))
        );
        // odd runs 1, 3, 5 survive
        let fields = rc.result_fields().unwrap();
        assert_eq!(fields.get("run_mean"), Some(&Value::Float(3.0)));
        assert_eq!(fields.get("run_min"), Some(&Value::Float(1.0)));
        assert_eq!(fields.get("run_max"), Some(&Value::Float(5.0)));
    }

    #[test]
    fn test_summary_of_empty_results() {
        let counter = Counter {
            fail_every: Some(1),
            ..Default::default()
        };
        let mut e = Summary::new(Repeated::new(counter, 3));
        let rc = e.run(point! { "x" => 1 });

        assert!(rc.success());
        assert!(rc.result_fields().unwrap().is_empty());
        assert_eq!(
            rc.metadata.get(meta::SUCCESSFUL_REPETITIONS),
            Some(&Value::Int(0))
        );
    }
}
