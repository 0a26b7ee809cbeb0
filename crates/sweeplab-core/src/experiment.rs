//! The experiment protocol
//!
//! An [`Experiment`] is a parameterised computation broken into phases:
//! `set_up`, `perform`, `tear_down`. The run protocol times each phase,
//! captures any phase failure into the record's metadata, and always
//! returns a record — exceptions never propagate out of a run.
//!
//! # Failure semantics
//!
//! - failure in `set_up`: no teardown runs, no phase times are recorded
//! - failure in `perform`: teardown still runs, its own failure is
//!   logged and swallowed
//! - failure in `tear_down` after a successful `perform`: the run is
//!   failed and the results are dropped

use std::time::Instant;

use chrono::Utc;
use log::warn;

use crate::record::{meta, Results, ResultsRecord};
use crate::value::{FieldMap, Point, Value};

/// What a run of `perform` produced: either the experiment's own result
/// fields, or a list of fully-formed records (the combinator case), plus
/// any metadata the experiment wants merged into its record.
#[derive(Debug, Clone)]
pub struct Outcome {
    pub payload: Payload,
    pub metadata: FieldMap,
}

#[derive(Debug, Clone)]
pub enum Payload {
    Fields(FieldMap),
    Records(Vec<ResultsRecord>),
}

impl Outcome {
    /// An outcome carrying plain result fields.
    pub fn fields(fields: FieldMap) -> Self {
        Self {
            payload: Payload::Fields(fields),
            metadata: FieldMap::new(),
        }
    }

    /// An outcome carrying fully-formed records.
    pub fn records(records: Vec<ResultsRecord>) -> Self {
        Self {
            payload: Payload::Records(records),
            metadata: FieldMap::new(),
        }
    }

    /// Attach a metadata field to be merged into the run's record.
    pub fn with_metadata(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(name.to_string(), value.into());
        self
    }
}

/// A computational experiment, one invocation of which produces one
/// results record. Implementations override the phase hooks; the run
/// protocol itself lives in [`ExperimentExt::run`].
pub trait Experiment: Send {
    /// Class identifier recorded in each record's metadata.
    fn class_name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Bind to a parameter point ahead of a run. The default does
    /// nothing; override to cache derived state.
    fn configure(&mut self, _params: &Point) {}

    /// Release any state held from a previous binding.
    fn deconfigure(&mut self) {}

    /// Prepare for a run. May adjust the parameter point in place, and
    /// the adjusted point is what the record reports.
    fn set_up(&mut self, _params: &mut Point) -> anyhow::Result<()> {
        Ok(())
    }

    /// The body of the experiment.
    fn perform(&mut self, params: &Point) -> anyhow::Result<Outcome>;

    /// Clean up after a run.
    fn tear_down(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    /// A boxed copy of this experiment, used by designs to stamp one
    /// experiment per parameter point.
    fn duplicate(&self) -> Box<dyn Experiment>;
}

/// The run protocol, available on every experiment (including trait
/// objects).
pub trait ExperimentExt: Experiment {
    /// Run the experiment at the given point, driving the phases in
    /// order and producing a record whatever happens.
    fn run(&mut self, params: Point) -> ResultsRecord {
        drive(self, params)
    }
}

impl<E: Experiment + ?Sized> ExperimentExt for E {}

fn drive<E: Experiment + ?Sized>(e: &mut E, mut params: Point) -> ResultsRecord {
    let mut metadata = FieldMap::new();
    metadata.insert(
        meta::EXPERIMENT_CLASS.to_string(),
        Value::from(e.class_name()),
    );

    e.deconfigure();
    e.configure(&params);

    metadata.insert(meta::START_TIME.to_string(), Value::Timestamp(Utc::now()));
    let mut elapsed = 0.0;

    // setup phase: on failure there is nothing to tear down
    let phase = Instant::now();
    if let Err(err) = e.set_up(&mut params) {
        warn!("experiment setup failed: {err:#}");
        record_failure(&mut metadata, elapsed, &err);
        return ResultsRecord::new(params, metadata, Results::empty());
    }
    let setup_time = phase.elapsed().as_secs_f64();
    elapsed += setup_time;
    metadata.insert(meta::SETUP_TIME.to_string(), Value::Float(setup_time));

    // experiment phase: teardown still runs on failure
    let phase = Instant::now();
    let outcome = match e.perform(&params) {
        Ok(outcome) => outcome,
        Err(err) => {
            warn!("experiment failed: {err:#}");
            if let Err(td) = e.tear_down() {
                warn!("teardown failed after experiment failure (ignored): {td:#}");
            }
            record_failure(&mut metadata, elapsed, &err);
            return ResultsRecord::new(params, metadata, Results::empty());
        }
    };
    let experiment_time = phase.elapsed().as_secs_f64();
    elapsed += experiment_time;
    metadata.insert(
        meta::EXPERIMENT_TIME.to_string(),
        Value::Float(experiment_time),
    );

    // teardown phase: a failure here fails the whole run
    let phase = Instant::now();
    if let Err(err) = e.tear_down() {
        warn!("experiment teardown failed: {err:#}");
        record_failure(&mut metadata, elapsed, &err);
        return ResultsRecord::new(params, metadata, Results::empty());
    }
    let teardown_time = phase.elapsed().as_secs_f64();
    elapsed += teardown_time;
    metadata.insert(
        meta::TEARDOWN_TIME.to_string(),
        Value::Float(teardown_time),
    );

    metadata.insert(meta::END_TIME.to_string(), Value::Timestamp(Utc::now()));
    metadata.insert(meta::ELAPSED_TIME.to_string(), Value::Float(elapsed));
    metadata.insert(meta::STATUS.to_string(), Value::Bool(true));

    for (name, value) in outcome.metadata {
        metadata.insert(name, value);
    }

    let results = match outcome.payload {
        Payload::Fields(fields) => Results::Fields(fields),
        Payload::Records(records) => Results::Nested(records),
    };
    ResultsRecord::new(params, metadata, results)
}

fn record_failure(metadata: &mut FieldMap, elapsed: f64, err: &anyhow::Error) {
    metadata.insert(meta::ELAPSED_TIME.to_string(), Value::Float(elapsed));
    metadata.insert(meta::END_TIME.to_string(), Value::Timestamp(Utc::now()));
    metadata.insert(meta::STATUS.to_string(), Value::Bool(false));
    metadata.insert(
        meta::EXCEPTION.to_string(),
        Value::String(format!("{err:#}")),
    );
    metadata.insert(
        meta::TRACEBACK.to_string(),
        Value::String(format!("{err:?}")),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::point;
    use anyhow::bail;

    /// Adds its two parameters; fails in a chosen phase on demand.
    #[derive(Clone, Default)]
    struct AddExperiment {
        fail_in: Option<&'static str>,
        torn_down: bool,
    }

    impl Experiment for AddExperiment {
        fn set_up(&mut self, params: &mut Point) -> anyhow::Result<()> {
            if self.fail_in == Some("setup") {
                bail!("broken rig");
            }
            params.insert("adjusted".to_string(), Value::Bool(true));
            Ok(())
        }

        fn perform(&mut self, params: &Point) -> anyhow::Result<Outcome> {
            if self.fail_in == Some("perform") {
                bail!("unstable computation");
            }
            let a = params.get("a").and_then(Value::as_f64).unwrap_or(0.0);
            let b = params.get("b").and_then(Value::as_f64).unwrap_or(0.0);
            Ok(Outcome::fields(point! { "total" => a + b }))
        }

        fn tear_down(&mut self) -> anyhow::Result<()> {
            self.torn_down = true;
            if self.fail_in == Some("teardown") {
                bail!("jammed rig");
            }
            Ok(())
        }

        fn duplicate(&self) -> Box<dyn Experiment> {
            Box::new(self.clone())
        }
    }

    #[test]
    fn test_successful_run() {
        let mut e = AddExperiment::default();
        let rc = e.run(point! { "a" => 1, "b" => 3 });

        assert!(rc.success());
        assert_eq!(
            rc.result_fields().unwrap().get("total"),
            Some(&Value::Float(4.0))
        );
        // setup adjusted the point in place
        assert_eq!(rc.parameters.get("adjusted"), Some(&Value::Bool(true)));
        assert!(rc.exception().is_none());

        // elapsed is the sum of the phase times, within rounding
        let f = |k| rc.metadata.get(k).and_then(Value::as_f64).unwrap();
        let sum = f(meta::SETUP_TIME) + f(meta::EXPERIMENT_TIME) + f(meta::TEARDOWN_TIME);
        assert!((f(meta::ELAPSED_TIME) - sum).abs() < 1e-9);
    }

    #[test]
    fn test_setup_failure_skips_teardown() {
        let mut e = AddExperiment {
            fail_in: Some("setup"),
            ..Default::default()
        };
        let rc = e.run(point! { "a" => 1, "b" => 3 });

        assert!(rc.failed());
        assert!(!e.torn_down);
        assert!(rc.exception().unwrap().contains("broken rig"));
        assert!(!rc.metadata.contains_key(meta::SETUP_TIME));
        assert!(rc.metadata.contains_key(meta::END_TIME));
        assert!(rc.result_fields().unwrap().is_empty());
    }

    #[test]
    fn test_perform_failure_still_tears_down() {
        let mut e = AddExperiment {
            fail_in: Some("perform"),
            ..Default::default()
        };
        let rc = e.run(point! { "a" => 1, "b" => 3 });

        assert!(rc.failed());
        assert!(e.torn_down);
        assert!(rc.metadata.contains_key(meta::SETUP_TIME));
        assert!(!rc.metadata.contains_key(meta::EXPERIMENT_TIME));
    }

    #[test]
    fn test_teardown_failure_fails_the_run() {
        let mut e = AddExperiment {
            fail_in: Some("teardown"),
            ..Default::default()
        };
        let rc = e.run(point! { "a" => 1, "b" => 3 });

        assert!(rc.failed());
        assert!(rc.exception().unwrap().contains("jammed rig"));
        assert!(rc.metadata.contains_key(meta::EXPERIMENT_TIME));
        assert!(!rc.metadata.contains_key(meta::TEARDOWN_TIME));
    }

    #[test]
    fn test_status_iff_no_exception() {
        for fail_in in [None, Some("setup"), Some("perform"), Some("teardown")] {
            let mut e = AddExperiment {
                fail_in,
                ..Default::default()
            };
            let rc = e.run(point! { "a" => 1, "b" => 3 });
            assert_eq!(rc.success(), rc.exception().is_none());
        }
    }
}
