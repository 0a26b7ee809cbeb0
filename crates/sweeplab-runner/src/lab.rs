//! Labs: campaign drivers over a parameter space
//!
//! A lab holds a set of parameter ranges, a design that turns them into
//! points, a notebook that stores the results, and an executor that
//! actually runs the experiments. `run_experiment` drives one campaign:
//! design → submit → record (or mark pending) → commit. For deferred
//! executors the lab reconciles pending jobs against the notebook with
//! `update_results` and `wait`, across client restarts.

use std::thread;
use std::time::Duration;

use log::{info, warn};

use sweeplab_core::error::{Error, Result};
use sweeplab_core::experiment::Experiment;
use sweeplab_core::record::ResultsRecord;
use sweeplab_core::value::{Point, Value};

use sweeplab_store::notebook::{Notebook, DEFAULT_RESULTSET};
use sweeplab_store::resultset::Table;

use crate::design::{Design, ExperimentalConfiguration, FactorialDesign, ParameterRanges};
use crate::executor::{Executor, JobStatus, SequentialExecutor, Submission};

/// A value or list of values usable as a parameter range. Scalars —
/// including strings — become length-1 ranges.
pub trait IntoRange {
    fn into_range(self) -> Vec<Value>;
}

impl IntoRange for Vec<Value> {
    fn into_range(self) -> Vec<Value> {
        self
    }
}

impl<T: Into<Value>, const N: usize> IntoRange for [T; N] {
    fn into_range(self) -> Vec<Value> {
        self.into_iter().map(Into::into).collect()
    }
}

macro_rules! scalar_ranges {
    ($($t:ty),+ $(,)?) => {
        $(
            impl IntoRange for $t {
                fn into_range(self) -> Vec<Value> {
                    vec![Value::from(self)]
                }
            }
        )+
    };
}

scalar_ranges!(i32, i64, f64, bool, &str, String, Value);

impl IntoRange for Vec<i64> {
    fn into_range(self) -> Vec<Value> {
        self.into_iter().map(Value::from).collect()
    }
}

impl IntoRange for Vec<f64> {
    fn into_range(self) -> Vec<Value> {
        self.into_iter().map(Value::from).collect()
    }
}

impl<'a> IntoRange for Vec<&'a str> {
    fn into_range(self) -> Vec<Value> {
        self.into_iter().map(Value::from).collect()
    }
}

/// Options for [`Lab::create_with`].
#[derive(Debug, Clone)]
pub struct CreateOptions {
    /// Description for the result set when it has to be created.
    pub description: Option<String>,
    /// Re-raise an error from the creation function (default true).
    pub propagate: bool,
    /// Delete the partial result set when creation fails (default true).
    pub delete: bool,
    /// Lock the result set after a successful creation (default false).
    pub finish: bool,
    /// Clear the lab's parameter ranges before creation (default true).
    pub delete_all_parameters: bool,
}

impl Default for CreateOptions {
    fn default() -> Self {
        Self {
            description: None,
            propagate: true,
            delete: true,
            finish: false,
            delete_all_parameters: true,
        }
    }
}

/// A laboratory for computational experiments: parameter ranges, a
/// design, a notebook, and an executor.
pub struct Lab {
    parameters: ParameterRanges,
    notebook: Notebook,
    design: Box<dyn Design>,
    executor: Box<dyn Executor>,
}

impl Lab {
    /// A lab over the given notebook with the default factorial design
    /// and sequential executor.
    pub fn new(notebook: Notebook) -> Self {
        Self {
            parameters: ParameterRanges::new(),
            notebook,
            design: Box::new(FactorialDesign),
            executor: Box::new(SequentialExecutor),
        }
    }

    pub fn with_design(mut self, design: impl Design + 'static) -> Self {
        self.design = Box::new(design);
        self
    }

    pub fn with_executor(mut self, executor: impl Executor + 'static) -> Self {
        self.executor = Box::new(executor);
        self
    }

    pub fn notebook(&self) -> &Notebook {
        &self.notebook
    }

    pub fn notebook_mut(&mut self) -> &mut Notebook {
        &mut self.notebook
    }

    pub fn design(&self) -> &dyn Design {
        self.design.as_ref()
    }

    // ---- parameter ranges ----

    /// Set a parameter's range. Scalars (strings included) are length-1
    /// ranges.
    pub fn set_parameter(&mut self, name: &str, range: impl IntoRange) {
        self.parameters.insert(name.to_string(), range.into_range());
    }

    /// Delete a parameter; unknown names are a no-op.
    pub fn delete_parameter(&mut self, name: &str) {
        self.parameters.remove(name);
    }

    pub fn delete_all_parameters(&mut self) {
        self.parameters.clear();
    }

    pub fn parameter(&self, name: &str) -> Option<&[Value]> {
        self.parameters.get(name).map(Vec::as_slice)
    }

    pub fn parameter_names(&self) -> Vec<String> {
        self.parameters.keys().cloned().collect()
    }

    pub fn contains_parameter(&self, name: &str) -> bool {
        self.parameters.contains_key(name)
    }

    pub fn parameters(&self) -> &ParameterRanges {
        &self.parameters
    }

    /// The number of points the current design yields over the current
    /// ranges.
    pub fn num_points(&self) -> Result<usize> {
        Ok(self.design.points(&self.parameters)?.len())
    }

    /// The full experimental configuration for an experiment.
    pub fn experiments(&self, e: &dyn Experiment) -> Result<ExperimentalConfiguration> {
        self.design.experiments(e, &self.parameters)
    }

    // ---- campaigns ----

    /// Run an experiment over every point of the design. Synchronous
    /// executors store their records before this returns; deferred
    /// executors leave pending entries to be reconciled later. The
    /// notebook is committed on the way out, error paths included.
    pub fn run_experiment(&mut self, e: &dyn Experiment) -> Result<()> {
        let eps = self.experiments(e)?;
        if eps.is_empty() {
            return Ok(());
        }

        let outcome = self.submit_and_record(eps);
        let committed = self.notebook.commit();
        outcome.and(committed)
    }

    fn submit_and_record(&mut self, eps: ExperimentalConfiguration) -> Result<()> {
        match self.executor.submit_batch(eps)? {
            Submission::Completed(records) => {
                for rc in records {
                    self.notebook.add_result(rc, None)?;
                }
            }
            Submission::Submitted(jobs) => {
                for (job_id, point) in jobs {
                    self.notebook.add_pending_result(&point, &job_id, None)?;
                }
            }
        }
        Ok(())
    }

    /// Poll the executor for every pending job the notebook knows of.
    /// Completed jobs resolve into their records; jobs the executor
    /// reports as terminally failed are cancelled into their result
    /// sets, so no submitted point is ever silently dropped. With
    /// `purge`, jobs the executor no longer knows of (a crashed or
    /// restarted pool) are cancelled as well. Returns the number of
    /// results resolved.
    pub fn update_results(&mut self, purge: bool) -> Result<usize> {
        let outcome = self.poll_pending(purge);
        let committed = self.notebook.commit();
        let resolved = outcome?;
        committed?;
        Ok(resolved)
    }

    fn poll_pending(&mut self, purge: bool) -> Result<usize> {
        let mut resolved = 0;
        let mut unknown = Vec::new();
        for job_id in self.notebook.all_pending_results() {
            match self.executor.poll(&job_id) {
                Ok(JobStatus::Pending) => {}
                Ok(JobStatus::Completed(rc)) => {
                    self.notebook.resolve_pending_result(rc, &job_id)?;
                    resolved += 1;
                }
                Ok(JobStatus::Failed(reason)) => {
                    // a terminal failure still settles its pending
                    // entry, otherwise a wait would never finish
                    warn!("job {job_id} failed ({reason}), recording a cancellation");
                    self.notebook.cancel_pending_result(&job_id)?;
                }
                Err(err) => {
                    warn!("polling job {job_id} failed: {err}");
                    unknown.push(job_id);
                }
            }
        }
        if purge {
            for job_id in unknown {
                self.notebook.cancel_pending_result(&job_id)?;
            }
        }
        Ok(resolved)
    }

    /// Wait until every pending result in the notebook has resolved.
    /// `None` waits indefinitely; `Some(Duration::ZERO)` polls once;
    /// otherwise returns whether everything resolved within the
    /// timeout. Timeout precision is bounded below by the executor's
    /// waiting time.
    pub fn wait(&mut self, timeout: Option<Duration>) -> Result<bool> {
        if self.notebook.number_of_all_pending_results() == 0 {
            return Ok(true);
        }
        let interval = self.executor.waiting_time().max(Duration::from_millis(1));
        let mut waited = Duration::ZERO;
        loop {
            self.update_results(false)?;
            if self.notebook.number_of_all_pending_results() == 0 {
                return Ok(true);
            }
            match timeout {
                Some(limit) if waited >= limit => return Ok(false),
                Some(limit) => {
                    let dt = interval.min(limit - waited);
                    thread::sleep(dt);
                    waited += dt;
                }
                None => thread::sleep(interval),
            }
        }
    }

    /// True when the tagged (default: current) result set has nothing
    /// pending, after refreshing from the executor.
    pub fn ready(&mut self, tag: Option<&str>) -> Result<bool> {
        self.update_results(false)?;
        self.notebook.ready(tag)
    }

    /// The available fraction of the tagged set's results, after
    /// refreshing from the executor.
    pub fn ready_fraction(&mut self, tag: Option<&str>) -> Result<f64> {
        self.update_results(false)?;
        self.notebook.ready_fraction(tag)
    }

    /// The current result set as a table, refreshing pending results
    /// first.
    pub fn dataframe(&mut self, only_successful: bool) -> Result<Table> {
        self.update_results(false)?;
        self.notebook.dataframe(None, only_successful)
    }

    /// The current result set as records, refreshing pending results
    /// first.
    pub fn results(&mut self) -> Result<Vec<ResultsRecord>> {
        self.update_results(false)?;
        self.notebook.results(None)
    }

    // ---- conditional campaigns ----

    /// Create a result set by running a campaign function, or select it
    /// if it already exists (in which case the function is not called).
    /// On failure the partial set is deleted and the previous selection
    /// restored, unless the options say otherwise. Returns true when the
    /// set exists or was created successfully.
    pub fn create_with<F>(&mut self, tag: &str, f: F, options: CreateOptions) -> Result<bool>
    where
        F: FnOnce(&mut Lab) -> Result<()>,
    {
        let previous = self.notebook.current_tag().to_string();
        if self.notebook.already(tag, options.description.as_deref())? {
            return Ok(true);
        }

        let created = (|| -> Result<()> {
            if options.delete_all_parameters {
                self.delete_all_parameters();
            }
            f(self)?;
            if options.finish {
                self.notebook.current_mut().finish()?;
            }
            Ok(())
        })();

        match created {
            Ok(()) => Ok(true),
            Err(err) => {
                if options.delete {
                    if self.notebook.select(&previous).is_ok() {
                        info!("reverted to result set {previous} on error");
                    } else {
                        // the creation function deleted the previous
                        // selection; fall back to the default set
                        self.notebook.select(DEFAULT_RESULTSET)?;
                        warn!("reverted to result set {DEFAULT_RESULTSET} ({previous} was deleted)");
                    }
                    if self.notebook.contains(tag) {
                        self.notebook.delete_result_set(tag)?;
                        info!("deleted partly-created result set {tag}");
                    }
                }
                if options.propagate {
                    Err(err)
                } else {
                    warn!("error ignored in create_with: {err}");
                    Ok(false)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sweeplab_core::experiment::Outcome;
    use sweeplab_core::point;

    #[derive(Clone, Default)]
    struct Total;

    impl Experiment for Total {
        fn perform(&mut self, params: &Point) -> anyhow::Result<Outcome> {
            let a = params.get("a").and_then(Value::as_f64).unwrap_or(0.0);
            let b = params.get("b").and_then(Value::as_f64).unwrap_or(0.0);
            Ok(Outcome::fields(point! { "total" => a + b }))
        }

        fn duplicate(&self) -> Box<dyn Experiment> {
            Box::new(self.clone())
        }
    }

    fn lab() -> Lab {
        Lab::new(Notebook::new("test", None))
    }

    #[test]
    fn test_parameter_management() {
        let mut lab = lab();
        lab.set_parameter("a", [1, 2, 3]);
        lab.set_parameter("b", 4);
        // a string is a single value, not a sequence of characters
        lab.set_parameter("mode", "fast");

        assert_eq!(lab.parameter("a").unwrap().len(), 3);
        assert_eq!(lab.parameter("b"), Some(&[Value::Int(4)][..]));
        assert_eq!(lab.parameter("mode"), Some(&[Value::from("fast")][..]));
        assert!(lab.contains_parameter("mode"));
        assert_eq!(lab.num_points().unwrap(), 3);

        lab.delete_parameter("a");
        assert!(!lab.contains_parameter("a"));
        lab.delete_all_parameters();
        assert!(lab.parameter_names().is_empty());
    }

    #[test]
    fn test_empty_design_is_a_no_op() {
        let mut lab = lab();
        lab.run_experiment(&Total).unwrap();
        assert_eq!(lab.notebook().number_of_results(None).unwrap(), 0);
        assert!(lab.wait(Some(Duration::ZERO)).unwrap());
    }

    #[test]
    fn test_factorial_campaign() {
        let mut lab = lab();
        lab.set_parameter("a", [1, 2]);
        lab.set_parameter("b", [3, 4]);
        lab.run_experiment(&Total).unwrap();

        let df = lab.dataframe(true).unwrap();
        assert_eq!(df.len(), 4);
        let mut totals: Vec<f64> = df
            .column("total")
            .unwrap()
            .iter()
            .map(|v| v.as_f64().unwrap())
            .collect();
        totals.sort_by(f64::total_cmp);
        assert_eq!(totals, vec![4.0, 5.0, 5.0, 6.0]);
    }

    #[test]
    fn test_create_with_runs_the_function_once() {
        let mut lab = lab();
        let mut calls = 0;
        let created = lab
            .create_with(
                "campaign",
                |lab| {
                    calls += 1;
                    lab.set_parameter("a", [1, 2]);
                    lab.run_experiment(&Total)
                },
                CreateOptions::default(),
            )
            .unwrap();
        assert!(created);
        assert_eq!(calls, 1);
        assert_eq!(lab.notebook().current_tag(), "campaign");
        assert_eq!(lab.notebook().number_of_results(None).unwrap(), 2);

        // second call selects without re-running
        let again = lab
            .create_with(
                "campaign",
                |_| panic!("creation function must not run again"),
                CreateOptions::default(),
            )
            .unwrap();
        assert!(again);
    }

    #[test]
    fn test_create_with_reverts_on_failure() {
        let mut lab = lab();
        lab.notebook_mut().add_result_set("before", None).unwrap();

        let err = lab.create_with(
            "doomed",
            |_| Err(Error::ResultsStructure("nope".into())),
            CreateOptions::default(),
        );
        assert!(err.is_err());
        assert!(!lab.notebook().contains("doomed"));
        assert_eq!(lab.notebook().current_tag(), "before");
    }

    #[test]
    fn test_create_with_can_swallow_failure() {
        let mut lab = lab();
        let created = lab
            .create_with(
                "doomed",
                |_| Err(Error::ResultsStructure("nope".into())),
                CreateOptions {
                    propagate: false,
                    ..Default::default()
                },
            )
            .unwrap();
        assert!(!created);
        assert!(!lab.notebook().contains("doomed"));
    }

    #[test]
    fn test_create_with_finish_locks_the_set() {
        let mut lab = lab();
        lab.create_with(
            "sealed",
            |lab| {
                lab.set_parameter("a", [1]);
                lab.run_experiment(&Total)
            },
            CreateOptions {
                finish: true,
                ..Default::default()
            },
        )
        .unwrap();
        assert!(lab.notebook().result_set("sealed").unwrap().is_locked());
    }
}
