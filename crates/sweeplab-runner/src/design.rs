//! Experimental designs
//!
//! A design turns a set of parameter ranges into the ordered list of
//! points at which experiments will actually run. The factorial design
//! crosses every range; the pointwise design zips them in lock-step.

use std::collections::BTreeMap;

use rand::seq::SliceRandom;

use sweeplab_core::error::{Error, Result};
use sweeplab_core::experiment::Experiment;
use sweeplab_core::value::{Point, Value};

/// Parameter name to range of values, in name order.
pub type ParameterRanges = BTreeMap<String, Vec<Value>>;

/// An experiment paired with each point it should run at.
pub type ExperimentalConfiguration = Vec<(Box<dyn Experiment>, Point)>;

/// A protocol for conducting a set of experiments: a pure function from
/// parameter ranges to the points to run at.
pub trait Design: Send {
    /// The points of the design, in the order they should be submitted.
    fn points(&self, ranges: &ParameterRanges) -> Result<Vec<Point>>;

    /// Pair a duplicate of the experiment with each point.
    fn experiments(
        &self,
        e: &dyn Experiment,
        ranges: &ParameterRanges,
    ) -> Result<ExperimentalConfiguration> {
        Ok(self
            .points(ranges)?
            .into_iter()
            .map(|p| (e.duplicate(), p))
            .collect())
    }
}

/// The cross product of every parameter range: one experiment for each
/// combination of values. Zero-length ranges skip their dimension rather
/// than collapsing the whole design to nothing. The points come back in
/// random order, to balance heterogeneous runtimes across a campaign.
#[derive(Debug, Clone, Copy, Default)]
pub struct FactorialDesign;

impl Design for FactorialDesign {
    fn points(&self, ranges: &ParameterRanges) -> Result<Vec<Point>> {
        let mut points: Vec<Point> = Vec::new();
        for (name, range) in ranges {
            if range.is_empty() {
                continue;
            }
            if points.is_empty() {
                points = range
                    .iter()
                    .map(|v| {
                        let mut p = Point::new();
                        p.insert(name.clone(), v.clone());
                        p
                    })
                    .collect();
            } else {
                let mut crossed = Vec::with_capacity(points.len() * range.len());
                for v in range {
                    for p in &points {
                        let mut q = p.clone();
                        q.insert(name.clone(), v.clone());
                        crossed.push(q);
                    }
                }
                points = crossed;
            }
        }
        points.shuffle(&mut rand::thread_rng());
        Ok(points)
    }
}

/// Lock-step zip of the parameter ranges: the i-th point takes the i-th
/// value of every range. All ranges must share one length; length-1
/// ranges are broadcast across the whole design.
#[derive(Debug, Clone, Copy, Default)]
pub struct PointwiseDesign;

impl Design for PointwiseDesign {
    fn points(&self, ranges: &ParameterRanges) -> Result<Vec<Point>> {
        if ranges.is_empty() {
            return Ok(Vec::new());
        }

        let mut lengths: Vec<usize> = ranges.values().map(Vec::len).collect();
        lengths.sort_unstable();
        lengths.dedup();
        let n = match lengths.as_slice() {
            [n] => *n,
            // an empty range zipped against singletons is an empty design
            [0, 1] => 0,
            [1, n] => *n,
            _ => {
                return Err(Error::Design(
                    "pointwise parameter ranges must have equal lengths, or length 1".into(),
                ))
            }
        };

        let mut points = Vec::with_capacity(n);
        for i in 0..n {
            let mut p = Point::new();
            for (name, range) in ranges {
                let v = if range.len() == 1 { &range[0] } else { &range[i] };
                p.insert(name.clone(), v.clone());
            }
            points.push(p);
        }
        Ok(points)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ranges(entries: &[(&str, Vec<i64>)]) -> ParameterRanges {
        entries
            .iter()
            .map(|(name, vs)| {
                (
                    name.to_string(),
                    vs.iter().map(|v| Value::Int(*v)).collect(),
                )
            })
            .collect()
    }

    #[test]
    fn test_factorial_cross_product() {
        let ps = FactorialDesign
            .points(&ranges(&[("a", vec![1, 2]), ("b", vec![3, 4])]))
            .unwrap();
        assert_eq!(ps.len(), 4);
        // every combination appears exactly once, in some order
        for (a, b) in [(1, 3), (1, 4), (2, 3), (2, 4)] {
            assert_eq!(
                ps.iter()
                    .filter(|p| p["a"] == Value::Int(a) && p["b"] == Value::Int(b))
                    .count(),
                1
            );
        }
    }

    #[test]
    fn test_factorial_skips_empty_ranges() {
        let ps = FactorialDesign
            .points(&ranges(&[("a", vec![1, 2]), ("b", vec![])]))
            .unwrap();
        assert_eq!(ps.len(), 2);
        assert!(ps.iter().all(|p| !p.contains_key("b")));
    }

    #[test]
    fn test_factorial_of_nothing_is_empty() {
        assert!(FactorialDesign.points(&ranges(&[])).unwrap().is_empty());
        assert!(FactorialDesign
            .points(&ranges(&[("a", vec![])]))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_pointwise_zips_ranges() {
        let ps = PointwiseDesign
            .points(&ranges(&[("a", vec![1, 2, 3]), ("b", vec![4, 5, 6])]))
            .unwrap();
        assert_eq!(ps.len(), 3);
        assert_eq!(ps[0]["a"], Value::Int(1));
        assert_eq!(ps[0]["b"], Value::Int(4));
        assert_eq!(ps[2]["a"], Value::Int(3));
        assert_eq!(ps[2]["b"], Value::Int(6));
    }

    #[test]
    fn test_pointwise_broadcasts_singletons() {
        let ps = PointwiseDesign
            .points(&ranges(&[("a", vec![1, 2, 3]), ("b", vec![4])]))
            .unwrap();
        assert_eq!(ps.len(), 3);
        assert!(ps.iter().all(|p| p["b"] == Value::Int(4)));
    }

    #[test]
    fn test_pointwise_rejects_mismatched_lengths() {
        let err = PointwiseDesign
            .points(&ranges(&[("a", vec![1, 2, 3]), ("b", vec![4, 5])]))
            .unwrap_err();
        assert!(matches!(err, Error::Design(_)));
    }
}
