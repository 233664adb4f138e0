// src/matrix.rs

//! Matrix expansion: one [`JobInstance`] per axis combination.
//!
//! The Cartesian product is produced by [`Combinations`], a lazy odometer over
//! axis indices. The first declared axis varies slowest, so instance order and
//! names follow the declared axis order.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::workflow::{JobName, JobSpec, Matrix, MatrixEntry, WorkflowDocument};

/// Identity of a job instance: job name plus its matrix combination.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceId {
    pub job: JobName,
    /// Axis bindings in declared order; empty for jobs without a matrix.
    pub combination: Vec<(String, String)>,
}

impl InstanceId {
    pub fn plain(job: impl Into<JobName>) -> Self {
        Self {
            job: job.into(),
            combination: Vec::new(),
        }
    }

    pub fn with_combination(job: impl Into<JobName>, combination: MatrixEntry) -> Self {
        Self {
            job: job.into(),
            combination,
        }
    }

    /// Filesystem-friendly form, e.g. `build-linux`.
    pub fn slug(&self) -> String {
        let mut out = String::new();
        let raw = std::iter::once(self.job.as_str())
            .chain(self.combination.iter().map(|(_, v)| v.as_str()));
        for (i, part) in raw.enumerate() {
            if i > 0 {
                out.push('-');
            }
            out.extend(part.chars().map(|c| {
                if c.is_ascii_alphanumeric() || c == '_' || c == '.' {
                    c
                } else {
                    '_'
                }
            }));
        }
        out
    }
}

/// `build (linux, 1.80)`: values in declared axis order.
impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.job)?;
        if !self.combination.is_empty() {
            let values: Vec<&str> = self.combination.iter().map(|(_, v)| v.as_str()).collect();
            write!(f, " ({})", values.join(", "))?;
        }
        Ok(())
    }
}

/// A job bound to one concrete matrix combination.
#[derive(Debug, Clone)]
pub struct JobInstance {
    pub id: InstanceId,
    pub spec: Arc<JobSpec>,
    /// `matrix.*` substitution variables.
    pub matrix: BTreeMap<String, String>,
}

impl JobInstance {
    fn new(spec: Arc<JobSpec>, combination: MatrixEntry) -> Self {
        let matrix = combination.iter().cloned().collect();
        Self {
            id: InstanceId::with_combination(spec.name.clone(), combination),
            spec,
            matrix,
        }
    }
}

/// Lazy, finite, restartable Cartesian product over matrix axes.
///
/// Cloning a fresh `Combinations` (or calling [`Combinations::restart`])
/// replays the same sequence.
#[derive(Debug, Clone)]
pub struct Combinations<'a> {
    axes: &'a [(String, Vec<String>)],
    cursor: Vec<usize>,
    done: bool,
}

impl<'a> Combinations<'a> {
    pub fn new(axes: &'a [(String, Vec<String>)]) -> Self {
        // No axes or any empty axis: the product is empty.
        let done = axes.is_empty() || axes.iter().any(|(_, values)| values.is_empty());
        Self {
            axes,
            cursor: vec![0; axes.len()],
            done,
        }
    }

    pub fn restart(&mut self) {
        *self = Self::new(self.axes);
    }

    /// Number of combinations in the full product.
    pub fn total(&self) -> usize {
        if self.axes.is_empty() {
            return 0;
        }
        self.axes.iter().map(|(_, values)| values.len()).product()
    }
}

impl Iterator for Combinations<'_> {
    type Item = MatrixEntry;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let current = self
            .axes
            .iter()
            .zip(&self.cursor)
            .map(|((axis, values), &i)| (axis.clone(), values[i].clone()))
            .collect();

        // Advance the odometer; last axis turns fastest.
        let mut pos = self.axes.len();
        loop {
            if pos == 0 {
                self.done = true;
                break;
            }
            pos -= 1;
            self.cursor[pos] += 1;
            if self.cursor[pos] < self.axes[pos].1.len() {
                break;
            }
            self.cursor[pos] = 0;
        }

        Some(current)
    }
}

/// Whether `combo` binds every axis listed in `pattern` to the listed value.
fn matches_entry(combo: &MatrixEntry, pattern: &MatrixEntry) -> bool {
    pattern.iter().all(|(axis, value)| {
        combo
            .iter()
            .any(|(a, v)| a == axis && v == value)
    })
}

/// All combinations of a matrix after `exclude` and `include`.
pub fn combinations(matrix: &Matrix) -> Vec<MatrixEntry> {
    let mut out: Vec<MatrixEntry> = Combinations::new(&matrix.axes)
        .filter(|combo| !matrix.exclude.iter().any(|ex| matches_entry(combo, ex)))
        .collect();
    out.extend(matrix.include.iter().cloned());
    out
}

/// Expand one job into its instances.
///
/// Without a matrix this is exactly one instance. With a matrix it is one
/// instance per combination, which may be zero.
pub fn expand(spec: &Arc<JobSpec>) -> Vec<JobInstance> {
    let Some(matrix) = &spec.matrix else {
        return vec![JobInstance::new(Arc::clone(spec), Vec::new())];
    };

    let mut seen = HashSet::new();
    let mut instances = Vec::new();
    for combo in combinations(matrix) {
        let instance = JobInstance::new(Arc::clone(spec), combo);
        if !seen.insert(instance.id.clone()) {
            warn!(instance = %instance.id, "duplicate matrix combination dropped");
            continue;
        }
        instances.push(instance);
    }

    if instances.is_empty() {
        debug!(job = %spec.name, "matrix expanded to zero instances");
    }
    instances
}

/// Expand every job of a document, in document order.
pub fn expand_all(doc: &WorkflowDocument) -> Vec<JobInstance> {
    doc.jobs().iter().flat_map(expand).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn axes(spec: &[(&str, &[&str])]) -> Vec<(String, Vec<String>)> {
        spec.iter()
            .map(|(k, vs)| (k.to_string(), vs.iter().map(|v| v.to_string()).collect()))
            .collect()
    }

    fn entry(pairs: &[(&str, &str)]) -> MatrixEntry {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn job(matrix: Option<Matrix>) -> Arc<JobSpec> {
        Arc::new(JobSpec {
            name: "build".into(),
            display_name: None,
            runs_on: None,
            needs: vec![],
            condition: None,
            matrix,
            env: BTreeMap::new(),
            steps: vec![],
            continue_on_error: false,
        })
    }

    #[test]
    fn product_follows_axis_order() {
        let a = axes(&[("os", &["linux", "windows"]), ("rust", &["stable", "nightly"])]);
        let combos: Vec<_> = Combinations::new(&a).collect();
        assert_eq!(combos.len(), 4);
        assert_eq!(combos[0], entry(&[("os", "linux"), ("rust", "stable")]));
        assert_eq!(combos[1], entry(&[("os", "linux"), ("rust", "nightly")]));
        assert_eq!(combos[2], entry(&[("os", "windows"), ("rust", "stable")]));
        assert_eq!(combos[3], entry(&[("os", "windows"), ("rust", "nightly")]));
    }

    #[test]
    fn combinations_are_restartable() {
        let a = axes(&[("os", &["linux", "windows", "macos"])]);
        let mut it = Combinations::new(&a);
        let first: Vec<_> = it.by_ref().collect();
        assert!(it.next().is_none());
        it.restart();
        let second: Vec<_> = it.collect();
        assert_eq!(first, second);
    }

    #[test]
    fn empty_axis_yields_nothing() {
        let a = axes(&[("os", &["linux"]), ("target", &[])]);
        assert_eq!(Combinations::new(&a).count(), 0);
        assert_eq!(Combinations::new(&a).total(), 0);

        let instances = expand(&job(Some(Matrix { axes: a, ..Default::default() })));
        assert!(instances.is_empty());
    }

    #[test]
    fn no_matrix_is_single_instance() {
        let instances = expand(&job(None));
        assert_eq!(instances.len(), 1);
        assert_eq!(instances[0].id, InstanceId::plain("build"));
        assert!(instances[0].matrix.is_empty());
    }

    #[test]
    fn exclude_and_include() {
        let matrix = Matrix {
            axes: axes(&[("os", &["linux", "windows"]), ("rust", &["stable", "nightly"])]),
            include: vec![entry(&[("os", "macos"), ("rust", "stable")])],
            exclude: vec![entry(&[("os", "windows"), ("rust", "nightly")])],
        };
        let combos = combinations(&matrix);
        assert_eq!(combos.len(), 4);
        assert!(!combos.contains(&entry(&[("os", "windows"), ("rust", "nightly")])));
        assert_eq!(combos[3], entry(&[("os", "macos"), ("rust", "stable")]));
    }

    #[test]
    fn partial_exclude_removes_every_match() {
        let matrix = Matrix {
            axes: axes(&[("os", &["linux", "windows"]), ("rust", &["stable", "nightly"])]),
            include: vec![],
            exclude: vec![entry(&[("os", "windows")])],
        };
        assert_eq!(combinations(&matrix).len(), 2);
    }

    #[test]
    fn duplicate_include_is_dropped() {
        let matrix = Matrix {
            axes: axes(&[("os", &["linux"])]),
            include: vec![entry(&[("os", "linux")])],
            exclude: vec![],
        };
        assert_eq!(expand(&job(Some(matrix))).len(), 1);
    }

    #[test]
    fn instance_names_are_readable() {
        let id = InstanceId::with_combination("build", entry(&[("os", "linux"), ("rust", "1.80")]));
        assert_eq!(id.to_string(), "build (linux, 1.80)");
        assert_eq!(id.slug(), "build-linux-1.80");
        assert_eq!(InstanceId::plain("formatting").to_string(), "formatting");
    }

    #[test]
    fn instance_carries_matrix_variables() {
        let matrix = Matrix::from_axes([("os", vec!["linux", "windows"])]);
        let instances = expand(&job(Some(matrix)));
        assert_eq!(instances.len(), 2);
        assert_eq!(instances[1].matrix.get("os").map(String::as_str), Some("windows"));
    }
}
