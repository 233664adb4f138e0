// src/workflow/model.rs

//! In-memory workflow graph.
//!
//! Everything here is immutable once a [`WorkflowDocument`] has been built;
//! jobs are shared as `Arc<JobSpec>` by the matrix instances derived from them.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};

use crate::expr::Condition;

/// Canonical job name type (the key under `jobs:`).
pub type JobName = String;

/// Event kinds a workflow can be triggered by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventKind {
    Push,
    PullRequest,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Push => "push",
            EventKind::PullRequest => "pull_request",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "push" => Ok(EventKind::Push),
            "pull_request" => Ok(EventKind::PullRequest),
            other => Err(format!("unsupported event kind: {other}")),
        }
    }
}

/// Branch filter of one event kind.
///
/// An empty `branches` list never matches.
#[derive(Debug, Clone)]
pub struct BranchFilter {
    branches: Vec<String>,
    branches_ignore: Vec<String>,
    include: GlobSet,
    exclude: GlobSet,
}

impl BranchFilter {
    /// Compile branch globs. `*` does not cross `/`; `**` does.
    pub fn new(
        branches: Vec<String>,
        branches_ignore: Vec<String>,
    ) -> Result<Self, globset::Error> {
        let include = compile_branch_globs(&branches)?;
        let exclude = compile_branch_globs(&branches_ignore)?;
        Ok(Self {
            branches,
            branches_ignore,
            include,
            exclude,
        })
    }

    pub fn branches(&self) -> &[String] {
        &self.branches
    }

    pub fn branches_ignore(&self) -> &[String] {
        &self.branches_ignore
    }

    pub fn matches(&self, branch: &str) -> bool {
        !self.branches.is_empty() && self.include.is_match(branch) && !self.exclude.is_match(branch)
    }
}

impl Default for BranchFilter {
    fn default() -> Self {
        Self {
            branches: Vec::new(),
            branches_ignore: Vec::new(),
            include: GlobSet::empty(),
            exclude: GlobSet::empty(),
        }
    }
}

fn compile_branch_globs(patterns: &[String]) -> Result<GlobSet, globset::Error> {
    let mut builder = GlobSetBuilder::new();
    for pat in patterns {
        builder.add(GlobBuilder::new(pat).literal_separator(true).build()?);
    }
    builder.build()
}

/// Trigger filters from `on:`.
#[derive(Debug, Clone, Default)]
pub struct Triggers {
    pub events: BTreeMap<EventKind, BranchFilter>,
    /// Declared events the engine does not simulate (e.g. `workflow_dispatch`).
    pub other_events: Vec<String>,
}

/// One axis-value binding set produced by `strategy.matrix`.
pub type MatrixEntry = Vec<(String, String)>;

/// `strategy.matrix`: ordered axes plus `include` / `exclude` entries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Matrix {
    pub axes: Vec<(String, Vec<String>)>,
    pub include: Vec<MatrixEntry>,
    pub exclude: Vec<MatrixEntry>,
}

impl Matrix {
    /// Matrix with the given axes and no include/exclude entries.
    pub fn from_axes<I, K, V>(axes: I) -> Self
    where
        I: IntoIterator<Item = (K, Vec<V>)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            axes: axes
                .into_iter()
                .map(|(k, vs)| (k.into(), vs.into_iter().map(Into::into).collect()))
                .collect(),
            include: Vec::new(),
            exclude: Vec::new(),
        }
    }
}

/// What a step does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepKind {
    /// `uses: owner/name@ref` with its `with:` parameters.
    Action {
        reference: String,
        with: BTreeMap<String, String>,
    },
    /// `run:` script, optionally with an explicit `shell:`.
    Run {
        command: String,
        shell: Option<String>,
    },
}

#[derive(Debug, Clone)]
pub struct StepSpec {
    pub name: Option<String>,
    pub id: Option<String>,
    pub kind: StepKind,
    pub condition: Option<Condition>,
    pub continue_on_error: bool,
    pub env: BTreeMap<String, String>,
    pub working_directory: Option<String>,
}

impl StepSpec {
    /// Label used in logs and the run summary.
    pub fn display_name(&self) -> String {
        if let Some(name) = &self.name {
            return name.clone();
        }
        match &self.kind {
            StepKind::Action { reference, .. } => format!("Run {reference}"),
            StepKind::Run { command, .. } => {
                let first = command.lines().next().unwrap_or_default().trim();
                format!("Run {first}")
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct JobSpec {
    pub name: JobName,
    pub display_name: Option<String>,
    pub runs_on: Option<String>,
    pub needs: Vec<JobName>,
    pub condition: Option<Condition>,
    pub matrix: Option<Matrix>,
    pub env: BTreeMap<String, String>,
    pub steps: Vec<StepSpec>,
    /// A failing job with this flag does not fail the run.
    pub continue_on_error: bool,
}

/// A parsed, validated workflow.
#[derive(Debug, Clone)]
pub struct WorkflowDocument {
    name: Option<String>,
    triggers: Triggers,
    env: BTreeMap<String, String>,
    jobs: Vec<Arc<JobSpec>>,
}

impl WorkflowDocument {
    /// Assemble a document without validation. Prefer [`WorkflowDocument::new`].
    pub fn new_unchecked(
        name: Option<String>,
        triggers: Triggers,
        env: BTreeMap<String, String>,
        jobs: Vec<JobSpec>,
    ) -> Self {
        Self {
            name,
            triggers,
            env,
            jobs: jobs.into_iter().map(Arc::new).collect(),
        }
    }

    /// Assemble and validate a document (steps, duplicates, needs, cycles).
    pub fn new(
        name: Option<String>,
        triggers: Triggers,
        env: BTreeMap<String, String>,
        jobs: Vec<JobSpec>,
    ) -> crate::errors::Result<Self> {
        let doc = Self::new_unchecked(name, triggers, env, jobs);
        super::validate::validate_document(&doc)?;
        Ok(doc)
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn triggers(&self) -> &Triggers {
        &self.triggers
    }

    /// Workflow-level `env:`.
    pub fn env(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    /// Jobs in declaration order.
    pub fn jobs(&self) -> &[Arc<JobSpec>] {
        &self.jobs
    }

    pub fn job(&self, name: &str) -> Option<&Arc<JobSpec>> {
        self.jobs.iter().find(|j| j.name == name)
    }
}
