#![allow(dead_code)]

use std::collections::BTreeMap;

use cidag::errors::Result;
use cidag::expr::Condition;
use cidag::workflow::{
    BranchFilter, EventKind, JobSpec, Matrix, StepKind, StepSpec, Triggers, WorkflowDocument,
};

/// Builder for `WorkflowDocument` to simplify test setup.
pub struct WorkflowBuilder {
    name: Option<String>,
    triggers: Triggers,
    env: BTreeMap<String, String>,
    jobs: Vec<JobSpec>,
}

impl WorkflowBuilder {
    /// Triggered by pushes to `main`.
    pub fn new() -> Self {
        Self {
            name: Some("CI".to_string()),
            triggers: Triggers::default(),
            env: BTreeMap::new(),
            jobs: Vec::new(),
        }
        .on(EventKind::Push, &["main"])
    }

    pub fn on(mut self, kind: EventKind, branches: &[&str]) -> Self {
        let filter = BranchFilter::new(branches.iter().map(|b| b.to_string()).collect(), vec![])
            .expect("valid branch globs");
        self.triggers.events.insert(kind, filter);
        self
    }

    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.env.insert(key.to_string(), value.to_string());
        self
    }

    pub fn job(mut self, job: JobBuilder) -> Self {
        self.jobs.push(job.build());
        self
    }

    pub fn try_build(self) -> Result<WorkflowDocument> {
        WorkflowDocument::new(self.name, self.triggers, self.env, self.jobs)
    }

    pub fn build(self) -> WorkflowDocument {
        self.try_build().expect("Failed to build valid workflow from builder")
    }
}

impl Default for WorkflowBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for `JobSpec`.
pub struct JobBuilder {
    job: JobSpec,
}

impl JobBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            job: JobSpec {
                name: name.to_string(),
                display_name: None,
                runs_on: Some("ubuntu-latest".to_string()),
                needs: vec![],
                condition: None,
                matrix: None,
                env: BTreeMap::new(),
                steps: vec![],
                continue_on_error: false,
            },
        }
    }

    pub fn needs(mut self, dep: &str) -> Self {
        self.job.needs.push(dep.to_string());
        self
    }

    pub fn axis(mut self, name: &str, values: &[&str]) -> Self {
        let matrix = self.job.matrix.get_or_insert_with(Matrix::default);
        matrix
            .axes
            .push((name.to_string(), values.iter().map(|v| v.to_string()).collect()));
        self
    }

    pub fn condition(mut self, src: &str) -> Self {
        self.job.condition = Some(Condition::parse(src).expect("valid condition"));
        self
    }

    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.job.env.insert(key.to_string(), value.to_string());
        self
    }

    pub fn continue_on_error(mut self, val: bool) -> Self {
        self.job.continue_on_error = val;
        self
    }

    pub fn step(mut self, step: StepBuilder) -> Self {
        self.job.steps.push(step.build());
        self
    }

    /// Shorthand for a single `run:` step.
    pub fn run(self, command: &str) -> Self {
        self.step(StepBuilder::run(command))
    }

    pub fn build(self) -> JobSpec {
        self.job
    }
}

/// Builder for `StepSpec`.
pub struct StepBuilder {
    step: StepSpec,
}

impl StepBuilder {
    fn with_kind(kind: StepKind) -> Self {
        Self {
            step: StepSpec {
                name: None,
                id: None,
                kind,
                condition: None,
                continue_on_error: false,
                env: BTreeMap::new(),
                working_directory: None,
            },
        }
    }

    pub fn run(command: &str) -> Self {
        Self::with_kind(StepKind::Run {
            command: command.to_string(),
            shell: None,
        })
    }

    pub fn uses(reference: &str) -> Self {
        Self::with_kind(StepKind::Action {
            reference: reference.to_string(),
            with: BTreeMap::new(),
        })
    }

    pub fn name(mut self, name: &str) -> Self {
        self.step.name = Some(name.to_string());
        self
    }

    pub fn with(mut self, key: &str, value: &str) -> Self {
        if let StepKind::Action { with, .. } = &mut self.step.kind {
            with.insert(key.to_string(), value.to_string());
        }
        self
    }

    pub fn shell(mut self, shell: &str) -> Self {
        if let StepKind::Run { shell: s, .. } = &mut self.step.kind {
            *s = Some(shell.to_string());
        }
        self
    }

    pub fn condition(mut self, src: &str) -> Self {
        self.step.condition = Some(Condition::parse(src).expect("valid condition"));
        self
    }

    pub fn continue_on_error(mut self) -> Self {
        self.step.continue_on_error = true;
        self
    }

    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.step.env.insert(key.to_string(), value.to_string());
        self
    }

    pub fn working_directory(mut self, dir: &str) -> Self {
        self.step.working_directory = Some(dir.to_string());
        self
    }

    pub fn build(self) -> StepSpec {
        self.step
    }
}
