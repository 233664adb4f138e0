// src/workflow/validate.rs

use std::collections::{BTreeMap, HashSet};

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;
use serde_yaml::Value;
use tracing::debug;

use crate::errors::{CidagError, Result};
use crate::expr::{check_placeholders, Condition};
use crate::workflow::model::{
    BranchFilter, EventKind, JobSpec, Matrix, MatrixEntry, StepKind, StepSpec, Triggers,
    WorkflowDocument,
};
use crate::workflow::raw::{RawEventFilter, RawJob, RawStep, RawTrigger, RawWorkflow};

impl TryFrom<RawWorkflow> for WorkflowDocument {
    type Error = CidagError;

    fn try_from(raw: RawWorkflow) -> std::result::Result<Self, Self::Error> {
        let triggers = convert_triggers(raw.on)?;
        let env = convert_env(&raw.env, "env")?;

        let Some(jobs_map) = raw.jobs else {
            return Err(malformed("workflow must declare `jobs`"));
        };

        let mut jobs = Vec::with_capacity(jobs_map.len());
        for (key, value) in jobs_map {
            let Value::String(name) = key else {
                return Err(malformed(format!("job names must be strings (got {key:?})")));
            };
            let raw_job: RawJob = serde_yaml::from_value(value)
                .map_err(|e| malformed(format!("job '{name}': {e}")))?;
            jobs.push(convert_job(name, raw_job)?);
        }

        WorkflowDocument::new(raw.name, triggers, env, jobs)
    }
}

/// Structural checks shared by YAML loading and programmatic construction.
pub fn validate_document(doc: &WorkflowDocument) -> Result<()> {
    ensure_has_jobs(doc)?;
    ensure_unique_job_names(doc)?;
    ensure_jobs_have_steps(doc)?;
    validate_needs(doc)?;
    validate_dag(doc)?;
    Ok(())
}

fn ensure_has_jobs(doc: &WorkflowDocument) -> Result<()> {
    if doc.jobs().is_empty() {
        return Err(malformed("workflow must contain at least one job"));
    }
    Ok(())
}

fn ensure_unique_job_names(doc: &WorkflowDocument) -> Result<()> {
    let mut seen = HashSet::new();
    for job in doc.jobs() {
        if !seen.insert(job.name.as_str()) {
            return Err(malformed(format!("duplicate job name '{}'", job.name)));
        }
    }
    Ok(())
}

fn ensure_jobs_have_steps(doc: &WorkflowDocument) -> Result<()> {
    for job in doc.jobs() {
        if job.steps.is_empty() {
            return Err(malformed(format!(
                "job '{}' must have at least one step",
                job.name
            )));
        }
    }
    Ok(())
}

fn validate_needs(doc: &WorkflowDocument) -> Result<()> {
    for job in doc.jobs() {
        for dep in &job.needs {
            if dep == &job.name {
                return Err(CidagError::CyclicDependency(format!(
                    "job '{}' needs itself",
                    job.name
                )));
            }
            if doc.job(dep).is_none() {
                return Err(malformed(format!(
                    "job '{}' needs unknown job '{}'",
                    job.name, dep
                )));
            }
        }
    }
    Ok(())
}

fn validate_dag(doc: &WorkflowDocument) -> Result<()> {
    // Edge direction: dep -> job.
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();

    for job in doc.jobs() {
        graph.add_node(job.name.as_str());
    }
    for job in doc.jobs() {
        for dep in &job.needs {
            graph.add_edge(dep.as_str(), job.name.as_str(), ());
        }
    }

    match toposort(&graph, None) {
        Ok(order) => {
            debug!(?order, "job graph is acyclic");
            Ok(())
        }
        Err(cycle) => Err(CidagError::CyclicDependency(format!(
            "cycle detected in job graph involving job '{}'",
            cycle.node_id()
        ))),
    }
}

fn convert_triggers(raw: Option<RawTrigger>) -> Result<Triggers> {
    let mut triggers = Triggers::default();

    let declared: Vec<(String, Option<RawEventFilter>)> = match raw {
        None => Vec::new(),
        Some(RawTrigger::Single(event)) => vec![(event, None)],
        Some(RawTrigger::List(events)) => events.into_iter().map(|e| (e, None)).collect(),
        Some(RawTrigger::Detailed(map)) => map.into_iter().collect(),
    };

    for (event, filter) in declared {
        match event.parse::<EventKind>() {
            Ok(kind) => {
                let filter = filter.unwrap_or_default();
                let compiled = BranchFilter::new(filter.branches, filter.branches_ignore)
                    .map_err(|e| malformed(format!("on.{event}: invalid branch pattern: {e}")))?;
                triggers.events.insert(kind, compiled);
            }
            Err(_) => triggers.other_events.push(event),
        }
    }

    Ok(triggers)
}

fn convert_job(name: String, raw: RawJob) -> Result<JobSpec> {
    let ctx = format!("jobs.{name}");

    let runs_on = match raw.runs_on {
        None => None,
        Some(Value::Sequence(labels)) => Some(
            labels
                .iter()
                .map(|l| scalar_string(l, &format!("{ctx}.runs-on")))
                .collect::<Result<Vec<_>>>()?
                .join(", "),
        ),
        Some(other) => Some(scalar_string(&other, &format!("{ctx}.runs-on"))?),
    };
    if let Some(labels) = &runs_on {
        check_template(labels, &format!("{ctx}.runs-on"))?;
    }

    let condition = convert_condition(raw.condition.as_ref(), &format!("{ctx}.if"))?;
    let continue_on_error =
        convert_flag(raw.continue_on_error.as_ref(), &format!("{ctx}.continue-on-error"))?;
    let env = convert_env(&raw.env, &format!("{ctx}.env"))?;

    let matrix = match raw.strategy.and_then(|s| s.matrix) {
        None => None,
        Some(value) => Some(convert_matrix(&value, &format!("{ctx}.strategy.matrix"))?),
    };

    let Some(raw_steps) = raw.steps else {
        return Err(malformed(format!("job '{name}' must have at least one step")));
    };
    let steps = raw_steps
        .into_iter()
        .enumerate()
        .map(|(idx, step)| convert_step(step, &format!("{ctx}.steps[{idx}]")))
        .collect::<Result<Vec<_>>>()?;

    Ok(JobSpec {
        name,
        display_name: raw.name,
        runs_on,
        needs: raw.needs.map(|n| n.into_vec()).unwrap_or_default(),
        condition,
        matrix,
        env,
        steps,
        continue_on_error,
    })
}

fn convert_step(raw: RawStep, ctx: &str) -> Result<StepSpec> {
    let kind = match (raw.uses, raw.run) {
        (Some(reference), None) => {
            let with = convert_env(&raw.with, &format!("{ctx}.with"))?;
            StepKind::Action { reference, with }
        }
        (None, Some(command)) => {
            check_template(&command, &format!("{ctx}.run"))?;
            StepKind::Run {
                command,
                shell: raw.shell,
            }
        }
        (Some(_), Some(_)) => {
            return Err(malformed(format!("{ctx}: a step cannot have both `uses` and `run`")));
        }
        (None, None) => {
            return Err(malformed(format!("{ctx}: a step needs either `uses` or `run`")));
        }
    };

    if let Some(name) = &raw.name {
        check_template(name, &format!("{ctx}.name"))?;
    }

    Ok(StepSpec {
        name: raw.name,
        id: raw.id,
        kind,
        condition: convert_condition(raw.condition.as_ref(), &format!("{ctx}.if"))?,
        continue_on_error: convert_flag(
            raw.continue_on_error.as_ref(),
            &format!("{ctx}.continue-on-error"),
        )?,
        env: convert_env(&raw.env, &format!("{ctx}.env"))?,
        working_directory: raw.working_directory,
    })
}

fn convert_matrix(value: &Value, ctx: &str) -> Result<Matrix> {
    let Value::Mapping(map) = value else {
        return Err(malformed(format!(
            "{ctx}: only literal matrices are supported"
        )));
    };

    let mut matrix = Matrix::default();
    for (key, val) in map {
        let key = scalar_string(key, ctx)?;
        match key.as_str() {
            "include" => matrix.include = convert_matrix_entries(val, &format!("{ctx}.include"))?,
            "exclude" => matrix.exclude = convert_matrix_entries(val, &format!("{ctx}.exclude"))?,
            _ => {
                let Value::Sequence(values) = val else {
                    return Err(malformed(format!("{ctx}.{key}: axis values must be a list")));
                };
                let values = values
                    .iter()
                    .map(|v| scalar_string(v, &format!("{ctx}.{key}")))
                    .collect::<Result<Vec<_>>>()?;
                matrix.axes.push((key, values));
            }
        }
    }

    Ok(matrix)
}

fn convert_matrix_entries(value: &Value, ctx: &str) -> Result<Vec<MatrixEntry>> {
    let Value::Sequence(entries) = value else {
        return Err(malformed(format!("{ctx}: expected a list of mappings")));
    };
    entries
        .iter()
        .map(|entry| {
            let Value::Mapping(map) = entry else {
                return Err(malformed(format!("{ctx}: expected a mapping entry")));
            };
            map.iter()
                .map(|(k, v)| Ok((scalar_string(k, ctx)?, scalar_string(v, ctx)?)))
                .collect::<Result<MatrixEntry>>()
        })
        .collect()
}

fn convert_env(raw: &BTreeMap<String, Value>, ctx: &str) -> Result<BTreeMap<String, String>> {
    raw.iter()
        .map(|(k, v)| {
            let path = format!("{ctx}.{k}");
            let value = scalar_string(v, &path)?;
            check_template(&value, &path)?;
            Ok((k.clone(), value))
        })
        .collect()
}

fn convert_condition(raw: Option<&Value>, ctx: &str) -> Result<Option<Condition>> {
    match raw {
        None => Ok(None),
        Some(v) => {
            let text = scalar_string(v, ctx)?;
            Condition::parse(&text)
                .map(Some)
                .map_err(|e| malformed(format!("{ctx}: invalid expression `{text}`: {e}")))
        }
    }
}

fn convert_flag(raw: Option<&Value>, ctx: &str) -> Result<bool> {
    match raw {
        None => Ok(false),
        Some(Value::Bool(b)) => Ok(*b),
        Some(Value::String(s)) if s == "true" => Ok(true),
        Some(Value::String(s)) if s == "false" => Ok(false),
        Some(other) => Err(malformed(format!(
            "{ctx}: expected a boolean, got {other:?}"
        ))),
    }
}

fn check_template(text: &str, ctx: &str) -> Result<()> {
    check_placeholders(text)
        .map_err(|e| malformed(format!("{ctx}: invalid expression: {e}")))
}

/// Render a YAML scalar as the string a step would see.
fn scalar_string(value: &Value, ctx: &str) -> Result<String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Bool(b) => Ok(b.to_string()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Null => Ok(String::new()),
        other => Err(malformed(format!("{ctx}: expected a scalar, got {other:?}"))),
    }
}

fn malformed(msg: impl Into<String>) -> CidagError {
    CidagError::MalformedDocument(msg.into())
}
