// src/workflow/schema.rs

//! Known-key tables and the unknown-field walk.
//!
//! Keys that are accepted but not acted on (e.g. `permissions`) are listed
//! too, so real-world workflows load cleanly in strict mode.

use serde_yaml::Value;
use tracing::warn;

use crate::errors::{CidagError, Result};

const WORKFLOW_KEYS: &[&str] = &[
    "name",
    "run-name",
    "on",
    "env",
    "jobs",
    "permissions",
    "concurrency",
    "defaults",
];

const EVENT_FILTER_KEYS: &[&str] = &[
    "branches",
    "branches-ignore",
    "tags",
    "tags-ignore",
    "paths",
    "paths-ignore",
    "types",
];

const JOB_KEYS: &[&str] = &[
    "name",
    "runs-on",
    "needs",
    "if",
    "strategy",
    "env",
    "steps",
    "continue-on-error",
    "timeout-minutes",
    "permissions",
    "concurrency",
    "defaults",
    "services",
    "container",
    "outputs",
    "environment",
];

const STRATEGY_KEYS: &[&str] = &["matrix", "fail-fast", "max-parallel"];

const STEP_KEYS: &[&str] = &[
    "name",
    "id",
    "uses",
    "with",
    "run",
    "shell",
    "env",
    "if",
    "continue-on-error",
    "working-directory",
    "timeout-minutes",
];

/// Report keys outside the known tables.
///
/// In strict mode the first unknown key is an [`CidagError::UnknownField`];
/// otherwise every unknown key is logged at `warn` and loading continues.
pub fn check_unknown_fields(root: &Value, strict: bool) -> Result<()> {
    let mut unknown = Vec::new();
    collect_unknown(root, WORKFLOW_KEYS, "", &mut unknown);

    if let Some(Value::Mapping(on)) = root.get("on") {
        for (event, filter) in on {
            let path = format!("on.{}", key_str(event));
            collect_unknown(filter, EVENT_FILTER_KEYS, &path, &mut unknown);
        }
    }

    if let Some(Value::Mapping(jobs)) = root.get("jobs") {
        for (job_name, job) in jobs {
            let job_path = format!("jobs.{}", key_str(job_name));
            collect_unknown(job, JOB_KEYS, &job_path, &mut unknown);

            if let Some(strategy) = job.get("strategy") {
                collect_unknown(strategy, STRATEGY_KEYS, &format!("{job_path}.strategy"), &mut unknown);
            }

            if let Some(Value::Sequence(steps)) = job.get("steps") {
                for (idx, step) in steps.iter().enumerate() {
                    let step_path = format!("{job_path}.steps[{idx}]");
                    collect_unknown(step, STEP_KEYS, &step_path, &mut unknown);
                }
            }
        }
    }

    if strict {
        if let Some(path) = unknown.into_iter().next() {
            return Err(CidagError::UnknownField { path });
        }
    } else {
        for path in unknown {
            warn!(field = %path, "unknown field in workflow document; ignoring");
        }
    }

    Ok(())
}

fn collect_unknown(value: &Value, known: &[&str], prefix: &str, out: &mut Vec<String>) {
    let Value::Mapping(map) = value else {
        return;
    };
    for key in map.keys() {
        let key = key_str(key);
        if !known.contains(&key.as_str()) {
            if prefix.is_empty() {
                out.push(key);
            } else {
                out.push(format!("{prefix}.{key}"));
            }
        }
    }
}

fn key_str(key: &Value) -> String {
    match key {
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => format!("{other:?}"),
    }
}
