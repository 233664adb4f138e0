// src/trigger.rs

//! Trigger evaluation: does an incoming event start a run?
//!
//! This is a pure predicate over the workflow's `on:` filters. An event kind
//! that is declared without any `branches` never matches, so a bare
//! `on: [push]` does not fire for every branch by accident.

use tracing::debug;

use crate::workflow::{EventKind, Triggers};

/// The event being evaluated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventDescriptor {
    pub kind: EventKind,
    /// Target branch (push: pushed branch; pull_request: base branch).
    pub branch: String,
}

impl EventDescriptor {
    pub fn new(kind: EventKind, branch: impl Into<String>) -> Self {
        Self {
            kind,
            branch: branch.into(),
        }
    }

    /// Key under which runs for this event supersede each other.
    pub fn concurrency_key(&self) -> String {
        format!("{}:{}", self.kind, self.branch)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerDecision {
    Run,
    Skip,
}

/// Decide whether `event` triggers a run under `triggers`.
pub fn evaluate(triggers: &Triggers, event: &EventDescriptor) -> TriggerDecision {
    let Some(filter) = triggers.events.get(&event.kind) else {
        debug!(event = %event.kind, "event kind not declared in `on:`");
        return TriggerDecision::Skip;
    };

    if filter.matches(&event.branch) {
        TriggerDecision::Run
    } else {
        debug!(
            event = %event.kind,
            branch = %event.branch,
            branches = ?filter.branches(),
            "branch does not match trigger filter"
        );
        TriggerDecision::Skip
    }
}
