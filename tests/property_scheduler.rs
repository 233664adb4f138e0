// tests/property_scheduler.rs

use std::collections::{HashMap, HashSet, VecDeque};

use proptest::prelude::*;

use cidag::dag::{InstanceOutcome, InstanceState, Scheduler};
use cidag::matrix::{self, InstanceId};
use cidag::workflow::{Matrix, WorkflowDocument};
use cidag_test_utils::builders::{JobBuilder, WorkflowBuilder};

/// Random acyclic workflows: job N may only need jobs 0..N-1.
fn workflow_strategy(max_jobs: usize) -> impl Strategy<Value = (WorkflowDocument, Vec<bool>)> {
    (1..=max_jobs).prop_flat_map(|num_jobs| {
        (
            proptest::collection::vec(proptest::collection::vec(any::<usize>(), 0..3), num_jobs),
            proptest::collection::vec(0usize..3, num_jobs),
            proptest::collection::vec(proptest::bool::weighted(0.8), num_jobs),
        )
            .prop_map(move |(raw_deps, widths, succeeds)| {
                let mut builder = WorkflowBuilder::new();
                for (i, potential) in raw_deps.into_iter().enumerate() {
                    let mut job = JobBuilder::new(&format!("job_{i}")).run("true");
                    let deps: HashSet<usize> = potential
                        .into_iter()
                        .filter(|_| i > 0)
                        .map(|d| d % i.max(1))
                        .collect();
                    for d in deps {
                        job = job.needs(&format!("job_{d}"));
                    }
                    if widths[i] > 0 {
                        let values: Vec<String> = (0..widths[i]).map(|v| format!("v{v}")).collect();
                        let refs: Vec<&str> = values.iter().map(String::as_str).collect();
                        job = job.axis("os", &refs);
                    }
                    builder = builder.job(job);
                }
                (builder.build(), succeeds)
            })
    })
}

proptest! {
    #[test]
    fn scheduler_terminates_and_respects_dependencies(
        (doc, succeeds) in workflow_strategy(8),
        concurrency in 1usize..4,
    ) {
        let instances = matrix::expand_all(&doc);
        let total = instances.len();
        let needs: HashMap<String, Vec<String>> = doc
            .jobs()
            .iter()
            .map(|j| (j.name.clone(), j.needs.clone()))
            .collect();
        let outcome_of = |id: &InstanceId| {
            let idx: usize = id.job.trim_start_matches("job_").parse().unwrap();
            if succeeds[idx] { InstanceOutcome::Succeeded } else { InstanceOutcome::Failed }
        };

        let mut scheduler = Scheduler::new(instances, concurrency, 1).unwrap();
        let mut running: VecDeque<InstanceId> = scheduler.start().scheduled_ids().into();
        let mut ran: HashSet<InstanceId> = running.iter().cloned().collect();

        let mut steps = 0;
        while let Some(id) = running.pop_front() {
            prop_assert!(scheduler.running_count() <= concurrency);

            // Every dependency instance must have succeeded before `id` ran.
            for dep in scheduler.dependencies_of(&id) {
                prop_assert_eq!(scheduler.state_of(&dep), Some(InstanceState::Succeeded));
            }

            let step = scheduler.complete(&id, outcome_of(&id));
            for next in step.scheduled_ids() {
                prop_assert!(ran.insert(next.clone()), "instance dispatched twice");
                running.push_back(next);
            }
            steps += 1;
            prop_assert!(steps <= total, "more completions than instances");
        }

        prop_assert!(scheduler.is_finished());
        for (id, state) in scheduler.states() {
            prop_assert!(state.is_terminal());
            match state {
                InstanceState::Skipped(_) => prop_assert!(!ran.contains(&id)),
                InstanceState::Succeeded | InstanceState::Failed => prop_assert!(ran.contains(&id)),
                other => prop_assert!(false, "unexpected state {other:?}"),
            }
            // A job whose needed job failed never succeeds.
            if state == InstanceState::Succeeded {
                for dep in &needs[&id.job] {
                    let idx: usize = dep.trim_start_matches("job_").parse().unwrap();
                    prop_assert!(succeeds[idx]);
                }
            }
        }
    }

    #[test]
    fn matrix_cardinality_is_product_of_axis_sizes(a in 0usize..5, b in 0usize..5) {
        let axis = |n: usize, prefix: &str| -> Vec<String> {
            (0..n).map(|i| format!("{prefix}{i}")).collect()
        };
        let m = Matrix::from_axes(vec![("os", axis(a, "os")), ("rust", axis(b, "r"))]);
        prop_assert_eq!(matrix::combinations(&m).len(), a * b);
    }
}
