// tests/property_scheduler.rs

mod common;

use harbinger::model::Status;
use harbinger::types::FailedPredecessorPolicy;
use harbinger_test_utils::{FakeDispatcher, FakeJob, PlaybookBuilder, StepBuilder};
use proptest::prelude::*;

use crate::common::{fast_config, scheduler};

/// Random acyclic graph over `s0..sn`: each step may only depend on steps
/// with a lower index. The bool per step says whether its job fails.
fn acyclic_playbook() -> impl Strategy<Value = Vec<(Vec<usize>, bool)>> {
    (1usize..10).prop_flat_map(|n| {
        prop::collection::vec(
            (prop::collection::vec(any::<bool>(), n), any::<bool>()),
            n,
        )
        .prop_map(move |rows| {
            rows.into_iter()
                .enumerate()
                .map(|(i, (edges, fails))| {
                    let deps = (0..i).filter(|&j| edges[j]).collect();
                    (deps, fails)
                })
                .collect()
        })
    })
}

fn label(i: usize) -> String {
    format!("s{i}")
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn acyclic_playbooks_always_drain(
        layout in acyclic_playbook(),
        block in any::<bool>(),
    ) {
        let mut builder = PlaybookBuilder::new("prop");
        let mut dispatcher = FakeDispatcher::new();
        for (i, (deps, fails)) in layout.iter().enumerate() {
            let deps: Vec<String> = deps.iter().map(|&d| label(d)).collect();
            builder = builder.step(StepBuilder::c2(&label(i)).depends_on(&deps.join(",")));
            if *fails {
                dispatcher = dispatcher.script(&label(i), FakeJob::error("failed"));
            }
        }
        let fixture = builder.build();

        let mut config = fast_config();
        if block {
            config.graph.failed_predecessor = FailedPredecessorPolicy::Block;
        }

        let rt = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .unwrap();
        let report = rt
            .block_on(scheduler(&fixture, &dispatcher).with_config(config).run(fixture.run_id))
            .unwrap();

        let n = layout.len();
        prop_assert_eq!(report.status, Status::Completed);
        prop_assert_eq!(report.completed_steps, n);
        prop_assert_eq!(fixture.playbook().completed, n);

        let commands = dispatcher.commands();
        let position = |l: &str| commands.iter().position(|c| c == l);

        for (i, (deps, _)) in layout.iter().enumerate() {
            let me = label(i);
            prop_assert!(fixture.status(&me).is_terminal());
            prop_assert!(commands.iter().filter(|c| **c == me).count() <= 1);

            let Some(at) = position(&me) else {
                // Only ever skipped when a predecessor failed under Block.
                prop_assert!(block);
                prop_assert_eq!(fixture.status(&me), Status::Error);
                continue;
            };
            for &d in deps {
                let dep_at = position(&label(d));
                prop_assert!(dep_at.is_some_and(|p| p < at));
            }
        }

        if !block {
            prop_assert_eq!(commands.len(), n);
        }
        prop_assert_eq!(dispatcher.duplicate_count(), 0);
    }
}
