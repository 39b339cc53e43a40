// tests/scheduler_scenarios.rs

mod common;

use std::error::Error;
use std::time::{Duration, Instant};

use chrono::Utc;
use harbinger::engine::EngineConfig;
use harbinger::errors::PlaybookError;
use harbinger::exec::ProxyProcedure;
use harbinger::model::{OsFlavor, Status};
use harbinger::store::PlaybookStore;
use harbinger::types::{DanglingDependencyPolicy, FailedPredecessorPolicy};
use harbinger_test_utils::{FakeDispatcher, FakeJob, PlaybookBuilder, ProgressEvent, StepBuilder};
use serde_json::json;

use crate::common::{fast_config, init_tracing, observed_scheduler, scheduler, with_timeout};

type TestResult = Result<(), Box<dyn Error>>;

fn config_with(f: impl FnOnce(&mut EngineConfig)) -> EngineConfig {
    let mut config = fast_config();
    f(&mut config);
    config
}

#[tokio::test]
async fn dependent_step_runs_after_its_predecessor() -> TestResult {
    init_tracing();
    let fixture = PlaybookBuilder::new("chain")
        .step(StepBuilder::c2("A"))
        .step(StepBuilder::c2("B").depends_on("A"))
        .build();
    let dispatcher = FakeDispatcher::new();

    let report = with_timeout(scheduler(&fixture, &dispatcher).run(fixture.run_id)).await?;

    assert_eq!(report.status, Status::Completed);
    assert_eq!(report.completed_steps, 2);
    assert_eq!(dispatcher.commands(), vec!["A", "B"]);
    assert_eq!(fixture.status("A"), Status::Completed);
    assert_eq!(fixture.status("B"), Status::Completed);

    let playbook = fixture.playbook();
    assert_eq!(playbook.status, Status::Completed);
    assert_eq!(playbook.completed, 2);
    assert_eq!(
        fixture.store.run_history(fixture.run_id),
        vec![
            (Status::Running, 0),
            (Status::Running, 1),
            (Status::Running, 2),
            (Status::Completed, 2),
        ]
    );
    Ok(())
}

#[tokio::test]
async fn c2_step_walks_its_lifecycle_and_records_the_task() -> TestResult {
    init_tracing();
    let fixture = PlaybookBuilder::new("lifecycle")
        .step(StepBuilder::c2("A"))
        .build();
    let dispatcher = FakeDispatcher::new();

    with_timeout(scheduler(&fixture, &dispatcher).run(fixture.run_id)).await?;

    assert_eq!(
        fixture.status_history("A"),
        vec![Status::Starting, Status::Running, Status::Completed]
    );
    let step = fixture.step("A");
    assert!(step.time_started.is_some());
    assert!(step.time_completed.is_some());

    let job = fixture.c2_job("A");
    assert_eq!(job.c2_task_id, dispatcher.awaited().first().copied());

    let record = dispatcher.record_for("A").ok_or("A was not dispatched")?;
    assert_eq!(record.key, format!("{}:A", fixture.run_id));
    assert_eq!(record.queue, format!("{}_jobs", fixture.implant.c2_server_id));
    assert_eq!(record.procedure, None);
    Ok(())
}

#[tokio::test]
async fn cyclic_playbook_errors_before_dispatching_anything() -> TestResult {
    init_tracing();
    let fixture = PlaybookBuilder::new("cycle")
        .step(StepBuilder::c2("A").depends_on("B"))
        .step(StepBuilder::c2("B").depends_on("A"))
        .build();
    let dispatcher = FakeDispatcher::new();
    let (scheduler, journal, progress) = observed_scheduler(&fixture, &dispatcher);

    let report = with_timeout(scheduler.run(fixture.run_id)).await?;

    assert_eq!(report.status, Status::Error);
    assert_eq!(report.completed_steps, 0);
    assert!(report.error.as_deref().unwrap_or("").contains("Cycle"));
    assert_eq!(dispatcher.dispatch_count(), 0);
    assert!(journal.entries().is_empty());
    assert!(progress.events().is_empty());

    let playbook = fixture.playbook();
    assert_eq!(playbook.status, Status::Error);
    assert_eq!(playbook.completed, 0);
    assert_eq!(fixture.status("A"), Status::Created);
    assert_eq!(fixture.status("B"), Status::Created);
    Ok(())
}

#[tokio::test]
async fn failed_step_still_unblocks_its_dependents() -> TestResult {
    init_tracing();
    let fixture = PlaybookBuilder::new("unblock")
        .step(StepBuilder::c2("A"))
        .step(StepBuilder::c2("B").depends_on("A"))
        .build();
    let dispatcher = FakeDispatcher::new().script("A", FakeJob::error("access denied"));

    let report = with_timeout(scheduler(&fixture, &dispatcher).run(fixture.run_id)).await?;

    assert_eq!(report.status, Status::Completed);
    assert_eq!(report.completed_steps, 2);
    assert_eq!(dispatcher.commands(), vec!["A", "B"]);
    assert_eq!(fixture.status("A"), Status::Error);
    assert_eq!(fixture.status("B"), Status::Completed);

    let a = report.result("A").ok_or("no result for A")?;
    assert_eq!(a.status, Status::Error);
    assert_eq!(a.output, "access denied");
    assert_eq!(a.message, None);
    Ok(())
}

#[tokio::test]
async fn block_policy_skips_dependents_of_a_failed_step() -> TestResult {
    init_tracing();
    let fixture = PlaybookBuilder::new("block")
        .step(StepBuilder::c2("A"))
        .step(StepBuilder::c2("B").depends_on("A"))
        .step(StepBuilder::c2("C").depends_on("B"))
        .step(StepBuilder::c2("D"))
        .build();
    let dispatcher = FakeDispatcher::new().script("A", FakeJob::error(""));
    let config = config_with(|c| c.graph.failed_predecessor = FailedPredecessorPolicy::Block);

    let report =
        with_timeout(scheduler(&fixture, &dispatcher).with_config(config).run(fixture.run_id))
            .await?;

    assert_eq!(report.status, Status::Completed);
    assert_eq!(report.completed_steps, 4);

    let mut commands = dispatcher.commands();
    commands.sort();
    assert_eq!(commands, vec!["A", "D"]);

    assert_eq!(fixture.status("B"), Status::Error);
    assert_eq!(fixture.status("C"), Status::Error);
    assert_eq!(fixture.status_history("C"), vec![Status::Error]);
    let skipped = report.result("C").ok_or("no result for C")?;
    assert!(skipped.output.is_empty());
    assert!(skipped.message.as_deref().is_some_and(|m| m.starts_with("skipped")));
    Ok(())
}

#[tokio::test]
async fn dangling_dependency_errors_the_run_by_default() -> TestResult {
    init_tracing();
    let fixture = PlaybookBuilder::new("dangling")
        .step(StepBuilder::c2("B").depends_on("ghost"))
        .build();
    let dispatcher = FakeDispatcher::new();

    let report = with_timeout(scheduler(&fixture, &dispatcher).run(fixture.run_id)).await?;

    assert_eq!(report.status, Status::Error);
    assert!(report.error.as_deref().unwrap_or("").contains("ghost"));
    assert_eq!(dispatcher.dispatch_count(), 0);
    Ok(())
}

#[tokio::test]
async fn dropped_dangling_dependency_lets_the_step_run() -> TestResult {
    init_tracing();
    let fixture = PlaybookBuilder::new("dangling-drop")
        .step(StepBuilder::c2("B").depends_on("ghost"))
        .build();
    let dispatcher = FakeDispatcher::new();
    let config = config_with(|c| c.graph.dangling_dependency = DanglingDependencyPolicy::Drop);

    let report =
        with_timeout(scheduler(&fixture, &dispatcher).with_config(config).run(fixture.run_id))
            .await?;

    assert_eq!(report.status, Status::Completed);
    assert_eq!(dispatcher.commands(), vec!["B"]);
    Ok(())
}

#[tokio::test]
async fn unknown_label_resolves_with_an_error_result() -> TestResult {
    init_tracing();
    let fixture = PlaybookBuilder::new("phantom")
        .step(StepBuilder::c2("B").depends_on("ghost"))
        .build();
    let dispatcher = FakeDispatcher::new();
    let config =
        config_with(|c| c.graph.dangling_dependency = DanglingDependencyPolicy::Synthesize);
    let (scheduler, _journal, progress) = observed_scheduler(&fixture, &dispatcher);

    let report = with_timeout(scheduler.with_config(config).run(fixture.run_id)).await?;

    assert_eq!(report.status, Status::Completed);
    assert_eq!(report.total_steps, 1);
    assert_eq!(report.completed_steps, 1);
    assert_eq!(dispatcher.commands(), vec!["B"]);

    let ghost = report.result("ghost").ok_or("no result for ghost")?;
    assert_eq!(ghost.status, Status::Error);
    assert_eq!(ghost.id, None);

    // The phantom node does not move the bar.
    let updates: Vec<u64> = progress
        .events()
        .iter()
        .filter_map(|e| match e {
            ProgressEvent::Updated { current, .. } => Some(*current),
            _ => None,
        })
        .collect();
    assert_eq!(updates, vec![1, 1]);
    Ok(())
}

#[tokio::test]
async fn missing_implant_aborts_the_run() -> TestResult {
    init_tracing();
    let fixture = PlaybookBuilder::new("orphan")
        .step(StepBuilder::c2("A"))
        .step(StepBuilder::missing_implant("B").depends_on("A"))
        .step(StepBuilder::c2("C").depends_on("B"))
        .build();
    let dispatcher = FakeDispatcher::new();
    let (scheduler, _journal, progress) = observed_scheduler(&fixture, &dispatcher);

    let report = with_timeout(scheduler.run(fixture.run_id)).await?;

    assert_eq!(report.status, Status::Error);
    assert_eq!(report.completed_steps, 3);
    assert!(report.error.as_deref().unwrap_or("").contains("implant"));
    assert_eq!(dispatcher.commands(), vec!["A"]);

    let playbook = fixture.playbook();
    assert_eq!(playbook.status, Status::Error);
    assert_eq!(playbook.completed, 3);
    assert!(progress.was_deleted(&fixture.run_id.to_string()));
    Ok(())
}

#[tokio::test]
async fn missing_job_aborts_the_run() -> TestResult {
    init_tracing();
    let fixture = PlaybookBuilder::new("no-job")
        .step(StepBuilder::missing_job("A"))
        .step(StepBuilder::c2("B"))
        .step(StepBuilder::c2("C").depends_on("A"))
        .build();
    let dispatcher = FakeDispatcher::new().script("B", FakeJob::ok("").held());

    let report = with_timeout(scheduler(&fixture, &dispatcher).run(fixture.run_id)).await?;

    assert_eq!(report.status, Status::Error);
    assert_eq!(report.completed_steps, 3);
    assert!(report.error.as_deref().unwrap_or("").contains("not found"));
    assert!(!dispatcher.commands().contains(&"C".to_string()));
    Ok(())
}

#[tokio::test]
async fn rejected_dispatch_fails_only_the_step() -> TestResult {
    init_tracing();
    let fixture = PlaybookBuilder::new("rejected")
        .step(StepBuilder::c2("A"))
        .step(StepBuilder::c2("B").depends_on("A"))
        .build();
    let dispatcher = FakeDispatcher::new().script("A", FakeJob::rejected());

    let report = with_timeout(scheduler(&fixture, &dispatcher).run(fixture.run_id)).await?;

    assert_eq!(report.status, Status::Completed);
    assert_eq!(fixture.status("A"), Status::Error);
    assert_eq!(fixture.status("B"), Status::Completed);
    assert_eq!(dispatcher.commands(), vec!["B"]);

    let a = report.result("A").ok_or("no result for A")?;
    assert!(a.output.is_empty());
    assert!(a.message.as_deref().is_some_and(|m| m.contains("rejected")));
    Ok(())
}

#[tokio::test]
async fn proxy_steps_pick_their_procedure_from_the_server() -> TestResult {
    init_tracing();
    let fixture = PlaybookBuilder::new("proxy")
        .step(StepBuilder::proxy_on("win", OsFlavor::Windows))
        .step(StepBuilder::proxy_on("lin", OsFlavor::Linux))
        .step(StepBuilder::proxy("default"))
        .build();
    let dispatcher = FakeDispatcher::new();

    let report = with_timeout(scheduler(&fixture, &dispatcher).run(fixture.run_id)).await?;
    assert_eq!(report.status, Status::Completed);

    let procedure = |label: &str| dispatcher.record_for(label).and_then(|r| r.procedure);
    assert_eq!(procedure("win"), Some(ProxyProcedure::Windows));
    assert_eq!(procedure("lin"), Some(ProxyProcedure::Posix));
    assert_eq!(procedure("default"), Some(ProxyProcedure::Posix));

    let record = dispatcher.record_for("win").ok_or("win was not dispatched")?;
    assert_eq!(record.queue, "socks_jobs");
    Ok(())
}

#[tokio::test]
async fn rejected_proxy_dispatch_is_not_retried() -> TestResult {
    init_tracing();
    let fixture = PlaybookBuilder::new("proxy-reject")
        .step(StepBuilder::proxy("P"))
        .build();
    let dispatcher = FakeDispatcher::new().script("P", FakeJob::rejected());

    let report = with_timeout(scheduler(&fixture, &dispatcher).run(fixture.run_id)).await?;

    assert_eq!(report.status, Status::Completed);
    assert_eq!(fixture.status("P"), Status::Error);
    Ok(())
}

#[tokio::test]
async fn noop_step_completes_without_dispatch() -> TestResult {
    init_tracing();
    let fixture = PlaybookBuilder::new("noop")
        .step(StepBuilder::noop("join"))
        .step(StepBuilder::c2("after").depends_on("join"))
        .build();
    let dispatcher = FakeDispatcher::new();

    let report = with_timeout(scheduler(&fixture, &dispatcher).run(fixture.run_id)).await?;

    assert_eq!(report.status, Status::Completed);
    assert_eq!(dispatcher.commands(), vec!["after"]);
    assert_eq!(fixture.status_history("join"), vec![Status::Completed]);

    let join = report.result("join").ok_or("no result for join")?;
    assert_eq!(join.id, Some(fixture.step("join").id));
    Ok(())
}

#[tokio::test]
async fn every_ready_step_is_dispatched_at_once() -> TestResult {
    init_tracing();
    let labels = ["A", "B", "C", "D", "E"];
    let mut builder = PlaybookBuilder::new("fan-out");
    let mut dispatcher = FakeDispatcher::new();
    for label in labels {
        builder = builder.step(StepBuilder::c2(label));
        dispatcher = dispatcher.script(label, FakeJob::ok("").held());
    }
    builder = builder.step(StepBuilder::c2("join").depends_on("A,B,C,D,E"));
    let fixture = builder.build();

    let scheduler = scheduler(&fixture, &dispatcher);
    let run_id = fixture.run_id;
    let run = tokio::spawn(async move { scheduler.run(run_id).await });

    with_timeout(async {
        while dispatcher.dispatch_count() < labels.len() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(dispatcher.record_for("join").is_none());

    for label in labels {
        dispatcher.release(label);
    }
    let report = with_timeout(run).await??;

    assert_eq!(report.status, Status::Completed);
    assert_eq!(dispatcher.commands().last().map(String::as_str), Some("join"));
    Ok(())
}

#[tokio::test]
async fn delay_is_honoured_before_starting() -> TestResult {
    init_tracing();
    let fixture = PlaybookBuilder::new("delay")
        .step(StepBuilder::c2("A").delay(Duration::from_millis(150)))
        .build();
    let dispatcher = FakeDispatcher::new();

    let started = Instant::now();
    let report = with_timeout(scheduler(&fixture, &dispatcher).run(fixture.run_id)).await?;

    assert!(started.elapsed() >= Duration::from_millis(150));
    assert_eq!(report.status, Status::Completed);
    assert_eq!(
        fixture.status_history("A"),
        vec![
            Status::Scheduled,
            Status::Starting,
            Status::Running,
            Status::Completed
        ]
    );
    Ok(())
}

#[tokio::test]
async fn not_before_time_is_honoured() -> TestResult {
    init_tracing();
    let not_before = Utc::now() + chrono::Duration::milliseconds(200);
    let fixture = PlaybookBuilder::new("not-before")
        .step(StepBuilder::proxy("A").execute_after(not_before))
        .step(StepBuilder::noop("B").execute_after(not_before))
        .build();
    let dispatcher = FakeDispatcher::new();

    let report = with_timeout(scheduler(&fixture, &dispatcher).run(fixture.run_id)).await?;

    assert!(Utc::now() >= not_before);
    assert_eq!(report.status, Status::Completed);
    assert_eq!(fixture.status_history("A")[0], Status::Scheduled);
    assert_eq!(
        fixture.status_history("B"),
        vec![Status::Scheduled, Status::Completed]
    );
    Ok(())
}

#[tokio::test]
async fn not_before_time_in_the_past_does_not_wait() -> TestResult {
    init_tracing();
    let fixture = PlaybookBuilder::new("past")
        .step(StepBuilder::c2("A").execute_after(Utc::now() - chrono::Duration::hours(1)))
        .build();
    let dispatcher = FakeDispatcher::new();

    let started = Instant::now();
    let report = with_timeout(scheduler(&fixture, &dispatcher).run(fixture.run_id)).await?;

    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(report.status, Status::Completed);
    Ok(())
}

#[tokio::test]
async fn progress_bar_tracks_the_run_and_is_removed() -> TestResult {
    init_tracing();
    let fixture = PlaybookBuilder::new("progress")
        .step(StepBuilder::c2("A"))
        .step(StepBuilder::c2("B").depends_on("A"))
        .build();
    let dispatcher = FakeDispatcher::new();
    let (scheduler, _journal, progress) = observed_scheduler(&fixture, &dispatcher);

    with_timeout(scheduler.run(fixture.run_id)).await?;

    let id = fixture.run_id.to_string();
    let events = progress.events();
    assert_eq!(
        events.first(),
        Some(&ProgressEvent::Created {
            id: id.clone(),
            max: 2
        })
    );
    assert_eq!(events.last(), Some(&ProgressEvent::Deleted { id }));
    assert_eq!(progress.last_current(), Some(2));
    Ok(())
}

#[tokio::test]
async fn empty_playbook_completes_immediately() -> TestResult {
    init_tracing();
    let fixture = PlaybookBuilder::new("empty").build();
    let dispatcher = FakeDispatcher::new();
    let (scheduler, _journal, progress) = observed_scheduler(&fixture, &dispatcher);

    let report = with_timeout(scheduler.run(fixture.run_id)).await?;

    assert_eq!(report.status, Status::Completed);
    assert_eq!(report.completed_steps, 0);
    assert!(matches!(
        progress.events().first(),
        Some(ProgressEvent::Created { max: 1, .. })
    ));
    Ok(())
}

#[tokio::test]
async fn finished_run_cannot_be_run_again_but_can_be_cloned() -> TestResult {
    init_tracing();
    let fixture = PlaybookBuilder::new("rerun")
        .step(StepBuilder::c2("A").arguments(json!({ "target": "dc01" })))
        .build();
    let dispatcher = FakeDispatcher::new();
    let scheduler = scheduler(&fixture, &dispatcher);

    with_timeout(scheduler.run(fixture.run_id)).await?;
    let again = scheduler.run(fixture.run_id).await;
    assert!(matches!(
        again,
        Err(PlaybookError::RunFinished(id, Status::Completed)) if id == fixture.run_id
    ));

    let clone_id = fixture.store.clone_run(fixture.run_id).await?;
    assert_ne!(clone_id, fixture.run_id);
    let clone_step = fixture
        .store
        .step_by_label(clone_id, "A")
        .ok_or("clone has no step A")?;
    assert_eq!(clone_step.status, Status::Created);

    let report = with_timeout(scheduler.run(clone_id)).await?;
    assert_eq!(report.status, Status::Completed);
    assert_eq!(dispatcher.dispatch_count(), 2);
    assert_eq!(dispatcher.duplicate_count(), 0);
    assert_eq!(dispatcher.dispatched()[1].arguments, json!({ "target": "dc01" }));
    Ok(())
}

#[tokio::test]
async fn unknown_run_is_reported() -> TestResult {
    init_tracing();
    let fixture = PlaybookBuilder::new("unknown").build();
    let dispatcher = FakeDispatcher::new();
    let missing = uuid::Uuid::new_v4();

    let err = scheduler(&fixture, &dispatcher)
        .run(missing)
        .await
        .unwrap_err();

    assert!(matches!(err, PlaybookError::RunNotFound(id) if id == missing));
    Ok(())
}
