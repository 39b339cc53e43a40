// tests/journal_replay.rs

mod common;

use std::error::Error;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use harbinger::engine::{FileJournal, Journal, JournalEntry, MemoryJournal, Replay};
use harbinger::model::{JobHandle, Status, WorkflowStepResult};
use harbinger_test_utils::{FakeDispatcher, FakeJob, PlaybookBuilder, StepBuilder};
use tokio::sync::watch;
use uuid::Uuid;

use crate::common::{init_tracing, scheduler, with_timeout};

type TestResult = Result<(), Box<dyn Error>>;

fn handle(label: &str) -> JobHandle {
    JobHandle {
        key: format!("run:{label}"),
        task_id: Uuid::new_v4(),
        queue: "q".to_string(),
    }
}

fn has_dispatched(journal: &MemoryJournal, label: &str) -> bool {
    journal
        .entries()
        .iter()
        .any(|e| matches!(e, JournalEntry::Dispatched { label: l, .. } if l == label))
}

#[test]
fn replay_tracks_what_is_still_in_flight() {
    let run_id = Uuid::new_v4();
    let a = handle("A");
    let b = handle("B");

    let replay = Replay::from_entries(vec![
        JournalEntry::Dispatched {
            run_id,
            label: "A".to_string(),
            handle: a.clone(),
        },
        JournalEntry::Dispatched {
            run_id,
            label: "B".to_string(),
            handle: b.clone(),
        },
        JournalEntry::Completed {
            run_id,
            result: WorkflowStepResult::completed(a.task_id, "A", "out"),
        },
    ]);

    assert_eq!(replay.completed.len(), 1);
    assert_eq!(replay.completed[0].label, "A");
    assert_eq!(replay.in_flight.len(), 1);
    assert_eq!(replay.in_flight.get("B"), Some(&b));
    assert!(!replay.is_empty());
    assert!(Replay::from_entries(Vec::new()).is_empty());
}

#[tokio::test]
async fn cancelled_run_resumes_without_dispatching_again() -> TestResult {
    init_tracing();
    let fixture = PlaybookBuilder::new("resume")
        .step(StepBuilder::c2("A"))
        .step(StepBuilder::c2("B").depends_on("A"))
        .step(StepBuilder::c2("C").depends_on("B"))
        .build();
    let dispatcher = FakeDispatcher::new().script("B", FakeJob::ok("b-out").held());
    let journal = MemoryJournal::new();

    // First execution: stop while B is in flight.
    let first = scheduler(&fixture, &dispatcher).with_journal(Arc::new(journal.clone()));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let run_id = fixture.run_id;
    let run = tokio::spawn(async move { first.run_until(run_id, shutdown_rx).await });

    with_timeout(async {
        while !has_dispatched(&journal, "B") || fixture.status("B") != Status::Running {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    shutdown_tx.send(true)?;
    let report = with_timeout(run).await??;

    assert!(report.cancelled);
    assert_eq!(report.status, Status::Running);
    assert_eq!(report.completed_steps, 1);
    assert_eq!(fixture.playbook().status, Status::Running);
    assert_eq!(fixture.status("A"), Status::Completed);
    assert_eq!(fixture.status("B"), Status::Running);

    // Second execution: A is replayed, B is re-awaited, C runs.
    dispatcher.release("B");
    let second = scheduler(&fixture, &dispatcher).with_journal(Arc::new(journal.clone()));
    let report = with_timeout(second.run(fixture.run_id)).await?;

    assert_eq!(report.status, Status::Completed);
    assert_eq!(report.completed_steps, 3);
    assert_eq!(dispatcher.commands(), vec!["A", "B", "C"]);
    assert_eq!(dispatcher.duplicate_count(), 0);
    assert_eq!(fixture.status("B"), Status::Completed);
    assert_eq!(report.result("B").map(|r| r.output.as_str()), Some("b-out"));
    assert_eq!(
        fixture.status_history("A"),
        vec![Status::Starting, Status::Running, Status::Completed]
    );

    let b_task = dispatcher.record_for("B").map(|r| r.key);
    assert_eq!(b_task, Some(format!("{}:B", fixture.run_id)));
    Ok(())
}

#[tokio::test]
async fn replayed_results_feed_modifiers() -> TestResult {
    init_tracing();
    let fixture = PlaybookBuilder::new("replayed")
        .step(StepBuilder::c2("A"))
        .step(
            StepBuilder::c2("B")
                .depends_on("A")
                .modifier_regex("A", "arguments.user", r"user=(\w+)"),
        )
        .build();
    let dispatcher = FakeDispatcher::new();
    let journal = MemoryJournal::new();
    journal
        .record(JournalEntry::Completed {
            run_id: fixture.run_id,
            result: WorkflowStepResult::completed(Uuid::new_v4(), "A", "user=alice"),
        })
        .await?;

    let report = with_timeout(
        scheduler(&fixture, &dispatcher)
            .with_journal(Arc::new(journal.clone()))
            .run(fixture.run_id),
    )
    .await?;

    assert_eq!(report.status, Status::Completed);
    assert_eq!(dispatcher.commands(), vec!["B"]);
    let record = dispatcher.record_for("B").ok_or("B was not dispatched")?;
    assert_eq!(record.arguments["user"], "alice");
    Ok(())
}

#[tokio::test]
async fn every_dispatch_and_completion_is_journaled() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("journal").join("run.jsonl");
    let fixture = PlaybookBuilder::new("file")
        .step(StepBuilder::c2("A"))
        .step(StepBuilder::proxy("B").depends_on("A"))
        .step(StepBuilder::noop("C").depends_on("B"))
        .build();
    let dispatcher = FakeDispatcher::new();

    let journal = Arc::new(FileJournal::new(&path));
    let report = with_timeout(
        scheduler(&fixture, &dispatcher)
            .with_journal(journal.clone())
            .run(fixture.run_id),
    )
    .await?;
    assert_eq!(report.status, Status::Completed);

    let entries = journal.replay(fixture.run_id).await?;
    let dispatched = entries
        .iter()
        .filter(|e| matches!(e, JournalEntry::Dispatched { .. }))
        .count();
    let completed = entries
        .iter()
        .filter(|e| matches!(e, JournalEntry::Completed { .. }))
        .count();
    assert_eq!(dispatched, 2, "the no-op step has nothing to dispatch");
    assert_eq!(completed, 3);
    assert_eq!(std::fs::read_to_string(&path)?.lines().count(), 5);
    Ok(())
}

#[tokio::test]
async fn file_journal_filters_by_run_and_skips_torn_lines() -> TestResult {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("run.jsonl");
    let journal = FileJournal::new(&path);
    let run_id = Uuid::new_v4();
    let other = Uuid::new_v4();

    assert!(journal.replay(run_id).await?.is_empty());

    let first = JournalEntry::Dispatched {
        run_id,
        label: "A".to_string(),
        handle: handle("A"),
    };
    journal.record(first.clone()).await?;
    journal
        .record(JournalEntry::Completed {
            run_id: other,
            result: WorkflowStepResult::error(None, "A", "x"),
        })
        .await?;
    let second = JournalEntry::Completed {
        run_id,
        result: WorkflowStepResult::completed(Uuid::new_v4(), "A", "ok"),
    };
    journal.record(second.clone()).await?;

    let mut file = std::fs::OpenOptions::new().append(true).open(&path)?;
    file.write_all(br#"{"event":"completed","run_id":"#)?;

    assert_eq!(journal.replay(run_id).await?, vec![first, second]);
    assert_eq!(journal.replay(other).await?.len(), 1);
    assert_eq!(journal.path(), path.as_path());
    Ok(())
}

#[tokio::test]
async fn replayed_steps_are_restored_into_a_fresh_store() -> TestResult {
    init_tracing();
    let fixture = PlaybookBuilder::new("fresh-store")
        .step(StepBuilder::c2("A"))
        .step(StepBuilder::c2("B"))
        .step(StepBuilder::c2("C").depends_on("A,B"))
        .build();
    let dispatcher = FakeDispatcher::new();
    let journal = MemoryJournal::new();
    for result in [
        WorkflowStepResult::completed(Uuid::new_v4(), "A", "a"),
        WorkflowStepResult::error(Some(Uuid::new_v4()), "B", "b failed"),
    ] {
        journal
            .record(JournalEntry::Completed {
                run_id: fixture.run_id,
                result,
            })
            .await?;
    }

    let report = with_timeout(
        scheduler(&fixture, &dispatcher)
            .with_journal(Arc::new(journal.clone()))
            .run(fixture.run_id),
    )
    .await?;

    assert_eq!(report.status, Status::Completed);
    assert_eq!(dispatcher.commands(), vec!["C"]);
    assert_eq!(fixture.status_history("A"), vec![Status::Completed]);
    assert_eq!(fixture.status_history("B"), vec![Status::Error]);
    assert_eq!(fixture.status("C"), Status::Completed);
    Ok(())
}
