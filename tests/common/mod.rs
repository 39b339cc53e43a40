#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use harbinger::engine::activity::{CallPolicies, CallPolicy};
use harbinger::engine::{EngineConfig, Journal, MemoryJournal, Scheduler};
use harbinger::modifier::ModifierConfig;
use harbinger_test_utils::{FakeDispatcher, PlaybookFixture, RecordingProgress};

pub use harbinger_test_utils::{init_tracing, with_timeout};

/// Engine configuration with short ceilings so failing tests fail fast.
pub fn fast_config() -> EngineConfig {
    EngineConfig {
        modifiers: ModifierConfig {
            attempts: 3,
            backoff: Duration::from_millis(10),
        },
        calls: CallPolicies {
            lookup: CallPolicy::new(Duration::from_secs(2), 2).with_backoff(Duration::from_millis(5)),
            update: CallPolicy::new(Duration::from_secs(2), 2).with_backoff(Duration::from_millis(5)),
            dispatch: CallPolicy::new(Duration::from_secs(2), 2).with_backoff(Duration::from_millis(5)),
            completion: CallPolicy::new(Duration::from_secs(30), 1),
        },
        ..EngineConfig::default()
    }
}

/// Scheduler over the fixture's store and the given dispatcher.
pub fn scheduler(fixture: &PlaybookFixture, dispatcher: &FakeDispatcher) -> Scheduler {
    Scheduler::new(fixture.shared_store(), Arc::new(dispatcher.clone())).with_config(fast_config())
}

/// Like [`scheduler`], also returning the journal and progress recorder.
pub fn observed_scheduler(
    fixture: &PlaybookFixture,
    dispatcher: &FakeDispatcher,
) -> (Scheduler, MemoryJournal, RecordingProgress) {
    let journal = MemoryJournal::new();
    let progress = RecordingProgress::new();
    let scheduler = scheduler(fixture, dispatcher)
        .with_journal(Arc::new(journal.clone()) as Arc<dyn Journal>)
        .with_progress(Arc::new(progress.clone()));
    (scheduler, journal, progress)
}
