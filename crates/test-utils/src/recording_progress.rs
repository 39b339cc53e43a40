use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use harbinger::errors::Result;
use harbinger::progress::{ProgressBar, ProgressSink};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    Created { id: String, max: u64 },
    Updated { id: String, current: u64, max: u64 },
    Deleted { id: String },
}

/// A progress sink that records every call it receives.
#[derive(Debug, Clone, Default)]
pub struct RecordingProgress {
    events: Arc<Mutex<Vec<ProgressEvent>>>,
}

impl RecordingProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn was_deleted(&self, id: &str) -> bool {
        self.events()
            .iter()
            .any(|e| matches!(e, ProgressEvent::Deleted { id: deleted } if deleted == id))
    }

    /// Last reported `current` value.
    pub fn last_current(&self) -> Option<u64> {
        self.events().iter().rev().find_map(|e| match e {
            ProgressEvent::Updated { current, .. } => Some(*current),
            _ => None,
        })
    }

    fn push(&self, event: ProgressEvent) {
        self.events.lock().unwrap().push(event);
    }
}

#[async_trait]
impl ProgressSink for RecordingProgress {
    async fn create(&self, bar: &ProgressBar) -> Result<()> {
        self.push(ProgressEvent::Created {
            id: bar.id.clone(),
            max: bar.max,
        });
        Ok(())
    }

    async fn update(&self, bar: &ProgressBar) -> Result<()> {
        self.push(ProgressEvent::Updated {
            id: bar.id.clone(),
            current: bar.current,
            max: bar.max,
        });
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.push(ProgressEvent::Deleted { id: id.to_string() });
        Ok(())
    }
}
