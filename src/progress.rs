// src/progress.rs

//! Per-run progress indicator.
//!
//! A [`ProgressTracker`] owns one [`ProgressBar`] published through a
//! [`ProgressSink`]. The bar is created when the tracker is created and is
//! deleted by [`ProgressTracker::finish`] or [`ProgressTracker::discard`]. If
//! the tracker is dropped before either (panic, aborted task), deletion is
//! spawned from `Drop`.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::errors::Result;

#[derive(Debug, Clone, PartialEq)]
pub struct ProgressBar {
    pub id: String,
    pub kind: String,
    pub description: String,
    pub current: u64,
    /// Never zero.
    pub max: u64,
}

impl ProgressBar {
    pub fn new(id: impl Into<String>, description: impl Into<String>, max: u64) -> Self {
        Self {
            id: id.into(),
            kind: "playbook".to_string(),
            description: description.into(),
            current: 0,
            max: max.max(1),
        }
    }

    pub fn percentage(&self) -> f64 {
        self.current as f64 / self.max as f64
    }
}

/// Where progress bars are published (pub/sub layer, UI, logs).
#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn create(&self, bar: &ProgressBar) -> Result<()>;
    async fn update(&self, bar: &ProgressBar) -> Result<()>;
    async fn delete(&self, id: &str) -> Result<()>;
}

/// Sink that only logs, used by the CLI.
#[derive(Debug, Clone, Default)]
pub struct LogProgressSink;

#[async_trait]
impl ProgressSink for LogProgressSink {
    async fn create(&self, bar: &ProgressBar) -> Result<()> {
        info!(id = %bar.id, max = bar.max, "{}", bar.description);
        Ok(())
    }

    async fn update(&self, bar: &ProgressBar) -> Result<()> {
        info!(
            id = %bar.id,
            current = bar.current,
            max = bar.max,
            "progress {:.0}%",
            bar.percentage() * 100.0
        );
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        debug!(id, "progress bar removed");
        Ok(())
    }
}

/// Scoped handle on one progress bar.
pub struct ProgressTracker {
    sink: Arc<dyn ProgressSink>,
    bar: ProgressBar,
    live: bool,
}

impl ProgressTracker {
    /// Publish a new bar and return the tracker owning it.
    pub async fn create(
        sink: Arc<dyn ProgressSink>,
        id: impl Into<String>,
        description: impl Into<String>,
        max: u64,
    ) -> Result<Self> {
        let bar = ProgressBar::new(id, description, max);
        sink.create(&bar).await?;
        Ok(Self {
            sink,
            bar,
            live: true,
        })
    }

    pub fn bar(&self) -> &ProgressBar {
        &self.bar
    }

    pub async fn increase(&mut self, n: u64) -> Result<()> {
        self.bar.current = (self.bar.current + n).min(self.bar.max);
        self.sink.update(&self.bar).await
    }

    /// Push the bar to 100% and delete it.
    pub async fn finish(mut self) -> Result<()> {
        self.live = false;
        self.bar.current = self.bar.max;
        let update = self.sink.update(&self.bar).await;
        self.sink.delete(&self.bar.id).await?;
        update
    }

    /// Delete the bar as it stands, without completing it.
    pub async fn discard(mut self) -> Result<()> {
        self.live = false;
        self.sink.delete(&self.bar.id).await
    }
}

impl Drop for ProgressTracker {
    fn drop(&mut self) {
        if !self.live {
            return;
        }

        let sink = Arc::clone(&self.sink);
        let id = self.bar.id.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = sink.delete(&id).await {
                        warn!(id = %id, error = %e, "failed to delete progress bar");
                    }
                });
            }
            Err(_) => {
                warn!(id = %id, "no runtime available; progress bar left behind");
            }
        }
    }
}
