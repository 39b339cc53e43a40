// src/modifier/engine.rs

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use regex::Regex;
use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::engine::activity::{call, CallPolicies};
use crate::errors::Result;
use crate::model::{
    C2Job, ChainStep, JobRef, Label, ModifierStatus, ProxyJob, StepModifier, WorkflowStepResult,
};
use crate::modifier::path::{patch_job, ValuePath};
use crate::store::PlaybookStore;

/// How long to wait for a predecessor's output to show up.
#[derive(Debug, Clone, Copy)]
pub struct ModifierConfig {
    /// Number of output reads before the modifier is given up on.
    pub attempts: u32,
    /// Base wait; attempt `i` (zero based) waits `backoff * (2i + 1)`.
    pub backoff: Duration,
}

impl Default for ModifierConfig {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedModifier {
    pub modifier_id: Uuid,
    pub input: Label,
    pub reason: String,
}

/// Outcome of resolving the modifiers of one step.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModifierReport {
    pub applied: usize,
    pub skipped: Vec<SkippedModifier>,
}

impl ModifierReport {
    pub fn is_clean(&self) -> bool {
        self.skipped.is_empty()
    }
}

/// The job a step's modifiers write into.
enum PatchTarget {
    C2(C2Job),
    Proxy(ProxyJob),
}

impl PatchTarget {
    fn parts_mut(&mut self) -> (&mut String, &mut Value) {
        match self {
            PatchTarget::C2(job) => (&mut job.command, &mut job.arguments),
            PatchTarget::Proxy(job) => (&mut job.command, &mut job.arguments),
        }
    }
}

/// Resolves cross-step data dependencies before a step is dispatched.
///
/// A modifier never fails its step: every way it can go wrong ends in a
/// [`SkippedModifier`], a warning, and an `error` modifier status. Only
/// store failures are returned as errors.
pub struct ModifierEngine {
    store: Arc<dyn PlaybookStore>,
    config: ModifierConfig,
    calls: CallPolicies,
}

impl ModifierEngine {
    pub fn new(store: Arc<dyn PlaybookStore>, config: ModifierConfig, calls: CallPolicies) -> Self {
        Self {
            store,
            config,
            calls,
        }
    }

    /// Apply every modifier of `step`, then persist the patched job.
    ///
    /// `results` holds the results consumed so far in this run, by label.
    pub async fn apply(
        &self,
        step: &ChainStep,
        results: &HashMap<Label, WorkflowStepResult>,
    ) -> Result<ModifierReport> {
        let mut report = ModifierReport::default();
        if step.modifiers.is_empty() {
            return Ok(report);
        }

        let Some(mut target) = self.load_target(step).await? else {
            for modifier in &step.modifiers {
                self.skip(step, modifier, "step has no job to patch", &mut report)
                    .await?;
            }
            return Ok(report);
        };

        for modifier in &step.modifiers {
            match self.resolve(modifier, results).await? {
                Ok(value) => {
                    let patched = modifier
                        .output_path
                        .parse::<ValuePath>()
                        .and_then(|path| {
                            let (command, arguments) = target.parts_mut();
                            patch_job(command, arguments, &path, Value::String(value))
                        });
                    match patched {
                        Ok(()) => {
                            info!(
                                label = %step.label,
                                input = %modifier.input,
                                output_path = %modifier.output_path,
                                "modifier applied"
                            );
                            self.set_status(modifier, ModifierStatus::Completed, None)
                                .await?;
                            report.applied += 1;
                        }
                        Err(e) => {
                            self.skip(step, modifier, &e.to_string(), &mut report)
                                .await?
                        }
                    }
                }
                Err(reason) => self.skip(step, modifier, &reason, &mut report).await?,
            }
        }

        if report.applied > 0 {
            self.persist(&target).await?;
        }

        Ok(report)
    }

    async fn load_target(&self, step: &ChainStep) -> Result<Option<PatchTarget>> {
        let store = &self.store;
        let target = match step.job {
            JobRef::C2(job_id) => call("get_c2_job", self.calls.lookup, || {
                store.get_c2_job(job_id)
            })
            .await?
            .map(PatchTarget::C2),
            JobRef::Proxy(job_id) => call("get_proxy_job", self.calls.lookup, || {
                store.get_proxy_job(job_id)
            })
            .await?
            .map(PatchTarget::Proxy),
            JobRef::None => None,
        };
        Ok(target)
    }

    async fn persist(&self, target: &PatchTarget) -> Result<()> {
        let store = &self.store;
        match target {
            PatchTarget::C2(job) => {
                call("update_c2_job", self.calls.update, || store.update_c2_job(job)).await
            }
            PatchTarget::Proxy(job) => {
                call("update_proxy_job", self.calls.update, || {
                    store.update_proxy_job(job)
                })
                .await
            }
        }
    }

    /// Extract the value a modifier writes. The inner `Err` is the reason
    /// the modifier is skipped.
    async fn resolve(
        &self,
        modifier: &StepModifier,
        results: &HashMap<Label, WorkflowStepResult>,
    ) -> Result<std::result::Result<String, String>> {
        let Some(result) = results.get(&modifier.input) else {
            return Ok(Err(format!("no result for '{}'", modifier.input)));
        };

        let regex = match modifier.regex.as_deref().map(Regex::new).transpose() {
            Ok(regex) => regex,
            Err(e) => return Ok(Err(format!("invalid regex: {e}"))),
        };

        let output = self.fetch_output(result).await?;
        if output.is_empty() {
            return Ok(Err(format!(
                "no output from '{}' after {} attempts",
                modifier.input, self.config.attempts
            )));
        }

        let value = match regex {
            Some(re) => match re.captures(&output) {
                Some(caps) => caps
                    .get(1)
                    .or_else(|| caps.get(0))
                    .map(|m| m.as_str().to_string())
                    .unwrap_or_default(),
                None => {
                    return Ok(Err(format!(
                        "regex '{}' did not match output of '{}'",
                        re.as_str(),
                        modifier.input
                    )));
                }
            },
            None => output.trim().to_string(),
        };

        Ok(Ok(value))
    }

    /// Read the predecessor's output, waiting for it to be ingested.
    async fn fetch_output(&self, result: &WorkflowStepResult) -> Result<String> {
        let attempts = self.config.attempts.max(1);
        let store = &self.store;

        for attempt in 0..attempts {
            if let Some(id) = result.id {
                let output = call("get_output", self.calls.lookup, || store.get_output(id)).await?;
                if !output.is_empty() {
                    return Ok(output);
                }
            }
            if !result.output.is_empty() {
                return Ok(result.output.clone());
            }
            if attempt + 1 < attempts {
                let wait = self.config.backoff * (2 * attempt + 1);
                debug!(label = %result.label, attempt, ?wait, "output not available yet");
                tokio::time::sleep(wait).await;
            }
        }

        Ok(String::new())
    }

    async fn skip(
        &self,
        step: &ChainStep,
        modifier: &StepModifier,
        reason: &str,
        report: &mut ModifierReport,
    ) -> Result<()> {
        warn!(
            label = %step.label,
            input = %modifier.input,
            output_path = %modifier.output_path,
            reason,
            "skipping modifier"
        );
        self.set_status(modifier, ModifierStatus::Error, Some(reason.to_string()))
            .await?;
        report.skipped.push(SkippedModifier {
            modifier_id: modifier.id,
            input: modifier.input.clone(),
            reason: reason.to_string(),
        });
        Ok(())
    }

    async fn set_status(
        &self,
        modifier: &StepModifier,
        status: ModifierStatus,
        message: Option<String>,
    ) -> Result<()> {
        let store = &self.store;
        call("update_modifier_status", self.calls.update, || {
            store.update_modifier_status(modifier.id, status, message.clone())
        })
        .await
    }
}
