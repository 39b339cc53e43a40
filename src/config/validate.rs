// src/config/validate.rs

use std::time::Duration;

use chrono::{DateTime, Utc};
use regex::Regex;

use crate::config::model::{
    EngineSection, JobDefinition, ModifierEntry, PlaybookFile, RawPlaybookFile, StepConfig,
    StepDefinition,
};
use crate::dag::GraphOptions;
use crate::engine::activity::{CallPolicies, CallPolicy};
use crate::engine::EngineConfig;
use crate::errors::{PlaybookError, Result};
use crate::modifier::{ModifierConfig, ValuePath};
use crate::types::parse_duration;

impl TryFrom<RawPlaybookFile> for PlaybookFile {
    type Error = PlaybookError;

    fn try_from(raw: RawPlaybookFile) -> std::result::Result<Self, Self::Error> {
        ensure_has_steps(&raw)?;
        let engine = engine_config(&raw.config)?;

        let mut steps = Vec::with_capacity(raw.step.len());
        for (label, value) in raw.step.iter() {
            let config = value.clone().try_into::<StepConfig>().map_err(|e| {
                PlaybookError::ConfigError(format!("[step.{label}]: {e}"))
            })?;
            steps.push(validate_step(&raw, label, config)?);
        }

        // Cycles and undeclared `depends_on` labels are left to the
        // dependency graph, so the run itself records the failure.
        Ok(PlaybookFile {
            name: raw.playbook.name,
            engine,
            implants: raw.implant,
            socks_servers: raw.socks_server,
            steps,
        })
    }
}

fn ensure_has_steps(cfg: &RawPlaybookFile) -> Result<()> {
    if cfg.step.is_empty() {
        return Err(PlaybookError::ConfigError(
            "playbook must contain at least one [step.<label>] section".to_string(),
        ));
    }
    Ok(())
}

/// Turn the `[config]` section into engine options.
pub fn engine_config(section: &EngineSection) -> Result<EngineConfig> {
    if section.modifier_attempts == 0 {
        return Err(PlaybookError::ConfigError(
            "[config].modifier_attempts must be >= 1 (got 0)".to_string(),
        ));
    }
    if section.max_attempts == 0 {
        return Err(PlaybookError::ConfigError(
            "[config].max_attempts must be >= 1 (got 0)".to_string(),
        ));
    }

    let backoff = duration("[config].modifier_backoff", &section.modifier_backoff)?;
    let lookup = duration("[config].lookup_timeout", &section.lookup_timeout)?;
    let update = duration("[config].update_timeout", &section.update_timeout)?;
    let completion = duration("[config].completion_timeout", &section.completion_timeout)?;

    Ok(EngineConfig {
        graph: GraphOptions {
            failed_predecessor: section.failed_predecessor,
            dangling_dependency: section.dangling_dependency,
        },
        modifiers: ModifierConfig {
            attempts: section.modifier_attempts,
            backoff,
        },
        calls: CallPolicies {
            lookup: CallPolicy::new(lookup, section.max_attempts),
            update: CallPolicy::new(update, section.max_attempts),
            dispatch: CallPolicy::new(update, section.max_attempts),
            completion: CallPolicy::new(completion, 1),
        },
    })
}

fn validate_step(cfg: &RawPlaybookFile, label: &str, step: StepConfig) -> Result<StepDefinition> {
    if label.trim().is_empty() || label.contains(',') {
        return Err(PlaybookError::ConfigError(format!(
            "step label '{label}' must be non-empty and may not contain ','"
        )));
    }

    let job = match (step.c2, step.proxy) {
        (Some(_), Some(_)) => {
            return Err(PlaybookError::ConfigError(format!(
                "step '{label}' sets both `c2` and `proxy`"
            )));
        }
        (Some(c2), None) => {
            if !cfg.implant.contains_key(&c2.implant) {
                return Err(PlaybookError::ConfigError(format!(
                    "step '{label}' references unknown implant '{}'",
                    c2.implant
                )));
            }
            JobDefinition::C2 {
                implant: c2.implant,
                command: c2.command,
                arguments: c2.arguments,
            }
        }
        (None, Some(proxy)) => {
            if let Some(server) = &proxy.server {
                if !cfg.socks_server.contains_key(server) {
                    return Err(PlaybookError::ConfigError(format!(
                        "step '{label}' references unknown socks server '{server}'"
                    )));
                }
            }
            JobDefinition::Proxy {
                server: proxy.server,
                command: proxy.command,
                arguments: proxy.arguments,
            }
        }
        (None, None) => JobDefinition::None,
    };

    let delay = step
        .delay
        .as_deref()
        .map(|d| duration(&format!("step '{label}' delay"), d))
        .transpose()?;

    let execute_after = step
        .execute_after
        .as_deref()
        .map(|t| timestamp(label, t))
        .transpose()?;

    for modifier in &step.modifier {
        validate_modifier(label, modifier)?;
    }

    Ok(StepDefinition {
        label: label.to_string(),
        depends_on: step.depends_on,
        delay,
        execute_after,
        job,
        modifiers: step.modifier,
    })
}

fn validate_modifier(label: &str, modifier: &ModifierEntry) -> Result<()> {
    if let Some(pattern) = &modifier.regex {
        Regex::new(pattern).map_err(|e| {
            PlaybookError::ConfigError(format!(
                "step '{label}': invalid modifier regex '{pattern}': {e}"
            ))
        })?;
    }
    modifier
        .output_path
        .parse::<ValuePath>()
        .and_then(|path| path.ensure_job_root())
        .map_err(|e| {
            PlaybookError::ConfigError(format!(
                "step '{label}': invalid modifier output_path: {e}"
            ))
        })?;
    Ok(())
}

fn duration(field: &str, value: &str) -> Result<Duration> {
    parse_duration(value).map_err(|e| PlaybookError::ConfigError(format!("{field}: {e}")))
}

fn timestamp(label: &str, value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| {
            PlaybookError::ConfigError(format!(
                "step '{label}' execute_after '{value}' is not an RFC 3339 time: {e}"
            ))
        })
}
