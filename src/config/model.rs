// src/config/model.rs

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

use crate::engine::EngineConfig;
use crate::model::{Label, OsFlavor};
use crate::types::{DanglingDependencyPolicy, FailedPredecessorPolicy};

/// Playbook definition as read from a TOML file.
///
/// ```toml
/// [config]
/// failed_predecessor = "unblock"
///
/// [playbook]
/// name = "recon"
///
/// [implant.dc01]
/// c2_server = "local"
///
/// [step.A]
/// c2 = { implant = "dc01", command = "whoami" }
///
/// [step.B]
/// depends_on = "A"
/// ```
///
/// Steps are kept as a raw table so their declaration order survives; they
/// are typed during validation.
#[derive(Debug, Clone, Deserialize)]
pub struct RawPlaybookFile {
    #[serde(default)]
    pub config: EngineSection,

    #[serde(default)]
    pub playbook: PlaybookSection,

    /// Implants from `[implant.<name>]`.
    #[serde(default)]
    pub implant: BTreeMap<String, ImplantConfig>,

    /// Proxy executors from `[socks_server.<name>]`.
    #[serde(default)]
    pub socks_server: BTreeMap<String, SocksServerConfig>,

    /// Steps from `[step.<label>]`, in declaration order.
    #[serde(default)]
    pub step: toml::Table,
}

/// `[config]` section: engine behaviour.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineSection {
    #[serde(default)]
    pub failed_predecessor: FailedPredecessorPolicy,

    #[serde(default)]
    pub dangling_dependency: DanglingDependencyPolicy,

    /// How many times a modifier reads its predecessor's output.
    #[serde(default = "default_modifier_attempts")]
    pub modifier_attempts: u32,

    /// Base wait between output reads (e.g. `"1s"`).
    #[serde(default = "default_modifier_backoff")]
    pub modifier_backoff: String,

    /// Ceiling for store reads.
    #[serde(default = "default_lookup_timeout")]
    pub lookup_timeout: String,

    /// Ceiling for store writes and job submission.
    #[serde(default = "default_update_timeout")]
    pub update_timeout: String,

    /// Ceiling for waiting on a dispatched job.
    #[serde(default = "default_completion_timeout")]
    pub completion_timeout: String,

    /// Attempts for management calls, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_modifier_attempts() -> u32 {
    3
}

fn default_modifier_backoff() -> String {
    "1s".to_string()
}

fn default_lookup_timeout() -> String {
    "5s".to_string()
}

fn default_update_timeout() -> String {
    "120s".to_string()
}

fn default_completion_timeout() -> String {
    "365d".to_string()
}

fn default_max_attempts() -> u32 {
    3
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            failed_predecessor: FailedPredecessorPolicy::default(),
            dangling_dependency: DanglingDependencyPolicy::default(),
            modifier_attempts: default_modifier_attempts(),
            modifier_backoff: default_modifier_backoff(),
            lookup_timeout: default_lookup_timeout(),
            update_timeout: default_update_timeout(),
            completion_timeout: default_completion_timeout(),
            max_attempts: default_max_attempts(),
        }
    }
}

/// `[playbook]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct PlaybookSection {
    #[serde(default = "default_playbook_name")]
    pub name: String,
}

fn default_playbook_name() -> String {
    "playbook".to_string()
}

impl Default for PlaybookSection {
    fn default() -> Self {
        Self {
            name: default_playbook_name(),
        }
    }
}

/// `[implant.<name>]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct ImplantConfig {
    /// Name of the C2 server the implant reports to. Implants sharing a
    /// server share its job queue.
    pub c2_server: String,

    /// Defaults to the implant's name.
    #[serde(default)]
    pub hostname: Option<String>,
}

/// `[socks_server.<name>]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct SocksServerConfig {
    #[serde(default)]
    pub operating_system: OsFlavor,

    #[serde(default)]
    pub hostname: Option<String>,
}

/// `[step.<label>]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct StepConfig {
    /// Comma-separated predecessor labels.
    #[serde(default)]
    pub depends_on: String,

    /// Fixed wait before the step starts (e.g. `"30s"`).
    #[serde(default)]
    pub delay: Option<String>,

    /// RFC 3339 not-before time.
    #[serde(default)]
    pub execute_after: Option<String>,

    #[serde(default)]
    pub c2: Option<C2JobConfig>,

    #[serde(default)]
    pub proxy: Option<ProxyJobConfig>,

    #[serde(default)]
    pub modifier: Vec<ModifierEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct C2JobConfig {
    pub implant: String,
    pub command: String,
    #[serde(default = "empty_arguments")]
    pub arguments: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProxyJobConfig {
    /// Executing server; omitted means the default (posix) executor.
    #[serde(default)]
    pub server: Option<String>,
    pub command: String,
    #[serde(default = "empty_arguments")]
    pub arguments: Value,
}

fn empty_arguments() -> Value {
    Value::Object(Default::default())
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModifierEntry {
    /// Predecessor label whose output is read.
    pub input: Label,
    pub output_path: String,
    #[serde(default)]
    pub regex: Option<String>,
}

/// Validated playbook definition. Build it with `PlaybookFile::try_from`.
#[derive(Debug, Clone)]
pub struct PlaybookFile {
    pub name: String,
    pub engine: EngineConfig,
    pub implants: BTreeMap<String, ImplantConfig>,
    pub socks_servers: BTreeMap<String, SocksServerConfig>,
    /// Steps in declaration order.
    pub steps: Vec<StepDefinition>,
}

/// A validated step.
#[derive(Debug, Clone)]
pub struct StepDefinition {
    pub label: Label,
    pub depends_on: String,
    pub delay: Option<Duration>,
    pub execute_after: Option<DateTime<Utc>>,
    pub job: JobDefinition,
    pub modifiers: Vec<ModifierEntry>,
}

#[derive(Debug, Clone)]
pub enum JobDefinition {
    C2 {
        implant: String,
        command: String,
        arguments: Value,
    },
    Proxy {
        server: Option<String>,
        command: String,
        arguments: Value,
    },
    None,
}

impl JobDefinition {
    pub fn command(&self) -> Option<&str> {
        match self {
            JobDefinition::C2 { command, .. } | JobDefinition::Proxy { command, .. } => {
                Some(command)
            }
            JobDefinition::None => None,
        }
    }
}
