use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

/// What a predecessor that finished with a non-`completed` status means for
/// the steps that depend on it.
///
/// - `Unblock`: the predecessor counts as resolved; dependents run as if it
///   had succeeded (default behaviour).
/// - `Block`: dependents still waiting on it are skipped and recorded as
///   `error` without ever being dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailedPredecessorPolicy {
    Unblock,
    Block,
}

impl Default for FailedPredecessorPolicy {
    fn default() -> Self {
        FailedPredecessorPolicy::Unblock
    }
}

impl FromStr for FailedPredecessorPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "unblock" => Ok(FailedPredecessorPolicy::Unblock),
            "block" => Ok(FailedPredecessorPolicy::Block),
            other => Err(format!(
                "invalid failed_predecessor: {other} (expected \"unblock\" or \"block\")"
            )),
        }
    }
}

/// How to treat a `depends_on` entry naming a label no step declares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DanglingDependencyPolicy {
    /// Fail the graph build; the run errors before anything is dispatched.
    Reject,
    /// Remove the reference and log a warning.
    Drop,
    /// Keep the label as a phantom node that resolves with an error result.
    Synthesize,
}

impl Default for DanglingDependencyPolicy {
    fn default() -> Self {
        DanglingDependencyPolicy::Reject
    }
}

impl FromStr for DanglingDependencyPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "reject" => Ok(DanglingDependencyPolicy::Reject),
            "drop" => Ok(DanglingDependencyPolicy::Drop),
            "synthesize" => Ok(DanglingDependencyPolicy::Synthesize),
            other => Err(format!(
                "invalid dangling_dependency: {other} (expected \"reject\", \"drop\" or \"synthesize\")"
            )),
        }
    }
}

/// Parse a duration string such as `"500ms"`, `"3s"`, `"2m"`, `"1h"` or `"365d"`.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty duration string".to_string());
    }

    let idx = s
        .chars()
        .position(|c| !c.is_ascii_digit())
        .ok_or_else(|| "duration missing unit suffix".to_string())?;

    let (num_part, unit_part) = s.split_at(idx);
    let value: u64 = num_part
        .parse()
        .map_err(|e| format!("invalid duration number '{}': {}", num_part, e))?;
    let unit = unit_part.trim().to_lowercase();

    match unit.as_str() {
        "ms" => Ok(Duration::from_millis(value)),
        "s" => Ok(Duration::from_secs(value)),
        "m" => Ok(Duration::from_secs(value * 60)),
        "h" => Ok(Duration::from_secs(value * 60 * 60)),
        "d" => Ok(Duration::from_secs(value * 60 * 60 * 24)),
        _ => Err(format!(
            "unsupported duration unit '{}'; expected ms, s, m, h, or d",
            unit
        )),
    }
}
