// src/engine/activity.rs

//! Remote call policy: every call the scheduler makes outside its own
//! process gets a timeout ceiling and a bounded number of attempts.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use crate::errors::{PlaybookError, Result};

/// Timeout and retry ceiling for one class of remote call.
#[derive(Debug, Clone, Copy)]
pub struct CallPolicy {
    pub timeout: Duration,
    /// Total attempts, including the first one. Never below one.
    pub max_attempts: u32,
    /// Sleep between attempts, multiplied by the attempt number.
    pub backoff: Duration,
}

impl CallPolicy {
    pub fn new(timeout: Duration, max_attempts: u32) -> Self {
        Self {
            timeout,
            max_attempts: max_attempts.max(1),
            backoff: Duration::from_millis(200),
        }
    }

    /// Same ceiling, single attempt. Used for calls that are not idempotent.
    pub fn no_retry(self) -> Self {
        Self {
            max_attempts: 1,
            ..self
        }
    }

    pub fn with_backoff(self, backoff: Duration) -> Self {
        Self { backoff, ..self }
    }
}

/// The policies the scheduler uses, by call class.
#[derive(Debug, Clone, Copy)]
pub struct CallPolicies {
    /// Reads (steps, jobs, implants, output).
    pub lookup: CallPolicy,
    /// Writes (status updates, job patches, journal).
    pub update: CallPolicy,
    /// Job submission.
    pub dispatch: CallPolicy,
    /// Waiting for a submitted job to finish.
    pub completion: CallPolicy,
}

impl Default for CallPolicies {
    fn default() -> Self {
        Self {
            lookup: CallPolicy::new(Duration::from_secs(5), 3),
            update: CallPolicy::new(Duration::from_secs(120), 3),
            dispatch: CallPolicy::new(Duration::from_secs(120), 3),
            completion: CallPolicy::new(Duration::from_secs(60 * 60 * 24 * 365), 1),
        }
    }
}

/// Run `f` under `policy`.
///
/// Each attempt is bounded by `policy.timeout`; failed or timed out attempts
/// are retried until `policy.max_attempts` is exhausted, after which the last
/// error is returned.
pub async fn call<T, F, Fut>(name: &str, policy: CallPolicy, mut f: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        let err = match tokio::time::timeout(policy.timeout, f()).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(e)) => e,
            Err(_) => PlaybookError::Timeout {
                call: name.to_string(),
                after: policy.timeout,
            },
        };

        if attempt >= attempts {
            debug!(call = name, attempt, "giving up");
            return Err(err);
        }

        warn!(call = name, attempt, error = %err, "remote call failed; retrying");
        tokio::time::sleep(policy.backoff * attempt).await;
        attempt += 1;
    }
}
