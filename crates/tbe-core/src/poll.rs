//! Convergence poller: bounded attempts with a fixed delay.
//!
//! One engine serves every wait in the harness. A probe reports either "not
//! yet" (`Ok(None)`) or a satisfying value (`Ok(Some(v))`). The poller calls
//! it until satisfied or until `max_attempts` probes have been made, sleeping
//! `delay` after every unsatisfied attempt, the last one included.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::delay::Delay;
use crate::obs::emit_poll_attempt;

/// Attempt bound, inter-attempt delay and error tolerance of one poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
    /// Count a probe error as an unsatisfied attempt instead of failing.
    pub retry_on_error: bool,
}

impl PollPolicy {
    pub fn new(max_attempts: u32, delay: Duration, retry_on_error: bool) -> Self {
        PollPolicy {
            max_attempts,
            delay,
            retry_on_error,
        }
    }

    /// Workflow run discovery: 10 attempts, 5 s apart, probe errors tolerated.
    pub fn discovery() -> Self {
        Self::new(10, Duration::from_secs(5), true)
    }

    /// Workflow run completion: 30 attempts, 10 s apart, probe errors fatal.
    pub fn completion() -> Self {
        Self::new(30, Duration::from_secs(10), false)
    }
}

/// Why a poll ended without a value.
#[derive(Debug, thiserror::Error)]
pub enum PollError<E> {
    #[error("condition not satisfied after {attempts} attempts")]
    Exhausted { attempts: u32 },

    #[error("probe failed: {0}")]
    Probe(E),

    #[error("polling cancelled")]
    Cancelled,
}

/// Run `probe` until it yields a value or the policy's attempts run out.
///
/// The probe receives the 1-based attempt number. It must be safe to repeat.
pub async fn poll_until<T, E, F, Fut>(
    label: &str,
    policy: &PollPolicy,
    delay: &Delay,
    mut probe: F,
) -> Result<T, PollError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<Option<T>, E>>,
    E: Display,
{
    for attempt in 1..=policy.max_attempts {
        match probe(attempt).await {
            Ok(Some(value)) => {
                debug!(poll = label, attempt, "Poll satisfied");
                return Ok(value);
            }
            Ok(None) => emit_poll_attempt(label, attempt, policy.max_attempts),
            Err(e) if policy.retry_on_error => {
                warn!(poll = label, attempt, error = %e, "Probe failed, counting attempt as unsatisfied");
            }
            Err(e) => return Err(PollError::Probe(e)),
        }

        if delay.sleep(policy.delay).await.is_err() {
            debug!(poll = label, attempt, "Poll cancelled during delay");
            return Err(PollError::Cancelled);
        }
    }

    Err(PollError::Exhausted {
        attempts: policy.max_attempts,
    })
}
