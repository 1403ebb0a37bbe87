// ── Timed request executor ──
//
// Every outbound daemon request goes through `TimedExecutor::run`: it
// enforces the request deadline and the skip-while-installing policy.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, trace};

use crate::error::CoreError;
use crate::machine::StateMachine;
use crate::model::BusyReason;

/// Per-request execution policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestPolicy {
    pub deadline: Duration,
    /// Do not send the request while an install is in progress.
    pub skip_when_busy: bool,
}

impl RequestPolicy {
    pub fn new(deadline: Duration) -> Self {
        Self {
            deadline,
            skip_when_busy: false,
        }
    }

    pub fn skippable(deadline: Duration) -> Self {
        Self {
            deadline,
            skip_when_busy: true,
        }
    }
}

/// Result of a request that may have been skipped by policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<T> {
    Done(T),
    /// Not sent because the robot is busy installing.
    Skipped,
}

impl<T> Outcome<T> {
    pub fn into_option(self) -> Option<T> {
        match self {
            Self::Done(value) => Some(value),
            Self::Skipped => None,
        }
    }
}

/// Deadline and busy-policy wrapper shared by all components.
#[derive(Clone)]
pub struct TimedExecutor {
    machine: StateMachine,
}

impl TimedExecutor {
    pub fn new(machine: StateMachine) -> Self {
        Self { machine }
    }

    /// Run `request` under `policy`.
    ///
    /// The busy check reads the state at call time. Deadline expiry
    /// drops the in-flight request and yields
    /// [`CoreError::TransportTimeout`].
    pub async fn run<T, F>(
        &self,
        operation: &str,
        policy: RequestPolicy,
        request: F,
    ) -> Result<Outcome<T>, CoreError>
    where
        F: Future<Output = Result<T, CoreError>>,
    {
        if policy.skip_when_busy
            && self.machine.snapshot().busy_reason == Some(BusyReason::Installing)
        {
            debug!(operation, "request skipped while installing");
            return Ok(Outcome::Skipped);
        }

        trace!(operation, deadline_ms = policy.deadline.as_millis(), "request");
        match tokio::time::timeout(policy.deadline, request).await {
            Ok(result) => result.map(Outcome::Done),
            Err(_) => Err(CoreError::TransportTimeout {
                operation: operation.to_owned(),
                timeout_ms: u64::try_from(policy.deadline.as_millis()).unwrap_or(u64::MAX),
            }),
        }
    }
}
