//! Container-runtime readiness probing with reconnect between attempts.
//!
//! Every failed attempt discards the current connection and opens a new one
//! before the next attempt runs.

use std::time::Duration;

use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::connection::{ConnectionSlot, EmptySlot};
use crate::driver::{
    ConnectOptions, ExecOptions, MachineConnection, MachineDriver, MachineRecord,
};
use crate::remote::{CommandError, run_checked};

/// Command used to prove the container runtime is usable.
pub const DEFAULT_READINESS_COMMAND: &str = "docker run hello-world";

const DEFAULT_RETRIES: u32 = 5;
const DEFAULT_MIN_DELAY: Duration = Duration::from_secs(2);
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(5);
const DEFAULT_FACTOR: u32 = 2;

/// Bounded exponential backoff between readiness attempts.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub retries: u32,
    /// Delay before the first retry.
    pub min_delay: Duration,
    /// Upper bound for any delay.
    pub max_delay: Duration,
    /// Multiplier applied to the delay after each retry.
    pub factor: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: DEFAULT_RETRIES,
            min_delay: DEFAULT_MIN_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            factor: DEFAULT_FACTOR,
        }
    }
}

impl RetryPolicy {
    /// Total number of attempts, including the first.
    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.retries.saturating_add(1)
    }

    /// Delay before retry number `retry` (1-based).
    #[must_use]
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1);
        self.min_delay
            .saturating_mul(self.factor.saturating_pow(exponent))
            .min(self.max_delay)
    }
}

/// Outcome of a successful readiness check.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ReadinessReport {
    /// Attempts made, including the successful one.
    pub attempts: u32,
    /// Connections replaced along the way.
    pub reconnects: u32,
}

/// Errors raised while waiting for the container runtime.
#[derive(Debug, Error)]
pub enum ReadinessError<E>
where
    E: std::error::Error + 'static,
{
    /// Raised when every attempt failed.
    #[error("container runtime not ready after {attempts} attempts: {source}")]
    Exhausted {
        /// Attempts made.
        attempts: u32,
        /// Failure of the final attempt.
        #[source]
        source: CommandError<E>,
    },
    /// Raised when the stale connection could not be closed.
    #[error("failed to close connection after attempt {attempt}: {source}")]
    Release {
        /// Attempt that preceded the close.
        attempt: u32,
        /// Transport error.
        #[source]
        source: E,
    },
    /// Raised when a replacement connection could not be opened.
    #[error("failed to reconnect after attempt {attempt}: {source}")]
    Reconnect {
        /// Attempt that preceded the reconnect.
        attempt: u32,
        /// Driver error.
        #[source]
        source: E,
    },
    /// Raised when no connection is available to probe.
    #[error(transparent)]
    NoConnection(#[from] EmptySlot),
}

/// Runs the readiness probe against the connection in a [`ConnectionSlot`].
#[derive(Clone, Copy, Debug)]
pub struct ReadinessProbe<'a> {
    command: &'a str,
    policy: RetryPolicy,
    connect_options: ConnectOptions,
}

impl<'a> ReadinessProbe<'a> {
    /// Creates a probe running `command` under `policy`.
    #[must_use]
    pub const fn new(command: &'a str, policy: RetryPolicy) -> Self {
        Self {
            command,
            policy,
            connect_options: ConnectOptions { debug: false },
        }
    }

    /// Sets the options used when reconnecting.
    #[must_use]
    pub const fn with_connect_options(mut self, options: ConnectOptions) -> Self {
        self.connect_options = options;
        self
    }

    /// Probes until the command succeeds or the policy is exhausted.
    ///
    /// After a failed attempt with retries remaining, the held connection is
    /// closed, a new one is opened through `driver` and installed, and the
    /// backoff delay elapses. The final failed attempt does not reconnect: its
    /// connection stays in `slot` for the caller to release.
    ///
    /// # Errors
    ///
    /// Returns [`ReadinessError::Exhausted`] when all attempts fail, or the
    /// release/reconnect error that interrupted the loop.
    pub async fn run<D: MachineDriver>(
        &self,
        driver: &D,
        machine: &MachineRecord,
        slot: &mut ConnectionSlot<D::Connection>,
    ) -> Result<ReadinessReport, ReadinessError<D::Error>> {
        let max_attempts = self.policy.max_attempts();
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let outcome = run_checked(slot.get()?, self.command, ExecOptions::new()).await;
            let err = match outcome {
                Ok(_) => {
                    return Ok(ReadinessReport {
                        attempts: attempt,
                        reconnects: attempt - 1,
                    });
                }
                Err(err) => err,
            };

            if attempt >= max_attempts {
                warn!(
                    command = self.command,
                    attempts = attempt,
                    error = %err,
                    "readiness probe exhausted"
                );
                return Err(ReadinessError::Exhausted {
                    attempts: attempt,
                    source: err,
                });
            }

            debug!(
                command = self.command,
                attempt,
                max_attempts,
                error = %err,
                "readiness probe failed; reconnecting"
            );
            self.reconnect(driver, machine, slot, attempt).await?;
            sleep(self.policy.delay_for(attempt)).await;
        }
    }

    async fn reconnect<D: MachineDriver>(
        &self,
        driver: &D,
        machine: &MachineRecord,
        slot: &mut ConnectionSlot<D::Connection>,
        attempt: u32,
    ) -> Result<(), ReadinessError<D::Error>> {
        slot.release()
            .await
            .map_err(|source| ReadinessError::Release { attempt, source })?;
        let fresh = driver
            .connect(machine, self.connect_options)
            .await
            .map_err(|source| ReadinessError::Reconnect { attempt, source })?;
        if let Err(rejected) = slot.install(fresh) {
            rejected
                .close()
                .await
                .map_err(|source| ReadinessError::Release { attempt, source })?;
        }
        Ok(())
    }
}
