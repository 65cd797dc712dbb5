// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

use crate::{Cmd, Exec, ExecError};
use backoff::future::retry_notify;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tracing::warn;

/// Retry policy for read-only probes: the delay doubles after every failed attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Backoff {
    pub attempts: u32,
    pub initial: Duration,
    pub max: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            attempts: 5,
            initial: Duration::from_millis(100),
            max: Duration::from_secs(2),
        }
    }
}

impl Backoff {
    /// The delays between attempts; the attempt budget is enforced by [`Backoff::retry`]
    fn policy(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(self.initial)
            .with_multiplier(2.0)
            .with_randomization_factor(0.0)
            .with_max_interval(self.max)
            .with_max_elapsed_time(None)
            .build()
    }

    /// Run `f` until it succeeds or the attempts are exhausted, returning the last error.
    pub async fn retry<T, E, F, Fut>(&self, mut f: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let attempts = self.attempts;
        let attempt = AtomicU32::new(0);
        retry_notify(
            self.policy(),
            || {
                let last = attempt.fetch_add(1, Ordering::Relaxed) + 1 >= attempts;
                let fut = f();
                async move {
                    fut.await.map_err(|e| {
                        if last {
                            backoff::Error::permanent(e)
                        } else {
                            backoff::Error::transient(e)
                        }
                    })
                }
            },
            |e: E, delay: Duration| {
                warn!(
                    "Attempt {}/{attempts} failed, retrying in {delay:?}: {e}",
                    attempt.load(Ordering::Relaxed)
                );
            },
        )
        .await
    }
}

/// Run a read-only command, retrying with backoff.  Never use for mutations.
pub async fn run_with_retry(
    exec: &dyn Exec,
    cmd: &Cmd,
    backoff: &Backoff,
) -> Result<String, ExecError> {
    backoff.retry(|| exec.run(cmd)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FakeExec;
    use pretty_assertions::assert_eq;
    use tracing_test::traced_test;

    fn fast() -> Backoff {
        Backoff {
            attempts: 3,
            initial: Duration::from_millis(1),
            max: Duration::from_millis(2),
        }
    }

    #[tokio::test]
    #[traced_test]
    async fn test_retry_succeeds_after_failures() {
        let exec = FakeExec::strict();
        let cmd = Cmd::new("ovs-vsctl").args(["get", "Interface", "eth0", "ofport"]);
        exec.expect_err(&cmd.to_string(), "not ready");
        exec.expect_err(&cmd.to_string(), "not ready");
        exec.expect(&cmd.to_string(), "1");

        let out = run_with_retry(&exec, &cmd, &fast()).await.unwrap();
        assert_eq!(out, "1");
        assert!(exec.called_matches_expected());
        assert!(logs_contain("Attempt 2/3 failed"));
    }

    #[tokio::test]
    async fn test_retry_gives_up() {
        let exec = FakeExec::strict();
        let cmd = Cmd::new("ovs-vsctl").args(["get", "Interface", "eth0", "ofport"]);
        for _ in 0..3 {
            exec.expect_err(&cmd.to_string(), "not ready");
        }
        let err = run_with_retry(&exec, &cmd, &fast()).await.unwrap_err();
        assert!(matches!(err, ExecError::Failed { .. }));
        assert!(exec.called_matches_expected());
    }
}
