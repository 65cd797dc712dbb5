// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! A scripted [`Exec`] for tests.

use crate::{Cmd, Exec, ExecError};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use tracing::debug;

/// An expected command and the answer to give when it shows up.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Expectation {
    pub cmd: String,
    pub output: String,
    /// Standard error of a failed execution
    pub err: Option<String>,
}

/// A command the fake saw, along with whatever it was fed on standard input.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordedCall {
    pub cmd: String,
    pub stdin: Option<String>,
}

#[derive(Default)]
struct FakeState {
    expected: VecDeque<Expectation>,
    called: Vec<RecordedCall>,
    unexpected: Vec<String>,
}

/// In strict mode every command must match the next expectation, in order.  In loose
/// mode expectations are matched in any order and unknown commands succeed with empty
/// output.
pub struct FakeExec {
    strict: bool,
    state: Mutex<FakeState>,
}

impl FakeExec {
    #[must_use]
    pub fn strict() -> Self {
        Self {
            strict: true,
            state: Mutex::default(),
        }
    }

    #[must_use]
    pub fn loose() -> Self {
        Self {
            strict: false,
            state: Mutex::default(),
        }
    }

    pub fn expect(&self, cmd: &str, output: &str) -> &Self {
        self.push(cmd, output, None)
    }

    pub fn expect_err(&self, cmd: &str, stderr: &str) -> &Self {
        self.push(cmd, "", Some(stderr.to_string()))
    }

    fn push(&self, cmd: &str, output: &str, err: Option<String>) -> &Self {
        self.state.lock().expected.push_back(Expectation {
            cmd: cmd.to_string(),
            output: output.to_string(),
            err,
        });
        self
    }

    /// All commands run so far, in order
    #[must_use]
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.state.lock().called.clone()
    }

    /// Rendered commands run so far, in order
    #[must_use]
    pub fn commands(&self) -> Vec<String> {
        self.state.lock().called.iter().map(|c| c.cmd.clone()).collect()
    }

    /// Whether a command with exactly this rendering was run
    #[must_use]
    pub fn was_called(&self, cmd: &str) -> bool {
        self.state.lock().called.iter().any(|c| c.cmd == cmd)
    }

    /// True when every expectation was consumed and, in strict mode, nothing else ran.
    #[must_use]
    pub fn called_matches_expected(&self) -> bool {
        let state = self.state.lock();
        if !state.expected.is_empty() {
            debug!("Unconsumed expectations: {:?}", state.expected);
            return false;
        }
        if !state.unexpected.is_empty() {
            debug!("Unexpected commands: {:?}", state.unexpected);
            return false;
        }
        true
    }

    fn answer(expectation: Expectation) -> Result<String, ExecError> {
        match expectation.err {
            None => Ok(expectation.output),
            Some(stderr) => Err(ExecError::Failed {
                cmd: expectation.cmd,
                status: "exit status: 1".to_string(),
                stdout: expectation.output,
                stderr,
            }),
        }
    }
}

#[async_trait]
impl Exec for FakeExec {
    async fn run(&self, cmd: &Cmd) -> Result<String, ExecError> {
        let rendered = cmd.to_string();
        let mut state = self.state.lock();
        state.called.push(RecordedCall {
            cmd: rendered.clone(),
            stdin: cmd.stdin.clone(),
        });
        if self.strict {
            let next_matches = state.expected.front().is_some_and(|e| e.cmd == rendered);
            if next_matches && let Some(expectation) = state.expected.pop_front() {
                return Self::answer(expectation);
            }
            state.unexpected.push(rendered.clone());
            return Err(ExecError::Unexpected(rendered));
        }
        match state.expected.iter().position(|e| e.cmd == rendered) {
            Some(pos) => match state.expected.remove(pos) {
                Some(expectation) => Self::answer(expectation),
                None => Ok(String::new()),
            },
            None => Ok(String::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_strict_order_is_enforced() {
        let exec = FakeExec::strict();
        exec.expect("sysctl -w a=1", "").expect("sysctl -w b=1", "");

        let err = exec
            .run(&Cmd::new("sysctl").args(["-w", "b=1"]))
            .await
            .unwrap_err();
        assert!(matches!(err, ExecError::Unexpected(_)));
        assert!(!exec.called_matches_expected());
    }

    #[tokio::test]
    async fn test_loose_mode() {
        let exec = FakeExec::loose();
        exec.expect("b", "second").expect("a", "first");
        assert_eq!(exec.run(&Cmd::new("a")).await.unwrap(), "first");
        assert_eq!(exec.run(&Cmd::new("unknown")).await.unwrap(), "");
        assert!(!exec.called_matches_expected());
        assert_eq!(exec.run(&Cmd::new("b")).await.unwrap(), "second");
        assert!(exec.called_matches_expected());
        assert_eq!(exec.commands(), vec!["a", "unknown", "b"]);
    }

    #[tokio::test]
    async fn test_stdin_is_recorded() {
        let exec = FakeExec::loose();
        exec.run(&Cmd::new("nft").args(["-f", "-"]).stdin("flush ruleset"))
            .await
            .unwrap();
        assert_eq!(
            exec.calls(),
            vec![RecordedCall {
                cmd: "nft -f -".to_string(),
                stdin: Some("flush ruleset".to_string()),
            }]
        );
    }
}
