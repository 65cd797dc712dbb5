// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

use async_trait::async_trait;
use std::fmt::Display;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    #[error("Failed to spawn '{0}': {1}")]
    Spawn(String, std::io::Error),
    #[error("Command '{0}' timed out after {1:?}")]
    Timeout(String, Duration),
    #[error(
        "Command exited with non-zero status. Command status: {status}, stdout: {stdout}, stderr: {stderr}"
    )]
    Failed {
        cmd: String,
        status: String,
        stdout: String,
        stderr: String,
    },
    #[error("Unexpected command '{0}'")]
    Unexpected(String),
}

impl ExecError {
    /// The rendered command that produced this error
    #[must_use]
    pub fn cmd(&self) -> &str {
        match self {
            ExecError::Spawn(cmd, _)
            | ExecError::Timeout(cmd, _)
            | ExecError::Failed { cmd, .. }
            | ExecError::Unexpected(cmd) => cmd,
        }
    }
}

/// An external command: program, arguments and optional standard input.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Cmd {
    pub program: String,
    pub args: Vec<String>,
    pub stdin: Option<String>,
}

impl Cmd {
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }
}

impl Display for Cmd {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Runs a command and returns its standard output with surrounding whitespace trimmed.
#[async_trait]
pub trait Exec: Send + Sync {
    async fn run(&self, cmd: &Cmd) -> Result<String, ExecError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn cmd_renders_as_a_shell_line() {
        let cmd = Cmd::new("ovs-vsctl")
            .arg("--timeout=15")
            .args(["port-to-br", "eth0"])
            .stdin("ignored");
        assert_eq!(cmd.to_string(), "ovs-vsctl --timeout=15 port-to-br eth0");
        assert_eq!(cmd.stdin.as_deref(), Some("ignored"));
    }
}
