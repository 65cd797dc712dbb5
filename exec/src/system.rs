// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

use crate::{Cmd, Exec, ExecError};
use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, trace};

/// Runs commands on the host, each bounded by a fixed timeout.
#[derive(Clone, Debug)]
pub struct SystemExec {
    timeout: Duration,
}

impl SystemExec {
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    async fn output(cmd: &Cmd, rendered: &str) -> Result<std::process::Output, ExecError> {
        let mut child = Command::new(&cmd.program)
            .args(&cmd.args)
            .stdin(if cmd.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ExecError::Spawn(rendered.to_string(), e))?;

        if let (Some(input), Some(mut stdin)) = (&cmd.stdin, child.stdin.take()) {
            stdin
                .write_all(input.as_bytes())
                .await
                .map_err(|e| ExecError::Spawn(rendered.to_string(), e))?;
            // closing stdin lets the child see end-of-input
            drop(stdin);
        }
        child
            .wait_with_output()
            .await
            .map_err(|e| ExecError::Spawn(rendered.to_string(), e))
    }
}

impl Default for SystemExec {
    fn default() -> Self {
        Self::new(Duration::from_secs(15))
    }
}

#[async_trait]
impl Exec for SystemExec {
    async fn run(&self, cmd: &Cmd) -> Result<String, ExecError> {
        let rendered = cmd.to_string();
        debug!("Running '{rendered}'");
        let output = timeout(self.timeout, Self::output(cmd, &rendered))
            .await
            .map_err(|_| ExecError::Timeout(rendered.clone(), self.timeout))??;

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if !output.status.success() {
            return Err(ExecError::Failed {
                cmd: rendered,
                status: output.status.to_string(),
                stdout,
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            });
        }
        trace!("'{rendered}' returned '{stdout}'");
        Ok(stdout)
    }
}
