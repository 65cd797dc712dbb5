// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Execution of external tools (`ovs-vsctl`, `nft`, `sysctl` and friends).
//!
//! Every component that drives an external command does so through the [`Exec`] trait,
//! so that the real [`SystemExec`] can be replaced by a scripted fake in tests.

#![deny(clippy::all, clippy::pedantic)]

mod cmd;
#[cfg(any(test, feature = "testing"))]
mod fake;
mod retry;
mod system;

pub use cmd::{Cmd, Exec, ExecError};
#[cfg(any(test, feature = "testing"))]
pub use fake::{Expectation, FakeExec, RecordedCall};
pub use retry::{Backoff, run_with_retry};
pub use system::SystemExec;

/// Set a kernel parameter with `sysctl -w key=value`.
pub async fn sysctl(exec: &dyn Exec, key: &str, value: &str) -> Result<(), ExecError> {
    exec.run(&Cmd::new("sysctl").arg("-w").arg(format!("{key}={value}")))
        .await
        .map(|_| ())
}

use tracectl::trace_target;
trace_target!("exec", LevelFilter::INFO, &["commands"]);
