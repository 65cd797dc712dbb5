// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

use exec::ExecError;

#[derive(Debug, thiserror::Error)]
pub enum RulesError {
    #[error(transparent)]
    Exec(#[from] ExecError),
    #[error("No chain {0}")]
    NoSuchChain(String),
    #[error("Invalid rule '{0}'")]
    Invalid(String),
}
