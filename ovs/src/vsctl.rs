// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

use crate::OvsError;
use exec::{Backoff, Cmd, Exec, run_with_retry};
use std::sync::Arc;
use tracing::debug;

const OVS_TIMEOUT: &str = "--timeout=15";
const OVN_TIMEOUT: &str = "--timeout=5";

/// Strip the quoting `ovs-vsctl get` applies to string values.
#[must_use]
pub fn unquote(value: &str) -> &str {
    value.trim().trim_matches('"')
}

/// Thin wrapper around the Open vSwitch command line tools.
#[derive(Clone)]
pub struct Ovs {
    exec: Arc<dyn Exec>,
    backoff: Backoff,
}

impl Ovs {
    #[must_use]
    pub fn new(exec: Arc<dyn Exec>, backoff: Backoff) -> Self {
        Self { exec, backoff }
    }

    #[must_use]
    pub fn exec(&self) -> &dyn Exec {
        self.exec.as_ref()
    }

    fn vsctl_cmd<I, S>(args: I) -> Cmd
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Cmd::new("ovs-vsctl").arg(OVS_TIMEOUT).args(args)
    }

    /// `ovs-vsctl --timeout=15 <args>`
    pub async fn vsctl<I, S>(&self, args: I) -> Result<String, OvsError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Ok(self.exec.run(&Self::vsctl_cmd(args)).await?)
    }

    /// A read-only `ovs-vsctl` query, retried with backoff
    pub async fn vsctl_probe<I, S>(&self, args: I) -> Result<String, OvsError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let cmd = Self::vsctl_cmd(args);
        Ok(run_with_retry(self.exec.as_ref(), &cmd, &self.backoff).await?)
    }

    /// `ovs-appctl --timeout=15 <args>`
    pub async fn appctl<I, S>(&self, args: I) -> Result<String, OvsError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let cmd = Cmd::new("ovs-appctl").arg(OVS_TIMEOUT).args(args);
        Ok(self.exec.run(&cmd).await?)
    }

    /// Ask ovn-controller to exit; its supervisor restarts it with fresh settings
    pub async fn restart_ovn_controller(&self) -> Result<(), OvsError> {
        let cmd = Cmd::new("ovn-appctl")
            .arg(OVN_TIMEOUT)
            .args(["-t", "ovn-controller", "exit", "--restart"]);
        self.exec.run(&cmd).await?;
        Ok(())
    }

    /// Atomically replace every flow of `bridge` with `flows`
    pub async fn replace_flows(&self, bridge: &str, flows: &[String]) -> Result<(), OvsError> {
        let mut input = flows.join("\n");
        input.push('\n');
        let cmd = Cmd::new("ovs-ofctl")
            .args(["-O", "OpenFlow13", "--bundle", "replace-flows", bridge, "-"])
            .stdin(input);
        debug!("Installing {} flows on {bridge}", flows.len());
        self.exec.run(&cmd).await?;
        Ok(())
    }

    /// Read an `external_ids` key of the Open_vSwitch table, retried with backoff;
    /// empty when unset
    pub async fn get_external_id(&self, key: &str) -> Result<String, OvsError> {
        let column = format!("external_ids:{key}");
        let out = self
            .vsctl_probe(["--if-exists", "get", "Open_vSwitch", ".", column.as_str()])
            .await?;
        Ok(unquote(&out).to_string())
    }

    /// The bridge `port` is attached to, `None` when it is not an OVS port
    pub async fn port_to_bridge(&self, port: &str) -> Option<String> {
        match self.vsctl(["port-to-br", port]).await {
            Ok(bridge) if !bridge.is_empty() => Some(bridge),
            Ok(_) => None,
            Err(e) => {
                debug!("{port} is not attached to a bridge: {e}");
                None
            }
        }
    }

    /// Read the ofport of an interface, retrying while OVS has not assigned it yet
    pub async fn ofport(&self, interface: &str) -> Result<u32, OvsError> {
        self.ofport_of("interface", interface).await
    }

    /// Read the ofport of a patch port, retrying while OVS has not assigned it yet
    pub async fn patch_ofport(&self, port: &str) -> Result<u32, OvsError> {
        self.ofport_of("Interface", port).await
    }

    async fn ofport_of(&self, table: &str, interface: &str) -> Result<u32, OvsError> {
        let cmd = Self::vsctl_cmd(["get", table, interface, "ofport"]);
        let cmd = &cmd;
        let exec = self.exec.as_ref();
        self.backoff
            .retry(move || async move {
                let out = exec.run(cmd).await?;
                Self::parse_ofport(&out)
            })
            .await
    }

    /// Current ofport of an interface without retrying; `None` when it is gone
    pub async fn current_ofport(&self, interface: &str) -> Result<Option<u32>, OvsError> {
        let out = self
            .vsctl(["--if-exists", "get", "interface", interface, "ofport"])
            .await?;
        Ok(Self::parse_ofport(&out).ok())
    }

    /// Parse an ofport number; unassigned ports report `-1` or `[]`
    pub(crate) fn parse_ofport(value: &str) -> Result<u32, OvsError> {
        unquote(value)
            .parse::<u32>()
            .map_err(|_| OvsError::Parse("ofport", value.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use exec::FakeExec;
    use pretty_assertions::assert_eq;

    #[test]
    fn ofport_parsing() {
        assert_eq!(Ovs::parse_ofport("5\n").unwrap(), 5);
        assert!(Ovs::parse_ofport("-1").is_err());
        assert!(Ovs::parse_ofport("[]").is_err());
    }

    #[tokio::test]
    async fn test_replace_flows_feeds_stdin() {
        let exec = Arc::new(FakeExec::strict());
        exec.expect("ovs-ofctl -O OpenFlow13 --bundle replace-flows breth0 -", "");
        let ovs = Ovs::new(exec.clone(), Backoff::default());
        ovs.replace_flows("breth0", &["table=0,priority=0,actions=NORMAL".to_string()])
            .await
            .unwrap();
        assert_eq!(
            exec.calls()[0].stdin.as_deref(),
            Some("table=0,priority=0,actions=NORMAL\n")
        );
    }

    #[tokio::test]
    async fn test_external_id_read_is_retried() {
        let exec = Arc::new(FakeExec::strict());
        let cmd = "ovs-vsctl --timeout=15 --if-exists get Open_vSwitch . external_ids:system-id";
        exec.expect_err(cmd, "database connection failed");
        exec.expect(cmd, "\"cb9ec8fa-b409-4ef3-9f42-d9283c47aac6\"");
        let backoff = Backoff {
            attempts: 3,
            initial: std::time::Duration::from_millis(1),
            max: std::time::Duration::from_millis(2),
        };
        let ovs = Ovs::new(exec.clone(), backoff);
        assert_eq!(
            ovs.get_external_id("system-id").await.unwrap(),
            "cb9ec8fa-b409-4ef3-9f42-d9283c47aac6"
        );
        assert!(exec.called_matches_expected());
    }

    #[tokio::test]
    async fn test_external_id_is_unquoted() {
        let exec = Arc::new(FakeExec::strict());
        exec.expect(
            "ovs-vsctl --timeout=15 --if-exists get Open_vSwitch . external_ids:system-id",
            "\"cb9ec8fa-b409-4ef3-9f42-d9283c47aac6\"",
        );
        let ovs = Ovs::new(exec, Backoff::default());
        assert_eq!(
            ovs.get_external_id("system-id").await.unwrap(),
            "cb9ec8fa-b409-4ef3-9f42-d9283c47aac6"
        );
    }
}
