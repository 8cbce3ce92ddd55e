use std::process::Command;

use crate::controller::RemoteController;
use crate::error::NetError;
use crate::exec;
use crate::topology::SwitchSpec;

fn vsctl() -> Command {
    exec::privileged("ovs-vsctl")
}

/// An Open vSwitch bridge realising one declared switch.
///
/// The bridge is created in secure fail mode, so it forwards nothing until
/// the controller installs flows. Dropping the bridge deletes it together
/// with its ports.
#[derive(Debug)]
pub struct OvsBridge {
    pub name: String,
}

impl OvsBridge {
    pub fn create(spec: &SwitchSpec, controller: &RemoteController) -> Result<Self, NetError> {
        let name = spec.name.as_str();
        exec::run_quiet(vsctl().args(["--if-exists", "del-br", name]));

        let protocols = format!("protocols={}", spec.protocol);
        let datapath = format!("datapath_type={}", spec.datapath.as_ovs_type());
        let dpid = format!("other-config:datapath-id={}", spec.dpid_hex());
        let target = controller.target();
        exec::run_checked(
            vsctl().args([
                "--", "add-br", name,
                "--", "set", "bridge", name, &protocols, &datapath, &dpid, "fail-mode=secure",
                "--", "set-controller", name, &target,
            ]),
            &format!("create bridge {name}"),
        )?;

        tracing::info!(
            switch = name,
            dpid = %spec.dpid_hex(),
            protocol = %spec.protocol,
            controller = %target,
            "bridge created"
        );
        Ok(Self {
            name: name.to_string(),
        })
    }

    /// Enslaves `intf` to the bridge and brings it up.
    pub fn add_port(&self, intf: &str, ofport: u32) -> Result<(), NetError> {
        let ofport_request = format!("ofport_request={ofport}");
        exec::run_checked(
            vsctl().args([
                "--", "add-port", &self.name, intf,
                "--", "set", "Interface", intf, &ofport_request,
            ]),
            &format!("add {intf} to {}", self.name),
        )?;
        crate::link::set_up(intf)
    }

    /// Names of the interfaces currently attached to the bridge.
    pub fn ports(&self) -> Result<Vec<String>, NetError> {
        let out = exec::run_checked(
            vsctl().args(["list-ports", &self.name]),
            &format!("list ports of {}", self.name),
        )?;
        Ok(String::from_utf8_lossy(&out.stdout)
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }

    /// Whether every controller configured on the bridge reports an
    /// established connection.
    pub fn is_connected(&self) -> Result<bool, NetError> {
        bridge_connected(&self.name)
    }

    /// Whether a bridge called `name` currently exists.
    pub fn exists(name: &str) -> bool {
        vsctl()
            .args(["br-exists", name])
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }
}

/// Controller connection state of the bridge called `name`.
pub fn bridge_connected(name: &str) -> Result<bool, NetError> {
    let out = exec::run_checked(
        vsctl().args(["--", "get", "Bridge", name, "controller"]),
        &format!("get controller of {name}"),
    )?;
    let uuids = parse_uuid_list(&String::from_utf8_lossy(&out.stdout));
    if uuids.is_empty() {
        return Ok(false);
    }

    for uuid in uuids {
        let out = exec::run_checked(
            vsctl().args(["--", "get", "Controller", &uuid, "is_connected"]),
            &format!("get controller state of {name}"),
        )?;
        if String::from_utf8_lossy(&out.stdout).trim() != "true" {
            return Ok(false);
        }
    }
    Ok(true)
}

impl Drop for OvsBridge {
    fn drop(&mut self) {
        exec::run_quiet(vsctl().args(["--if-exists", "del-br", &self.name]));
        tracing::debug!(switch = %self.name, "bridge deleted");
    }
}

/// Parses the OVSDB set syntax `[uuid1, uuid2]` (or a bare uuid).
fn parse_uuid_list(raw: &str) -> Vec<String> {
    raw.trim()
        .trim_start_matches('[')
        .trim_end_matches(']')
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
