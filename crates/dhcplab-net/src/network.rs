//! Realisation of a [`Topology`] as live OS constructs.

use std::collections::BTreeMap;
use std::process::{Command, Output};
use std::time::{Duration, Instant};

use crate::controller::RemoteController;
use crate::error::NetError;
use crate::exec;
use crate::link::VethPair;
use crate::namespace::Namespace;
use crate::shaping::apply_shaping;
use crate::switch::{bridge_connected, OvsBridge};
use crate::topology::{intf_name, HostSpec, NodeKind, Topology};

/// How often switch controller state is polled while waiting.
const CONNECT_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// An emulated host: a network namespace plus its configured interfaces.
#[derive(Debug)]
pub struct HostNode {
    pub spec: HostSpec,
    pub namespace: Namespace,
    /// Interface names in port order; the first is the default interface.
    pub intfs: Vec<String>,
}

impl HostNode {
    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn default_intf(&self) -> Option<&str> {
        self.intfs.first().map(String::as_str)
    }

    /// Runs a command inside the host's namespace.
    pub fn exec(&self, program: &str, args: &[&str]) -> Result<Output, NetError> {
        Ok(self.namespace.exec(program, args)?)
    }

    /// Attaches `intf` (already moved into the namespace) and configures it.
    ///
    /// The host's MAC and address go on its first interface only.
    fn configure_intf(&mut self, intf: &str) -> Result<(), NetError> {
        let ns = &self.namespace;
        if self.intfs.is_empty() {
            let mac = self.spec.mac.to_string();
            ns.exec_checked("ip", &["link", "set", "dev", intf, "address", &mac])?;
            if let Some(ip) = self.spec.ip {
                let ip = ip.to_string();
                ns.exec_checked("ip", &["addr", "add", &ip, "dev", intf])?;
            }
        }
        ns.exec_checked("ip", &["link", "set", "dev", intf, "up"])?;
        self.intfs.push(intf.to_string());
        Ok(())
    }
}

/// A running emulated network.
///
/// Owns every OS resource it created. Fields drop in declaration order, so
/// links go first, then bridges, then host namespaces.
#[derive(Debug)]
pub struct EmulatedNetwork {
    links: Vec<VethPair>,
    switches: Vec<OvsBridge>,
    hosts: Vec<HostNode>,
    topology: Topology,
    controller: RemoteController,
    namespace_prefix: String,
}

impl EmulatedNetwork {
    /// Creates all hosts, switches and links of `topology`, with switches
    /// pointed at `controller`.
    ///
    /// Host namespaces are named `<namespace_prefix><host>`. Fails on the
    /// first construct that cannot be created; anything created up to that
    /// point is released again.
    pub fn start(
        topology: Topology,
        controller: RemoteController,
        namespace_prefix: &str,
    ) -> Result<Self, NetError> {
        tracing::info!(
            hosts = topology.hosts().len(),
            switches = topology.switches().len(),
            links = topology.links().len(),
            controller = %controller.target(),
            "starting emulated network"
        );

        let mut switches = Vec::with_capacity(topology.switches().len());
        for spec in topology.switches() {
            switches.push(OvsBridge::create(spec, &controller)?);
        }

        let mut hosts = Vec::with_capacity(topology.hosts().len());
        for spec in topology.hosts() {
            let ns_name = format!("{namespace_prefix}{}", spec.name);
            let namespace = Namespace::new(&ns_name)?;
            hosts.push(HostNode {
                spec: spec.clone(),
                namespace,
                intfs: Vec::new(),
            });
        }

        let mut links = Vec::with_capacity(topology.links().len());
        for (link, pa, pb) in topology.numbered_links() {
            let intf_a = intf_name(&link.a, pa);
            let intf_b = intf_name(&link.b, pb);
            links.push(VethPair::create(&intf_a, &intf_b)?);

            for (node, intf, port) in [(&link.a, &intf_a, pa), (&link.b, &intf_b, pb)] {
                match topology.kind(node) {
                    Some(NodeKind::Host) => {
                        let host = find_host_mut(&mut hosts, node)?;
                        host.namespace.adopt(intf)?;
                        host.configure_intf(intf)?;
                        if let Some(shaping) = &link.shaping {
                            apply_shaping(Some(&host.namespace), intf, shaping)?;
                        }
                    }
                    Some(NodeKind::Switch) => {
                        let bridge = switches
                            .iter()
                            .find(|s| &s.name == node)
                            .ok_or_else(|| NetError::UnknownNode(node.clone()))?;
                        bridge.add_port(intf, port)?;
                        if let Some(shaping) = &link.shaping {
                            apply_shaping(None, intf, shaping)?;
                        }
                    }
                    None => return Err(NetError::UnknownNode(node.clone())),
                }
            }
            tracing::debug!(a = %intf_a, b = %intf_b, "link up");
        }

        tracing::info!("emulated network started");
        Ok(Self {
            links,
            switches,
            hosts,
            topology,
            controller,
            namespace_prefix: namespace_prefix.to_string(),
        })
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn controller(&self) -> &RemoteController {
        &self.controller
    }

    pub fn hosts(&self) -> &[HostNode] {
        &self.hosts
    }

    pub fn host(&self, name: &str) -> Result<&HostNode, NetError> {
        self.hosts
            .iter()
            .find(|h| h.name() == name)
            .ok_or_else(|| NetError::UnknownNode(name.to_string()))
    }

    pub fn switch(&self, name: &str) -> Result<&OvsBridge, NetError> {
        self.switches
            .iter()
            .find(|s| s.name == name)
            .ok_or_else(|| NetError::UnknownNode(name.to_string()))
    }

    /// Number of ports currently attached to a switch's bridge.
    pub fn switch_link_count(&self, name: &str) -> Result<usize, NetError> {
        Ok(self.switch(name)?.ports()?.len())
    }

    /// Switches whose controller connection is not (yet) established.
    pub fn disconnected_switches(&self) -> Result<Vec<String>, NetError> {
        let names: Vec<String> = self.switches.iter().map(|s| s.name.clone()).collect();
        disconnected(&names)
    }

    /// Waits until every switch reports a controller connection.
    ///
    /// Each poll runs `ovs-vsctl` on the blocking pool.
    pub async fn wait_for_controller(&self, timeout: Duration) -> Result<(), NetError> {
        let deadline = Instant::now() + timeout;
        let names: Vec<String> = self.switches.iter().map(|s| s.name.clone()).collect();
        loop {
            let batch = names.clone();
            let pending = tokio::task::spawn_blocking(move || disconnected(&batch))
                .await
                .map_err(|e| NetError::Io(std::io::Error::other(e)))??;
            if pending.is_empty() {
                tracing::info!(controller = %self.controller.target(), "all switches connected");
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(NetError::ControllerTimeout { pending, timeout });
            }
            tokio::time::sleep(CONNECT_POLL_INTERVAL).await;
        }
    }

    /// A detached, read-only handle for inspecting and running commands in
    /// the network from another thread.
    pub fn view(&self) -> NetworkView {
        NetworkView {
            topology: self.topology.clone(),
            namespaces: self
                .hosts
                .iter()
                .map(|h| (h.name().to_string(), h.namespace.name.clone()))
                .collect(),
        }
    }

    /// Tears the network down: links, then bridges, then namespaces.
    pub fn stop(mut self) {
        tracing::info!(prefix = %self.namespace_prefix, "stopping emulated network");
        self.links.clear();
        self.switches.clear();
        self.hosts.clear();
        tracing::info!("emulated network stopped");
    }
}

fn disconnected(switches: &[String]) -> Result<Vec<String>, NetError> {
    let mut pending = Vec::new();
    for name in switches {
        if !bridge_connected(name)? {
            pending.push(name.clone());
        }
    }
    Ok(pending)
}

fn find_host_mut<'a>(hosts: &'a mut [HostNode], name: &str) -> Result<&'a mut HostNode, NetError> {
    hosts
        .iter_mut()
        .find(|h| h.spec.name == name)
        .ok_or_else(|| NetError::UnknownNode(name.to_string()))
}

/// Snapshot of a running network that can be sent to another thread.
///
/// Holds names only; the resources stay owned by [`EmulatedNetwork`].
#[derive(Debug, Clone)]
pub struct NetworkView {
    pub topology: Topology,
    /// Host name to namespace name.
    pub namespaces: BTreeMap<String, String>,
}

impl NetworkView {
    /// A view of a topology that has not been realised.
    pub fn detached(topology: Topology) -> Self {
        Self {
            topology,
            namespaces: BTreeMap::new(),
        }
    }

    /// A shell command line to run on `node`.
    ///
    /// Hosts run it inside their namespace, switches in the root namespace.
    pub fn shell(&self, node: &str, command_line: &str) -> Result<Command, NetError> {
        match self.topology.kind(node) {
            Some(NodeKind::Host) => {
                let ns = self
                    .namespaces
                    .get(node)
                    .ok_or_else(|| NetError::UnknownNode(node.to_string()))?;
                let mut cmd = exec::privileged("ip");
                cmd.args(["netns", "exec", ns, "sh", "-c", command_line]);
                Ok(cmd)
            }
            Some(NodeKind::Switch) => {
                let mut cmd = exec::privileged("sh");
                cmd.args(["-c", command_line]);
                Ok(cmd)
            }
            None => Err(NetError::UnknownNode(node.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{check_ovs, check_privileges};
    use crate::topology::Topology;

    #[test]
    fn detached_view_rejects_host_commands() {
        let view = NetworkView::detached(Topology::scenario().unwrap());
        assert!(matches!(
            view.shell("h1", "true"),
            Err(NetError::UnknownNode(_))
        ));
        assert!(matches!(
            view.shell("nope", "true"),
            Err(NetError::UnknownNode(_))
        ));
        let cmd = view.shell("s1", "ovs-ofctl show s1").unwrap();
        assert!(exec::program_name(&cmd).ends_with("sh -c ovs-ofctl show s1"));
    }

    #[test]
    fn view_routes_host_commands_into_namespace() {
        let mut view = NetworkView::detached(Topology::scenario().unwrap());
        view.namespaces.insert("h5".into(), "dl-h5".into());
        let cmd = view.shell("h5", "ip addr").unwrap();
        assert!(exec::program_name(&cmd).ends_with("ip netns exec dl-h5 sh -c ip addr"));
    }

    #[test]
    fn test_scenario_network_starts_with_declared_links() {
        if !check_privileges() || !check_ovs() {
            eprintln!("Skipping test, insufficient privileges or Open vSwitch missing");
            return;
        }

        let topo = Topology::scenario().unwrap();
        let net = EmulatedNetwork::start(topo, RemoteController::default(), "dlnt-")
            .expect("Failed to start network");

        for (switch, expected) in [("s1", 3), ("s2", 3), ("s3", 3)] {
            assert_eq!(net.switch_link_count(switch).unwrap(), expected, "{switch}");
        }

        let h5 = net.host("h5").unwrap();
        assert_eq!(h5.default_intf(), Some("h5-eth0"));
        let out = h5.exec("ip", &["addr", "show", "dev", "h5-eth0"]).unwrap();
        let text = String::from_utf8_lossy(&out.stdout);
        assert!(text.contains("10.1.11.3/24"), "{text}");
        assert!(text.contains("ea:e9:78:fb:fd:05"), "{text}");

        let h1 = net.host("h1").unwrap();
        let out = h1.exec("ip", &["-4", "addr", "show", "dev", "h1-eth0"]).unwrap();
        assert!(!String::from_utf8_lossy(&out.stdout).contains("inet "));

        net.stop();
        assert!(!Namespace::exists("dlnt-h5"));
        assert!(!OvsBridge::exists("s1"));
    }
}
