//! Declarative topology description: hosts, switches and the links
//! between them.
//!
//! A [`Topology`] is assembled through a [`TopologyBuilder`], which rejects
//! conflicting declarations as they are added. Once built, the topology is
//! immutable. [`Topology::scenario`] produces the fixed lab topology.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

use crate::addr::{HostAddr, MacAddr};
use crate::error::NetError;
use crate::shaping::LinkShaping;

/// Hosts of the lab scenario: name, address (`0.0.0.0` = unset), MAC.
pub const SCENARIO_HOSTS: [(&str, &str, &str); 5] = [
    ("h1", "0.0.0.0", "ea:e9:78:fb:fd:01"),
    ("h2", "0.0.0.0", "ea:e9:78:fb:fd:02"),
    ("h3", "0.0.0.0", "ea:e9:78:fb:fd:03"),
    ("h4", "0.0.0.0", "ea:e9:78:fb:fd:04"),
    ("h5", "10.1.11.3/24", "ea:e9:78:fb:fd:05"),
];

/// Switches of the lab scenario.
pub const SCENARIO_SWITCHES: [&str; 3] = ["s1", "s2", "s3"];

/// Links of the lab scenario, in declaration order.
pub const SCENARIO_LINKS: [(&str, &str); 7] = [
    ("s1", "h1"),
    ("s1", "h2"),
    ("s2", "h3"),
    ("s3", "h4"),
    ("s3", "h5"),
    ("s1", "s2"),
    ("s2", "s3"),
];

/// OpenFlow protocol version spoken between a switch and its controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpenFlowVersion {
    OpenFlow10,
    OpenFlow11,
    OpenFlow12,
    OpenFlow13,
    OpenFlow14,
    OpenFlow15,
}

impl OpenFlowVersion {
    /// Name as understood by the OVS `protocols` bridge column.
    pub fn as_str(&self) -> &'static str {
        match self {
            OpenFlowVersion::OpenFlow10 => "OpenFlow10",
            OpenFlowVersion::OpenFlow11 => "OpenFlow11",
            OpenFlowVersion::OpenFlow12 => "OpenFlow12",
            OpenFlowVersion::OpenFlow13 => "OpenFlow13",
            OpenFlowVersion::OpenFlow14 => "OpenFlow14",
            OpenFlowVersion::OpenFlow15 => "OpenFlow15",
        }
    }
}

impl FromStr for OpenFlowVersion {
    type Err = NetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "OpenFlow10" => Ok(OpenFlowVersion::OpenFlow10),
            "OpenFlow11" => Ok(OpenFlowVersion::OpenFlow11),
            "OpenFlow12" => Ok(OpenFlowVersion::OpenFlow12),
            "OpenFlow13" => Ok(OpenFlowVersion::OpenFlow13),
            "OpenFlow14" => Ok(OpenFlowVersion::OpenFlow14),
            "OpenFlow15" => Ok(OpenFlowVersion::OpenFlow15),
            other => Err(NetError::UnknownProtocol(other.to_string())),
        }
    }
}

impl fmt::Display for OpenFlowVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which OVS datapath backs a switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DatapathKind {
    /// In-kernel datapath (`datapath_type=system`).
    #[default]
    Kernel,
    /// Userspace datapath (`datapath_type=netdev`).
    Userspace,
}

impl DatapathKind {
    pub fn as_ovs_type(&self) -> &'static str {
        match self {
            DatapathKind::Kernel => "system",
            DatapathKind::Userspace => "netdev",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Host,
    Switch,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostSpec {
    pub name: String,
    /// `None` leaves the host unaddressed until configured externally.
    pub ip: Option<HostAddr>,
    pub mac: MacAddr,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwitchSpec {
    pub name: String,
    pub protocol: OpenFlowVersion,
    pub datapath: DatapathKind,
    pub dpid: u64,
}

impl SwitchSpec {
    /// Datapath id as 16 hex digits, the form OVS and controllers use.
    pub fn dpid_hex(&self) -> String {
        format!("{:016x}", self.dpid)
    }
}

/// An undirected link between two declared nodes.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkSpec {
    pub a: String,
    pub b: String,
    pub shaping: Option<LinkShaping>,
}

impl LinkSpec {
    pub fn touches(&self, node: &str) -> bool {
        self.a == node || self.b == node
    }

    /// The endpoint opposite `node`, if `node` is on this link.
    pub fn other(&self, node: &str) -> Option<&str> {
        if self.a == node {
            Some(&self.b)
        } else if self.b == node {
            Some(&self.a)
        } else {
            None
        }
    }
}

/// One end of a link as seen from the node that owns it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Port {
    pub node: String,
    pub number: u32,
    pub peer: String,
    pub peer_number: u32,
}

impl Port {
    pub fn intf(&self) -> String {
        intf_name(&self.node, self.number)
    }

    pub fn peer_intf(&self) -> String {
        intf_name(&self.peer, self.peer_number)
    }
}

/// Interface name of port `number` on `node`, e.g. `s3-eth2`.
pub fn intf_name(node: &str, number: u32) -> String {
    format!("{node}-eth{number}")
}

/// Derives a datapath id from the first run of digits in a switch name.
///
/// Returns `None` when the name carries no digits.
pub fn dpid_from_name(name: &str) -> Option<u64> {
    let digits: String = name
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}

#[derive(Debug, Clone, PartialEq)]
pub struct Topology {
    hosts: Vec<HostSpec>,
    switches: Vec<SwitchSpec>,
    links: Vec<LinkSpec>,
    /// Port numbers `(a, b)` of each link, parallel to `links`.
    link_ports: Vec<(u32, u32)>,
}

impl Topology {
    /// Builds the fixed lab topology.
    ///
    /// Three OpenFlow 1.4 switches in a line (`s1 - s2 - s3`) with hosts as
    /// leaves: h1, h2 on s1, h3 on s2, h4, h5 on s3. Only h5 is addressed.
    pub fn scenario() -> Result<Self, NetError> {
        Self::scenario_with_protocol(OpenFlowVersion::OpenFlow14)
    }

    /// The lab topology with every switch speaking `protocol`.
    pub fn scenario_with_protocol(protocol: OpenFlowVersion) -> Result<Self, NetError> {
        let mut builder = TopologyBuilder::new();
        for (name, ip, mac) in SCENARIO_HOSTS {
            builder.add_host(name, ip, mac)?;
        }
        for name in SCENARIO_SWITCHES {
            builder.add_switch(name, protocol, DatapathKind::Kernel)?;
        }
        for (a, b) in SCENARIO_LINKS {
            builder.add_link(a, b)?;
        }
        Ok(builder.build())
    }

    pub fn hosts(&self) -> &[HostSpec] {
        &self.hosts
    }

    pub fn switches(&self) -> &[SwitchSpec] {
        &self.switches
    }

    pub fn links(&self) -> &[LinkSpec] {
        &self.links
    }

    pub fn host(&self, name: &str) -> Option<&HostSpec> {
        self.hosts.iter().find(|h| h.name == name)
    }

    pub fn switch(&self, name: &str) -> Option<&SwitchSpec> {
        self.switches.iter().find(|s| s.name == name)
    }

    pub fn kind(&self, name: &str) -> Option<NodeKind> {
        if self.host(name).is_some() {
            Some(NodeKind::Host)
        } else if self.switch(name).is_some() {
            Some(NodeKind::Switch)
        } else {
            None
        }
    }

    /// All node names, hosts first, in declaration order.
    pub fn node_names(&self) -> impl Iterator<Item = &str> {
        self.hosts
            .iter()
            .map(|h| h.name.as_str())
            .chain(self.switches.iter().map(|s| s.name.as_str()))
    }

    /// Number of links attached to `name`.
    pub fn degree(&self, name: &str) -> usize {
        self.links.iter().filter(|l| l.touches(name)).count()
    }

    /// Ports of `name` in link declaration order.
    pub fn ports(&self, name: &str) -> Vec<Port> {
        self.links
            .iter()
            .zip(&self.link_ports)
            .filter_map(|(link, &(pa, pb))| {
                if link.a == name {
                    Some(Port {
                        node: link.a.clone(),
                        number: pa,
                        peer: link.b.clone(),
                        peer_number: pb,
                    })
                } else if link.b == name {
                    Some(Port {
                        node: link.b.clone(),
                        number: pb,
                        peer: link.a.clone(),
                        peer_number: pa,
                    })
                } else {
                    None
                }
            })
            .collect()
    }

    /// Links paired with their `(a, b)` port numbers.
    pub fn numbered_links(&self) -> impl Iterator<Item = (&LinkSpec, u32, u32)> {
        self.links
            .iter()
            .zip(&self.link_ports)
            .map(|(link, &(pa, pb))| (link, pa, pb))
    }

    /// The switch and OpenFlow port a host's first interface hangs off.
    pub fn connect_point(&self, host: &str) -> Result<(&SwitchSpec, u32), NetError> {
        if self.host(host).is_none() {
            return Err(NetError::UnknownNode(host.to_string()));
        }
        let port = self
            .ports(host)
            .into_iter()
            .next()
            .ok_or_else(|| NetError::NoInterface(host.to_string()))?;
        let switch = self
            .switch(&port.peer)
            .ok_or_else(|| NetError::UnknownNode(port.peer.clone()))?;
        Ok((switch, port.peer_number))
    }
}

/// Incremental, validating constructor for [`Topology`].
#[derive(Debug, Default)]
pub struct TopologyBuilder {
    hosts: Vec<HostSpec>,
    switches: Vec<SwitchSpec>,
    links: Vec<LinkSpec>,
    link_ports: Vec<(u32, u32)>,
    macs: HashMap<MacAddr, String>,
    dpids: HashMap<u64, String>,
    next_port: BTreeMap<String, u32>,
}

impl TopologyBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn ensure_unique_name(&self, name: &str) -> Result<(), NetError> {
        if self.next_port.contains_key(name) {
            return Err(NetError::DuplicateNode(name.to_string()));
        }
        Ok(())
    }

    /// Declares a host. `ip` of `0.0.0.0` leaves it unaddressed.
    pub fn add_host(&mut self, name: &str, ip: &str, mac: &str) -> Result<&mut Self, NetError> {
        self.ensure_unique_name(name)?;
        let ip = HostAddr::parse_optional(ip)?;
        let mac: MacAddr = mac.parse()?;
        if let Some(first) = self.macs.get(&mac) {
            return Err(NetError::DuplicateMac {
                mac,
                first: first.clone(),
                second: name.to_string(),
            });
        }

        self.macs.insert(mac, name.to_string());
        // host interfaces count from eth0
        self.next_port.insert(name.to_string(), 0);
        self.hosts.push(HostSpec {
            name: name.to_string(),
            ip,
            mac,
        });
        Ok(self)
    }

    /// Declares a switch. The datapath id comes from the digits in the name,
    /// or from the declaration position when the name has none.
    pub fn add_switch(
        &mut self,
        name: &str,
        protocol: OpenFlowVersion,
        datapath: DatapathKind,
    ) -> Result<&mut Self, NetError> {
        self.ensure_unique_name(name)?;
        let dpid = dpid_from_name(name).unwrap_or(self.switches.len() as u64 + 1);
        if let Some(first) = self.dpids.get(&dpid) {
            return Err(NetError::DuplicateDpid {
                dpid,
                first: first.clone(),
                second: name.to_string(),
            });
        }

        self.dpids.insert(dpid, name.to_string());
        // OpenFlow port numbers start at 1
        self.next_port.insert(name.to_string(), 1);
        self.switches.push(SwitchSpec {
            name: name.to_string(),
            protocol,
            datapath,
            dpid,
        });
        Ok(self)
    }

    pub fn add_link(&mut self, a: &str, b: &str) -> Result<&mut Self, NetError> {
        self.push_link(a, b, None)
    }

    /// Declares a link whose interfaces get `tc netem` shaping on start.
    pub fn add_shaped_link(
        &mut self,
        a: &str,
        b: &str,
        shaping: LinkShaping,
    ) -> Result<&mut Self, NetError> {
        self.push_link(a, b, Some(shaping))
    }

    fn push_link(
        &mut self,
        a: &str,
        b: &str,
        shaping: Option<LinkShaping>,
    ) -> Result<&mut Self, NetError> {
        for endpoint in [a, b] {
            if !self.next_port.contains_key(endpoint) {
                return Err(NetError::UnknownEndpoint {
                    a: a.to_string(),
                    b: b.to_string(),
                    missing: endpoint.to_string(),
                });
            }
        }
        if a == b {
            return Err(NetError::InvalidLink {
                a: a.to_string(),
                b: b.to_string(),
                reason: "a node cannot be linked to itself",
            });
        }
        let is_host = |n: &str| self.hosts.iter().any(|h| h.name == n);
        if is_host(a) && is_host(b) {
            return Err(NetError::InvalidLink {
                a: a.to_string(),
                b: b.to_string(),
                reason: "hosts attach only to switches",
            });
        }

        let pa = self.take_port(a);
        let pb = self.take_port(b);
        self.links.push(LinkSpec {
            a: a.to_string(),
            b: b.to_string(),
            shaping,
        });
        self.link_ports.push((pa, pb));
        Ok(self)
    }

    fn take_port(&mut self, node: &str) -> u32 {
        let next = self.next_port.entry(node.to_string()).or_insert(0);
        let port = *next;
        *next += 1;
        port
    }

    pub fn build(self) -> Topology {
        Topology {
            hosts: self.hosts,
            switches: self.switches,
            links: self.links,
            link_ports: self.link_ports,
        }
    }
}
