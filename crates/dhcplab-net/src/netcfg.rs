//! Controller network configuration for the unicast DHCP relay app.
//!
//! The controller-side app forwards DHCP traffic between clients and the
//! server's attachment point, which it reads from its netcfg as
//! `of:<dpid>/<port>`.

use serde_json::{json, Value};

use crate::error::NetError;
use crate::topology::Topology;

pub const UNICAST_DHCP_APP: &str = "nctu.winlab.unicastdhcp";
pub const UNICAST_DHCP_CONFIG_KEY: &str = "UnicastDhcpConfig";

/// Connect point of `host` in controller notation, e.g. `of:0000000000000003/2`.
pub fn server_location(topology: &Topology, host: &str) -> Result<String, NetError> {
    let (switch, port) = topology.connect_point(host)?;
    Ok(format!("of:{}/{}", switch.dpid_hex(), port))
}

/// netcfg document pointing the unicast DHCP app at `dhcp_host`.
pub fn unicast_dhcp_config(topology: &Topology, dhcp_host: &str) -> Result<Value, NetError> {
    let location = server_location(topology, dhcp_host)?;
    Ok(json!({
        "apps": {
            UNICAST_DHCP_APP: {
                UNICAST_DHCP_CONFIG_KEY: {
                    "serverLocation": location,
                }
            }
        }
    }))
}
