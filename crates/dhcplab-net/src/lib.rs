//! Network emulation toolkit for the DHCP lab scenario.
//!
//! Realises a declared topology on Linux primitives: hosts become network
//! namespaces, switches become Open vSwitch bridges bound to a remote
//! OpenFlow controller, and links become veth pairs (optionally shaped with
//! `tc netem`). Also provides control of the DHCP daemon that runs inside
//! one emulated host, scenario configuration loading, and export of the
//! controller-side network configuration.

pub mod addr;
pub mod config;
pub mod controller;
pub mod dhcp;
pub mod error;
pub mod exec;
pub mod link;
pub mod namespace;
pub mod netcfg;
pub mod network;
pub mod shaping;
pub mod switch;
pub mod topology;

pub mod test_util;

pub use error::NetError;
