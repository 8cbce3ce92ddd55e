//! DHCP lab scenario.
//!
//! Brings up the lab topology under a remote OpenFlow controller, runs a
//! DHCP server on `h5`, hands the operator an interactive console and tears
//! everything down again when the console exits.

pub mod runner;
pub mod session;
