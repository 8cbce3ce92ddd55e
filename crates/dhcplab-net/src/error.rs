use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

use crate::addr::MacAddr;

// ── Errors ──────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum NetError {
    #[error("duplicate node name `{0}`")]
    DuplicateNode(String),
    #[error("MAC address {mac} is used by both `{first}` and `{second}`")]
    DuplicateMac {
        mac: MacAddr,
        first: String,
        second: String,
    },
    #[error("datapath id {dpid:016x} is used by both `{first}` and `{second}`")]
    DuplicateDpid {
        dpid: u64,
        first: String,
        second: String,
    },
    #[error("link {a} <-> {b} references undeclared node `{missing}`")]
    UnknownEndpoint {
        a: String,
        b: String,
        missing: String,
    },
    #[error("invalid link {a} <-> {b}: {reason}")]
    InvalidLink {
        a: String,
        b: String,
        reason: &'static str,
    },
    #[error("invalid MAC address `{0}`")]
    InvalidMac(String),
    #[error("invalid host address `{0}`")]
    InvalidAddress(String),
    #[error("unknown OpenFlow protocol `{0}`")]
    UnknownProtocol(String),
    #[error("no node named `{0}`")]
    UnknownNode(String),
    #[error("host `{0}` has no network interface")]
    NoInterface(String),

    #[error("failed to {what}: {stderr}")]
    Command { what: String, stderr: String },
    #[error("failed to run `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("controller at {addr} is unreachable: {source}")]
    ControllerUnreachable {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("switches {pending:?} did not connect to the controller within {timeout:?}")]
    ControllerTimeout {
        pending: Vec<String>,
        timeout: Duration,
    },

    #[error("invalid scenario config: {0}")]
    Config(String),
    #[error("failed to parse scenario config: {0}")]
    ConfigParse(#[from] toml::de::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl NetError {
    /// Whether the error comes from the declared data rather than from the
    /// environment the scenario runs in.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            NetError::DuplicateNode(_)
                | NetError::DuplicateMac { .. }
                | NetError::DuplicateDpid { .. }
                | NetError::UnknownEndpoint { .. }
                | NetError::InvalidLink { .. }
                | NetError::InvalidMac(_)
                | NetError::InvalidAddress(_)
                | NetError::UnknownProtocol(_)
                | NetError::Config(_)
                | NetError::ConfigParse(_)
        )
    }
}
