//! Scenario configuration, read from an optional TOML file.
//!
//! Every field is optional; a missing file or section resolves to the
//! lab defaults (controller on `127.0.0.1:6653` speaking OpenFlow 1.4,
//! `dhcpd` on `h5`).

use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::controller::{
    RemoteController, DEFAULT_CONTROLLER_IP, DEFAULT_CONTROLLER_NAME, DEFAULT_CONTROLLER_PORT,
    DEFAULT_PROTOCOL,
};
use crate::dhcp::{
    DhcpServerConfig, DEFAULT_CONFIG_FILE, DEFAULT_DHCP_BINARY, DEFAULT_DHCP_HOST,
    DEFAULT_PID_FILE,
};
use crate::error::NetError;
use crate::topology::OpenFlowVersion;

pub const CONFIG_VERSION: u32 = 1;
pub const DEFAULT_NAMESPACE_PREFIX: &str = "dl-";
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Linux caps interface and namespace names at 15 bytes; keep room for the
/// host name behind the prefix.
const MAX_NAMESPACE_PREFIX_LEN: usize = 8;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ScenarioConfigInput {
    pub version: u32,
    pub namespace_prefix: Option<String>,
    pub controller: ControllerConfigInput,
    pub dhcp: DhcpConfigInput,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ControllerConfigInput {
    pub name: Option<String>,
    pub ip: Option<IpAddr>,
    pub port: Option<u16>,
    pub protocol: Option<String>,
    pub connect_timeout_ms: Option<u64>,
    pub require_connection: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DhcpConfigInput {
    pub host: Option<String>,
    pub binary: Option<PathBuf>,
    pub pid_file: Option<PathBuf>,
    pub config_file: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerConfig {
    pub remote: RemoteController,
    /// Upper bound on waiting for switches to report a connection.
    pub connect_timeout: Duration,
    /// Abort the scenario when the wait times out instead of warning.
    pub require_connection: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScenarioConfig {
    pub version: u32,
    pub namespace_prefix: String,
    pub controller: ControllerConfig,
    pub dhcp: DhcpServerConfig,
}

impl ScenarioConfig {
    /// Defaults for a scenario living in `scenario_dir`.
    pub fn defaults(scenario_dir: &Path) -> Self {
        Self {
            version: CONFIG_VERSION,
            namespace_prefix: DEFAULT_NAMESPACE_PREFIX.to_string(),
            controller: ControllerConfig {
                remote: RemoteController::default(),
                connect_timeout: DEFAULT_CONNECT_TIMEOUT,
                require_connection: false,
            },
            dhcp: DhcpServerConfig::with_scenario_dir(scenario_dir),
        }
    }

    /// Reads and resolves a TOML file. Relative paths inside it are taken
    /// relative to the file's directory.
    pub fn load(path: &Path) -> Result<Self, NetError> {
        let raw = std::fs::read_to_string(path)?;
        let input: ScenarioConfigInput = toml::from_str(&raw)?;
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        input.resolve(dir)
    }
}

impl ScenarioConfigInput {
    pub fn resolve(self, scenario_dir: &Path) -> Result<ScenarioConfig, NetError> {
        let version = if self.version == 0 {
            CONFIG_VERSION
        } else {
            self.version
        };
        if version != CONFIG_VERSION {
            return Err(NetError::Config(format!(
                "unsupported config version {version}"
            )));
        }

        let namespace_prefix = self
            .namespace_prefix
            .unwrap_or_else(|| DEFAULT_NAMESPACE_PREFIX.to_string());
        if namespace_prefix.len() > MAX_NAMESPACE_PREFIX_LEN
            || namespace_prefix.contains(|c: char| c.is_whitespace() || c == '/')
        {
            return Err(NetError::Config(format!(
                "namespace_prefix `{namespace_prefix}` must be at most {MAX_NAMESPACE_PREFIX_LEN} bytes without whitespace or `/`"
            )));
        }

        let ctl = self.controller;
        let protocol = match ctl.protocol {
            Some(p) => p.parse::<OpenFlowVersion>()?,
            None => DEFAULT_PROTOCOL,
        };
        let port = ctl.port.unwrap_or(DEFAULT_CONTROLLER_PORT);
        if port == 0 {
            return Err(NetError::Config("controller port must be non-zero".into()));
        }
        let controller = ControllerConfig {
            remote: RemoteController {
                name: non_empty(ctl.name).unwrap_or_else(|| DEFAULT_CONTROLLER_NAME.to_string()),
                addr: SocketAddr::new(ctl.ip.unwrap_or(DEFAULT_CONTROLLER_IP), port),
                protocol,
            },
            connect_timeout: ctl
                .connect_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_CONNECT_TIMEOUT),
            require_connection: ctl.require_connection.unwrap_or(false),
        };

        let dhcp_in = self.dhcp;
        let config_file = dhcp_in
            .config_file
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
        let dhcp = DhcpServerConfig {
            host: non_empty(dhcp_in.host).unwrap_or_else(|| DEFAULT_DHCP_HOST.to_string()),
            binary: dhcp_in
                .binary
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DHCP_BINARY)),
            pid_file: dhcp_in
                .pid_file
                .unwrap_or_else(|| PathBuf::from(DEFAULT_PID_FILE)),
            config_file: if config_file.is_absolute() {
                config_file
            } else {
                scenario_dir.join(config_file)
            },
        };

        Ok(ScenarioConfig {
            version,
            namespace_prefix,
            controller,
            dhcp,
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
