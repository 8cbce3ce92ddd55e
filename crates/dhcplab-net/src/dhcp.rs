//! DHCP daemon control inside an emulated host.
//!
//! The daemon (ISC `dhcpd`) is started inside the host's namespace and
//! detaches on its own; from then on it is located only through its PID
//! file. Stopping it is best effort.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::{Duration, Instant};

use crate::error::NetError;
use crate::exec;
use crate::network::HostNode;

pub const DEFAULT_DHCP_HOST: &str = "h5";
pub const DEFAULT_DHCP_BINARY: &str = "/usr/sbin/dhcpd";
pub const DEFAULT_PID_FILE: &str = "/run/dhcp-server-dhcpd.pid";
pub const DEFAULT_CONFIG_FILE: &str = "dhcpd.conf";

/// How long [`DhcpServer::stop`] waits for the killed process to vanish.
const KILL_GRACE: Duration = Duration::from_secs(1);
/// How long [`DhcpServer::launch`] waits for the detached daemon to record
/// its PID.
const PID_FILE_WAIT: Duration = Duration::from_secs(3);

/// Where and how to run the DHCP daemon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DhcpServerConfig {
    /// Name of the emulated host the daemon runs on.
    pub host: String,
    pub binary: PathBuf,
    pub pid_file: PathBuf,
    pub config_file: PathBuf,
}

impl DhcpServerConfig {
    /// Defaults, with the daemon configuration file inside `scenario_dir`.
    pub fn with_scenario_dir(scenario_dir: &Path) -> Self {
        Self {
            host: DEFAULT_DHCP_HOST.to_string(),
            binary: PathBuf::from(DEFAULT_DHCP_BINARY),
            pid_file: PathBuf::from(DEFAULT_PID_FILE),
            config_file: scenario_dir.join(DEFAULT_CONFIG_FILE),
        }
    }

    /// `<binary> 4 -pf <pid_file> -cf <config_file> <intf>`
    pub fn command_line(&self, intf: &str) -> Vec<String> {
        vec![
            self.binary.display().to_string(),
            "4".to_string(),
            "-pf".to_string(),
            self.pid_file.display().to_string(),
            "-cf".to_string(),
            self.config_file.display().to_string(),
            intf.to_string(),
        ]
    }
}

/// A DHCP daemon launched on an emulated host.
///
/// Killed on [`DhcpServer::stop`], or on drop if it was never stopped.
#[derive(Debug)]
pub struct DhcpServer {
    host: String,
    pid_file: PathBuf,
    command_line: Vec<String>,
    stopped: bool,
}

/// What [`DhcpServer::stop`] observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// The recorded process was signalled and is gone.
    Killed(u32),
    /// The process was signalled but was still visible after the grace period.
    Lingering(u32),
    /// No readable PID file; nothing was signalled.
    NoPidFile,
}

/// A DHCP daemon invocation resolved against a host, not yet started.
///
/// Owns everything it needs, so [`DhcpLaunch::start`] can run on a blocking
/// thread away from the network it was prepared from.
#[derive(Debug)]
pub struct DhcpLaunch {
    host: String,
    pid_file: PathBuf,
    command_line: Vec<String>,
    command: Command,
    what: String,
}

impl DhcpLaunch {
    pub fn command_line(&self) -> &[String] {
        &self.command_line
    }

    /// Runs the daemon and waits for it to record its PID. Blocks.
    ///
    /// Fails if the binary cannot be run or exits non-zero during startup.
    pub fn start(mut self) -> Result<DhcpServer, NetError> {
        // a stale file would point teardown at an unrelated process
        let pid_file = self.pid_file.display().to_string();
        if let Err(e) = std::fs::remove_file(&self.pid_file) {
            if e.kind() == std::io::ErrorKind::PermissionDenied {
                exec::run_quiet(exec::privileged("rm").args(["-f", &pid_file]));
            }
        }

        exec::run_checked(&mut self.command, &self.what)?;

        let deadline = Instant::now() + PID_FILE_WAIT;
        loop {
            if let Some(pid) = read_pid_file(&self.pid_file) {
                tracing::info!(host = %self.host, pid, "DHCP server running");
                break;
            }
            if Instant::now() >= deadline {
                tracing::warn!(
                    host = %self.host,
                    pid_file = %pid_file,
                    "DHCP server has not written its PID file"
                );
                break;
            }
            std::thread::sleep(Duration::from_millis(50));
        }

        Ok(DhcpServer {
            host: self.host,
            pid_file: self.pid_file,
            command_line: self.command_line,
            stopped: false,
        })
    }
}

impl DhcpServer {
    /// Resolves the daemon invocation for `host`'s default interface.
    ///
    /// Fails if the host has no interface.
    pub fn prepare(config: &DhcpServerConfig, host: &HostNode) -> Result<DhcpLaunch, NetError> {
        let intf = host
            .default_intf()
            .ok_or_else(|| NetError::NoInterface(host.name().to_string()))?;
        let command_line = config.command_line(intf);

        tracing::info!(
            host = host.name(),
            intf,
            command = %command_line.join(" "),
            "launching DHCP server"
        );

        let (program, args) = command_line
            .split_first()
            .ok_or_else(|| NetError::Config("empty DHCP command line".into()))?;
        let mut command = host.namespace.command(program);
        command.args(args);
        let what = format!("run `{}` in {}", command_line.join(" "), host.namespace.name);

        Ok(DhcpLaunch {
            host: host.name().to_string(),
            pid_file: config.pid_file.clone(),
            command_line,
            command,
            what,
        })
    }

    /// Starts the daemon on `host`'s default interface. Blocks until it has
    /// detached.
    pub fn launch(config: &DhcpServerConfig, host: &HostNode) -> Result<Self, NetError> {
        Self::prepare(config, host)?.start()
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn command_line(&self) -> &[String] {
        &self.command_line
    }

    pub fn pid_file(&self) -> &Path {
        &self.pid_file
    }

    /// PID recorded in the PID file, if it can be read.
    pub fn pid(&self) -> Option<u32> {
        read_pid_file(&self.pid_file)
    }

    /// Sends SIGKILL to the recorded PID and waits briefly for it to go.
    ///
    /// Never fails: a missing PID file or an already-dead process is only
    /// logged.
    pub fn stop(mut self) -> StopOutcome {
        self.stopped = true;
        kill_recorded(&self.host, &self.pid_file)
    }
}

impl Drop for DhcpServer {
    fn drop(&mut self) {
        if !self.stopped {
            kill_recorded(&self.host, &self.pid_file);
        }
    }
}

fn kill_recorded(host: &str, pid_file: &Path) -> StopOutcome {
    let Some(pid) = read_pid_file(pid_file) else {
        tracing::warn!(host, pid_file = %pid_file.display(), "no DHCP PID file, nothing to kill");
        return StopOutcome::NoPidFile;
    };

    kill(pid);

    let deadline = Instant::now() + KILL_GRACE;
    while pid_alive(pid) {
        if Instant::now() >= deadline {
            tracing::warn!(host, pid, "DHCP server still present after SIGKILL");
            return StopOutcome::Lingering(pid);
        }
        std::thread::sleep(Duration::from_millis(20));
    }

    tracing::info!(host, pid, "DHCP server killed");
    StopOutcome::Killed(pid)
}

/// Sends SIGKILL to `pid`, ignoring any failure.
///
/// Falls back to a privileged `kill -9` when the daemon belongs to root and
/// we do not.
fn kill(pid: u32) {
    // zero and negative values address process groups, never a single daemon
    let Some(target) = signal_target(pid) else {
        tracing::warn!(pid, "refusing to signal out-of-range pid");
        return;
    };
    // SAFETY: kill has no memory-safety preconditions; a stale pid at
    // worst yields ESRCH, which is ignored.
    let rc = unsafe { libc::kill(target, libc::SIGKILL) };
    if rc != 0
        && std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
        && !exec::is_root()
    {
        exec::run_quiet(exec::privileged("kill").args(["-9", &pid.to_string()]));
    }
}

/// Converts `pid` to a `pid_t` naming exactly one process other than init.
fn signal_target(pid: u32) -> Option<libc::pid_t> {
    libc::pid_t::try_from(pid).ok().filter(|p| *p > 1)
}

/// Reads a PID file holding a single decimal process id.
///
/// Anything that is not a single process other than init (`0`, `1`,
/// negative or beyond `pid_t`) is treated as unreadable.
pub fn read_pid_file(path: &Path) -> Option<u32> {
    let raw = std::fs::read_to_string(path).ok()?;
    let pid: u32 = raw.lines().next()?.trim().parse().ok()?;
    signal_target(pid).map(|_| pid)
}

/// Whether a process with `pid` exists.
pub fn pid_alive(pid: u32) -> bool {
    Path::new("/proc").join(pid.to_string()).exists()
}
