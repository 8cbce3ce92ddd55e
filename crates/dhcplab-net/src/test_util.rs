use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicU32, Ordering};

use crate::exec;

/// Monotonically increasing counter for generating unique test resource names.
static TEST_COUNTER: AtomicU32 = AtomicU32::new(0);

/// Check whether we have sufficient privileges (root/sudo) and tools (`ip`)
/// available to create network namespaces. Returns `false` if the test
/// environment cannot support namespace-based tests.
pub fn check_privileges() -> bool {
    let listed = match Command::new("ip").arg("netns").output() {
        Ok(o) => o.status.success(),
        Err(_) => false,
    };
    // never let sudo prompt for a password inside a test run
    listed && (exec::is_root() || succeeds(Command::new("sudo").args(["-n", "true"])))
}

/// Check whether Open vSwitch is installed and its database is reachable.
pub fn check_ovs() -> bool {
    succeeds(exec::privileged("ovs-vsctl").arg("show"))
}

/// Check whether an executable exists at `path`.
pub fn check_binary(path: &Path) -> bool {
    path.is_file()
}

/// Check whether `program` can be found on `PATH`.
pub fn check_program(program: &str) -> bool {
    std::env::var_os("PATH")
        .map(|paths| std::env::split_paths(&paths).any(|dir| dir.join(program).is_file()))
        .unwrap_or(false)
}

fn succeeds(cmd: &mut Command) -> bool {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Generates a unique namespace name with the given prefix.
///
/// Combines the prefix, process ID, and an atomic counter to avoid
/// collisions when tests run in parallel. Names are truncated to 15
/// characters to respect the Linux interface name limit.
pub fn unique_ns_name(prefix: &str) -> String {
    let seq = TEST_COUNTER.fetch_add(1, Ordering::Relaxed);
    let pid = std::process::id();
    // Truncate to 15 chars (Linux netns name limit)
    let name = format!("{}_{:x}_{}", prefix, pid % 0xFFFF, seq);
    if name.len() > 15 {
        name[..15].to_string()
    } else {
        name
    }
}
