//! Helpers for running the privileged system tools (`ip`, `tc`,
//! `ovs-vsctl`, `kill`) the emulation is built on.

use std::process::{Command, Output};

use crate::error::NetError;

/// Whether the current process runs with an effective uid of 0.
pub fn is_root() -> bool {
    // SAFETY: geteuid has no preconditions and cannot fail.
    unsafe { libc::geteuid() == 0 }
}

/// Builds a command for `program` that runs with root privileges.
///
/// Runs the program directly when already root, through `sudo` otherwise.
pub fn privileged(program: &str) -> Command {
    if is_root() {
        Command::new(program)
    } else {
        let mut cmd = Command::new("sudo");
        cmd.arg(program);
        cmd
    }
}

/// Runs `cmd` to completion and turns a non-zero exit into
/// [`NetError::Command`], with `what` describing the attempted action.
pub fn run_checked(cmd: &mut Command, what: &str) -> Result<Output, NetError> {
    let output = cmd.output().map_err(|source| NetError::Spawn {
        program: program_name(cmd),
        source,
    })?;

    if !output.status.success() {
        return Err(NetError::Command {
            what: what.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    Ok(output)
}

/// Runs `cmd` and ignores both the outcome and the output.
///
/// Used for cleanup of resources that may or may not exist.
pub fn run_quiet(cmd: &mut Command) {
    let _ = cmd.output();
}

/// Renders the program and arguments of `cmd` for log lines and errors.
pub fn program_name(cmd: &Command) -> String {
    std::iter::once(cmd.get_program())
        .chain(cmd.get_args())
        .map(|s| s.to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join(" ")
}
