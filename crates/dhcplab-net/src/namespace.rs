use std::process::{Command, Output};

use crate::error::NetError;
use crate::exec;

/// A Linux network namespace managed via `ip netns`.
///
/// Creates the namespace on construction, initializes loopback, and
/// deletes the namespace on drop. Deleting the namespace also destroys
/// every interface that was moved into it.
#[derive(Debug)]
pub struct Namespace {
    pub name: String,
}

impl Namespace {
    pub fn new(name: &str) -> Result<Self, NetError> {
        // cleanup any leftover namespace with the same name
        exec::run_quiet(exec::privileged("ip").args(["netns", "del", name]));

        exec::run_checked(
            exec::privileged("ip").args(["netns", "add", name]),
            &format!("create netns {name}"),
        )?;

        let ns = Self {
            name: name.to_string(),
        };
        ns.exec_checked("ip", &["link", "set", "lo", "up"])?;
        tracing::debug!(netns = %ns.name, "namespace created");
        Ok(ns)
    }

    /// A command that runs `program` inside this namespace.
    pub fn command(&self, program: &str) -> Command {
        let mut cmd = exec::privileged("ip");
        cmd.args(["netns", "exec", &self.name, program]);
        cmd
    }

    pub fn exec(&self, program: &str, args: &[&str]) -> Result<Output, std::io::Error> {
        self.command(program).args(args).output()
    }

    /// Like [`Namespace::exec`], but a non-zero exit status is an error.
    pub fn exec_checked(&self, program: &str, args: &[&str]) -> Result<Output, NetError> {
        let what = format!("run `{} {}` in {}", program, args.join(" "), self.name);
        exec::run_checked(self.command(program).args(args), &what)
    }

    /// Moves `intf` from the root namespace into this one.
    pub fn adopt(&self, intf: &str) -> Result<(), NetError> {
        exec::run_checked(
            exec::privileged("ip").args(["link", "set", intf, "netns", &self.name]),
            &format!("move {intf} into {}", self.name),
        )?;
        Ok(())
    }

    /// Whether a namespace called `name` currently exists.
    pub fn exists(name: &str) -> bool {
        match Command::new("ip").args(["netns", "list"]).output() {
            Ok(out) => String::from_utf8_lossy(&out.stdout)
                .lines()
                .filter_map(|line| line.split_whitespace().next())
                .any(|n| n == name),
            Err(_) => false,
        }
    }
}

impl Drop for Namespace {
    fn drop(&mut self) {
        exec::run_quiet(exec::privileged("ip").args(["netns", "del", &self.name]));
        tracing::debug!(netns = %self.name, "namespace deleted");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::VethPair;
    use crate::test_util::{check_privileges, check_program, unique_ns_name};

    #[test]
    fn test_create_namespace() {
        if !check_privileges() {
            eprintln!("Skipping test, insufficient privileges or missing tools");
            return;
        }

        let name = unique_ns_name("dl_ns");
        {
            let ns = Namespace::new(&name).expect("Failed to create ns");
            assert!(Namespace::exists(&name));

            let out = ns.exec("ip", &["link"]).expect("Failed to exec ip link");
            assert!(String::from_utf8_lossy(&out.stdout).contains("lo"));
        }
        assert!(!Namespace::exists(&name));
    }

    #[test]
    fn test_adopt_and_ping() {
        if !check_privileges() {
            eprintln!("Skipping test, insufficient privileges or missing tools");
            return;
        }
        if !check_program("ping") {
            eprintln!("Skipping test_adopt_and_ping, ping not installed");
            return;
        }

        let ns1 = Namespace::new(&unique_ns_name("dl_pa")).expect("Failed to create ns1");
        let ns2 = Namespace::new(&unique_ns_name("dl_pb")).expect("Failed to create ns2");

        // Interface name limit is 15 chars.
        let a = unique_ns_name("va");
        let b = unique_ns_name("vb");
        let _pair = VethPair::create(&a, &b).expect("Failed to create veth pair");
        ns1.adopt(&a).expect("Failed to move a");
        ns2.adopt(&b).expect("Failed to move b");

        ns1.exec_checked("ip", &["addr", "add", "10.200.1.1/24", "dev", &a])
            .unwrap();
        ns1.exec_checked("ip", &["link", "set", &a, "up"]).unwrap();
        ns2.exec_checked("ip", &["addr", "add", "10.200.1.2/24", "dev", &b])
            .unwrap();
        ns2.exec_checked("ip", &["link", "set", &b, "up"]).unwrap();

        let out = ns1
            .exec("ping", &["-c", "1", "-W", "1", "10.200.1.2"])
            .expect("Failed to exec ping");

        if !out.status.success() {
            panic!(
                "Ping failed:\nStdout: {}\nStderr: {}",
                String::from_utf8_lossy(&out.stdout),
                String::from_utf8_lossy(&out.stderr)
            );
        }
    }

    #[test]
    fn exec_checked_surfaces_failure() {
        if !check_privileges() {
            eprintln!("Skipping test, insufficient privileges or missing tools");
            return;
        }

        let ns = Namespace::new(&unique_ns_name("dl_fail")).expect("Failed to create ns");
        let err = ns
            .exec_checked("ip", &["link", "set", "does-not-exist", "up"])
            .unwrap_err();
        assert!(matches!(err, NetError::Command { .. }));
    }
}
