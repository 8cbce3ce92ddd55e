use crate::error::NetError;
use crate::exec;

/// A veth pair created in the root namespace.
///
/// Either end may later be moved into a namespace or enslaved to a bridge.
/// Dropping the pair deletes whichever end is still visible from the root
/// namespace, which removes both; ends inside a namespace go away with it.
#[derive(Debug)]
pub struct VethPair {
    pub a: String,
    pub b: String,
}

impl VethPair {
    pub fn create(a: &str, b: &str) -> Result<Self, NetError> {
        // Clean up potential leftovers in the root namespace
        exec::run_quiet(exec::privileged("ip").args(["link", "del", a]));
        exec::run_quiet(exec::privileged("ip").args(["link", "del", b]));

        exec::run_checked(
            exec::privileged("ip").args(["link", "add", a, "type", "veth", "peer", "name", b]),
            &format!("create veth pair {a} <-> {b}"),
        )?;

        tracing::debug!(a, b, "veth pair created");
        Ok(Self {
            a: a.to_string(),
            b: b.to_string(),
        })
    }
}

/// Brings `intf` up in the root namespace.
pub fn set_up(intf: &str) -> Result<(), NetError> {
    exec::run_checked(
        exec::privileged("ip").args(["link", "set", intf, "up"]),
        &format!("set {intf} up"),
    )?;
    Ok(())
}

/// Whether `intf` exists in the root namespace.
pub fn exists(intf: &str) -> bool {
    std::path::Path::new("/sys/class/net").join(intf).exists()
}

impl Drop for VethPair {
    fn drop(&mut self) {
        exec::run_quiet(exec::privileged("ip").args(["link", "del", &self.a]));
        exec::run_quiet(exec::privileged("ip").args(["link", "del", &self.b]));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{check_privileges, unique_ns_name};

    #[test]
    fn test_veth_pair_lifecycle() {
        if !check_privileges() {
            eprintln!("Skipping test, insufficient privileges or missing tools");
            return;
        }

        let a = unique_ns_name("vla");
        let b = unique_ns_name("vlb");
        {
            let _pair = VethPair::create(&a, &b).expect("Failed to create veth pair");
            assert!(exists(&a));
            assert!(exists(&b));
            set_up(&a).expect("Failed to set up");
        }
        assert!(!exists(&a));
        assert!(!exists(&b));
    }
}
