use crate::error::NetError;
use crate::exec;
use crate::namespace::Namespace;

/// Traffic shaping parameters for one link, applied via `tc netem`.
///
/// All fields are optional; only non-`None` parameters are passed to netem.
/// A link without shaping carries no qdisc at all.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LinkShaping {
    pub delay_ms: Option<u32>,
    pub jitter_ms: Option<u32>,
    pub loss_percent: Option<f32>,
    pub rate_kbit: Option<u64>,
    /// netem queue `limit` in packets.
    pub queue_limit: Option<u32>,
}

impl LinkShaping {
    pub fn is_empty(&self) -> bool {
        self.delay_ms.is_none()
            && self.loss_percent.is_none()
            && self.rate_kbit.is_none()
            && self.queue_limit.is_none()
    }
}

/// Installs netem on `interface`, inside `ns` or in the root namespace when
/// `ns` is `None`.
///
/// Any existing root qdisc is removed first, so applying an empty
/// [`LinkShaping`] clears previous shaping.
pub fn apply_shaping(
    ns: Option<&Namespace>,
    interface: &str,
    shaping: &LinkShaping,
) -> Result<(), NetError> {
    let tc = |args: &[String]| match ns {
        Some(ns) => {
            let mut cmd = ns.command("tc");
            cmd.args(args);
            cmd
        }
        None => {
            let mut cmd = exec::privileged("tc");
            cmd.args(args);
            cmd
        }
    };

    let del: Vec<String> = ["qdisc", "del", "dev", interface, "root"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    exec::run_quiet(&mut tc(&del));

    if shaping.is_empty() {
        return Ok(());
    }

    let args = netem_args(interface, shaping);
    exec::run_checked(&mut tc(&args), &format!("apply tc netem on {interface}"))?;
    tracing::debug!(interface, args = %args.join(" "), "netem applied");
    Ok(())
}

/// Builds `qdisc add dev <iface> root netem ...` for [`apply_shaping`].
fn netem_args(interface: &str, shaping: &LinkShaping) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "qdisc".into(),
        "add".into(),
        "dev".into(),
        interface.into(),
        "root".into(),
        "netem".into(),
    ];

    if let Some(limit) = shaping.queue_limit {
        args.push("limit".into());
        args.push(limit.to_string());
    }

    if let Some(delay) = shaping.delay_ms {
        args.push("delay".into());
        args.push(format!("{}ms", delay));

        if let Some(jitter) = shaping.jitter_ms.filter(|j| *j > 0) {
            args.push(format!("{}ms", jitter));
        }
    }

    if let Some(loss) = shaping.loss_percent {
        args.push("loss".into());
        args.push(format!("{}%", loss));
    }

    if let Some(rate) = shaping.rate_kbit {
        args.push("rate".into());
        args.push(format!("{}kbit", rate));
    }

    args
}
