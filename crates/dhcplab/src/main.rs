//! DHCP lab
//!
//! Emulates five hosts behind three OpenFlow 1.4 switches in a line,
//! attached to a remote controller on 127.0.0.1:6653, with `dhcpd` running
//! on h5 for the lifetime of the session.
//!
//! Requires root (or passwordless sudo), iproute2, Open vSwitch and ISC dhcpd.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use dhcplab::runner::{load_config, Scenario};
use dhcplab::session::Console;
use dhcplab_net::netcfg;
use dhcplab_net::topology::Topology;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "dhcplab", about = "DHCP lab network scenario")]
struct Cli {
    /// Scenario config file (TOML). Relative paths in it, and the DHCP
    /// config file by default, resolve against its directory.
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Default)]
enum Command {
    /// Start the network and DHCP server, then open the console (default).
    #[default]
    Run,
    /// Print the topology without starting anything.
    Show,
    /// Print the controller netcfg locating the DHCP server.
    Netcfg,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .compact()
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    let protocol = config.controller.remote.protocol;
    match cli.command.unwrap_or_default() {
        Command::Run => {
            tracing::info!(
                controller = %config.controller.remote.target(),
                protocol = %config.controller.remote.protocol,
                dhcp_host = %config.dhcp.host,
                dhcp_config = %config.dhcp.config_file.display(),
                "dhcplab starting"
            );
            Scenario::new(config)?.run(Console::stdio()).await?;
            tracing::info!("dhcplab stopped");
        }
        Command::Show => print_topology(&Topology::scenario_with_protocol(protocol)?),
        Command::Netcfg => {
            let topology = Topology::scenario_with_protocol(protocol)?;
            let doc = netcfg::unicast_dhcp_config(&topology, &config.dhcp.host)?;
            println!("{}", serde_json::to_string_pretty(&doc)?);
        }
    }

    Ok(())
}

fn print_topology(topology: &Topology) {
    println!("hosts:");
    for host in topology.hosts() {
        let ip = host
            .ip
            .map(|ip| ip.to_string())
            .unwrap_or_else(|| "unset".into());
        println!("  {:<4} ip={:<14} mac={}", host.name, ip, host.mac);
    }
    println!("switches:");
    for switch in topology.switches() {
        println!(
            "  {:<4} dpid={} protocols={} datapath={}",
            switch.name,
            switch.dpid_hex(),
            switch.protocol,
            switch.datapath.as_ovs_type()
        );
    }
    println!("links:");
    for (link, pa, pb) in topology.numbered_links() {
        println!("  {}[{}] <-> {}[{}]", link.a, pa, link.b, pb);
    }
}
