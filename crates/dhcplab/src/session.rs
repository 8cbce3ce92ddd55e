//! Interactive operator console over a running network.
//!
//! The console blocks on its input until the operator types `exit` / `quit`
//! or closes the stream. Lines starting with a node name run the rest of the
//! line through `sh -c` on that node (inside the namespace for hosts).

use std::io::{BufRead, BufReader, Stdin, Stdout, Write};

use anyhow::Context;
use dhcplab_net::network::NetworkView;
use dhcplab_net::topology::{intf_name, Topology};

const HELP: &str = "\
Documented commands:
  help          show this text
  nodes         list nodes
  net           list links per node
  links         list links with interface names
  dump          show node details
  exit | quit   leave the console and tear the network down

  <node> <cmd>  run a shell command on a node, e.g. `h5 ip addr`
";

/// Something that occupies the operator while the network is up.
///
/// Runs on a dedicated thread; returning ends the scenario.
pub trait Session: Send + 'static {
    fn run(self, view: NetworkView) -> anyhow::Result<()>;
}

impl<F> Session for F
where
    F: FnOnce(NetworkView) -> anyhow::Result<()> + Send + 'static,
{
    fn run(self, view: NetworkView) -> anyhow::Result<()> {
        self(view)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Empty,
    Help,
    Nodes,
    Net,
    Links,
    Dump,
    Exit,
    Run { node: String, command_line: String },
    MissingCommand(String),
    Unknown(String),
}

/// Interprets one input line against the nodes of `topology`.
pub fn parse_command(line: &str, topology: &Topology) -> ConsoleCommand {
    let line = line.trim();
    let (first, rest) = match line.split_once(char::is_whitespace) {
        Some((first, rest)) => (first, rest.trim()),
        None => (line, ""),
    };

    match first {
        "" => ConsoleCommand::Empty,
        "help" | "?" => ConsoleCommand::Help,
        "nodes" => ConsoleCommand::Nodes,
        "net" => ConsoleCommand::Net,
        "links" => ConsoleCommand::Links,
        "dump" => ConsoleCommand::Dump,
        "exit" | "quit" => ConsoleCommand::Exit,
        node if topology.kind(node).is_some() => {
            if rest.is_empty() {
                ConsoleCommand::MissingCommand(node.to_string())
            } else {
                ConsoleCommand::Run {
                    node: node.to_string(),
                    command_line: rest.to_string(),
                }
            }
        }
        _ => ConsoleCommand::Unknown(line.to_string()),
    }
}

/// Line-oriented console reading from `R` and writing to `W`.
pub struct Console<R, W> {
    input: R,
    output: W,
    prompt: String,
}

/// Console on the process's terminal.
pub type StdioConsole = Console<BufReader<Stdin>, Stdout>;

impl StdioConsole {
    /// Console on the process's terminal.
    pub fn stdio() -> Self {
        Console::new(BufReader::new(std::io::stdin()), std::io::stdout())
    }
}

impl<R: BufRead, W: Write> Console<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self {
            input,
            output,
            prompt: "dhcplab> ".to_string(),
        }
    }

    pub fn into_output(self) -> W {
        self.output
    }

    /// Reads and executes commands until exit or end of input.
    pub fn serve(&mut self, view: &NetworkView) -> anyhow::Result<()> {
        let mut line = String::new();
        loop {
            write!(self.output, "{}", self.prompt)?;
            self.output.flush()?;

            line.clear();
            if self.input.read_line(&mut line).context("reading console input")? == 0 {
                writeln!(self.output)?;
                return Ok(());
            }

            match parse_command(&line, &view.topology) {
                ConsoleCommand::Empty => {}
                ConsoleCommand::Exit => return Ok(()),
                ConsoleCommand::Help => write!(self.output, "{HELP}")?,
                ConsoleCommand::Nodes => self.nodes(&view.topology)?,
                ConsoleCommand::Net => self.net(&view.topology)?,
                ConsoleCommand::Links => self.links(&view.topology)?,
                ConsoleCommand::Dump => self.dump(view)?,
                ConsoleCommand::Run { node, command_line } => {
                    self.run_on(view, &node, &command_line)?
                }
                ConsoleCommand::MissingCommand(node) => {
                    writeln!(self.output, "*** Enter a command for node: {node} <cmd>")?
                }
                ConsoleCommand::Unknown(text) => {
                    writeln!(self.output, "*** Unknown command: {text}")?
                }
            }
        }
    }

    fn nodes(&mut self, topo: &Topology) -> anyhow::Result<()> {
        let names: Vec<&str> = topo.node_names().collect();
        writeln!(self.output, "available nodes are:")?;
        writeln!(self.output, "{}", names.join(" "))?;
        Ok(())
    }

    fn net(&mut self, topo: &Topology) -> anyhow::Result<()> {
        for name in topo.node_names() {
            let ports: Vec<String> = topo
                .ports(name)
                .iter()
                .map(|p| format!("{}:{}", p.intf(), p.peer_intf()))
                .collect();
            writeln!(self.output, "{} {}", name, ports.join(" "))?;
        }
        Ok(())
    }

    fn links(&mut self, topo: &Topology) -> anyhow::Result<()> {
        for (link, pa, pb) in topo.numbered_links() {
            writeln!(
                self.output,
                "{}<->{}",
                intf_name(&link.a, pa),
                intf_name(&link.b, pb)
            )?;
        }
        Ok(())
    }

    fn dump(&mut self, view: &NetworkView) -> anyhow::Result<()> {
        let topo = &view.topology;
        for host in topo.hosts() {
            let ns = view
                .namespaces
                .get(&host.name)
                .map(String::as_str)
                .unwrap_or("-");
            let ip = host
                .ip
                .map(|ip| ip.to_string())
                .unwrap_or_else(|| "unset".to_string());
            let intf = topo
                .ports(&host.name)
                .first()
                .map(|p| p.intf())
                .unwrap_or_else(|| "-".to_string());
            writeln!(
                self.output,
                "<Host {}: netns={} {} ip={} mac={}>",
                host.name, ns, intf, ip, host.mac
            )?;
        }
        for switch in topo.switches() {
            writeln!(
                self.output,
                "<OVSSwitch {}: dpid={} protocols={} datapath={}>",
                switch.name,
                switch.dpid_hex(),
                switch.protocol,
                switch.datapath.as_ovs_type()
            )?;
        }
        Ok(())
    }

    fn run_on(&mut self, view: &NetworkView, node: &str, command_line: &str) -> anyhow::Result<()> {
        let mut cmd = match view.shell(node, command_line) {
            Ok(cmd) => cmd,
            Err(e) => {
                writeln!(self.output, "*** {e}")?;
                return Ok(());
            }
        };

        tracing::debug!(node, command = command_line, "console command");
        match cmd.output() {
            Ok(out) => {
                self.output.write_all(&out.stdout)?;
                self.output.write_all(&out.stderr)?;
                if !out.status.success() {
                    writeln!(self.output, "*** exit status: {}", out.status)?;
                }
            }
            Err(e) => writeln!(self.output, "*** failed to run command on {node}: {e}")?,
        }
        Ok(())
    }
}

impl<R, W> Session for Console<R, W>
where
    R: BufRead + Send + 'static,
    W: Write + Send + 'static,
{
    fn run(mut self, view: NetworkView) -> anyhow::Result<()> {
        self.serve(&view)
    }
}
