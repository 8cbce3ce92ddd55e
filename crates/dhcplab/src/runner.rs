//! Scenario lifecycle: topology → controller → network → DHCP → session →
//! teardown.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context};
use dhcplab_net::config::ScenarioConfig;
use dhcplab_net::dhcp::{DhcpServer, StopOutcome, DEFAULT_CONFIG_FILE};
use dhcplab_net::network::{EmulatedNetwork, NetworkView};
use dhcplab_net::topology::Topology;
use tokio::signal::unix::{signal, Signal, SignalKind};
use tokio::sync::oneshot;

use crate::session::Session;

/// How long the pre-start controller reachability probe may take.
pub const CONTROLLER_PROBE_TIMEOUT: Duration = Duration::from_secs(3);

/// Scenario files shipped with the crate.
const SHIPPED_SCENARIO_DIR: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/scenario");

/// Directory the scenario's relative files are resolved against.
///
/// The directory of the config file when one is given. Otherwise the
/// directory holding the running executable if it carries a `dhcpd.conf`,
/// else the scenario directory shipped with the sources.
pub fn scenario_dir(config_path: Option<&Path>) -> anyhow::Result<PathBuf> {
    let base = match config_path {
        Some(path) => path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(".")),
        None => {
            let exe_dir = std::env::current_exe()
                .context("locating the dhcplab executable")?
                .parent()
                .map(Path::to_path_buf)
                .ok_or_else(|| anyhow!("executable has no parent directory"))?;
            pick_default_dir(exe_dir, Path::new(SHIPPED_SCENARIO_DIR))
        }
    };
    let base = if base.as_os_str().is_empty() {
        PathBuf::from(".")
    } else {
        base
    };
    std::fs::canonicalize(&base).with_context(|| format!("resolving {}", base.display()))
}

fn pick_default_dir(exe_dir: PathBuf, shipped: &Path) -> PathBuf {
    if !exe_dir.join(DEFAULT_CONFIG_FILE).is_file() && shipped.join(DEFAULT_CONFIG_FILE).is_file() {
        tracing::debug!(dir = %shipped.display(), "no dhcpd.conf next to the executable, using shipped scenario");
        shipped.to_path_buf()
    } else {
        exe_dir
    }
}

/// Loads the scenario config from `config_path`, or the defaults for the
/// default scenario directory.
pub fn load_config(config_path: Option<&Path>) -> anyhow::Result<ScenarioConfig> {
    let dir = scenario_dir(config_path)?;
    match config_path {
        Some(path) => ScenarioConfig::load(path)
            .with_context(|| format!("loading scenario config {}", path.display())),
        None => Ok(ScenarioConfig::defaults(&dir)),
    }
}

/// Everything the scenario holds while the operator works.
///
/// Fields drop in declaration order: the DHCP server is killed before the
/// network goes away, on every path out of [`Scenario::run`], unwinding
/// included.
struct Running {
    dhcp: Option<DhcpServer>,
    network: Option<EmulatedNetwork>,
}

impl Running {
    fn teardown(&mut self) {
        if let Some(dhcp) = self.dhcp.take() {
            println!("[-] Killing DHCP server");
            match dhcp.stop() {
                StopOutcome::Killed(pid) => tracing::info!(pid, "DHCP server stopped"),
                StopOutcome::Lingering(pid) => {
                    tracing::warn!(pid, "DHCP server did not exit after SIGKILL")
                }
                StopOutcome::NoPidFile => tracing::warn!("DHCP server PID file missing"),
            }
        }
        if let Some(network) = self.network.take() {
            println!("*** Stopping network");
            network.stop();
            println!("*** Done");
        }
    }

    fn network(&self) -> anyhow::Result<&EmulatedNetwork> {
        self.network
            .as_ref()
            .ok_or_else(|| anyhow!("network vanished during startup"))
    }
}

impl Drop for Running {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Result of a blocking step, and whether SIGINT arrived while it ran.
struct Completed<T> {
    value: T,
    interrupted: bool,
}

/// Runs `work` on the blocking pool.
///
/// SIGINT does not abandon the step: whatever it creates must be owned
/// before teardown can release it.
async fn off_runtime<T, F>(interrupt: &mut Signal, work: F) -> anyhow::Result<Completed<T>>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    let mut task = tokio::task::spawn_blocking(work);
    tokio::select! {
        joined = &mut task => Ok(Completed {
            value: joined.context("blocking step failed")?,
            interrupted: false,
        }),
        _ = interrupt.recv() => {
            tracing::info!("received SIGINT, finishing current step before teardown");
            Ok(Completed {
                value: task.await.context("blocking step failed")?,
                interrupted: true,
            })
        }
    }
}

/// The DHCP lab scenario.
pub struct Scenario {
    config: ScenarioConfig,
    topology: Topology,
}

impl Scenario {
    pub fn new(config: ScenarioConfig) -> anyhow::Result<Self> {
        let topology = Topology::scenario_with_protocol(config.controller.remote.protocol)
            .context("building scenario topology")?;
        Ok(Self { config, topology })
    }

    pub fn with_topology(config: ScenarioConfig, topology: Topology) -> Self {
        Self { config, topology }
    }

    pub fn config(&self) -> &ScenarioConfig {
        &self.config
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    /// Runs the whole scenario, handing `session` the live network.
    ///
    /// Any failure before the session starts aborts the run; whatever was
    /// already created is released. After the session, or on Ctrl-C at any
    /// point once the network is being built, the DHCP server and the
    /// network are torn down.
    pub async fn run<S: Session>(self, session: S) -> anyhow::Result<()> {
        let Scenario { config, topology } = self;
        let controller = config.controller.remote.clone();

        println!("*** Binding remote controller {} at {}", controller.name, controller.target());
        controller
            .probe(CONTROLLER_PROBE_TIMEOUT)
            .await
            .context("remote controller check")?;

        // installed before anything exists so SIGINT never bypasses teardown
        let mut interrupt =
            signal(SignalKind::interrupt()).context("installing SIGINT handler")?;
        let mut running = Running {
            dhcp: None,
            network: None,
        };

        println!("*** Starting network");
        let prefix = config.namespace_prefix.clone();
        let started = off_runtime(&mut interrupt, move || {
            EmulatedNetwork::start(topology, controller, &prefix)
        })
        .await?;
        running.network = Some(started.value.context("starting emulated network")?);
        if started.interrupted {
            running.teardown();
            return Ok(());
        }

        let network = running.network()?;
        let waited = tokio::select! {
            waited = network.wait_for_controller(config.controller.connect_timeout) => Some(waited),
            _ = interrupt.recv() => None,
        };
        let Some(waited) = waited else {
            tracing::info!("received SIGINT, tearing down");
            running.teardown();
            return Ok(());
        };
        match waited {
            Ok(()) => {}
            Err(e) if config.controller.require_connection => {
                return Err(e).context("waiting for controller connection");
            }
            Err(e) => tracing::warn!(error = %e, "continuing without a confirmed controller connection"),
        }

        println!("[+] Run DHCP server");
        let launch = {
            let host = running
                .network()?
                .host(&config.dhcp.host)
                .context("resolving DHCP host")?;
            DhcpServer::prepare(&config.dhcp, host).context("launching DHCP server")?
        };
        println!("*** {} : {}", config.dhcp.host, launch.command_line().join(" "));
        let launched = off_runtime(&mut interrupt, move || launch.start()).await?;
        running.dhcp = Some(launched.value.context("launching DHCP server")?);
        if launched.interrupted {
            running.teardown();
            return Ok(());
        }

        let view = running.network()?.view();
        let outcome = run_session(session, view, &mut interrupt).await;
        if let Err(e) = &outcome {
            tracing::error!(error = %e, "session ended with an error");
        }

        running.teardown();
        outcome
    }
}

/// Runs `session` on its own thread until it returns or SIGINT arrives.
///
/// A plain thread rather than a blocking task: an abandoned console read
/// must not keep the runtime from shutting down.
async fn run_session<S: Session>(
    session: S,
    view: NetworkView,
    interrupt: &mut Signal,
) -> anyhow::Result<()> {
    let (tx, rx) = oneshot::channel();
    std::thread::Builder::new()
        .name("dhcplab-session".into())
        .spawn(move || {
            let _ = tx.send(session.run(view));
        })
        .context("spawning session thread")?;

    tokio::select! {
        result = rx => match result {
            Ok(result) => result,
            Err(_) => Err(anyhow!("session thread terminated abnormally")),
        },
        _ = interrupt.recv() => {
            tracing::info!("received SIGINT, tearing down");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dhcplab_net::controller::RemoteController;
    use std::sync::Mutex;

    /// Tests that listen for, or raise, SIGINT must not overlap.
    static SIGINT_LOCK: Mutex<()> = Mutex::new(());

    fn temp_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("dhcplab-runner-{tag}-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn scenario_dir_from_config_path() {
        let dir = std::env::temp_dir();
        let resolved = scenario_dir(Some(&dir.join("dhcplab.toml"))).unwrap();
        assert_eq!(resolved, std::fs::canonicalize(&dir).unwrap());
    }

    #[test]
    fn executable_dir_with_dhcpd_conf_wins() {
        let exe = temp_dir("exe-conf");
        let shipped = temp_dir("shipped-a");
        std::fs::write(exe.join("dhcpd.conf"), "").unwrap();
        std::fs::write(shipped.join("dhcpd.conf"), "").unwrap();
        assert_eq!(pick_default_dir(exe.clone(), &shipped), exe);
        let _ = std::fs::remove_dir_all(exe);
        let _ = std::fs::remove_dir_all(shipped);
    }

    #[test]
    fn bare_executable_dir_falls_back_to_shipped_scenario() {
        let exe = temp_dir("exe-bare");
        let shipped = temp_dir("shipped-b");
        std::fs::write(shipped.join("dhcpd.conf"), "").unwrap();
        assert_eq!(pick_default_dir(exe.clone(), &shipped), shipped);
        let _ = std::fs::remove_dir_all(exe);
        let _ = std::fs::remove_dir_all(shipped);
    }

    #[test]
    fn default_config_points_at_existing_dhcpd_conf() {
        let cfg = load_config(None).unwrap();
        assert!(
            cfg.dhcp.config_file.is_file(),
            "{} missing",
            cfg.dhcp.config_file.display()
        );
        assert_eq!(cfg.dhcp.config_file, scenario_dir(None).unwrap().join("dhcpd.conf"));
    }

    #[tokio::test]
    async fn unreachable_controller_aborts_before_anything_starts() {
        let addr = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap()
        };
        let mut config = ScenarioConfig::defaults(Path::new("/tmp"));
        config.controller.remote = RemoteController {
            addr,
            ..Default::default()
        };

        let scenario = Scenario::new(config).unwrap();
        let err = scenario
            .run(|_view: NetworkView| -> anyhow::Result<()> {
                panic!("session must not start");
            })
            .await
            .unwrap_err();
        assert!(format!("{err:#}").contains("unreachable"), "{err:#}");
    }

    #[tokio::test]
    async fn session_result_is_forwarded() {
        let _lock = SIGINT_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let mut interrupt = signal(SignalKind::interrupt()).unwrap();
        let view = NetworkView::detached(Topology::scenario().unwrap());
        let err = run_session(
            |_view: NetworkView| -> anyhow::Result<()> { anyhow::bail!("operator error") },
            view.clone(),
            &mut interrupt,
        )
        .await
        .unwrap_err();
        assert_eq!(err.to_string(), "operator error");

        run_session(
            |_view: NetworkView| -> anyhow::Result<()> { Ok(()) },
            view,
            &mut interrupt,
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn panicking_session_is_an_error() {
        let _lock = SIGINT_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let mut interrupt = signal(SignalKind::interrupt()).unwrap();
        let view = NetworkView::detached(Topology::scenario().unwrap());
        let err = run_session(
            |_view: NetworkView| -> anyhow::Result<()> { panic!("boom") },
            view,
            &mut interrupt,
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("abnormally"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn blocking_step_completes_without_interrupt() {
        let _lock = SIGINT_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let mut interrupt = signal(SignalKind::interrupt()).unwrap();
        let done = off_runtime(&mut interrupt, || 7).await.unwrap();
        assert_eq!(done.value, 7);
        assert!(!done.interrupted);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn sigint_during_blocking_step_waits_for_its_result() {
        let _lock = SIGINT_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        // the handler is installed before the signal is raised, so the
        // default action never terminates the test process
        let mut interrupt = signal(SignalKind::interrupt()).unwrap();
        std::thread::spawn(|| {
            std::thread::sleep(Duration::from_millis(50));
            // SAFETY: signals this process only; SIGINT is handled above.
            unsafe { libc::kill(libc::getpid(), libc::SIGINT) };
        });

        let done = off_runtime(&mut interrupt, || {
            std::thread::sleep(Duration::from_millis(500));
            "network"
        })
        .await
        .unwrap();
        assert_eq!(done.value, "network");
        assert!(done.interrupted);
    }
}
