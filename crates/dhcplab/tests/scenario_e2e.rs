//! End-to-end scenario tests over real namespaces, Open vSwitch and dhcpd.
//!
//! A local TCP listener stands in for the OpenFlow controller. It answers
//! each switch with an OpenFlow 1.4 HELLO and replies to echo requests,
//! which is enough for Open vSwitch to report the controller as connected.
//!
//! **Requirements:**
//! - Linux with `ip netns` support
//! - Root / passwordless sudo
//! - Open vSwitch (`ovs-vsctl show` must work)
//! - ISC dhcpd at `/usr/sbin/dhcpd` with its lease database present
//!
//! Run:
//! ```bash
//! sudo cargo test -p dhcplab --test scenario_e2e -- --nocapture
//! ```

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dhcplab::runner::Scenario;
use dhcplab_net::config::ScenarioConfig;
use dhcplab_net::dhcp::{pid_alive, read_pid_file};
use dhcplab_net::namespace::Namespace;
use dhcplab_net::network::NetworkView;
use dhcplab_net::switch::OvsBridge;
use dhcplab_net::test_util::{check_binary, check_ovs, check_privileges};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// Both runs create bridges s1..s3; they must not overlap.
static SERIAL: Mutex<()> = Mutex::new(());

fn scenario_files() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("scenario")
}

fn environment_ready() -> bool {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("dhcplab=debug,dhcplab_net=debug")
        .with_test_writer()
        .try_init();
    check_privileges()
        && check_ovs()
        && check_binary(Path::new("/usr/sbin/dhcpd"))
        && check_binary(Path::new("/var/lib/dhcp/dhcpd.leases"))
}

const OFP_VERSION_1_4: u8 = 0x05;
const OFPT_HELLO: u8 = 0;
const OFPT_ECHO_REQUEST: u8 = 2;
const OFPT_ECHO_REPLY: u8 = 3;
const OFP_HEADER_LEN: usize = 8;

fn ofp_header(msg_type: u8, len: u16, xid: u32) -> [u8; OFP_HEADER_LEN] {
    let len = len.to_be_bytes();
    let xid = xid.to_be_bytes();
    [OFP_VERSION_1_4, msg_type, len[0], len[1], xid[0], xid[1], xid[2], xid[3]]
}

/// Minimal OpenFlow peer: HELLO on connect, echo replies, everything else
/// read and dropped.
async fn serve_switch(mut stream: TcpStream) -> std::io::Result<()> {
    stream.write_all(&ofp_header(OFPT_HELLO, OFP_HEADER_LEN as u16, 1)).await?;
    loop {
        let mut header = [0u8; OFP_HEADER_LEN];
        stream.read_exact(&mut header).await?;
        let len = u16::from_be_bytes([header[2], header[3]]) as usize;
        let mut body = vec![0u8; len.saturating_sub(OFP_HEADER_LEN)];
        stream.read_exact(&mut body).await?;

        if header[1] == OFPT_ECHO_REQUEST {
            let xid = u32::from_be_bytes([header[4], header[5], header[6], header[7]]);
            let mut reply = ofp_header(OFPT_ECHO_REPLY, len as u16, xid).to_vec();
            reply.extend_from_slice(&body);
            stream.write_all(&reply).await?;
        }
    }
}

/// Serves OpenFlow connections until the test ends.
async fn fake_controller() -> std::net::SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind controller");
    let addr = listener.local_addr().expect("controller addr");
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(serve_switch(stream));
        }
    });
    addr
}

#[tokio::test]
async fn stand_in_controller_speaks_openflow_hello_and_echo() {
    let addr = fake_controller().await;
    let mut conn = TcpStream::connect(addr).await.unwrap();

    let mut hello = [0u8; OFP_HEADER_LEN];
    conn.read_exact(&mut hello).await.unwrap();
    assert_eq!(&hello[..4], &[0x05, 0x00, 0x00, 0x08]);

    let mut echo = ofp_header(OFPT_ECHO_REQUEST, 12, 0xabcd).to_vec();
    echo.extend_from_slice(b"ping");
    conn.write_all(&echo).await.unwrap();

    let mut reply = [0u8; 12];
    conn.read_exact(&mut reply).await.unwrap();
    assert_eq!(reply[1], OFPT_ECHO_REPLY);
    assert_eq!(&reply[4..8], &0xabcdu32.to_be_bytes());
    assert_eq!(&reply[8..], b"ping");
}

#[test]
fn shipped_config_matches_defaults() {
    let dir = scenario_files();
    let loaded = ScenarioConfig::load(&dir.join("dhcplab.toml")).expect("load shipped config");
    assert_eq!(loaded, ScenarioConfig::defaults(&dir));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_full_run_and_teardown() {
    if !environment_ready() {
        eprintln!("Skipping test_full_run_and_teardown, missing privileges, OVS or dhcpd");
        return;
    }
    let _serial = SERIAL.lock().unwrap_or_else(|e| e.into_inner());

    let work = std::env::temp_dir().join(format!("dhcplab-e2e-{}", std::process::id()));
    std::fs::create_dir_all(&work).unwrap();
    let pid_file = work.join("dhcpd.pid");

    let mut config = ScenarioConfig::defaults(&scenario_files());
    config.namespace_prefix = "e2e-".to_string();
    config.controller.remote.addr = fake_controller().await;
    // all three switches must report the connection within the bound
    config.controller.connect_timeout = Duration::from_secs(15);
    config.controller.require_connection = true;
    config.dhcp.pid_file = pid_file.clone();

    let seen_pid = Arc::new(Mutex::new(None));
    let seen = seen_pid.clone();
    let session_pid_file = pid_file.clone();
    let session = move |view: NetworkView| -> anyhow::Result<()> {
        for host in ["h1", "h2", "h3", "h4", "h5"] {
            anyhow::ensure!(view.namespaces.contains_key(host), "{host} missing");
            anyhow::ensure!(Namespace::exists(&format!("e2e-{host}")));
        }

        // dhcpd writes its PID file shortly after detaching
        let mut pid = None;
        for _ in 0..50 {
            pid = read_pid_file(&session_pid_file);
            if pid.is_some() {
                break;
            }
            std::thread::sleep(Duration::from_millis(100));
        }
        let pid = pid.ok_or_else(|| anyhow::anyhow!("dhcpd never wrote its PID file"))?;
        anyhow::ensure!(pid_alive(pid), "dhcpd pid {pid} is not running");

        let out = view.shell("h5", "ip -4 addr show dev h5-eth0")?.output()?;
        anyhow::ensure!(String::from_utf8_lossy(&out.stdout).contains("10.1.11.3/24"));

        *seen.lock().unwrap() = Some(pid);
        // returning plays the operator leaving the console
        Ok(())
    };

    let scenario = Scenario::new(config).expect("scenario");
    scenario.run(session).await.expect("scenario run");

    let pid = seen_pid
        .lock()
        .unwrap()
        .expect("session recorded the dhcpd pid");
    assert!(!pid_alive(pid), "dhcpd {pid} survived teardown");
    for host in ["h1", "h2", "h3", "h4", "h5"] {
        assert!(!Namespace::exists(&format!("e2e-{host}")), "{host} namespace left behind");
    }
    for switch in ["s1", "s2", "s3"] {
        assert!(!OvsBridge::exists(switch), "{switch} bridge left behind");
    }

    let _ = std::fs::remove_dir_all(work);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_failing_session_still_tears_down() {
    if !environment_ready() {
        eprintln!("Skipping test_failing_session_still_tears_down, missing privileges, OVS or dhcpd");
        return;
    }
    let _serial = SERIAL.lock().unwrap_or_else(|e| e.into_inner());

    let work = std::env::temp_dir().join(format!("dhcplab-e2e-fail-{}", std::process::id()));
    std::fs::create_dir_all(&work).unwrap();

    let mut config = ScenarioConfig::defaults(&scenario_files());
    config.namespace_prefix = "e2f-".to_string();
    config.controller.remote.addr = fake_controller().await;
    config.controller.connect_timeout = Duration::from_secs(1);
    let pid_file = work.join("dhcpd.pid");
    config.dhcp.pid_file = pid_file.clone();

    let scenario = Scenario::new(config).expect("scenario");
    let err = scenario
        .run(|_view: NetworkView| -> anyhow::Result<()> { anyhow::bail!("operator error") })
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "operator error");

    if let Some(pid) = read_pid_file(&pid_file) {
        assert!(!pid_alive(pid), "dhcpd {pid} survived teardown");
    }

    assert!(!Namespace::exists("e2f-h5"));
    assert!(!OvsBridge::exists("s3"));
    let _ = std::fs::remove_dir_all(work);
}
