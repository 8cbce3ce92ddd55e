//! Remote OpenFlow controller binding.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use crate::error::NetError;
use crate::topology::OpenFlowVersion;

pub const DEFAULT_CONTROLLER_NAME: &str = "c0";
pub const DEFAULT_CONTROLLER_IP: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);
/// IANA-assigned OpenFlow port.
pub const DEFAULT_CONTROLLER_PORT: u16 = 6653;
pub const DEFAULT_PROTOCOL: OpenFlowVersion = OpenFlowVersion::OpenFlow14;

/// An external SDN controller the switches connect to over TCP.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteController {
    pub name: String,
    pub addr: SocketAddr,
    pub protocol: OpenFlowVersion,
}

impl Default for RemoteController {
    fn default() -> Self {
        Self {
            name: DEFAULT_CONTROLLER_NAME.to_string(),
            addr: SocketAddr::new(DEFAULT_CONTROLLER_IP, DEFAULT_CONTROLLER_PORT),
            protocol: DEFAULT_PROTOCOL,
        }
    }
}

impl RemoteController {
    /// Controller target in OVS syntax, e.g. `tcp:127.0.0.1:6653` or
    /// `tcp:[::1]:6653`.
    pub fn target(&self) -> String {
        match self.addr.ip() {
            IpAddr::V4(ip) => format!("tcp:{}:{}", ip, self.addr.port()),
            IpAddr::V6(ip) => format!("tcp:[{}]:{}", ip, self.addr.port()),
        }
    }

    /// Attempts a TCP connection to the controller within `timeout`.
    ///
    /// Only checks that something accepts connections on the controller
    /// address; the OpenFlow handshake is left to the switches.
    pub async fn probe(&self, timeout: Duration) -> Result<(), NetError> {
        match tokio::time::timeout(timeout, tokio::net::TcpStream::connect(self.addr)).await {
            Ok(Ok(_stream)) => {
                tracing::debug!(controller = %self.name, addr = %self.addr, "controller reachable");
                Ok(())
            }
            Ok(Err(source)) => Err(NetError::ControllerUnreachable {
                addr: self.addr,
                source,
            }),
            Err(_) => Err(NetError::ControllerUnreachable {
                addr: self.addr,
                source: std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    format!("no answer within {timeout:?}"),
                ),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_binding() {
        let c = RemoteController::default();
        assert_eq!(c.name, "c0");
        assert_eq!(c.target(), "tcp:127.0.0.1:6653");
        assert_eq!(c.protocol.as_str(), "OpenFlow14");
    }

    #[test]
    fn ipv6_target_is_bracketed() {
        let c = RemoteController {
            addr: "[::1]:6653".parse().unwrap(),
            ..Default::default()
        };
        assert_eq!(c.target(), "tcp:[::1]:6653");
    }

    #[tokio::test]
    async fn probe_reaches_listener() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let controller = RemoteController {
            addr: listener.local_addr().unwrap(),
            ..Default::default()
        };
        controller.probe(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test]
    async fn probe_fails_without_listener() {
        // Bind then drop to get a port that is very likely closed.
        let addr = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap()
        };
        let controller = RemoteController {
            addr,
            ..Default::default()
        };
        let err = controller.probe(Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, NetError::ControllerUnreachable { .. }));
    }
}
