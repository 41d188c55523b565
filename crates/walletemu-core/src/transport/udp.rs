//! Direct UDP transport to an emulator.
//!
//! The emulator listens for wire packets on a UDP port (21324 by default) and
//! exposes its debug link on the next port up. Both answer the 8-byte
//! `PINGPING` probe with `PONGPONG`, which is all enumeration needs: an
//! address whose main port answers is a device, and it is debuggable when
//! its debug port answers as well.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use tokio::net::UdpSocket;
use tokio::time::timeout;
use tracing::{debug, trace, warn};

use super::{Enumeration, TransportBackend, TransportError, TransportHandle, TransportKind};

/// Default emulator port.
pub const DEFAULT_PORT: u16 = 21324;

const PING: &[u8] = b"PINGPING";
const PONG: &[u8] = b"PONGPONG";

/// How long to wait for a probe answer before treating the port as silent.
const PROBE_TIMEOUT: Duration = Duration::from_millis(200);

pub(crate) fn default_addresses() -> Vec<SocketAddr> {
    vec![SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), DEFAULT_PORT)]
}

/// The debug-link address paired with an emulator address (port + 1).
pub fn debug_addr(addr: SocketAddr) -> Option<SocketAddr> {
    addr.port()
        .checked_add(1)
        .map(|port| SocketAddr::new(addr.ip(), port))
}

/// Send one probe to `addr` and report whether it answered.
///
/// Silence, ICMP port-unreachable and unexpected payloads all count as "no".
pub async fn probe(addr: SocketAddr, wait: Duration) -> Result<bool, TransportError> {
    let bind = if addr.is_ipv4() {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0)
    } else {
        SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), 0)
    };

    let socket = UdpSocket::bind(bind).await?;
    socket.connect(addr).await?;

    if let Err(e) = socket.send(PING).await {
        return refused_or(e);
    }

    let mut buf = [0u8; 64];
    match timeout(wait, socket.recv(&mut buf)).await {
        Ok(Ok(n)) => {
            trace!(%addr, bytes = n, "probe answered");
            Ok(&buf[..n] == PONG)
        }
        Ok(Err(e)) => refused_or(e),
        Err(_) => Ok(false),
    }
}

fn refused_or(err: std::io::Error) -> Result<bool, TransportError> {
    if err.kind() == std::io::ErrorKind::ConnectionRefused {
        Ok(false)
    } else {
        Err(err.into())
    }
}

/// Enumerates emulators listening on a fixed set of UDP addresses.
#[derive(Debug, Clone)]
pub struct UdpBackend {
    addresses: Vec<SocketAddr>,
    probe_timeout: Duration,
}

impl UdpBackend {
    pub fn new(addresses: Vec<SocketAddr>) -> Self {
        Self {
            addresses,
            probe_timeout: PROBE_TIMEOUT,
        }
    }

    pub fn with_probe_timeout(mut self, probe_timeout: Duration) -> Self {
        self.probe_timeout = probe_timeout;
        self
    }

    pub fn addresses(&self) -> &[SocketAddr] {
        &self.addresses
    }
}

impl Default for UdpBackend {
    fn default() -> Self {
        Self::new(default_addresses())
    }
}

/// Probe one emulator address and its debug port.
///
/// Socket errors count as "nothing here" so one bad address cannot fail a
/// whole enumeration.
async fn probe_emulator(addr: SocketAddr, wait: Duration) -> Option<TransportHandle> {
    match probe(addr, wait).await {
        Ok(true) => {}
        Ok(false) => {
            debug!(%addr, "no emulator answering");
            return None;
        }
        Err(e) => {
            warn!(%addr, error = %e, "emulator probe failed");
            return None;
        }
    }

    let has_debug = match debug_addr(addr) {
        Some(link) => probe(link, wait).await.unwrap_or_else(|e| {
            warn!(%link, error = %e, "debug probe failed");
            false
        }),
        None => false,
    };
    debug!(%addr, has_debug, "emulator found");
    Some(TransportHandle::new(TransportKind::Udp, addr.to_string(), has_debug))
}

#[async_trait]
impl TransportBackend for UdpBackend {
    fn kind(&self) -> TransportKind {
        TransportKind::Udp
    }

    /// Addresses are probed one at a time as the stream is polled.
    async fn enumerate(&self) -> Result<Enumeration, TransportError> {
        let wait = self.probe_timeout;
        Ok(stream::iter(self.addresses.clone())
            .filter_map(move |addr| probe_emulator(addr, wait))
            .boxed())
    }
}
