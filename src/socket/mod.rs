//! Socket abstraction (spec §4, design note "preserve as a capability set").
//!
//! A minimal interface over a bidirectional, connection-oriented stream —
//! TCP or Unix-domain — grounded on `webrtc-util::conn::Conn`'s `&self`
//! shape (it takes `&self` rather than `&mut self` because the underlying
//! transport, like `tokio::net::UdpSocket`, supports concurrent read/write;
//! our TCP/UDS variants get the same shape by splitting the stream into
//! owned halves behind their own `tokio::sync::Mutex`, the way
//! `webrtc-sctp::Association` keeps its read and write loops independent).
//! Variants are selected at construction; there is no dynamic substitution
//! at runtime (spec §9).

pub mod pipe;
pub mod tcp;
#[cfg(unix)]
pub mod uds;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::data::{EndpointAddress, SecClient};

/// A single bidirectional connection, already open.
///
/// `recv`/`send` take `&self` so a `Socket` can be held as `Arc<dyn Socket>`
/// and driven from one receive task and one send task independently, as
/// spec §4.2.4 requires (a send in flight must not block the receive loop).
#[async_trait]
pub trait Socket: Send + Sync {
    async fn recv(&self, buf: &mut [u8]) -> std::io::Result<usize>;

    async fn send(&self, buf: &[u8]) -> std::io::Result<usize>;

    /// Graceful (`force == false`) or forced (`force == true`) shutdown.
    /// Forced shutdown sets `SO_LINGER(on=true, timeout=0)` on TCP so the
    /// peer observes RST instead of FIN and the local socket does not sit
    /// in TIME_WAIT (spec §5, §8.3 scenario 6).
    async fn shutdown(&self, force: bool) -> std::io::Result<()>;

    /// Populates `sec_client` — UID/GID via `SO_PEERCRED` for UDS, the
    /// peer's chosen local port for TCP (spec §3.1, §4.2.5).
    fn peer_credentials(&self) -> std::io::Result<SecClient>;

    /// `None` for UDS; the peer's network address for TCP, used to derive
    /// `add_guest`'s `peer_port - 1` (spec §9).
    fn peer_address(&self) -> Option<EndpointAddress>;

    fn local_port(&self) -> Option<u16>;

    /// Applies TCP keepalive/user-timeout tuning (spec §5, "Timeouts" —
    /// applied only to cross-host/container connections). A no-op by
    /// default: UDS and the in-memory test pipe have no such knobs, and a
    /// TCP socket whose peer shares the local host's address skips it too.
    fn configure_keepalive(
        &self,
        _idle: Option<Duration>,
        _interval: Option<Duration>,
        _count: Option<u32>,
        _user_timeout: Option<Duration>,
    ) {
    }
}

/// Connects a new sender-role socket to `addr` (spec §4.2.3, `start()` from
/// `INIT`). A single entry point so the endpoint's connect logic does not
/// need to match on `EndpointAddress` itself.
pub async fn connect(addr: &EndpointAddress) -> std::io::Result<Arc<dyn Socket>> {
    match addr {
        EndpointAddress::Network(socket_addr) => {
            let socket = tcp::TcpSocket::connect(*socket_addr).await?;
            Ok(Arc::new(socket))
        }
        #[cfg(unix)]
        EndpointAddress::Unix(path) => {
            let socket = uds::UdsSocket::connect(path).await?;
            Ok(Arc::new(socket))
        }
        #[cfg(not(unix))]
        EndpointAddress::Unix(_) => Err(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "unix-domain sockets are not supported on this platform",
        )),
    }
}

/// A listener that hands off freshly accepted connections to the server
/// (spec §4.3.1). TCP and UDS acceptors implement this uniformly; `init`
/// folds in the protocol-specific setup (port scanning for TCP, stale-file
/// cleanup + chmod for UDS).
#[async_trait]
pub trait Acceptor: Send + Sync {
    async fn accept(&self) -> std::io::Result<(Arc<dyn Socket>, Option<EndpointAddress>)>;

    async fn close(&self) -> std::io::Result<()>;

    fn local_port(&self) -> Option<u16>;
}
