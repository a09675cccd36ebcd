//! In-memory [`Socket`] pair for tests, grounded on the duplex idiom
//! `webrtc-util::conn` names via its (platform-only) `conn_pipe` module —
//! two endpoints wired directly together without touching a real socket.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::sync::{mpsc, Mutex};

use super::{Acceptor, Socket};
use crate::data::{EndpointAddress, SecClient};

pub struct PipeSocket {
    read_half: Mutex<tokio::io::ReadHalf<DuplexStream>>,
    write_half: Mutex<tokio::io::WriteHalf<DuplexStream>>,
}

impl PipeSocket {
    /// Builds a connected pair, each end backed by a `max_buf_size`-deep
    /// in-memory channel.
    pub fn pair(max_buf_size: usize) -> (Arc<dyn Socket>, Arc<dyn Socket>) {
        let (a, b) = tokio::io::duplex(max_buf_size);
        (Arc::new(Self::wrap(a)), Arc::new(Self::wrap(b)))
    }

    fn wrap(stream: DuplexStream) -> Self {
        let (read_half, write_half) = tokio::io::split(stream);
        PipeSocket {
            read_half: Mutex::new(read_half),
            write_half: Mutex::new(write_half),
        }
    }
}

#[async_trait]
impl Socket for PipeSocket {
    async fn recv(&self, buf: &mut [u8]) -> std::io::Result<usize> {
        let mut read_half = self.read_half.lock().await;
        read_half.read(buf).await
    }

    async fn send(&self, buf: &[u8]) -> std::io::Result<usize> {
        let mut write_half = self.write_half.lock().await;
        write_half.write_all(buf).await?;
        Ok(buf.len())
    }

    async fn shutdown(&self, _force: bool) -> std::io::Result<()> {
        let mut write_half = self.write_half.lock().await;
        let _ = write_half.shutdown().await;
        Ok(())
    }

    fn peer_credentials(&self) -> std::io::Result<SecClient> {
        Ok(SecClient::default())
    }

    fn peer_address(&self) -> Option<EndpointAddress> {
        None
    }

    fn local_port(&self) -> Option<u16> {
        None
    }
}

/// In-memory [`Acceptor`] for tests: `connect()` wires up a fresh
/// [`PipeSocket`] pair, hands the server-side half to whatever is awaiting
/// `accept()`, and returns the client-side half to the caller — so scenario
/// tests can drive the full handshake/promotion path through [`Server`]
/// without binding a real TCP port or Unix-domain socket path.
///
/// [`Server`]: crate::Server
pub struct PipeAcceptor {
    sender: Mutex<Option<mpsc::UnboundedSender<(Arc<dyn Socket>, Option<EndpointAddress>)>>>,
    receiver: Mutex<mpsc::UnboundedReceiver<(Arc<dyn Socket>, Option<EndpointAddress>)>>,
}

impl PipeAcceptor {
    pub fn new() -> Arc<Self> {
        let (sender, receiver) = mpsc::unbounded_channel();
        Arc::new(PipeAcceptor {
            sender: Mutex::new(Some(sender)),
            receiver: Mutex::new(receiver),
        })
    }

    /// Connects a new client against this acceptor: the server-side socket
    /// is queued for the next `accept()`, the client-side socket is
    /// returned to the caller to drive directly.
    pub async fn connect(&self, max_buf_size: usize) -> Arc<dyn Socket> {
        let (client, server) = PipeSocket::pair(max_buf_size);
        if let Some(sender) = self.sender.lock().await.as_ref() {
            let _ = sender.send((server, None));
        }
        client
    }
}

#[async_trait]
impl Acceptor for PipeAcceptor {
    async fn accept(&self) -> std::io::Result<(Arc<dyn Socket>, Option<EndpointAddress>)> {
        let mut receiver = self.receiver.lock().await;
        receiver
            .recv()
            .await
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::Other, "operation_aborted"))
    }

    async fn close(&self) -> std::io::Result<()> {
        self.sender.lock().await.take();
        Ok(())
    }

    fn local_port(&self) -> Option<u16> {
        None
    }
}

#[cfg(test)]
mod pipe_test {
    use super::*;

    #[tokio::test]
    async fn pair_relays_bytes_in_both_directions() {
        let (a, b) = PipeSocket::pair(4096);

        a.send(b"hello").await.unwrap();
        let mut buf = [0u8; 5];
        let n = b.recv(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"hello");

        b.send(b"world").await.unwrap();
        let mut buf = [0u8; 5];
        let n = a.recv(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"world");
    }

    #[tokio::test]
    async fn shutdown_causes_peer_recv_to_observe_eof() {
        let (a, b) = PipeSocket::pair(4096);
        a.shutdown(false).await.unwrap();
        let mut buf = [0u8; 1];
        let n = b.recv(&mut buf).await.unwrap();
        assert_eq!(n, 0);
    }
}
