//! Unix-domain variant of [`Socket`]/[`Acceptor`] (spec §4.3.1).

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::Mutex;

use super::{Acceptor, Socket};
use crate::data::{EndpointAddress, SecClient};

pub struct UdsSocket {
    read_half: Mutex<OwnedReadHalf>,
    write_half: Mutex<OwnedWriteHalf>,
    sec_client: SecClient,
}

impl UdsSocket {
    pub async fn connect(path: &Path) -> std::io::Result<Self> {
        let stream = UnixStream::connect(path).await?;
        Self::from_stream(stream)
    }

    pub(crate) fn from_stream(stream: UnixStream) -> std::io::Result<Self> {
        let cred = stream.peer_cred()?;
        let sec_client = SecClient {
            uid: Some(cred.uid()),
            gid: Some(cred.gid()),
            port: 0,
        };
        let (read_half, write_half) = stream.into_split();
        Ok(UdsSocket {
            read_half: Mutex::new(read_half),
            write_half: Mutex::new(write_half),
            sec_client,
        })
    }
}

#[async_trait]
impl Socket for UdsSocket {
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
        // Unix-domain sockets have no TIME_WAIT / linger distinction;
        // both graceful and forced shutdown just close the write half.
        let mut write_half = self.write_half.lock().await;
        let _ = write_half.shutdown().await;
        Ok(())
    }

    fn peer_credentials(&self) -> std::io::Result<SecClient> {
        Ok(self.sec_client)
    }

    fn peer_address(&self) -> Option<EndpointAddress> {
        None
    }

    fn local_port(&self) -> Option<u16> {
        None
    }
}

/// UDS acceptor (spec §4.3.1). Unlinks a stale socket file before binding
/// and `chmod`s the path to the configured permission mask once listening.
pub struct UdsAcceptor {
    listener: UnixListener,
    path: PathBuf,
    closed: AtomicBool,
}

impl UdsAcceptor {
    pub async fn bind(path: &Path, permissions: u32) -> std::io::Result<Self> {
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        let listener = UnixListener::bind(path)?;
        let mut perms = std::fs::metadata(path)?.permissions();
        use std::os::unix::fs::PermissionsExt;
        perms.set_mode(permissions);
        std::fs::set_permissions(path, perms)?;

        Ok(UdsAcceptor {
            listener,
            path: path.to_path_buf(),
            closed: AtomicBool::new(false),
        })
    }

    /// Adopts an inherited listening file descriptor (systemd socket
    /// activation; spec §4.3.1).
    #[cfg(unix)]
    pub fn from_raw_fd(fd: std::os::unix::io::RawFd, path: &Path) -> std::io::Result<Self> {
        use std::os::unix::io::FromRawFd;
        let std_listener = unsafe { std::os::unix::net::UnixListener::from_raw_fd(fd) };
        std_listener.set_nonblocking(true)?;
        let listener = UnixListener::from_std(std_listener)?;
        Ok(UdsAcceptor {
            listener,
            path: path.to_path_buf(),
            closed: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl Acceptor for UdsAcceptor {
    async fn accept(&self) -> std::io::Result<(Arc<dyn Socket>, Option<EndpointAddress>)> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(std::io::Error::new(
                std::io::ErrorKind::Other,
                "operation_aborted",
            ));
        }
        let (stream, _) = self.listener.accept().await?;
        let socket = UdsSocket::from_stream(stream)?;
        Ok((Arc::new(socket), None))
    }

    async fn close(&self) -> std::io::Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        let _ = std::fs::remove_file(&self.path);
        Ok(())
    }

    fn local_port(&self) -> Option<u16> {
        None
    }
}
