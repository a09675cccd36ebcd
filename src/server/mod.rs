//! Local acceptor and server: accepts connections, runs the identity
//! handshake, and owns the live set of receiver endpoints (spec §3.5,
//! §4.3). Grounded on `webrtc-util::conn::conn_udp_listener`'s accept-loop
//! shape (a spawned loop calling `acceptor.accept()` in a cycle, backing off
//! on recoverable errors) and `webrtc-rs-turn::server`'s request-handling
//! style (a small transient struct that owns one connection until its job
//! is done).


use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use bytes::Bytes;
use log::{debug, error, warn};
use tokio::sync::Mutex;

use crate::buffer::MessageBuffer;
use crate::codec::commands::{AssignClientAckId, AssignClientId, ConfigId};
use crate::codec::{Command, CommandId, Payload};
use crate::collab::{EndpointHost, RoutingHost};
use crate::config::Configuration;
use crate::data::{ClientId, EndpointAddress};
use crate::endpoint::{Endpoint, ErrorHandler};
use crate::error::Error;
use crate::socket::{Acceptor, Socket};

/// Backoff applied to `bad_descriptor` accept errors (spec §4.3.2).
const BAD_DESCRIPTOR_BACKOFF: Duration = Duration::from_millis(200);
/// Backoff applied to `no_descriptors` accept errors (spec §4.3.2).
const NO_DESCRIPTORS_BACKOFF: Duration = Duration::from_secs(1);

struct ClientsMap {
    clients: HashMap<ClientId, Arc<Endpoint>>,
}

/// Owns an acceptor plus the live map of connected clients (spec §3.5).
pub struct Server {
    acceptor: Arc<dyn Acceptor>,
    clients: Mutex<ClientsMap>,
    lifecycle_counter: AtomicU32,
    is_router: bool,
    config: Arc<Configuration>,
    routing_host: Arc<dyn RoutingHost>,
    endpoint_host: Option<Arc<dyn EndpointHost>>,
}

impl Server {
    pub fn new(
        acceptor: Arc<dyn Acceptor>,
        is_router: bool,
        config: Arc<Configuration>,
        routing_host: Arc<dyn RoutingHost>,
        endpoint_host: Option<Arc<dyn EndpointHost>>,
    ) -> Arc<Self> {
        Arc::new(Server {
            acceptor,
            clients: Mutex::new(ClientsMap {
                clients: HashMap::new(),
            }),
            lifecycle_counter: AtomicU32::new(0),
            is_router,
            config,
            routing_host,
            endpoint_host,
        })
    }

    /// Spawns the accept loop. Each accepted connection is handed to its own
    /// handshake task so a slow or hostile peer on the handshake can't stall
    /// acceptance of the next connection.
    pub fn start(self: &Arc<Self>) {
        let server = self.clone();
        tokio::spawn(async move {
            server.accept_loop().await;
        });
    }

    /// `stop()`: bumps the lifecycle counter and closes the acceptor for
    /// good (spec §3.5, §4.3.2).
    pub async fn stop(self: &Arc<Self>) {
        self.lifecycle_counter.fetch_add(1, Ordering::SeqCst);
        if let Err(e) = self.acceptor.close().await {
            debug!("acceptor close error: {e}");
        }
        let endpoints: Vec<Arc<Endpoint>> = {
            let mut clients = self.clients.lock().await;
            clients.clients.drain().map(|(_, ep)| ep).collect()
        };
        for endpoint in endpoints {
            endpoint.stop(true).await;
        }
    }

    /// `halt()`: bumps the counter but leaves the acceptor open, so a fresh
    /// `start()` call can resume accepting on the same port (spec §3.5).
    pub async fn halt(self: &Arc<Self>) {
        self.lifecycle_counter.fetch_add(1, Ordering::SeqCst);
    }

    pub fn local_port(&self) -> Option<u16> {
        self.acceptor.local_port()
    }

    async fn accept_loop(self: &Arc<Self>) {
        loop {
            let counter = self.lifecycle_counter.load(Ordering::SeqCst);
            match self.acceptor.accept().await {
                Ok((socket, peer_addr)) => {
                    let server = self.clone();
                    tokio::spawn(async move {
                        server.handle_accepted(socket, peer_addr, counter).await;
                    });
                }
                Err(e) => {
                    if !self.handle_accept_error(e).await {
                        return;
                    }
                }
            }
        }
    }

    /// Accept backoff table (spec §4.3.2). Returns `false` when the accept
    /// loop should stop entirely.
    async fn handle_accept_error(&self, err: std::io::Error) -> bool {
        use std::io::ErrorKind;
        match err.kind() {
            ErrorKind::Other if err.to_string().contains("operation_aborted") => false,
            ErrorKind::TooManyFilesOpen | ErrorKind::PermissionDenied => {
                error!("accept failed in a very bad state: {err}");
                tokio::time::sleep(BAD_DESCRIPTOR_BACKOFF).await;
                true
            }
            ErrorKind::WouldBlock => {
                tokio::time::sleep(NO_DESCRIPTORS_BACKOFF).await;
                true
            }
            _ => {
                warn!("accept error, retrying: {err}");
                true
            }
        }
    }

    /// Runs the handshake on a freshly accepted socket (spec §4.3.2,
    /// "Handshake"), then promotes it to a full receiver endpoint.
    async fn handle_accepted(
        self: &Arc<Self>,
        socket: Arc<dyn Socket>,
        peer_addr: Option<EndpointAddress>,
        lc_counter: u32,
    ) {
        if lc_counter != self.lifecycle_counter.load(Ordering::SeqCst) {
            debug!("dropping connection from a stale lifecycle generation");
            return;
        }

        match self.run_handshake(&socket).await {
            Ok((client_id, remainder)) => {
                self.add_connection(client_id, socket, remainder, lc_counter, peer_addr)
                    .await;
            }
            Err(e) => {
                debug!("handshake dropped: {e}");
                let _ = socket.shutdown(true).await;
            }
        }
    }

    /// Reads exactly one framing command and interprets it per spec
    /// §4.3.2: `ASSIGN_CLIENT_ID` for a router, `CONFIG_ID` for a
    /// non-router. Anything else drops the connection.
    async fn run_handshake(&self, socket: &Arc<dyn Socket>) -> Result<(ClientId, Bytes), Error> {
        let mut buffer = MessageBuffer::new(
            self.config.max_message_size_local,
            self.config.buffer_shrink_threshold,
        );

        let frame = loop {
            let n = socket.recv(buffer.tail_mut()).await?;
            if n == 0 {
                return Err(Error::HandshakeDropped {
                    reason: "peer closed before completing the handshake",
                });
            }
            buffer.bump_end(n)?;
            if let Some(frame) = buffer.next_message()? {
                break Bytes::copy_from_slice(frame);
            }
        };
        let remainder = Bytes::copy_from_slice(buffer.unread());

        let command = Command::decode(&frame)?;

        if self.is_router && command.id == CommandId::AssignClientId {
            let request = AssignClientId::decode(command.payload)?;
            let client_id = match &self.config.client_id_allocator {
                Some(allocator) => allocator.request_client_id(&request.name, None).await,
                None => {
                    return Err(Error::HandshakeDropped {
                        reason: "no client id allocator configured",
                    })
                }
            };
            let ack = AssignClientAckId { client: client_id }.encode();
            let response = Command::new(CommandId::AssignClientAckId, client_id.0, ack);
            socket.send(&response.encode()).await?;
            return Ok((client_id, remainder));
        }

        if !self.is_router && command.id == CommandId::ConfigId {
            let config_command = ConfigId::decode(command.payload)?;
            let client_id = config_command
                .get(b"hostname")
                .and_then(|v| <[u8; 2]>::try_from(v).ok())
                .map(|bytes| ClientId(u16::from_le_bytes(bytes)))
                .ok_or(Error::HandshakeDropped {
                    reason: "CONFIG_ID missing a usable hostname entry",
                })?;
            return Ok((client_id, remainder));
        }

        Err(Error::HandshakeDropped {
            reason: "unexpected command id during handshake",
        })
    }

    /// Promotion (spec §4.3.2, "Promotion"): validates the lifecycle
    /// generation, notifies the routing host, supersedes any previous
    /// endpoint registered for this client id, and finally starts the new
    /// endpoint after releasing the clients-map lock.
    async fn add_connection(
        self: &Arc<Self>,
        client_id: ClientId,
        socket: Arc<dyn Socket>,
        buffer_remainder: Bytes,
        lc_counter: u32,
        peer_addr: Option<EndpointAddress>,
    ) {
        if lc_counter != self.lifecycle_counter.load(Ordering::SeqCst) {
            return;
        }

        // The environment string distinguishes container/namespace peers in
        // the wider system this core plugs into; a purely intra-host
        // connection has none (spec §8.3, scenario 1: env `""`).
        self.routing_host.add_known_client(client_id, "").await;
        if let Some(EndpointAddress::Network(addr)) = &peer_addr {
            self.routing_host
                .add_guest(client_id, *addr, addr.port().saturating_sub(1))
                .await;
        }

        // Accepted connections are never the router side of the credential
        // check in `is_allowed` (spec §4.2.5) — they're inbound clients, not
        // a dial out to the router.
        let endpoint = Endpoint::new_receiver(
            socket,
            client_id,
            self.config.clone(),
            self.routing_host.clone(),
            false,
        );
        endpoint.seed_receive_buffer(&buffer_remainder).await;

        if !endpoint.is_allowed().await {
            debug!("client {client_id} failed the credential check; dropping");
            endpoint.stop(true).await;
            return;
        }

        let previous = {
            let mut clients = self.clients.lock().await;
            clients.clients.insert(client_id, endpoint.clone())
        };
        if let Some(previous) = previous {
            warn!("client {client_id} reconnected; stopping the previous endpoint");
            previous.stop(true).await;
        }

        // Weak: the clients map this handler is registered from strongly
        // owns the endpoint, and the endpoint strongly owns this handler, so
        // a strongly-captured `Arc<Server>` here would cycle back
        // (Server -> clients -> Endpoint -> handler -> Server).
        let server = Arc::downgrade(self);
        let handler: ErrorHandler = Box::new(move |endpoint| {
            let server = server.clone();
            tokio::spawn(async move {
                if let Some(server) = server.upgrade() {
                    server.remove_connection(endpoint.peer_client()).await;
                }
            });
        });
        endpoint.register_error_handler(handler).await;

        if let Some(endpoint_host) = &self.endpoint_host {
            endpoint_host.on_connect(&endpoint).await;
        }

        endpoint.start().await;
    }

    /// Invoked by an endpoint's error handler on transition to `Failed`
    /// (spec §4.3.2, "register a failure handler").
    async fn remove_connection(self: &Arc<Self>, client_id: ClientId) {
        let removed = {
            let mut clients = self.clients.lock().await;
            clients.clients.remove(&client_id)
        };
        if let Some(endpoint) = removed {
            if let Some(endpoint_host) = &self.endpoint_host {
                endpoint_host.on_disconnect(&endpoint).await;
            }
            self.routing_host.remove_known_client(client_id).await;
        }
    }

    pub async fn client_count(&self) -> usize {
        self.clients.lock().await.clients.len()
    }
}
