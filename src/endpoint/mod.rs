//! Local endpoint lifecycle, send queue, receive loop, and error escalation
//! for one peer connection (spec §3.4, §4.2).
//!
//! Grounded on `webrtc-sctp::Association`/`AssociationInternal`: an
//! `Arc<AtomicU8>` state word readable without the lock, a `Mutex`-guarded
//! inner struct for everything else, and external callbacks always invoked
//! after the lock is released so the routing host can freely call back into
//! the endpoint without deadlocking.

#[cfg(test)]
mod endpoint_test;

use std::fmt;
use std::sync::atomic::{AtomicU16, AtomicU8, Ordering};
use std::sync::{Arc, Weak};

use bytes::Bytes;
use log::{debug, error, warn};
use tokio::sync::{Mutex, Notify};

use crate::buffer::MessageBuffer;
use crate::collab::RoutingHost;
use crate::config::Configuration;
use crate::data::{ClientId, EndpointAddress, SecClient};
use crate::socket::{self, Socket};
use crate::timer::{Task, Timer};

/// Error handler invoked exactly once, without the endpoint mutex held, on
/// the transition into FAILED (spec §4.2.2, §4.2.6).
pub type ErrorHandler = Box<dyn Fn(Arc<Endpoint>) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum State {
    Init = 0,
    Connecting = 1,
    Connected = 2,
    Failed = 3,
    Stopped = 4,
}

impl From<u8> for State {
    fn from(v: u8) -> Self {
        match v {
            0 => State::Init,
            1 => State::Connecting,
            2 => State::Connected,
            3 => State::Failed,
            _ => State::Stopped,
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            State::Init => "Init",
            State::Connecting => "Connecting",
            State::Connected => "Connected",
            State::Failed => "Failed",
            State::Stopped => "Stopped",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Sender,
    Receiver,
}

struct Inner {
    send_queue: Vec<u8>,
    is_sending: bool,
    socket: Option<Arc<dyn Socket>>,
    sec_client: SecClient,
    reconnect_counter: u32,
    error_handler: Option<ErrorHandler>,
}

/// One peer connection. A sender endpoint is created in `Init` and dials
/// `addr`; a receiver endpoint is created in `Connected` from a socket an
/// acceptor already accepted (spec §3.4).
pub struct Endpoint {
    state: AtomicU8,
    inner: Mutex<Inner>,
    /// Touched only by this endpoint's own receive-loop task, so it is not
    /// behind the same lock as `send`/`stop` state (spec §4.1: "not
    /// thread-safe, driven from a single executor").
    receive_buffer: Mutex<MessageBuffer>,
    config: Arc<Configuration>,
    routing_host: Arc<dyn RoutingHost>,
    role: Role,
    addr: Option<EndpointAddress>,
    is_routing_endpoint: bool,
    assigned_client: AtomicU16,
    connect_debounce_timer: Timer,
    connecting_timebox_timer: Timer,
}

impl Endpoint {
    /// Builds a sender endpoint in `Init`, targeting `addr` (spec §3.4).
    pub fn new_sender(
        addr: EndpointAddress,
        config: Arc<Configuration>,
        routing_host: Arc<dyn RoutingHost>,
        is_routing_endpoint: bool,
    ) -> Arc<Self> {
        Self::build(
            State::Init,
            Some(addr),
            None,
            config,
            routing_host,
            Role::Sender,
            is_routing_endpoint,
        )
    }

    /// Builds a receiver endpoint already in `Connected`, wrapping a socket
    /// an acceptor handed off (spec §3.4).
    pub fn new_receiver(
        socket: Arc<dyn Socket>,
        peer_client: ClientId,
        config: Arc<Configuration>,
        routing_host: Arc<dyn RoutingHost>,
        is_routing_endpoint: bool,
    ) -> Arc<Self> {
        socket.configure_keepalive(
            config.tcp_keepalive_idle,
            config.tcp_keepalive_interval,
            config.tcp_keepalive_count,
            config.tcp_user_timeout,
        );
        let endpoint = Self::build(
            State::Connected,
            None,
            Some(socket),
            config,
            routing_host,
            Role::Receiver,
            is_routing_endpoint,
        );
        endpoint
            .assigned_client
            .store(peer_client.0, Ordering::SeqCst);
        endpoint
    }

    #[allow(clippy::too_many_arguments)]
    fn build(
        state: State,
        addr: Option<EndpointAddress>,
        socket: Option<Arc<dyn Socket>>,
        config: Arc<Configuration>,
        routing_host: Arc<dyn RoutingHost>,
        role: Role,
        is_routing_endpoint: bool,
    ) -> Arc<Self> {
        let receive_buffer =
            MessageBuffer::new(config.max_message_size_local, config.buffer_shrink_threshold);
        let connecting_timebox = config.connecting_timebox;
        let reconnect_debounce = config.reconnect_debounce;

        Arc::new(Endpoint {
            state: AtomicU8::new(state as u8),
            inner: Mutex::new(Inner {
                send_queue: Vec::new(),
                is_sending: false,
                socket,
                sec_client: SecClient::default(),
                reconnect_counter: 0,
                error_handler: None,
            }),
            receive_buffer: Mutex::new(receive_buffer),
            config,
            routing_host,
            role,
            addr,
            is_routing_endpoint,
            assigned_client: AtomicU16::new(0),
            connect_debounce_timer: Timer::new(reconnect_debounce, no_op_task()),
            connecting_timebox_timer: Timer::new(connecting_timebox, no_op_task()),
        })
    }

    pub fn state(&self) -> State {
        State::from(self.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, new_state: State) -> State {
        State::from(self.state.swap(new_state as u8, Ordering::SeqCst))
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn peer_client(&self) -> ClientId {
        ClientId(self.assigned_client.load(Ordering::SeqCst))
    }

    /// `start`: sender begins connecting; receiver begins its receive loop.
    /// Idempotent in `Connected` (spec §4.2.2).
    pub async fn start(self: &Arc<Self>) {
        match self.state() {
            State::Connected if self.role == Role::Receiver => {
                self.spawn_receive_loop();
            }
            State::Init => {
                self.set_state(State::Connecting);
                self.spawn_connect();
            }
            _ => {}
        }
    }

    /// `stop(due_to_error)`: releases timers, shuts down the socket (forced
    /// if `due_to_error` or already `Failed`), transitions to `Stopped`
    /// (spec §4.2.2).
    pub async fn stop(self: &Arc<Self>, due_to_error: bool) {
        let previous = self.set_state(State::Stopped);
        if previous == State::Stopped {
            return;
        }
        let force = due_to_error || previous == State::Failed;

        self.connect_debounce_timer.stop().await;
        self.connecting_timebox_timer.stop().await;

        let socket = {
            let inner = self.inner.lock().await;
            inner.socket.clone()
        };
        if let Some(socket) = socket {
            if let Err(e) = socket.shutdown(force).await {
                debug!("socket shutdown error while stopping endpoint: {e}");
            }
        }
    }

    /// Appends `bytes` to the send queue and kicks off a write if idle.
    /// Rejects if oversize or the queue is already full (spec §4.2.2).
    pub async fn send(self: &Arc<Self>, bytes: Bytes) -> bool {
        if bytes.len() as u32 > self.config.max_message_size_local {
            warn!("dropping oversize message ({} bytes)", bytes.len());
            return false;
        }
        if self.state() != State::Connected {
            return false;
        }

        let should_start_write = {
            let mut inner = self.inner.lock().await;
            if inner.send_queue.len() + bytes.len() > self.config.endpoint_queue_limit_local {
                warn!("dropping message: send queue at capacity");
                return false;
            }
            inner.send_queue.extend_from_slice(&bytes);
            !inner.is_sending
        };

        if should_start_write {
            self.drive_send_loop();
        }
        true
    }

    pub async fn get_queue_size(self: &Arc<Self>) -> usize {
        self.inner.lock().await.send_queue.len()
    }

    /// Seeds the receive buffer with bytes already read off the wire before
    /// this endpoint existed — the handshake's left-over bytes, handed off
    /// during promotion (spec §4.3.2, `add_connection`'s `buffer_remainder`).
    /// Must be called before `start()`.
    pub async fn seed_receive_buffer(self: &Arc<Self>, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        let mut buffer = self.receive_buffer.lock().await;
        if let Err(e) = buffer.seed(bytes) {
            error!("failed to seed handshake remainder into receive buffer: {e}");
        }
    }

    /// Stores the handler; invoked at most once, without the mutex, on the
    /// transition to `Failed` (spec §4.2.2, §4.2.6).
    pub async fn register_error_handler(self: &Arc<Self>, handler: ErrorHandler) {
        self.inner.lock().await.error_handler = Some(handler);
    }

    /// Single-entry-point escalation (spec §4.2.6): under the mutex, move to
    /// `Failed` and take the handler out; release the mutex; invoke. A
    /// re-entrant call that observes `Failed`/`Stopped` already set returns
    /// without invoking anything a second time.
    async fn escalate(self: &Arc<Self>) {
        let handler = {
            let mut inner = self.inner.lock().await;
            let previous = self.state();
            if previous == State::Failed || previous == State::Stopped {
                return;
            }
            self.set_state(State::Failed);
            inner.error_handler.take()
        };
        if let Some(handler) = handler {
            handler(self.clone());
        }
    }

    // ---- connect -----------------------------------------------------

    /// Arms the connecting timebox with a task that, if the connect attempt
    /// is still outstanding when it fires, wakes the race below and drives
    /// the endpoint through `on_connect_failed` with a timeout error (spec
    /// §4.2.3: a stuck connect is `timed_out` and retried like any other
    /// connect failure). The actual `socket::connect` call is raced against
    /// that wakeup with `tokio::select!` so a connect that never completes
    /// (a half-open TCP handshake, a stuck UDS dial) doesn't hang forever.
    fn spawn_connect(self: &Arc<Self>) {
        let endpoint = self.clone();
        tokio::spawn(async move {
            let Some(addr) = endpoint.addr.clone() else {
                return;
            };

            let timed_out = Arc::new(Notify::new());
            let task_weak = Arc::downgrade(&endpoint);
            let task_notify = timed_out.clone();
            let task: Task = Box::new(move || {
                let weak = task_weak.clone();
                let notify = task_notify.clone();
                Box::pin(async move {
                    if let Some(endpoint) = weak.upgrade() {
                        if endpoint.state() == State::Connecting {
                            notify.notify_one();
                        }
                    }
                    false
                })
            });
            endpoint.connecting_timebox_timer.set_task(task).await;
            endpoint.connecting_timebox_timer.start().await;

            tokio::select! {
                result = socket::connect(&addr) => {
                    endpoint.connecting_timebox_timer.stop().await;
                    match result {
                        Ok(socket) => endpoint.on_connected(socket).await,
                        Err(e) => endpoint.on_connect_failed(e).await,
                    }
                }
                _ = timed_out.notified() => {
                    endpoint.connecting_timebox_timer.stop().await;
                    let err = std::io::Error::new(
                        std::io::ErrorKind::TimedOut,
                        "connect attempt exceeded the connecting timebox",
                    );
                    endpoint.on_connect_failed(err).await;
                }
            }
        });
    }

    async fn on_connected(self: &Arc<Self>, socket: Arc<dyn Socket>) {
        if self.state() != State::Connecting {
            return;
        }
        socket.configure_keepalive(
            self.config.tcp_keepalive_idle,
            self.config.tcp_keepalive_interval,
            self.config.tcp_keepalive_count,
            self.config.tcp_user_timeout,
        );
        {
            let mut inner = self.inner.lock().await;
            inner.socket = Some(socket);
        }
        if !self.is_allowed().await {
            self.stop(true).await;
            return;
        }
        self.set_state(State::Connected);
        {
            let mut inner = self.inner.lock().await;
            inner.reconnect_counter = 0;
        }
        self.drive_send_loop();
        self.spawn_receive_loop();
    }

    async fn on_connect_failed(self: &Arc<Self>, err: std::io::Error) {
        debug!("connect failed: {err}");
        if self.state() != State::Connecting {
            return;
        }

        let exceeded = {
            let mut inner = self.inner.lock().await;
            inner.reconnect_counter += 1;
            inner.reconnect_counter > self.config.max_connection_attempts
        };

        if exceeded {
            self.escalate().await;
            return;
        }

        self.set_state(State::Init);
        // Weak: the debounce timer is a field of this same endpoint, so a
        // strongly-captured `Arc<Endpoint>` here would keep the endpoint
        // alive through its own timer indefinitely (Endpoint -> Timer ->
        // Task -> Endpoint).
        let weak = Arc::downgrade(self);
        let task: Task = Box::new(move || {
            let weak = weak.clone();
            Box::pin(async move {
                if let Some(endpoint) = weak.upgrade() {
                    if endpoint.state() == State::Init {
                        endpoint.set_state(State::Connecting);
                        endpoint.spawn_connect();
                    }
                }
                false
            })
        });
        self.connect_debounce_timer.set_task(task).await;
        self.connect_debounce_timer.start().await;
    }

    /// Credential check executed before entering `Connected` (spec §4.2.5).
    /// Public within the crate so the server can run it on a freshly
    /// promoted receiver endpoint too — those are built already `Connected`
    /// (spec §3.4) rather than transitioning through `is_allowed` on a
    /// successful connect the way sender endpoints do.
    pub(crate) async fn is_allowed(self: &Arc<Self>) -> bool {
        let socket = {
            let inner = self.inner.lock().await;
            inner.socket.clone()
        };
        let Some(socket) = socket else { return false };

        let sec_client = match socket.peer_credentials() {
            Ok(sec_client) => sec_client,
            Err(e) => {
                error!("failed to read peer credentials: {e}");
                return false;
            }
        };
        {
            let mut inner = self.inner.lock().await;
            inner.sec_client = sec_client;
        }

        if !self.config.security_enabled {
            if let Some(policy_manager) = &self.config.policy_manager {
                policy_manager
                    .store_client_to_sec_client_mapping(self.peer_client(), sec_client)
                    .await;
            }
            return true;
        }

        if self.is_routing_endpoint {
            return self.config.routing_credentials == Some(sec_client);
        }

        match &self.config.policy_manager {
            Some(policy_manager) => {
                policy_manager
                    .check_credentials(self.peer_client(), sec_client)
                    .await
            }
            None => false,
        }
    }

    // ---- send/receive loops ------------------------------------------

    fn drive_send_loop(self: &Arc<Self>) {
        let endpoint = self.clone();
        tokio::spawn(async move {
            endpoint.send_loop_step().await;
        });
    }

    async fn send_loop_step(self: &Arc<Self>) {
        loop {
            if self.state() != State::Connected {
                return;
            }
            let (socket, batch) = {
                let mut inner = self.inner.lock().await;
                if inner.is_sending || inner.send_queue.is_empty() {
                    return;
                }
                inner.is_sending = true;
                let batch = std::mem::take(&mut inner.send_queue);
                (inner.socket.clone(), batch)
            };

            let Some(socket) = socket else { return };
            let result = socket.send(&batch).await;

            let more_pending = {
                let mut inner = self.inner.lock().await;
                inner.is_sending = false;
                !inner.send_queue.is_empty()
            };

            if let Err(e) = result {
                if self.state() == State::Connected {
                    error!("send error: {e}");
                    self.escalate().await;
                }
                return;
            }

            if !more_pending {
                return;
            }
        }
    }

    fn spawn_receive_loop(self: &Arc<Self>) {
        let endpoint = self.clone();
        tokio::spawn(async move {
            endpoint.receive_loop().await;
        });
    }

    /// Reads into the framing buffer's tail, then drains every complete
    /// command out in wire order, dispatching each to the routing host
    /// without the endpoint mutex held (spec §4.2.4).
    async fn receive_loop(self: &Arc<Self>) {
        loop {
            if self.state() != State::Connected {
                return;
            }

            let socket = {
                let inner = self.inner.lock().await;
                inner.socket.clone()
            };
            let Some(socket) = socket else { return };

            let mut buffer = self.receive_buffer.lock().await;
            let n = match socket.recv(buffer.tail_mut()).await {
                Ok(0) => {
                    drop(buffer);
                    if self.state() == State::Connected {
                        self.escalate().await;
                    }
                    return;
                }
                Ok(n) => n,
                Err(e) => {
                    drop(buffer);
                    if self.state() == State::Connected {
                        error!("receive error: {e}");
                        self.escalate().await;
                    }
                    return;
                }
            };

            if let Err(e) = buffer.bump_end(n) {
                drop(buffer);
                error!("receive buffer overflow: {e}");
                self.escalate().await;
                return;
            }

            let mut frames = Vec::new();
            loop {
                match buffer.next_message() {
                    Ok(Some(frame)) => frames.push(Bytes::copy_from_slice(frame)),
                    Ok(None) => break,
                    Err(e) => {
                        drop(buffer);
                        error!("framing error: {e}");
                        self.escalate().await;
                        return;
                    }
                }
            }
            drop(buffer);

            let sec_client = self.inner.lock().await.sec_client;
            let peer_client = self.peer_client();
            let socket_peer_addr = socket.peer_address();
            let (peer_addr, peer_port) = match &socket_peer_addr {
                Some(EndpointAddress::Network(addr)) => (Some(*addr), Some(addr.port())),
                _ => (None, None),
            };

            for frame in frames {
                self.routing_host
                    .on_message(
                        &frame, self, false, peer_client, sec_client, peer_addr, peer_port,
                    )
                    .await;
            }
        }
    }
}

fn no_op_task() -> Task {
    Box::new(|| Box::pin(async { false }))
}
