use super::*;
use crate::codec::{commands::OfferService, Command, CommandId, Payload};
use crate::data::{InstanceId, ServiceId};
use crate::socket::pipe::PipeSocket;
use async_trait::async_trait;
use std::net::SocketAddr;
use tokio::sync::Mutex as AsyncMutex;

struct RecordingRoutingHost {
    received: AsyncMutex<Vec<Bytes>>,
}

impl RecordingRoutingHost {
    fn new() -> Arc<Self> {
        Arc::new(RecordingRoutingHost {
            received: AsyncMutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl RoutingHost for RecordingRoutingHost {
    async fn on_message(
        &self,
        data: &[u8],
        _endpoint: &Endpoint,
        _is_reliable: bool,
        _peer_client: ClientId,
        _sec_client: SecClient,
        _peer_addr: Option<SocketAddr>,
        _peer_port: Option<u16>,
    ) {
        self.received.lock().await.push(Bytes::copy_from_slice(data));
    }

    async fn add_known_client(&self, _client: ClientId, _environment: &str) {}
    async fn add_guest(&self, _client: ClientId, _addr: SocketAddr, _port: u16) {}
    async fn remove_known_client(&self, _client: ClientId) {}
}

fn test_config() -> Arc<Configuration> {
    Arc::new(Configuration::default())
}

#[tokio::test]
async fn receiver_endpoint_dispatches_complete_frame_to_routing_host() {
    let (local, remote) = PipeSocket::pair(4096);
    let routing_host = RecordingRoutingHost::new();

    let endpoint = Endpoint::new_receiver(
        local,
        ClientId(7),
        test_config(),
        routing_host.clone(),
        false,
    );
    endpoint.start().await;

    let payload = OfferService {
        service: ServiceId(1),
        instance: InstanceId(1),
        major: 1,
        minor: 0,
    }
    .encode();
    let command = Command::new(CommandId::OfferService, 7, payload);
    remote.send(&command.encode()).await.unwrap();

    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    let received = routing_host.received.lock().await;
    assert_eq!(received.len(), 1);
    let decoded = Command::decode(&received[0]).unwrap();
    assert_eq!(decoded.id, CommandId::OfferService);
}

#[tokio::test]
async fn send_queues_and_delivers_bytes_in_order() {
    let (local, remote) = PipeSocket::pair(4096);
    let routing_host = RecordingRoutingHost::new();
    let endpoint = Endpoint::new_receiver(
        local,
        ClientId(1),
        test_config(),
        routing_host,
        false,
    );
    endpoint.start().await;

    assert!(endpoint.send(Bytes::from_static(b"abc")).await);
    assert!(endpoint.send(Bytes::from_static(b"def")).await);

    tokio::time::sleep(std::time::Duration::from_millis(30)).await;

    let mut buf = [0u8; 6];
    let mut total = 0;
    while total < 6 {
        let n = remote.recv(&mut buf[total..]).await.unwrap();
        total += n;
    }
    assert_eq!(&buf, b"abcdef");
}

#[tokio::test]
async fn send_rejects_oversize_message() {
    let (local, _remote) = PipeSocket::pair(4096);
    let mut config = Configuration::default();
    config.max_message_size_local = 4;
    let routing_host = RecordingRoutingHost::new();
    let endpoint = Endpoint::new_receiver(
        local,
        ClientId(1),
        Arc::new(config),
        routing_host,
        false,
    );
    endpoint.start().await;

    assert!(!endpoint.send(Bytes::from_static(b"too long")).await);
}

#[tokio::test]
async fn peer_shutdown_triggers_escalation_to_failed() {
    let (local, remote) = PipeSocket::pair(4096);
    let routing_host = RecordingRoutingHost::new();
    let endpoint = Endpoint::new_receiver(
        local,
        ClientId(1),
        test_config(),
        routing_host,
        false,
    );
    endpoint.start().await;

    let fired = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let fired_clone = fired.clone();
    endpoint
        .register_error_handler(Box::new(move |_ep| {
            fired_clone.store(true, Ordering::SeqCst);
        }))
        .await;

    remote.shutdown(false).await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    assert_eq!(endpoint.state(), State::Failed);
    assert!(fired.load(Ordering::SeqCst));
}

/// Spec §8.3 scenario 5: a sender endpoint whose connect attempts always
/// fail retries up to `max_connection_attempts`, then escalates to `Failed`
/// with its error handler invoked exactly once.
#[tokio::test]
async fn repeated_connect_failures_escalate_to_failed_exactly_once() {
    // Nothing listens here; TCP connect fails fast with connection refused
    // rather than hanging on the connecting timebox.
    let addr: SocketAddr = ("127.0.0.1", 1).into();
    let mut config = Configuration::default();
    config.max_connection_attempts = 2;
    config.reconnect_debounce = std::time::Duration::from_millis(5);
    let routing_host = RecordingRoutingHost::new();

    let endpoint = Endpoint::new_sender(
        EndpointAddress::Network(addr),
        Arc::new(config),
        routing_host,
        false,
    );

    let fire_count = Arc::new(std::sync::atomic::AtomicU32::new(0));
    let fire_count_clone = fire_count.clone();
    endpoint
        .register_error_handler(Box::new(move |_ep| {
            fire_count_clone.fetch_add(1, Ordering::SeqCst);
        }))
        .await;

    endpoint.start().await;
    tokio::time::sleep(std::time::Duration::from_millis(300)).await;

    assert_eq!(endpoint.state(), State::Failed);
    assert_eq!(fire_count.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn stop_is_idempotent_and_transitions_to_stopped() {
    let (local, _remote) = PipeSocket::pair(4096);
    let routing_host = RecordingRoutingHost::new();
    let endpoint = Endpoint::new_receiver(
        local,
        ClientId(1),
        test_config(),
        routing_host,
        false,
    );
    endpoint.start().await;

    endpoint.stop(false).await;
    assert_eq!(endpoint.state(), State::Stopped);
    endpoint.stop(false).await;
    assert_eq!(endpoint.state(), State::Stopped);
}
