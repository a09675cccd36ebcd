use std::net::SocketAddr;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::Mutex;

use someip_local_ipc::codec::commands::{
    AssignClientAckId, AssignClientId, ConfigId, OfferService,
};
use someip_local_ipc::codec::{Command, CommandId, Payload};
use someip_local_ipc::collab::RoutingHost;
use someip_local_ipc::config::{ClientIdAllocator, Configuration};
use someip_local_ipc::data::{ClientId, InstanceId, SecClient, ServiceId};
use someip_local_ipc::socket::pipe::PipeAcceptor;
use someip_local_ipc::socket::Socket;
use someip_local_ipc::Server;

struct RecordingRoutingHost {
    known_clients: Mutex<Vec<(ClientId, String)>>,
    messages: Mutex<Vec<Bytes>>,
}

impl RecordingRoutingHost {
    fn new() -> Arc<Self> {
        Arc::new(RecordingRoutingHost {
            known_clients: Mutex::new(Vec::new()),
            messages: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl RoutingHost for RecordingRoutingHost {
    async fn on_message(
        &self,
        data: &[u8],
        _endpoint: &someip_local_ipc::Endpoint,
        _is_reliable: bool,
        _peer_client: ClientId,
        _sec_client: SecClient,
        _peer_addr: Option<SocketAddr>,
        _peer_port: Option<u16>,
    ) {
        self.messages.lock().await.push(Bytes::copy_from_slice(data));
    }

    async fn add_known_client(&self, client: ClientId, environment: &str) {
        self.known_clients
            .lock()
            .await
            .push((client, environment.to_owned()));
    }

    async fn add_guest(&self, _client: ClientId, _addr: SocketAddr, _port: u16) {}
    async fn remove_known_client(&self, _client: ClientId) {}
}

struct SequentialAllocator {
    next: AtomicU16,
}

#[async_trait]
impl ClientIdAllocator for SequentialAllocator {
    async fn request_client_id(&self, _name: &str, _desired: Option<ClientId>) -> ClientId {
        ClientId(self.next.fetch_add(1, Ordering::SeqCst))
    }
}

/// Scenario 1 (spec §8.3): a client registers with the router, gets
/// assigned a client id, and a subsequent `OFFER_SERVICE` is forwarded to
/// the routing host. Driven over an in-memory duplex socket pair rather
/// than a real TCP port or Unix-domain socket path, so this test touches
/// neither the filesystem nor the network.
#[tokio::test]
async fn client_registers_with_router_and_offer_is_forwarded() {
    let acceptor = PipeAcceptor::new();

    let routing_host = RecordingRoutingHost::new();
    let mut config = Configuration::default();
    config.client_id_allocator = Some(Arc::new(SequentialAllocator {
        next: AtomicU16::new(1),
    }));

    let server = Server::new(
        acceptor.clone(),
        true,
        Arc::new(config),
        routing_host.clone(),
        None,
    );
    server.start();

    let client = acceptor.connect(4096).await;
    let assign = AssignClientId {
        name: "app1".to_owned(),
    }
    .encode();
    client
        .send(&Command::new(CommandId::AssignClientId, 0, assign).encode())
        .await
        .unwrap();

    let mut buf = [0u8; 64];
    let n = client.recv(&mut buf).await.unwrap();
    let ack_command = Command::decode(&buf[..n]).unwrap();
    assert_eq!(ack_command.id, CommandId::AssignClientAckId);
    let ack = AssignClientAckId::decode(ack_command.payload).unwrap();
    assert_ne!(ack.client.0, 0);

    tokio::time::sleep(std::time::Duration::from_millis(30)).await;
    {
        let known = routing_host.known_clients.lock().await;
        assert_eq!(known.len(), 1);
        assert_eq!(known[0], (ack.client, String::new()));
    }

    let offer = OfferService {
        service: ServiceId(2222),
        instance: InstanceId(1),
        major: 1,
        minor: 0,
    }
    .encode();
    client
        .send(&Command::new(CommandId::OfferService, ack.client.0, offer).encode())
        .await
        .unwrap();

    tokio::time::sleep(std::time::Duration::from_millis(30)).await;
    let messages = routing_host.messages.lock().await;
    assert_eq!(messages.len(), 1);
    let forwarded = Command::decode(&messages[0]).unwrap();
    assert_eq!(forwarded.id, CommandId::OfferService);
}

/// Scenario 2 (spec §8.3): a client identifies itself to a non-router peer
/// via `CONFIG_ID`; no `ASSIGN_CLIENT_ACK_ID` is issued. Driven over the
/// same in-memory duplex transport as scenario 1.
#[tokio::test]
async fn client_identifies_to_non_router_peer_via_config_id() {
    let acceptor = PipeAcceptor::new();

    let routing_host = RecordingRoutingHost::new();
    let server = Server::new(
        acceptor.clone(),
        false,
        Arc::new(Configuration::default()),
        routing_host.clone(),
        None,
    );
    server.start();

    let client = acceptor.connect(4096).await;
    let hostname_client_id = ClientId(42);
    let config_cmd = ConfigId {
        entries: vec![(b"hostname".to_vec(), hostname_client_id.0.to_le_bytes().to_vec())],
    }
    .encode();
    client
        .send(&Command::new(CommandId::ConfigId, hostname_client_id.0, config_cmd).encode())
        .await
        .unwrap();

    tokio::time::sleep(std::time::Duration::from_millis(30)).await;

    let known = routing_host.known_clients.lock().await;
    assert_eq!(known.len(), 1);
    assert_eq!(known[0], (hostname_client_id, String::new()));
    assert_eq!(server.client_count().await, 1);
}
