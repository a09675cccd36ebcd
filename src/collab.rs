//! Collaborator interfaces the routing layer above this core must implement
//! (spec §6.2), grounded on `webrtc-rs-turn::server`'s `AuthHandler`/request
//! trait shape: narrow `#[async_trait]` traits the core calls out to, owned
//! by the caller and handed in as `Arc<dyn Trait>` at construction.

use std::net::SocketAddr;

use async_trait::async_trait;

use crate::data::{ClientId, SecClient};
use crate::endpoint::Endpoint;

/// Called by an endpoint on each fully parsed command, and on client
/// join/leave discovered through the handshake (spec §6.2).
#[async_trait]
pub trait RoutingHost: Send + Sync {
    /// A command was parsed off the wire. `is_reliable` is always `false`
    /// for this core's stream transports (spec §4.2.4).
    async fn on_message(
        &self,
        data: &[u8],
        endpoint: &Endpoint,
        is_reliable: bool,
        peer_client: ClientId,
        sec_client: SecClient,
        peer_addr: Option<SocketAddr>,
        peer_port: Option<u16>,
    );

    /// A client completed the handshake and was promoted to a full endpoint.
    async fn add_known_client(&self, client: ClientId, environment: &str);

    /// The peer carries a network address; derive and register a guest
    /// entry for it (spec §9: `peer_port - 1`, the router's own listen port
    /// on that peer host).
    async fn add_guest(&self, client: ClientId, addr: SocketAddr, port: u16);

    async fn remove_known_client(&self, client: ClientId);
}

/// Called on connect/disconnect of an endpoint (spec §6.2).
#[async_trait]
pub trait EndpointHost: Send + Sync {
    async fn on_connect(&self, endpoint: &Endpoint);
    async fn on_disconnect(&self, endpoint: &Endpoint);
}

/// Credential bookkeeping delegated by `is_allowed` (spec §4.2.5, §6.2).
#[async_trait]
pub trait PolicyManager: Send + Sync {
    async fn check_credentials(&self, client: ClientId, sec_client: SecClient) -> bool;
    async fn store_client_to_sec_client_mapping(&self, client: ClientId, sec_client: SecClient);
    async fn remove_client_to_sec_client_mapping(&self, client: ClientId);
}
