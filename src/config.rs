//! Runtime configuration (spec §6.2), grounded on
//! `webrtc-rs-turn::server::config::ServerConfig`'s shape: a plain
//! `Deserialize` struct of tunables plus trait-object handles to
//! collaborators that can't be serialized (the allocator, the policy
//! manager).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::collab::PolicyManager;
use crate::data::{ClientId, SecClient};

fn default_max_message_size() -> u32 {
    1 << 20
}

fn default_shrink_threshold() -> u32 {
    5
}

fn default_queue_limit() -> usize {
    1 << 22
}

fn default_uds_permissions() -> u32 {
    0o660
}

fn default_max_connection_attempts() -> u32 {
    10
}

fn default_connect_timebox() -> Duration {
    Duration::from_secs(3)
}

fn default_reconnect_debounce() -> Duration {
    Duration::from_millis(250)
}

/// Tunables shared by every endpoint and server instantiated from one
/// configuration (spec §6.2). Deserializable so a deployment can load it
/// from a config file the way `webrtc-rs-turn`'s examples load
/// `ServerConfig` fields from CLI flags or TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct Configuration {
    #[serde(default = "default_max_message_size")]
    pub max_message_size_local: u32,

    #[serde(default = "default_shrink_threshold")]
    pub buffer_shrink_threshold: u32,

    #[serde(default = "default_queue_limit")]
    pub endpoint_queue_limit_local: usize,

    #[serde(default = "default_uds_permissions")]
    pub permissions_uds: u32,

    #[serde(default = "default_max_connection_attempts")]
    pub max_connection_attempts: u32,

    #[serde(default = "default_connect_timebox", with = "duration_millis")]
    pub connecting_timebox: Duration,

    #[serde(default = "default_reconnect_debounce", with = "duration_millis")]
    pub reconnect_debounce: Duration,

    /// TCP keep-alive idle time; applied only to cross-host connections
    /// (peer address differs from local address; spec §5 "Timeouts").
    #[serde(default, with = "opt_duration_millis")]
    pub tcp_keepalive_idle: Option<Duration>,

    #[serde(default, with = "opt_duration_millis")]
    pub tcp_keepalive_interval: Option<Duration>,

    #[serde(default)]
    pub tcp_keepalive_count: Option<u32>,

    #[serde(default, with = "opt_duration_millis")]
    pub tcp_user_timeout: Option<Duration>,

    /// Whether peer-credential enforcement is active (spec §4.2.5 step 2).
    #[serde(default)]
    pub security_enabled: bool,

    /// Credentials the router itself is expected to present, checked by
    /// non-router endpoints dialing it (spec §4.2.5 step 2).
    #[serde(default)]
    pub routing_credentials: Option<SecClient>,

    /// Collaborator handles, filled in after deserialization — these have
    /// no on-disk representation (spec §6.2).
    #[serde(skip)]
    pub policy_manager: Option<Arc<dyn PolicyManager>>,

    #[serde(skip)]
    pub client_id_allocator: Option<Arc<dyn ClientIdAllocator>>,
}

impl Default for Configuration {
    fn default() -> Self {
        Configuration {
            max_message_size_local: default_max_message_size(),
            buffer_shrink_threshold: default_shrink_threshold(),
            endpoint_queue_limit_local: default_queue_limit(),
            permissions_uds: default_uds_permissions(),
            max_connection_attempts: default_max_connection_attempts(),
            connecting_timebox: default_connect_timebox(),
            reconnect_debounce: default_reconnect_debounce(),
            tcp_keepalive_idle: None,
            tcp_keepalive_interval: None,
            tcp_keepalive_count: None,
            tcp_user_timeout: None,
            security_enabled: false,
            routing_credentials: None,
            policy_manager: None,
            client_id_allocator: None,
        }
    }
}

/// Allocates client ids during the handshake (spec §4.3.2 step 2,
/// `request_client_id(name, desired)`).
#[async_trait]
pub trait ClientIdAllocator: Send + Sync {
    async fn request_client_id(&self, name: &str, desired: Option<ClientId>) -> ClientId;
}

mod duration_millis {
    use super::Duration;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let millis = u64::deserialize(d)?;
        Ok(Duration::from_millis(millis))
    }
}

mod opt_duration_millis {
    use super::Duration;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match d {
            Some(d) => s.serialize_some(&(d.as_millis() as u64)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        let millis: Option<u64> = Option::deserialize(d)?;
        Ok(millis.map(Duration::from_millis))
    }
}

#[cfg(test)]
mod config_test {
    use super::*;

    #[test]
    fn defaults_match_spec_values() {
        let config = Configuration::default();
        assert_eq!(config.max_connection_attempts, 10);
        assert_eq!(config.connecting_timebox, Duration::from_secs(3));
        assert_eq!(config.reconnect_debounce, Duration::from_millis(250));
        assert!(!config.security_enabled);
    }

    #[test]
    fn deserializes_from_partial_json() {
        let config: Configuration =
            serde_json::from_str(r#"{"max_message_size_local": 4096}"#).unwrap();
        assert_eq!(config.max_message_size_local, 4096);
        assert_eq!(config.buffer_shrink_threshold, default_shrink_threshold());
    }
}
