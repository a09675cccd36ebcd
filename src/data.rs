//! Identifiers and addresses (spec §3.1).
//!
//! Each id is a newtype around `u16` rather than a bare integer so that
//! command-payload code cannot transpose, say, a client id and a service id
//! by accident — a Rust-idiomatic strengthening of the data model spec.md
//! describes, not a semantic change.

use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
        pub struct $name(pub u16);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<u16> for $name {
            fn from(v: u16) -> Self {
                $name(v)
            }
        }
    };
}

id_newtype!(ClientId);
id_newtype!(ServiceId);
id_newtype!(InstanceId);
id_newtype!(MethodId);
id_newtype!(EventId);

/// Peer credentials (spec §3.1): `{UID, GID, port}`. UDS sockets obtain
/// `uid`/`gid` via `SO_PEERCRED`; TCP sockets leave them `None` and carry
/// only the peer's chosen local port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SecClient {
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    pub port: u16,
}

/// Either a network endpoint or a filesystem path — the choice is a
/// build/config decision made once per deployment, not per connection
/// (spec §3.1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndpointAddress {
    Network(SocketAddr),
    Unix(PathBuf),
}

impl fmt::Display for EndpointAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndpointAddress::Network(addr) => write!(f, "{addr}"),
            EndpointAddress::Unix(path) => write!(f, "{}", path.display()),
        }
    }
}
