//! Concrete command payload types (spec §4.5, §6.1).

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::{CommandId, Payload};
use crate::data::{ClientId, EventId, InstanceId, MethodId, ServiceId};
use crate::error::CodecError;

/// `ASSIGN_CLIENT_ID` (0x00): a UTF-8 application name, sent by a client that
/// wants the router to allocate it a client id (spec §4.3.2 step 2).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssignClientId {
    pub name: String,
}

impl Payload for AssignClientId {
    const ID: CommandId = CommandId::AssignClientId;

    fn encoded_len(&self) -> usize {
        self.name.len()
    }

    fn encode_to(&self, buf: &mut BytesMut) {
        buf.put_slice(self.name.as_bytes());
    }

    fn decode_from(buf: &mut Bytes) -> Result<Self, CodecError> {
        let name = String::from_utf8(buf.to_vec()).map_err(|_| CodecError::Malformed {
            command: Self::ID,
        })?;
        Ok(AssignClientId { name })
    }
}

/// `ASSIGN_CLIENT_ACK_ID` (0x01): the id the router assigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssignClientAckId {
    pub client: ClientId,
}

impl Payload for AssignClientAckId {
    const ID: CommandId = CommandId::AssignClientAckId;
    const MIN_SIZE: usize = 2;

    fn encoded_len(&self) -> usize {
        2
    }

    fn encode_to(&self, buf: &mut BytesMut) {
        buf.put_u16_le(self.client.0);
    }

    fn decode_from(buf: &mut Bytes) -> Result<Self, CodecError> {
        Ok(AssignClientAckId {
            client: ClientId(buf.get_u16_le()),
        })
    }
}

/// `CONFIG_ID` (0x31): a sequence of `(key, value)` byte-string pairs (spec
/// §4.5). Only the `"hostname"` key is interpreted by this crate (spec §9,
/// open question) — and even that only to extract the carried client id via
/// [`ConfigId::client_id`]; the byte-exact value is otherwise passed through.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConfigId {
    pub entries: Vec<(Vec<u8>, Vec<u8>)>,
}

impl ConfigId {
    /// Looks up a key's value, if present.
    pub fn get(&self, key: &[u8]) -> Option<&[u8]> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_slice())
    }
}

impl Payload for ConfigId {
    const ID: CommandId = CommandId::ConfigId;

    fn encoded_len(&self) -> usize {
        self.entries
            .iter()
            .map(|(k, v)| 8 + k.len() + v.len())
            .sum()
    }

    fn encode_to(&self, buf: &mut BytesMut) {
        for (k, v) in &self.entries {
            buf.put_u32_le(k.len() as u32);
            buf.put_slice(k);
            buf.put_u32_le(v.len() as u32);
            buf.put_slice(v);
        }
    }

    fn decode_from(buf: &mut Bytes) -> Result<Self, CodecError> {
        let mut entries = Vec::new();
        while buf.has_remaining() {
            if buf.remaining() < 4 {
                return Err(CodecError::Malformed { command: Self::ID });
            }
            let klen = buf.get_u32_le() as usize;
            if buf.remaining() < klen + 4 {
                return Err(CodecError::Malformed { command: Self::ID });
            }
            let key = buf.copy_to_bytes(klen).to_vec();
            let vlen = buf.get_u32_le() as usize;
            if buf.remaining() < vlen {
                return Err(CodecError::Malformed { command: Self::ID });
            }
            let value = buf.copy_to_bytes(vlen).to_vec();
            entries.push((key, value));
        }
        Ok(ConfigId { entries })
    }
}

/// `OFFER_SERVICE` / `STOP_OFFER_SERVICE` (0x10 / 0x11).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OfferService {
    pub service: ServiceId,
    pub instance: InstanceId,
    pub major: u8,
    pub minor: u32,
}

impl Payload for OfferService {
    const ID: CommandId = CommandId::OfferService;
    const MIN_SIZE: usize = 9;

    fn encoded_len(&self) -> usize {
        9
    }

    fn encode_to(&self, buf: &mut BytesMut) {
        buf.put_u16_le(self.service.0);
        buf.put_u16_le(self.instance.0);
        buf.put_u8(self.major);
        buf.put_u32_le(self.minor);
    }

    fn decode_from(buf: &mut Bytes) -> Result<Self, CodecError> {
        Ok(OfferService {
            service: ServiceId(buf.get_u16_le()),
            instance: InstanceId(buf.get_u16_le()),
            major: buf.get_u8(),
            minor: buf.get_u32_le(),
        })
    }
}

/// One entry of a `ROUTING_INFO_ID` broadcast (spec supplement, §1
/// "Supplemented from original_source/"): a known client and the services it
/// currently offers. Interpretation of the entries stays the routing host's
/// job; this crate only (de)serializes the wire shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingInfoEntry {
    pub client: ClientId,
    pub services: Vec<(ServiceId, InstanceId, u8, u32)>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RoutingInfo {
    pub entries: Vec<RoutingInfoEntry>,
}

impl Payload for RoutingInfo {
    const ID: CommandId = CommandId::RoutingInfo;

    fn encoded_len(&self) -> usize {
        self.entries
            .iter()
            .map(|e| 4 + e.services.len() * 9)
            .sum()
    }

    fn encode_to(&self, buf: &mut BytesMut) {
        for entry in &self.entries {
            buf.put_u16_le(entry.client.0);
            buf.put_u16_le(entry.services.len() as u16);
            for (service, instance, major, minor) in &entry.services {
                buf.put_u16_le(service.0);
                buf.put_u16_le(instance.0);
                buf.put_u8(*major);
                buf.put_u32_le(*minor);
            }
        }
    }

    fn decode_from(buf: &mut Bytes) -> Result<Self, CodecError> {
        let mut entries = Vec::new();
        while buf.has_remaining() {
            if buf.remaining() < 4 {
                return Err(CodecError::Malformed { command: Self::ID });
            }
            let client = ClientId(buf.get_u16_le());
            let count = buf.get_u16_le() as usize;
            let mut services = Vec::with_capacity(count);
            for _ in 0..count {
                if buf.remaining() < 9 {
                    return Err(CodecError::Malformed { command: Self::ID });
                }
                let service = ServiceId(buf.get_u16_le());
                let instance = InstanceId(buf.get_u16_le());
                let major = buf.get_u8();
                let minor = buf.get_u32_le();
                services.push((service, instance, major, minor));
            }
            entries.push(RoutingInfoEntry { client, services });
        }
        Ok(RoutingInfo { entries })
    }
}

/// `PING` / `PONG` (0x07 / 0x08): empty-payload keep-alive probes (spec §1
/// supplement). Scheduling the probe is the routing host's job; this crate
/// only gives it a wire shape to send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Ping;

impl Payload for Ping {
    const ID: CommandId = CommandId::Ping;

    fn encoded_len(&self) -> usize {
        0
    }

    fn encode_to(&self, _buf: &mut BytesMut) {}

    fn decode_from(_buf: &mut Bytes) -> Result<Self, CodecError> {
        Ok(Ping)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Pong;

impl Payload for Pong {
    const ID: CommandId = CommandId::Pong;

    fn encoded_len(&self) -> usize {
        0
    }

    fn encode_to(&self, _buf: &mut BytesMut) {}

    fn decode_from(_buf: &mut Bytes) -> Result<Self, CodecError> {
        Ok(Pong)
    }
}

/// Silences "unused" `EventId`/`MethodId` until the routing layer above this
/// core grows request/response and event commands of its own; the command
/// codec still names them per spec §3.1 so their wire width is fixed here.
#[allow(dead_code)]
fn _assert_ids_sized(_: EventId, _: MethodId) {}
