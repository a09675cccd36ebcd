//! Command envelope and payload codec (spec §3.2, §4.5, §6.1).
//!
//! Every byte on an intra-host connection is a sequence of commands: a fixed
//! 9-byte header followed by a `size`-byte payload. `Marshal`/`Unmarshal`
//! here play the same role `webrtc-util::marshal::{Marshal, Unmarshal}` play
//! for WebRTC wire types — a payload type implements them once and gets
//! `encode`/`decode` through [`Command`] for free — but are specialized to
//! `&mut BytesMut` / `&mut Bytes` instead of being generic over `B: Buf`,
//! since every payload in this crate is small and copied once per frame.

pub mod commands;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::CodecError;

/// 9-byte command header (spec §3.2).
pub const HEADER_SIZE: usize = 9;

/// Protocol version this crate speaks; `deserialize` rejects anything else.
pub const PROTOCOL_VERSION: u16 = 0;

/// Command id enumeration (spec §6.1).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CommandId {
    AssignClientId = 0x00,
    AssignClientAckId = 0x01,
    RegisterApplication = 0x02,
    DeregisterApplication = 0x03,
    RoutingInfo = 0x05,
    RegisteredAck = 0x06,
    Ping = 0x07,
    Pong = 0x08,
    OfferService = 0x10,
    StopOfferService = 0x11,
    Subscribe = 0x12,
    Unsubscribe = 0x13,
    RequestService = 0x14,
    ReleaseService = 0x15,
    SubscribeNack = 0x16,
    SubscribeAck = 0x17,
    Send = 0x18,
    Notify = 0x19,
    NotifyOne = 0x1A,
    RegisterEvent = 0x1B,
    UnregisterEvent = 0x1C,
    IdResponse = 0x1D,
    IdRequest = 0x1E,
    OfferedServicesRequest = 0x1F,
    OfferedServicesResponse = 0x20,
    UnsubscribeAck = 0x21,
    ResendProvidedEvents = 0x22,
    UpdateSecurityPolicy = 0x23,
    UpdateSecurityPolicyResponse = 0x24,
    RemoveSecurityPolicy = 0x25,
    RemoveSecurityPolicyResponse = 0x26,
    UpdateSecurityCredentials = 0x27,
    DistributeSecurityPolicies = 0x28,
    ResetSecurityCredentials = 0x29,
    Expire = 0x2A,
    Suspend = 0x30,
    ConfigId = 0x31,
    Unknown = 0xFF,
}

impl From<u8> for CommandId {
    fn from(v: u8) -> Self {
        use CommandId::*;
        match v {
            0x00 => AssignClientId,
            0x01 => AssignClientAckId,
            0x02 => RegisterApplication,
            0x03 => DeregisterApplication,
            0x05 => RoutingInfo,
            0x06 => RegisteredAck,
            0x07 => Ping,
            0x08 => Pong,
            0x10 => OfferService,
            0x11 => StopOfferService,
            0x12 => Subscribe,
            0x13 => Unsubscribe,
            0x14 => RequestService,
            0x15 => ReleaseService,
            0x16 => SubscribeNack,
            0x17 => SubscribeAck,
            0x18 => Send,
            0x19 => Notify,
            0x1A => NotifyOne,
            0x1B => RegisterEvent,
            0x1C => UnregisterEvent,
            0x1D => IdResponse,
            0x1E => IdRequest,
            0x1F => OfferedServicesRequest,
            0x20 => OfferedServicesResponse,
            0x21 => UnsubscribeAck,
            0x22 => ResendProvidedEvents,
            0x23 => UpdateSecurityPolicy,
            0x24 => UpdateSecurityPolicyResponse,
            0x25 => RemoveSecurityPolicy,
            0x26 => RemoveSecurityPolicyResponse,
            0x27 => UpdateSecurityCredentials,
            0x28 => DistributeSecurityPolicies,
            0x29 => ResetSecurityCredentials,
            0x2A => Expire,
            0x30 => Suspend,
            0x31 => ConfigId,
            _ => Unknown,
        }
    }
}

/// A decoded command envelope: header fields plus the still-encoded payload.
///
/// `payload` is left encoded rather than eagerly parsed into one of the
/// [`commands`] types, mirroring how [`crate::buffer::MessageBuffer`] hands
/// back a raw frame slice — the caller (today, the endpoint's receive loop;
/// eventually the routing host) decides which concrete payload type to
/// decode into based on `id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub id: CommandId,
    pub client: u16,
    pub payload: Bytes,
}

impl Command {
    pub fn new(id: CommandId, client: u16, payload: Bytes) -> Self {
        Command {
            id,
            client,
            payload,
        }
    }

    /// Encodes the 9-byte header + payload (spec §3.2).
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(HEADER_SIZE + self.payload.len());
        buf.put_u8(self.id as u8);
        buf.put_u16_le(PROTOCOL_VERSION);
        buf.put_u16_le(self.client);
        buf.put_u32_le(self.payload.len() as u32);
        buf.put_slice(&self.payload);
        buf.freeze()
    }

    /// Decodes a full frame previously handed back by
    /// [`MessageBuffer::next_message`](crate::buffer::MessageBuffer::next_message).
    ///
    /// The frame is assumed already length-checked by the framing buffer;
    /// this only validates the header fields proper (spec §4.5: "minimum
    /// header length, ... rejects unknown versions with ERROR_UNKNOWN").
    pub fn decode(frame: &[u8]) -> Result<Self, CodecError> {
        if frame.len() < HEADER_SIZE {
            return Err(CodecError::NotEnoughBytes);
        }
        let mut reader = Bytes::copy_from_slice(frame);

        let id = reader.get_u8();
        let version = reader.get_u16_le();
        if version != PROTOCOL_VERSION {
            return Err(CodecError::UnknownVersion(version));
        }
        let client = reader.get_u16_le();
        let size = reader.get_u32_le() as usize;

        if reader.remaining() != size {
            return Err(CodecError::Malformed {
                command: CommandId::from(id),
            });
        }

        Ok(Command {
            id: CommandId::from(id),
            client,
            payload: reader,
        })
    }
}

/// Implemented by concrete command payload types (spec §4.5).
///
/// `encode`/`decode` work against a payload-only byte range — the 9-byte
/// envelope is [`Command`]'s job, not the payload type's.
pub trait Payload: Sized {
    /// The command id this payload type serializes as.
    const ID: CommandId;

    /// Smallest legal payload size, enforced by `decode` (spec §4.5, "optional
    /// per-command minimum size").
    const MIN_SIZE: usize = 0;

    fn encoded_len(&self) -> usize;
    fn encode_to(&self, buf: &mut BytesMut);
    fn decode_from(buf: &mut Bytes) -> Result<Self, CodecError>;

    fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode_to(&mut buf);
        buf.freeze()
    }

    fn decode(mut payload: Bytes) -> Result<Self, CodecError> {
        if payload.len() < Self::MIN_SIZE {
            return Err(CodecError::Mismatch {
                command: Self::ID,
                actual: payload.len(),
            });
        }
        Self::decode_from(&mut payload)
    }
}
