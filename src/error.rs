//! Crate-wide error types.
//!
//! Each subsystem that can fail in a way the caller needs to distinguish gets
//! its own variant family here, in the style of `webrtc-sctp`'s flat
//! `thiserror` enum: named variants, no stringly-typed errors, no panics in
//! non-test code.

use thiserror::Error;

use crate::codec::CommandId;

/// Protocol-level decode errors raised by the command codec (spec §7).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("not enough bytes for command header")]
    NotEnoughBytes,
    #[error("declared payload length {declared} exceeds configured maximum {max}")]
    MaxCommandSizeExceeded { declared: u32, max: u32 },
    #[error("payload size {actual} does not match expected size for command {command:?}")]
    Mismatch { command: CommandId, actual: usize },
    #[error("malformed payload for command {command:?}")]
    Malformed { command: CommandId },
    #[error("unknown or unsupported protocol version {0}")]
    UnknownVersion(u16),
    #[error("unknown command id {0:#04x}")]
    UnknownCommand(u8),
}

/// Errors raised by the framing buffer (spec §4.1, §7).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BufferError {
    #[error("message length {declared} exceeds max_message_length {max}")]
    MessageTooLarge { declared: u32, max: u32 },
    #[error("buffer size arithmetic overflowed")]
    Overflow,
}

/// Top-level error type returned by the endpoint, acceptor and server.
///
/// Mirrors `webrtc-sctp::error::Error`: a single flat enum, `From` impls for
/// the lower-level error families, and `std::io::Error` folded in directly
/// since socket I/O is the other major failure source (spec §7, "I/O
/// errors").
#[derive(Error, Debug)]
pub enum Error {
    #[error("protocol decode error: {0}")]
    Codec(#[from] CodecError),

    #[error("framing buffer error: {0}")]
    Buffer(#[from] BufferError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("connect retries exhausted after {attempts} attempts")]
    ConnectRetriesExhausted { attempts: u32 },

    #[error("peer credential check failed")]
    CredentialDenied,

    #[error("message dropped: {reason}")]
    SendRejected { reason: &'static str },

    #[error("endpoint is stopped")]
    EndpointStopped,

    #[error("handshake dropped: {reason}")]
    HandshakeDropped { reason: &'static str },
}
