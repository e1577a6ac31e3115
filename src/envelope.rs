//! Wire envelope: the tagged message shapes exchanged over an established
//! transport, after AEAD decryption.
//!
//! Binary encoding via `bincode` over plain `serde`-derived enums, no
//! hand-rolled tag bytes.

use serde::{Deserialize, Serialize};

use crate::constants::MAX_MESSAGE_SIZE;
use crate::errors::CodecError;

/// Messages the daemon sends to this side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Inbound {
    /// Sent once, immediately after a transport is usable, before any other
    /// traffic. First frame seen on a fresh connection must be this variant.
    ConnectionReady,
    /// A session-lifecycle event. `None` means "event received but this
    /// protocol version doesn't know its shape" and must NOT be published on
    /// `session_events` (spec invariant: unset-variant-no-publish).
    SessionEvent(Option<SessionEvent>),
    /// A terminal I/O event. Same empty-variant-drops convention as
    /// `SessionEvent`.
    TerminalEvent(Option<TerminalEvent>),
    /// Full state snapshot, replayed to late subscribers via a replay-1
    /// broadcast. Unlike `SessionEvent`/`TerminalEvent`, an unrecognised
    /// initial-state frame still publishes an empty marker rather than being
    /// dropped (spec's documented empty-wrapper asymmetry).
    InitialState(Option<StateSnapshot>),
    /// Reserved for a future clipboard-sync feature; currently always
    /// unhandled on receipt.
    Clipboard(Vec<u8>),
    /// Heartbeat reply.
    Pong,
}

/// Messages this side sends to the daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Outbound {
    /// Sent once, immediately after a transport is usable, before any other
    /// traffic, bounded by `connection_ready_send_timeout`. First frame this
    /// side ever sends on a fresh connection.
    ConnectionReady,
    /// A session-management command (create/attach/kill a session, etc).
    SessionCommand(SessionCommand),
    /// Raw terminal input bound for the active session.
    TerminalCommand(TerminalCommand),
    /// Heartbeat probe.
    Ping,
    /// Clipboard payload to push to the daemon side.
    Clipboard(Vec<u8>),
}

/// Session-lifecycle event payload (deliberately opaque beyond routing: the
/// mobile app interprets the fields, the core only transports them).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionEvent {
    /// Identifier of the session this event concerns.
    pub session_id: String,
    /// Event kind as reported by the daemon.
    pub kind: String,
    /// Opaque JSON-ish payload, passed through verbatim.
    pub data: serde_json::Value,
}

/// Terminal I/O event payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerminalEvent {
    /// Identifier of the session this output belongs to.
    pub session_id: String,
    /// Raw output bytes.
    pub bytes: Vec<u8>,
}

/// Full state snapshot payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StateSnapshot {
    /// Sessions known to the daemon at snapshot time.
    pub sessions: Vec<String>,
}

/// A session-management command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionCommand {
    /// Identifier of the session this command targets, or a fresh one for
    /// "create".
    pub session_id: String,
    /// Command verb, opaque to the core.
    pub verb: String,
}

/// Raw terminal input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerminalCommand {
    /// Identifier of the target session.
    pub session_id: String,
    /// Bytes to write to the session's input stream.
    pub bytes: Vec<u8>,
}

/// Serialize `message` with `bincode`, enforcing the size cap before handing
/// the bytes to [`crate::codec::Codec::encode`].
///
/// # Errors
///
/// Returns [`CodecError::TooLarge`] if the encoded form exceeds
/// [`MAX_MESSAGE_SIZE`], or [`CodecError::Malformed`] if `bincode` itself
/// fails to serialize.
pub fn encode_outbound(message: &Outbound) -> Result<Vec<u8>, CodecError> {
    let bytes = bincode::serialize(message).map_err(|_| CodecError::Malformed)?;
    if bytes.len() > MAX_MESSAGE_SIZE {
        return Err(CodecError::TooLarge {
            size: bytes.len(),
            limit: MAX_MESSAGE_SIZE,
        });
    }
    Ok(bytes)
}

/// Deserialize a decrypted plaintext blob into an [`Inbound`] message.
///
/// # Errors
///
/// Returns [`CodecError::TooLarge`] if `bytes` exceeds [`MAX_MESSAGE_SIZE`],
/// or [`CodecError::Malformed`] if the bytes don't decode as a well-formed
/// `Inbound`.
pub fn decode_inbound(bytes: &[u8]) -> Result<Inbound, CodecError> {
    if bytes.len() > MAX_MESSAGE_SIZE {
        return Err(CodecError::TooLarge {
            size: bytes.len(),
            limit: MAX_MESSAGE_SIZE,
        });
    }
    bincode::deserialize(bytes).map_err(|_| CodecError::Malformed)
}
