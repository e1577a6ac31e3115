//! Wire-level and protocol constants shared across the connection core.

/// Default LAN-direct WebSocket port.
pub const LAN_DEFAULT_PORT: u16 = 8765;

/// Default Tailscale-UDP port.
pub const TAILSCALE_DEFAULT_PORT: u16 = 9876;

/// Tailscale handshake magic value, `"RAST"` as big-endian `u32`.
pub const TAILSCALE_HANDSHAKE_MAGIC: u32 = 0x5241_5354;

/// Maximum plaintext frame size: 16 MiB.
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Maximum UDP datagram payload (65_507 bytes) minus the 4-byte length prefix
/// used by the Tailscale transport's per-datagram framing.
pub const TAILSCALE_MAX_DATAGRAM_PAYLOAD: usize = 65_507 - 4;

/// AES-256-GCM key size in bytes.
pub const AUTH_KEY_SIZE: usize = 32;

/// AES-GCM nonce size in bytes (96 bits).
pub const NONCE_SIZE: usize = 12;
