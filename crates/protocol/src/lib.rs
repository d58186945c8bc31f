//! Wire contract for both edges of the multiplexer: the upstream gateway
//! link and the front-end real-time channel.
//!
//! Frames are small tagged JSON records. The upstream side uses
//! SCREAMING_SNAKE_CASE type tags, the front-end side snake_case; both use
//! camelCase field names. Unknown inbound frame types are ignored, never
//! errors.

pub mod channel;
pub mod client;
pub mod upstream;

pub use channel::ChannelKind;

/// Heartbeat ping interval while the upstream link is open, in seconds.
pub const HEARTBEAT_INTERVAL_SECS: u64 = 30;

/// Base delay for linear reconnect backoff: attempt n waits `base × n`.
pub const RECONNECT_BASE_SECS: u64 = 5;

/// Reconnect attempts before the upstream link stays down until restart.
pub const RECONNECT_MAX_ATTEMPTS: u32 = 5;

/// How long a pairing request may stay pending before it times out.
pub const PAIRING_TIMEOUT_SECS: u64 = 120;

/// Default pairing-code lifetime when the gateway omits `expiresAt`.
pub const QR_EXPIRY_SECS: u64 = 60;
