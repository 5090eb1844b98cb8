//! Protocol sizing and timing constants.

/// Largest accepted packet payload. RFC4253 requires implementations accept
/// at least 32768; a little slack is allowed for headers from imperfect
/// peers.
pub const MAX_PACKET_PAYLOAD: usize = 32 * 1024;

/// Slack on top of [`MAX_PACKET_PAYLOAD`] for length, padding and headers.
pub const PACKET_SLACK: usize = 256;

/// Default maximum data packet size advertised for our channels.
pub const DEFAULT_MAX_PACKET: usize = 32 * 1024;

/// Default receive window, 4x the packet size.
pub const DEFAULT_WINDOW: usize = 4 * DEFAULT_MAX_PACKET;

/// Interval without traffic after which a keep-alive SSH_MSG_IGNORE
/// is sent on an authenticated connection.
pub const KEEPALIVE_INTERVAL_SECS: u64 = 60;

/// Outbound packets before the client volunteers a rekey.
/// Conservative relative to the RFC4344 recommendation.
pub const REKEY_PACKETS: u32 = 1 << 28;

/// Cap on agent keys attempted per connection.
pub const MAX_AGENT_KEY_ATTEMPTS: usize = 3;

/// Cap on password or keyboard-interactive rounds per connection.
pub const MAX_INTERACTIVE_ATTEMPTS: usize = 3;

pub const DEFAULT_TERM: &str = "xterm";
