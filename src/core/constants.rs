//! Protocol constants shared with the POOL kernel module.
//!
//! These values mirror `pool.h` and MUST NOT be changed independently of
//! the driver.

use std::time::Duration;

// =============================================================================
// DEVICE
// =============================================================================

/// Path of the character device exposed by the kernel module.
pub const DEVICE_PATH: &str = "/dev/pool";

/// Network token accepting either address family.
pub const NETWORK_DUAL: &str = "pool";

/// Network token restricted to IPv4 peers.
pub const NETWORK_V4: &str = "pool4";

/// Network token restricted to IPv6 peers.
pub const NETWORK_V6: &str = "pool6";

// =============================================================================
// LIMITS
// =============================================================================

/// Largest payload a single send may carry.
pub const MAX_PAYLOAD: usize = 65535;

/// Capacity of the driver's session table.
pub const MAX_SESSIONS: usize = 64;

/// Number of addressable channels per session.
pub const MAX_CHANNELS: usize = 256;

/// Channel used by plain connection reads and writes.
pub const DEFAULT_CHANNEL: u8 = 0;

/// Session identifier size (128-bit).
pub const SESSION_ID_SIZE: usize = 16;

/// Size of the peer address field in control requests.
pub const PEER_ADDR_SIZE: usize = 16;

/// Well-known POOL port.
pub const DEFAULT_PORT: u16 = 9253;

/// Path MTU assumed by the driver before probing.
pub const DEFAULT_MTU: u16 = 1400;

/// Smallest MTU the driver will fall back to.
pub const MIN_MTU: u16 = 512;

// =============================================================================
// TIMING
// =============================================================================

/// Interval at which the driver refreshes session telemetry.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

/// Default delay between two session-table scans while accepting.
pub const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Shortest accepted delay between session-table scans.
pub const MIN_ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(1);

// =============================================================================
// SESSION STATES
// =============================================================================

/// No handshake has started.
pub const STATE_IDLE: u8 = 0;

/// INIT sent, waiting for the challenge.
pub const STATE_INIT_SENT: u8 = 1;

/// Challenge received, response pending.
pub const STATE_CHALLENGED: u8 = 2;

/// Application data may flow.
pub const STATE_ESTABLISHED: u8 = 3;

/// Key rotation in progress; data still flows.
pub const STATE_REKEYING: u8 = 4;

/// Teardown in progress.
pub const STATE_CLOSING: u8 = 5;

// =============================================================================
// CHANNEL OPERATIONS
// =============================================================================

/// Subscribe to a channel.
pub const CHAN_SUBSCRIBE: u8 = 1;

/// Unsubscribe from a channel.
pub const CHAN_UNSUBSCRIBE: u8 = 2;

/// List subscribed channels as a bitmap.
pub const CHAN_LIST: u8 = 3;
