//! Snapshots returned by the driver's session table and channel queries.

use std::fmt;
use std::time::Duration;

use crate::addr::Addr;
use crate::core::constants::{
    MAX_CHANNELS, SESSION_ID_SIZE, STATE_CHALLENGED, STATE_CLOSING, STATE_ESTABLISHED,
    STATE_IDLE, STATE_INIT_SENT, STATE_REKEYING,
};

/// Protocol state of a session, as reported by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// No handshake yet.
    Idle,
    /// INIT sent.
    InitSent,
    /// Challenge received.
    Challenged,
    /// Data may flow.
    Established,
    /// Rotating keys; data still flows.
    Rekeying,
    /// Being torn down.
    Closing,
    /// A code this library does not know.
    Unknown(u8),
}

impl SessionState {
    /// Decode the driver's state byte. Never fails.
    pub fn from_code(code: u8) -> Self {
        match code {
            STATE_IDLE => SessionState::Idle,
            STATE_INIT_SENT => SessionState::InitSent,
            STATE_CHALLENGED => SessionState::Challenged,
            STATE_ESTABLISHED => SessionState::Established,
            STATE_REKEYING => SessionState::Rekeying,
            STATE_CLOSING => SessionState::Closing,
            other => SessionState::Unknown(other),
        }
    }

    /// The driver's state byte.
    pub fn code(self) -> u8 {
        match self {
            SessionState::Idle => STATE_IDLE,
            SessionState::InitSent => STATE_INIT_SENT,
            SessionState::Challenged => STATE_CHALLENGED,
            SessionState::Established => STATE_ESTABLISHED,
            SessionState::Rekeying => STATE_REKEYING,
            SessionState::Closing => STATE_CLOSING,
            SessionState::Unknown(code) => code,
        }
    }

    /// Upper-case name, `"UNKNOWN"` for unrecognized codes.
    pub fn as_str(self) -> &'static str {
        match self {
            SessionState::Idle => "IDLE",
            SessionState::InitSent => "INIT_SENT",
            SessionState::Challenged => "CHALLENGED",
            SessionState::Established => "ESTABLISHED",
            SessionState::Rekeying => "REKEYING",
            SessionState::Closing => "CLOSING",
            SessionState::Unknown(_) => "UNKNOWN",
        }
    }

    /// Whether application data can be exchanged.
    pub fn is_established(self) -> bool {
        self == SessionState::Established
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time performance figures, refreshed by the driver every
/// heartbeat.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Telemetry {
    /// Smoothed round-trip time.
    pub rtt: Duration,
    /// Round-trip jitter.
    pub jitter: Duration,
    /// Loss rate in parts per million.
    pub loss_rate_ppm: u32,
    /// Throughput in bytes per second.
    pub throughput_bps: u32,
    /// Current path MTU.
    pub mtu: u16,
    /// Packets waiting to be sent.
    pub queue_depth: u16,
    /// Time since the session was established.
    pub uptime: Duration,
    /// Completed key rotations.
    pub rekey_count: u32,
    /// Configuration version in force.
    pub config_version: u32,
}

impl Telemetry {
    /// Loss rate as a fraction in `[0, 1]`.
    pub fn loss_ratio(&self) -> f64 {
        f64::from(self.loss_rate_ppm) / 1_000_000.0
    }
}

/// One row of the driver's session table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    /// Index assigned by the driver.
    pub index: u32,
    /// Remote endpoint.
    pub peer: Addr,
    /// Protocol state.
    pub state: SessionState,
    /// 128-bit session identifier.
    pub session_id: [u8; SESSION_ID_SIZE],
    /// Payload bytes sent.
    pub bytes_sent: u64,
    /// Payload bytes received.
    pub bytes_recv: u64,
    /// Packets sent.
    pub packets_sent: u64,
    /// Packets received.
    pub packets_recv: u64,
    /// Completed key rotations.
    pub rekey_count: u32,
    /// Latest telemetry.
    pub telemetry: Telemetry,
}

/// Bitmap of subscribed channels; bit `i` stands for channel `i`.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ChannelMap([u8; MAX_CHANNELS / 8]);

impl ChannelMap {
    /// An empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap the raw bitmap returned by the driver.
    pub fn from_bytes(bytes: [u8; MAX_CHANNELS / 8]) -> Self {
        Self(bytes)
    }

    /// The raw bitmap.
    pub fn as_bytes(&self) -> &[u8; MAX_CHANNELS / 8] {
        &self.0
    }

    /// Whether `channel` is subscribed.
    pub fn contains(&self, channel: u8) -> bool {
        let (byte, bit) = Self::slot(channel);
        self.0[byte] & bit != 0
    }

    /// Mark `channel` as subscribed.
    pub fn insert(&mut self, channel: u8) {
        let (byte, bit) = Self::slot(channel);
        self.0[byte] |= bit;
    }

    /// Clear `channel`.
    pub fn remove(&mut self, channel: u8) {
        let (byte, bit) = Self::slot(channel);
        self.0[byte] &= !bit;
    }

    /// Number of subscribed channels.
    pub fn len(&self) -> usize {
        self.0.iter().map(|b| b.count_ones() as usize).sum()
    }

    /// Whether no channel is subscribed.
    pub fn is_empty(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }

    /// Subscribed channels in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = u8> + '_ {
        (0..=u8::MAX).filter(move |ch| self.contains(*ch))
    }

    fn slot(channel: u8) -> (usize, u8) {
        (usize::from(channel / 8), 1 << (channel % 8))
    }
}

impl fmt::Debug for ChannelMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_names() {
        assert_eq!(SessionState::from_code(3).as_str(), "ESTABLISHED");
        assert_eq!(SessionState::from_code(1).to_string(), "INIT_SENT");
        assert_eq!(SessionState::from_code(42).as_str(), "UNKNOWN");
        assert_eq!(SessionState::from_code(42).code(), 42);
        for code in 0..=5 {
            assert_eq!(SessionState::from_code(code).code(), code);
        }
    }

    #[test]
    fn test_channel_map() {
        let mut map = ChannelMap::new();
        assert!(map.is_empty());

        map.insert(0);
        map.insert(5);
        map.insert(255);
        assert!(map.contains(5));
        assert!(!map.contains(6));
        assert_eq!(map.len(), 3);
        assert_eq!(map.iter().collect::<Vec<_>>(), vec![0, 5, 255]);
        assert_eq!(map.as_bytes()[0], 0b0010_0001);

        map.remove(5);
        assert!(!map.contains(5));
        assert_eq!(format!("{map:?}"), "{0, 255}");
    }

    #[test]
    fn test_loss_ratio() {
        let t = Telemetry {
            loss_rate_ppm: 25_000,
            ..Default::default()
        };
        assert!((t.loss_ratio() - 0.025).abs() < f64::EPSILON);
    }
}
