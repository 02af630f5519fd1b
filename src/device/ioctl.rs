//! Raw control calls on `/dev/pool`.
//!
//! The structures below must match `pool.h` byte for byte. Every request
//! goes through [`PoolDevice::ioctl`], the only unsafe code in the crate.

#![allow(unsafe_code)]

use std::fs::{File, OpenOptions};
use std::io;
use std::mem::size_of;
use std::os::fd::{AsRawFd, OwnedFd};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use super::types::{ChannelMap, SessionInfo, SessionState, Telemetry};
use super::{Driver, Opener};
use crate::addr::Addr;
use crate::core::constants::{
    CHAN_LIST, CHAN_SUBSCRIBE, CHAN_UNSUBSCRIBE, DEVICE_PATH, MAX_CHANNELS, MAX_PAYLOAD,
    MAX_SESSIONS, PEER_ADDR_SIZE, SESSION_ID_SIZE,
};

// =============================================================================
// IOCTL NUMBERS
//
// dir(2) | size(14) | type(8) | nr(8), type = 'P'
// =============================================================================

const IOC_MAGIC: u32 = b'P' as u32;
const IOC_NONE: u32 = 0;
const IOC_WRITE: u32 = 1;
const IOC_READ: u32 = 2;

const fn ioc(dir: u32, nr: u32, size: usize) -> u32 {
    (dir << 30) | ((size as u32) << 16) | (IOC_MAGIC << 8) | nr
}

/// Start accepting sessions on a port.
pub const POOL_IOC_LISTEN: u32 = ioc(IOC_WRITE, 1, size_of::<u16>());
/// Handshake with a peer; returns the session index.
pub const POOL_IOC_CONNECT: u32 = ioc(IOC_WRITE, 2, size_of::<ConnectReq>());
/// Send one message.
pub const POOL_IOC_SEND: u32 = ioc(IOC_WRITE, 3, size_of::<SendReq>());
/// Receive one message.
pub const POOL_IOC_RECV: u32 = ioc(IOC_READ | IOC_WRITE, 4, size_of::<RecvReq>());
/// Copy out the session table.
pub const POOL_IOC_SESSIONS: u32 = ioc(IOC_READ | IOC_WRITE, 5, size_of::<SessionList>());
/// Tear down one session.
pub const POOL_IOC_CLOSE_SESS: u32 = ioc(IOC_WRITE, 6, size_of::<u32>());
/// Stop the listener.
pub const POOL_IOC_STOP: u32 = ioc(IOC_NONE, 7, 0);
/// Channel subscribe/unsubscribe/list.
pub const POOL_IOC_CHANNEL: u32 = ioc(IOC_READ | IOC_WRITE, 8, size_of::<ChannelReq>());

// =============================================================================
// REQUEST LAYOUTS
// =============================================================================

/// `struct pool_connect_req`.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct ConnectReq {
    /// v4-mapped or native IPv6 address.
    pub peer_addr: [u8; PEER_ADDR_SIZE],
    /// Peer port, host order.
    pub peer_port: u16,
    /// `AF_INET` or `AF_INET6`.
    pub addr_family: u8,
    reserved: [u8; 5],
}

/// `struct pool_send_req`.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct SendReq {
    /// Target session.
    pub session_idx: u32,
    /// Target channel.
    pub channel: u8,
    /// Send flags.
    pub flags: u8,
    reserved: u16,
    /// Payload length.
    pub len: u32,
    /// Userspace pointer to the payload.
    pub data_ptr: u64,
}

/// `struct pool_recv_req`. `len` is the capacity on entry and the received
/// length on return.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct RecvReq {
    /// Source session.
    pub session_idx: u32,
    /// Source channel.
    pub channel: u8,
    /// Receive flags.
    pub flags: u8,
    reserved: u16,
    /// Buffer capacity in, bytes received out.
    pub len: u32,
    /// Userspace pointer to the buffer.
    pub data_ptr: u64,
}

/// `struct pool_telemetry`.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct TelemetryRaw {
    pub rtt_ns: u64,
    pub jitter_ns: u64,
    pub loss_rate_ppm: u32,
    pub throughput_bps: u32,
    pub mtu_current: u16,
    pub queue_depth: u16,
    pub uptime_ns: u64,
    pub rekey_count: u32,
    pub config_version: u32,
}

/// `struct pool_session_info`.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionInfoRaw {
    pub index: u32,
    pub peer_addr: [u8; PEER_ADDR_SIZE],
    pub peer_port: u16,
    pub addr_family: u8,
    pub state: u8,
    pub session_id: [u8; SESSION_ID_SIZE],
    pub bytes_sent: u64,
    pub bytes_recv: u64,
    pub packets_sent: u64,
    pub packets_recv: u64,
    pub rekey_count: u32,
    pub telemetry: TelemetryRaw,
}

/// `struct pool_session_list`.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionList {
    /// Rows written by the driver.
    pub count: u32,
    /// Capacity of the caller's array.
    pub max_sessions: u32,
    /// Userspace pointer to `[SessionInfoRaw]`.
    pub info_ptr: u64,
}

/// `struct pool_channel_req`.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct ChannelReq {
    pub session_idx: u32,
    pub channel: u8,
    /// One of `CHAN_SUBSCRIBE`, `CHAN_UNSUBSCRIBE`, `CHAN_LIST`.
    pub operation: u8,
    reserved: u16,
    pub result: u32,
    /// For LIST: pointer to the 32-byte bitmap.
    pub data_ptr: u64,
}

impl From<&TelemetryRaw> for Telemetry {
    fn from(raw: &TelemetryRaw) -> Self {
        Telemetry {
            rtt: Duration::from_nanos(raw.rtt_ns),
            jitter: Duration::from_nanos(raw.jitter_ns),
            loss_rate_ppm: raw.loss_rate_ppm,
            throughput_bps: raw.throughput_bps,
            mtu: raw.mtu_current,
            queue_depth: raw.queue_depth,
            uptime: Duration::from_nanos(raw.uptime_ns),
            rekey_count: raw.rekey_count,
            config_version: raw.config_version,
        }
    }
}

impl From<&SessionInfoRaw> for SessionInfo {
    fn from(raw: &SessionInfoRaw) -> Self {
        SessionInfo {
            index: raw.index,
            peer: Addr::from_octets(raw.peer_addr, raw.peer_port),
            state: SessionState::from_code(raw.state),
            session_id: raw.session_id,
            bytes_sent: raw.bytes_sent,
            bytes_recv: raw.bytes_recv,
            packets_sent: raw.packets_sent,
            packets_recv: raw.packets_recv,
            rekey_count: raw.rekey_count,
            telemetry: Telemetry::from(&raw.telemetry),
        }
    }
}

// =============================================================================
// DEVICE
// =============================================================================

/// An open descriptor on the POOL character device.
///
/// The descriptor closes when the last reference drops, so a call already
/// running keeps it alive even after [`super::Device::close`].
#[derive(Debug)]
pub struct PoolDevice {
    fd: OwnedFd,
}

impl PoolDevice {
    /// Open the device read-write.
    pub fn open(path: &Path) -> io::Result<Self> {
        let file: File = OpenOptions::new().read(true).write(true).open(path)?;
        Ok(Self { fd: file.into() })
    }

    /// Issue one control call. Returns the call's non-negative result.
    fn ioctl<T>(&self, request: u32, arg: *mut T) -> io::Result<i32> {
        // SAFETY: `arg` is either null (STOP) or points to a live, properly
        // sized `#[repr(C)]` request owned by the caller for the duration of
        // the call. Any embedded data pointer references a buffer the caller
        // also keeps alive and sized as declared in the request.
        let ret = unsafe { libc::ioctl(self.fd.as_raw_fd(), request as _, arg) };
        if ret < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(ret)
        }
    }

    fn channel_op(&self, session: u32, channel: u8, operation: u8) -> io::Result<()> {
        let mut req = ChannelReq {
            session_idx: session,
            channel,
            operation,
            ..Default::default()
        };
        self.ioctl(POOL_IOC_CHANNEL, std::ptr::from_mut(&mut req)).map(drop)
    }
}

impl Driver for PoolDevice {
    fn listen(&self, port: u16) -> io::Result<()> {
        let mut port = port;
        self.ioctl(POOL_IOC_LISTEN, std::ptr::from_mut(&mut port)).map(drop)
    }

    fn stop(&self) -> io::Result<()> {
        self.ioctl(POOL_IOC_STOP, std::ptr::null_mut::<u8>()).map(drop)
    }

    fn connect(&self, peer: &Addr) -> io::Result<u32> {
        let mut req = ConnectReq {
            peer_addr: peer.octets(),
            peer_port: peer.port(),
            addr_family: peer.family(),
            ..Default::default()
        };
        let index = self.ioctl(POOL_IOC_CONNECT, std::ptr::from_mut(&mut req))?;
        u32::try_from(index).map_err(io::Error::other)
    }

    fn send(&self, session: u32, channel: u8, data: &[u8]) -> io::Result<()> {
        if data.len() > MAX_PAYLOAD {
            return Err(io::Error::from_raw_os_error(libc::EMSGSIZE));
        }
        let mut req = SendReq {
            session_idx: session,
            channel,
            len: data.len() as u32,
            data_ptr: data.as_ptr() as u64,
            ..Default::default()
        };
        self.ioctl(POOL_IOC_SEND, std::ptr::from_mut(&mut req)).map(drop)
    }

    fn recv(&self, session: u32, channel: u8, buf: &mut [u8]) -> io::Result<usize> {
        let mut req = RecvReq {
            session_idx: session,
            channel,
            len: u32::try_from(buf.len()).unwrap_or(u32::MAX),
            data_ptr: buf.as_mut_ptr() as u64,
            ..Default::default()
        };
        self.ioctl(POOL_IOC_RECV, std::ptr::from_mut(&mut req))?;
        Ok((req.len as usize).min(buf.len()))
    }

    fn sessions(&self) -> io::Result<Vec<SessionInfo>> {
        let mut rows = vec![SessionInfoRaw::default(); MAX_SESSIONS];
        let mut list = SessionList {
            count: 0,
            max_sessions: MAX_SESSIONS as u32,
            info_ptr: rows.as_mut_ptr() as u64,
        };
        self.ioctl(POOL_IOC_SESSIONS, std::ptr::from_mut(&mut list))?;
        rows.truncate((list.count as usize).min(MAX_SESSIONS));
        Ok(rows.iter().map(SessionInfo::from).collect())
    }

    fn close_session(&self, session: u32) -> io::Result<()> {
        let mut index = session;
        self.ioctl(POOL_IOC_CLOSE_SESS, std::ptr::from_mut(&mut index)).map(drop)
    }

    fn channel_subscribe(&self, session: u32, channel: u8) -> io::Result<()> {
        self.channel_op(session, channel, CHAN_SUBSCRIBE)
    }

    fn channel_unsubscribe(&self, session: u32, channel: u8) -> io::Result<()> {
        self.channel_op(session, channel, CHAN_UNSUBSCRIBE)
    }

    fn channel_list(&self, session: u32) -> io::Result<ChannelMap> {
        let mut bitmap = [0u8; MAX_CHANNELS / 8];
        let mut req = ChannelReq {
            session_idx: session,
            operation: CHAN_LIST,
            data_ptr: bitmap.as_mut_ptr() as u64,
            ..Default::default()
        };
        self.ioctl(POOL_IOC_CHANNEL, std::ptr::from_mut(&mut req))?;
        Ok(ChannelMap::from_bytes(bitmap))
    }
}

/// Opens the character device at a path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DevicePath(PathBuf);

impl DevicePath {
    /// Use the device at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self(path.into())
    }

    /// The configured path.
    pub fn path(&self) -> &Path {
        &self.0
    }
}

impl Default for DevicePath {
    fn default() -> Self {
        Self::new(DEVICE_PATH)
    }
}

impl Opener for DevicePath {
    fn open(&self) -> io::Result<Arc<dyn Driver>> {
        Ok(Arc::new(PoolDevice::open(&self.0)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_struct_layouts() {
        assert_eq!(size_of::<ConnectReq>(), 24);
        assert_eq!(size_of::<SendReq>(), 24);
        assert_eq!(size_of::<RecvReq>(), 24);
        assert_eq!(size_of::<TelemetryRaw>(), 48);
        assert_eq!(size_of::<SessionList>(), 16);
        assert_eq!(size_of::<ChannelReq>(), 24);
        assert_eq!(size_of::<SessionInfoRaw>(), 128);
    }

    #[test]
    fn test_ioctl_numbers() {
        // _IOW('P', 1, __u16)
        assert_eq!(POOL_IOC_LISTEN, 0x4002_5001);
        // _IO('P', 7)
        assert_eq!(POOL_IOC_STOP, 0x0000_5007);
        // _IOW('P', 6, __u32)
        assert_eq!(POOL_IOC_CLOSE_SESS, 0x4004_5006);
        // _IOWR('P', 4, struct pool_recv_req)
        assert_eq!(POOL_IOC_RECV, 0xc018_5004);
    }

    #[test]
    fn test_session_row_conversion() {
        let mut raw = SessionInfoRaw {
            index: 7,
            peer_port: 9253,
            state: 3,
            bytes_sent: 10,
            ..Default::default()
        };
        raw.peer_addr[10] = 0xff;
        raw.peer_addr[11] = 0xff;
        raw.peer_addr[12..].copy_from_slice(&[10, 0, 0, 1]);
        raw.telemetry.rtt_ns = 1_500_000;

        let info = SessionInfo::from(&raw);
        assert_eq!(info.index, 7);
        assert_eq!(info.peer.to_string(), "10.0.0.1:9253");
        assert!(info.state.is_established());
        assert_eq!(info.telemetry.rtt, Duration::from_micros(1500));
    }

    #[test]
    fn test_missing_device() {
        let opener = DevicePath::new("/nonexistent/pool-device");
        let err = opener.open().unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::ENOENT));
    }
}
