//! POOL control-call transport.
//!
//! This module is the single point of contact with the driver:
//!
//! - [`Driver`]: the fixed operation set of the control-call interface
//! - [`Opener`]: produces driver handles (the character device, or the
//!   in-memory driver)
//! - [`Device`]: one opened handle, shared by the connections and listener
//!   built on it
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │   Connection / Channel / Listener       │
//! ├─────────────────────────────────────────┤
//! │   Device (closed check, errno mapping)  │  ← This module
//! ├─────────────────────────────────────────┤
//! │   Driver: ioctl on /dev/pool | memory   │
//! └─────────────────────────────────────────┘
//! ```

#[cfg(target_os = "linux")]
mod ioctl;
#[cfg(feature = "memory")]
#[cfg_attr(docsrs, doc(cfg(feature = "memory")))]
pub mod memory;
mod types;

use std::fmt;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[cfg(target_os = "linux")]
pub use ioctl::{DevicePath, PoolDevice};
pub use types::{ChannelMap, SessionInfo, SessionState, Telemetry};

use crate::addr::Addr;
use crate::core::constants::MAX_PAYLOAD;
use crate::core::{Error, Op, Result, map_errno};

/// The control-call interface of the POOL driver.
///
/// Every method is one fixed-layout request/response exchange and reports
/// failures as raw OS errors. Implementations must be callable from many
/// threads at once; [`Driver::connect`] and [`Driver::recv`] may block.
pub trait Driver: Send + Sync + fmt::Debug {
    /// Start accepting inbound sessions on `port`.
    fn listen(&self, port: u16) -> io::Result<()>;

    /// Stop accepting inbound sessions.
    fn stop(&self) -> io::Result<()>;

    /// Handshake with `peer`; blocks until it succeeds or fails.
    fn connect(&self, peer: &Addr) -> io::Result<u32>;

    /// Send one message on a session channel.
    fn send(&self, session: u32, channel: u8, data: &[u8]) -> io::Result<()>;

    /// Receive one message into `buf`; blocks until one is pending.
    fn recv(&self, session: u32, channel: u8, buf: &mut [u8]) -> io::Result<usize>;

    /// Snapshot the session table, ordered by index.
    fn sessions(&self) -> io::Result<Vec<SessionInfo>>;

    /// Request teardown of a session.
    fn close_session(&self, session: u32) -> io::Result<()>;

    /// Subscribe to a channel.
    fn channel_subscribe(&self, session: u32, channel: u8) -> io::Result<()>;

    /// Unsubscribe from a channel.
    fn channel_unsubscribe(&self, session: u32, channel: u8) -> io::Result<()>;

    /// Currently subscribed channels.
    fn channel_list(&self, session: u32) -> io::Result<ChannelMap>;
}

/// Produces driver handles.
pub trait Opener: Send + Sync + fmt::Debug {
    /// Open a new handle.
    fn open(&self) -> io::Result<Arc<dyn Driver>>;
}

/// One open handle on the driver.
///
/// All methods are safe to call concurrently. After [`Device::close`] every
/// call fails with [`Error::Closed`] without reaching the driver; calls
/// already running finish on their own reference to the handle.
#[derive(Debug)]
pub struct Device {
    driver: Mutex<Option<Arc<dyn Driver>>>,
}

impl Device {
    /// Open `/dev/pool`.
    #[cfg(target_os = "linux")]
    pub fn open() -> Result<Self> {
        Self::open_with(&DevicePath::default())
    }

    /// Open a handle through `opener`.
    pub fn open_with(opener: &dyn Opener) -> Result<Self> {
        let driver = opener.open().map_err(|e| map_errno(e, Op::Open))?;
        Ok(Self::from_driver(driver))
    }

    /// Wrap an already opened driver handle.
    pub fn from_driver(driver: Arc<dyn Driver>) -> Self {
        Self {
            driver: Mutex::new(Some(driver)),
        }
    }

    /// Whether [`Device::close`] has been called.
    pub fn is_closed(&self) -> bool {
        self.slot().is_none()
    }

    /// Release the handle. A second call fails with [`Error::Closed`].
    pub fn close(&self) -> Result<()> {
        match self.slot().take() {
            Some(_) => Ok(()),
            None => Err(Error::Closed),
        }
    }

    /// Start accepting sessions on `port`.
    pub fn listen(&self, port: u16) -> Result<()> {
        self.call(Op::Control, |d| d.listen(port))
    }

    /// Stop accepting sessions.
    pub fn stop(&self) -> Result<()> {
        self.call(Op::Control, |d| d.stop())
    }

    /// Handshake with `peer` and return the new session index.
    pub fn connect(&self, peer: &Addr) -> Result<u32> {
        self.call(Op::Control, |d| d.connect(peer))
    }

    /// Send `data` on a session channel. Empty payloads are not sent.
    pub fn send(&self, session: u32, channel: u8, data: &[u8]) -> Result<()> {
        if data.len() > MAX_PAYLOAD {
            return Err(Error::MessageTooLarge);
        }
        if data.is_empty() {
            return Ok(());
        }
        self.call(Op::Control, |d| d.send(session, channel, data))
    }

    /// Receive one message into `buf`. An empty buffer receives nothing.
    pub fn recv(&self, session: u32, channel: u8, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        self.call(Op::Recv, |d| d.recv(session, channel, buf))
    }

    /// Snapshot the session table.
    pub fn sessions(&self) -> Result<Vec<SessionInfo>> {
        self.call(Op::Control, |d| d.sessions())
    }

    /// Find one session in the table.
    pub fn session(&self, index: u32) -> Result<SessionInfo> {
        self.sessions()?
            .into_iter()
            .find(|s| s.index == index)
            .ok_or(Error::NotEstablished)
    }

    /// Request teardown of a session.
    pub fn close_session(&self, session: u32) -> Result<()> {
        self.call(Op::Control, |d| d.close_session(session))
    }

    /// Subscribe to a channel.
    pub fn channel_subscribe(&self, session: u32, channel: u8) -> Result<()> {
        self.call(Op::Control, |d| d.channel_subscribe(session, channel))
    }

    /// Unsubscribe from a channel.
    pub fn channel_unsubscribe(&self, session: u32, channel: u8) -> Result<()> {
        self.call(Op::Control, |d| d.channel_unsubscribe(session, channel))
    }

    /// Subscribed channels of a session.
    pub fn channel_list(&self, session: u32) -> Result<ChannelMap> {
        self.call(Op::Control, |d| d.channel_list(session))
    }

    fn slot(&self) -> MutexGuard<'_, Option<Arc<dyn Driver>>> {
        self.driver.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run one control call on a private reference to the handle.
    fn call<T>(&self, op: Op, f: impl FnOnce(&dyn Driver) -> io::Result<T>) -> Result<T> {
        let driver = self.slot().clone().ok_or(Error::Closed)?;
        f(driver.as_ref()).map_err(|e| map_errno(e, op))
    }
}
