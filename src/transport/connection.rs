//! Deadline-aware stream over one POOL session.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use tracing::{debug, trace, warn};

use super::channel::Channel;
use super::deadline;
use crate::addr::Addr;
use crate::core::constants::{DEFAULT_CHANNEL, MAX_PAYLOAD};
use crate::core::{Error, Result};
use crate::device::{ChannelMap, Device, SessionInfo, SessionState, Telemetry};

/// Mutable per-connection state, guarded by one lock.
#[derive(Debug, Default)]
struct ConnState {
    closed: bool,
    read_deadline: Option<Instant>,
    write_deadline: Option<Instant>,
    /// Channels with a live [`Channel`] handle.
    open_channels: ChannelMap,
}

/// Shared by a [`Connection`] and the channels opened on it.
#[derive(Debug)]
pub(crate) struct ConnInner {
    device: Arc<Device>,
    /// Dialed connections own their handle; accepted ones borrow the
    /// listener's.
    owns_device: bool,
    session: u32,
    local: Addr,
    remote: Addr,
    channel: u8,
    state: Mutex<ConnState>,
}

impl ConnInner {
    fn state(&self) -> MutexGuard<'_, ConnState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn device(&self) -> &Arc<Device> {
        &self.device
    }

    pub(crate) fn session(&self) -> u32 {
        self.session
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.state().closed
    }

    /// Forget the handle for `channel`. Returns whether the connection is
    /// still open, i.e. whether the driver should be told to unsubscribe.
    pub(crate) fn release_channel(&self, channel: u8) -> bool {
        let mut state = self.state();
        state.open_channels.remove(channel);
        !state.closed
    }
}

impl Drop for ConnInner {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        if state.closed {
            return;
        }
        state.closed = true;
        match self.device.close_session(self.session) {
            Ok(()) | Err(Error::Closed) | Err(Error::NotEstablished) => {}
            Err(e) => warn!(session = self.session, error = %e, "session teardown on drop failed"),
        }
        if self.owns_device {
            let _ = self.device.close();
        }
    }
}

/// An established POOL session.
///
/// [`read`](Connection::read) and [`write`](Connection::write) use the
/// default channel (0); use [`open_channel`](Connection::open_channel) for
/// the others. All methods take `&self` and are safe to call concurrently;
/// concurrent writers may interleave their messages.
///
/// Dropping a connection that was never closed requests session teardown.
#[derive(Debug)]
pub struct Connection {
    inner: Arc<ConnInner>,
}

impl Connection {
    pub(crate) fn new(
        device: Arc<Device>,
        owns_device: bool,
        session: u32,
        local: Addr,
        remote: Addr,
    ) -> Self {
        Self {
            inner: Arc::new(ConnInner {
                device,
                owns_device,
                session,
                local,
                remote,
                channel: DEFAULT_CHANNEL,
                state: Mutex::new(ConnState::default()),
            }),
        }
    }

    /// Read one message into `buf`.
    ///
    /// Honors the read deadline in force when the call starts. An expired
    /// deadline fails with [`Error::Timeout`] without touching the driver;
    /// the connection stays usable after a timeout.
    pub async fn read(&self, buf: &mut [u8]) -> Result<usize> {
        let deadline = self.enter(|s| s.read_deadline)?;
        if buf.is_empty() {
            return Ok(0);
        }

        let device = Arc::clone(&self.inner.device);
        let (session, channel) = (self.inner.session, self.inner.channel);
        let capacity = buf.len();

        let data = deadline::run_blocking(deadline, move || {
            let mut scratch = vec![0u8; capacity];
            let n = device.recv(session, channel, &mut scratch)?;
            scratch.truncate(n);
            Ok(scratch)
        })
        .await?;

        buf[..data.len()].copy_from_slice(&data);
        trace!(session, channel, len = data.len(), "read");
        Ok(data.len())
    }

    /// Write `buf` as one message.
    ///
    /// Either the whole buffer is sent or an error is returned. Payloads over
    /// 65535 bytes fail with [`Error::MessageTooLarge`] before dispatch.
    pub async fn write(&self, buf: &[u8]) -> Result<usize> {
        let deadline = self.enter(|s| s.write_deadline)?;
        if buf.is_empty() {
            return Ok(0);
        }
        if buf.len() > MAX_PAYLOAD {
            return Err(Error::MessageTooLarge);
        }

        let device = Arc::clone(&self.inner.device);
        let (session, channel) = (self.inner.session, self.inner.channel);
        let data = buf.to_vec();

        deadline::run_blocking(deadline, move || device.send(session, channel, &data)).await?;

        trace!(session, channel, len = buf.len(), "write");
        Ok(buf.len())
    }

    /// Close the session.
    ///
    /// The first call requests teardown from the driver; any later call, and
    /// every read or write after it, fails with [`Error::Closed`].
    pub fn close(&self) -> Result<()> {
        let mut state = self.inner.state();
        if state.closed {
            return Err(Error::Closed);
        }
        state.closed = true;

        debug!(session = self.inner.session, peer = %self.inner.remote, "closing session");
        let result = self.inner.device.close_session(self.inner.session);
        if self.inner.owns_device {
            let _ = self.inner.device.close();
        }
        result
    }

    /// Set both deadlines. `None` removes them.
    pub fn set_deadline(&self, deadline: Option<Instant>) {
        let mut state = self.inner.state();
        state.read_deadline = deadline;
        state.write_deadline = deadline;
    }

    /// Set the deadline for future reads.
    pub fn set_read_deadline(&self, deadline: Option<Instant>) {
        self.inner.state().read_deadline = deadline;
    }

    /// Set the deadline for future writes.
    pub fn set_write_deadline(&self, deadline: Option<Instant>) {
        self.inner.state().write_deadline = deadline;
    }

    /// Subscribe to `channel` and return a sub-stream for it.
    ///
    /// Each channel has at most one open handle. The default channel belongs
    /// to the connection itself; both cases fail with
    /// [`Error::ChannelInUse`].
    pub fn open_channel(&self, channel: u8) -> Result<Channel> {
        {
            let mut state = self.inner.state();
            if state.closed {
                return Err(Error::Closed);
            }
            if channel == self.inner.channel || state.open_channels.contains(channel) {
                return Err(Error::ChannelInUse(channel));
            }
            state.open_channels.insert(channel);
        }
        if let Err(e) = self
            .inner
            .device
            .channel_subscribe(self.inner.session, channel)
        {
            self.inner.release_channel(channel);
            return Err(e);
        }
        debug!(session = self.inner.session, channel, "channel subscribed");
        Ok(Channel::new(Arc::clone(&self.inner), channel))
    }

    /// Channels currently subscribed on this session.
    pub fn channels(&self) -> Result<ChannelMap> {
        self.inner.device.channel_list(self.inner.session)
    }

    /// Fresh session-table row for this session.
    ///
    /// Fails with [`Error::NotEstablished`] once the driver has dropped the
    /// session; the connection itself is left as is.
    pub fn session_info(&self) -> Result<SessionInfo> {
        self.inner.device.session(self.inner.session)
    }

    /// Latest telemetry, refreshed by the driver every heartbeat.
    pub fn telemetry(&self) -> Result<Telemetry> {
        Ok(self.session_info()?.telemetry)
    }

    /// Current protocol state of the session.
    pub fn session_state(&self) -> Result<SessionState> {
        Ok(self.session_info()?.state)
    }

    /// Driver-assigned session index.
    pub fn session_index(&self) -> u32 {
        self.inner.session
    }

    /// Local address.
    pub fn local_addr(&self) -> Addr {
        self.inner.local
    }

    /// Remote peer address.
    pub fn remote_addr(&self) -> Addr {
        self.inner.remote
    }

    /// Whether [`close`](Connection::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    /// Check the closed flag and read one deadline under the lock.
    fn enter(&self, pick: impl FnOnce(&ConnState) -> Option<Instant>) -> Result<Option<Instant>> {
        let state = self.inner.state();
        if state.closed {
            return Err(Error::Closed);
        }
        Ok(pick(&state))
    }
}

/// Best-effort local address for a session with `remote`.
///
/// Connecting a UDP socket sends nothing but makes the kernel pick the
/// outgoing interface. The port is always 0.
pub(crate) fn local_addr_for(remote: &Addr) -> Addr {
    let bind = if remote.is_ipv4() {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0)
    } else {
        SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), 0)
    };

    UdpSocket::bind(bind)
        .and_then(|socket| {
            socket.connect(remote.socket_addr())?;
            socket.local_addr()
        })
        .map(|local| Addr::new(local.ip(), 0))
        .unwrap_or_else(|_| Addr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), 0))
}
