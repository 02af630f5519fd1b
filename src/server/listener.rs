//! Accepting inbound sessions.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::addr::Addr;
use crate::core::constants::MIN_ACCEPT_POLL_INTERVAL;
use crate::core::{Error, Result};
use crate::device::{Device, Opener};
use crate::transport::Connection;
use crate::transport::connection::local_addr_for;

#[derive(Debug, Default)]
struct ListenerState {
    closed: bool,
    /// Session indices already handed out by `accept`.
    known: HashSet<u32>,
}

/// Accepts inbound POOL sessions.
///
/// The driver completes handshakes on its own; [`accept`](Listener::accept)
/// polls the session table and hands out each newly established session
/// exactly once, even to concurrent callers. Accepted connections share the
/// listener's device handle.
#[derive(Debug)]
pub struct Listener {
    device: Arc<Device>,
    addr: Addr,
    poll_interval: Duration,
    state: Mutex<ListenerState>,
}

impl Listener {
    /// Open a handle through `opener` and start listening on `addr`'s port.
    ///
    /// `poll_interval` is raised to at least 1 ms.
    pub(crate) fn bind(opener: &dyn Opener, addr: Addr, poll_interval: Duration) -> Result<Self> {
        let device = Device::open_with(opener)?;
        if let Err(e) = device.listen(addr.port()) {
            let _ = device.close();
            return Err(e);
        }
        info!(%addr, "listening");

        Ok(Self {
            device: Arc::new(device),
            addr,
            poll_interval: poll_interval.max(MIN_ACCEPT_POLL_INTERVAL),
            state: Mutex::new(ListenerState::default()),
        })
    }

    /// Wait for the next established session.
    ///
    /// Fails with [`Error::Closed`] once the listener is closed, including
    /// while waiting.
    pub async fn accept(&self) -> Result<Connection> {
        loop {
            if let Some(conn) = self.poll()? {
                return Ok(conn);
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Stop listening and release the handle.
    ///
    /// Connections already accepted lose their handle too. A second call
    /// fails with [`Error::Closed`].
    pub fn close(&self) -> Result<()> {
        {
            let mut state = self.state();
            if state.closed {
                return Err(Error::Closed);
            }
            state.closed = true;
        }
        debug!(addr = %self.addr, "closing listener");
        let stopped = self.device.stop();
        let _ = self.device.close();
        stopped
    }

    /// Address the listener was bound to.
    pub fn local_addr(&self) -> Addr {
        self.addr
    }

    /// Whether [`close`](Listener::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.state().closed
    }

    /// One scan of the session table.
    fn poll(&self) -> Result<Option<Connection>> {
        if self.is_closed() {
            return Err(Error::Closed);
        }
        let sessions = self.device.sessions()?;

        let mut state = self.state();
        if state.closed {
            return Err(Error::Closed);
        }
        let Some(info) = sessions
            .into_iter()
            .find(|s| s.state.is_established() && !state.known.contains(&s.index))
        else {
            return Ok(None);
        };
        state.known.insert(info.index);
        drop(state);

        debug!(session = info.index, peer = %info.peer, "accepted session");
        let local = if self.addr.ip().is_unspecified() {
            Addr::new(local_addr_for(&info.peer).ip(), self.addr.port())
        } else {
            self.addr
        };
        Ok(Some(Connection::new(
            Arc::clone(&self.device),
            false,
            info.index,
            local,
            info.peer,
        )))
    }

    fn state(&self) -> MutexGuard<'_, ListenerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        if state.closed {
            return;
        }
        state.closed = true;
        if let Err(e) = self.device.stop() {
            warn!(addr = %self.addr, error = %e, "stop on drop failed");
        }
    }
}
