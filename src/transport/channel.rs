//! Per-channel sub-streams.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, trace, warn};

use super::connection::ConnInner;
use super::deadline;
use crate::core::constants::MAX_PAYLOAD;
use crate::core::{Error, Result};

/// One subscribed channel of a [`Connection`](super::Connection).
///
/// Reads and writes go to the channel's own queue on the parent session.
/// Channels carry no deadlines. Closing a channel unsubscribes it and leaves
/// the parent and its other channels untouched; closing the parent makes
/// every channel fail with [`Error::Closed`].
#[derive(Debug)]
pub struct Channel {
    conn: Arc<ConnInner>,
    channel: u8,
    closed: AtomicBool,
}

impl Channel {
    pub(crate) fn new(conn: Arc<ConnInner>, channel: u8) -> Self {
        Self {
            conn,
            channel,
            closed: AtomicBool::new(false),
        }
    }

    /// Channel number.
    pub fn channel(&self) -> u8 {
        self.channel
    }

    /// Read one message from this channel.
    pub async fn read(&self, buf: &mut [u8]) -> Result<usize> {
        self.check_open()?;
        if buf.is_empty() {
            return Ok(0);
        }

        let device = Arc::clone(self.conn.device());
        let (session, channel) = (self.conn.session(), self.channel);
        let capacity = buf.len();

        let data = deadline::run_blocking(None, move || {
            let mut scratch = vec![0u8; capacity];
            let n = device.recv(session, channel, &mut scratch)?;
            scratch.truncate(n);
            Ok(scratch)
        })
        .await?;

        buf[..data.len()].copy_from_slice(&data);
        trace!(session, channel, len = data.len(), "channel read");
        Ok(data.len())
    }

    /// Write `buf` as one message on this channel.
    pub async fn write(&self, buf: &[u8]) -> Result<usize> {
        self.check_open()?;
        if buf.is_empty() {
            return Ok(0);
        }
        if buf.len() > MAX_PAYLOAD {
            return Err(Error::MessageTooLarge);
        }

        let device = Arc::clone(self.conn.device());
        let (session, channel) = (self.conn.session(), self.channel);
        let data = buf.to_vec();

        deadline::run_blocking(None, move || device.send(session, channel, &data)).await?;

        trace!(session, channel, len = buf.len(), "channel write");
        Ok(buf.len())
    }

    /// Unsubscribe. A second call fails with [`Error::Closed`].
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(Error::Closed);
        }
        debug!(session = self.conn.session(), channel = self.channel, "channel closed");
        if !self.conn.release_channel(self.channel) {
            return Ok(());
        }
        self.conn
            .device()
            .channel_unsubscribe(self.conn.session(), self.channel)
    }

    /// Whether this channel or its parent connection is closed.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst) || self.conn.is_closed()
    }

    fn check_open(&self) -> Result<()> {
        if self.is_closed() {
            Err(Error::Closed)
        } else {
            Ok(())
        }
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        if *self.closed.get_mut() || !self.conn.release_channel(self.channel) {
            return;
        }
        match self
            .conn
            .device()
            .channel_unsubscribe(self.conn.session(), self.channel)
        {
            Ok(()) | Err(Error::Closed) | Err(Error::NotEstablished) => {}
            Err(e) => warn!(channel = self.channel, error = %e, "unsubscribe on drop failed"),
        }
    }
}
