//! In-process POOL driver.
//!
//! [`MemoryDriver`] behaves like the kernel module from the library's point
//! of view: one session table shared by every handle it opens, blocking
//! receives, the same errno codes for the same failures. The remote side of
//! each session is driven through [`Peer`], which makes it possible to run
//! connections, channels and listeners without `/dev/pool`.
//!
//! # Example
//!
//! ```
//! use pool_net::device::memory::MemoryDriver;
//! use pool_net::device::{Device, SessionState};
//!
//! let driver = MemoryDriver::new();
//! let device = Device::open_with(&driver).unwrap();
//!
//! let index = device.connect(&"10.0.0.1:9253".parse().unwrap()).unwrap();
//! assert_eq!(device.session(index).unwrap().state, SessionState::Established);
//! ```

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use super::types::{ChannelMap, SessionInfo, SessionState, Telemetry};
use super::{Driver, Opener};
use crate::addr::Addr;
use crate::core::constants::{DEFAULT_CHANNEL, DEFAULT_MTU, MAX_PAYLOAD, MAX_SESSIONS};

fn errno(code: i32) -> io::Error {
    io::Error::from_raw_os_error(code)
}

/// A simulated POOL driver. Clones share the same session table.
#[derive(Debug, Clone, Default)]
pub struct MemoryDriver {
    shared: Arc<Shared>,
}

#[derive(Debug, Default)]
struct Shared {
    kernel: Mutex<Kernel>,
    wake: Condvar,
    calls: AtomicU64,
}

#[derive(Debug)]
struct Kernel {
    available: bool,
    capacity: usize,
    next_index: u32,
    listening: Option<u16>,
    connect_delay: Duration,
    refused: HashSet<Addr>,
    unreachable: HashSet<Addr>,
    sessions: BTreeMap<u32, SimSession>,
}

impl Default for Kernel {
    fn default() -> Self {
        Self {
            available: true,
            capacity: MAX_SESSIONS,
            next_index: 0,
            listening: None,
            connect_delay: Duration::ZERO,
            refused: HashSet::new(),
            unreachable: HashSet::new(),
            sessions: BTreeMap::new(),
        }
    }
}

#[derive(Debug)]
struct SimSession {
    peer: Addr,
    state: SessionState,
    session_id: [u8; 16],
    bytes_sent: u64,
    bytes_recv: u64,
    packets_sent: u64,
    packets_recv: u64,
    channels: ChannelMap,
    /// Messages waiting for the local side.
    inbound: HashMap<u8, VecDeque<Vec<u8>>>,
    /// Messages the local side sent, waiting for the peer.
    outbound: HashMap<u8, VecDeque<Vec<u8>>>,
    telemetry: Telemetry,
    established_at: Instant,
}

impl SimSession {
    fn new(index: u32, peer: Addr) -> Self {
        let mut session_id = [0u8; 16];
        session_id[..4].copy_from_slice(&index.to_be_bytes());
        session_id[4..8].copy_from_slice(b"POOL");

        let mut channels = ChannelMap::new();
        channels.insert(DEFAULT_CHANNEL);

        Self {
            peer,
            state: SessionState::Established,
            session_id,
            bytes_sent: 0,
            bytes_recv: 0,
            packets_sent: 0,
            packets_recv: 0,
            channels,
            inbound: HashMap::new(),
            outbound: HashMap::new(),
            telemetry: Telemetry {
                mtu: DEFAULT_MTU,
                ..Default::default()
            },
            established_at: Instant::now(),
        }
    }

    fn info(&self, index: u32) -> SessionInfo {
        SessionInfo {
            index,
            peer: self.peer,
            state: self.state,
            session_id: self.session_id,
            bytes_sent: self.bytes_sent,
            bytes_recv: self.bytes_recv,
            packets_sent: self.packets_sent,
            packets_recv: self.packets_recv,
            rekey_count: self.telemetry.rekey_count,
            telemetry: Telemetry {
                uptime: self.established_at.elapsed(),
                queue_depth: self.outbound.values().map(VecDeque::len).sum::<usize>() as u16,
                ..self.telemetry
            },
        }
    }
}

impl MemoryDriver {
    /// A driver with an empty session table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of control calls issued through handles of this driver.
    pub fn calls(&self) -> u64 {
        self.shared.calls.load(Ordering::SeqCst)
    }

    /// Make [`Opener::open`] fail with ENOENT, as if the module were not
    /// loaded.
    pub fn set_available(&self, available: bool) {
        self.kernel().available = available;
    }

    /// Limit the session table.
    pub fn set_capacity(&self, capacity: usize) {
        self.kernel().capacity = capacity;
    }

    /// Make every handshake take at least `delay`.
    pub fn set_connect_delay(&self, delay: Duration) {
        self.kernel().connect_delay = delay;
    }

    /// Make handshakes with `peer` fail authentication.
    pub fn refuse(&self, peer: Addr) {
        self.kernel().refused.insert(peer);
    }

    /// Make `peer` unroutable.
    pub fn mark_unreachable(&self, peer: Addr) {
        self.kernel().unreachable.insert(peer);
    }

    /// Port the driver is listening on, if any.
    pub fn listening(&self) -> Option<u16> {
        self.kernel().listening
    }

    /// Number of live sessions.
    pub fn session_count(&self) -> usize {
        self.kernel().sessions.len()
    }

    /// Complete an inbound handshake from `peer`.
    ///
    /// Fails with ECONNREFUSED when nothing is listening and ENOSPC when the
    /// table is full.
    pub fn accept_peer(&self, peer: Addr) -> io::Result<u32> {
        let mut kernel = self.kernel();
        if kernel.listening.is_none() {
            return Err(errno(libc::ECONNREFUSED));
        }
        kernel.insert(peer)
    }

    /// Force the state of a session.
    pub fn set_state(&self, session: u32, state: SessionState) -> io::Result<()> {
        self.kernel().session_mut(session)?.state = state;
        Ok(())
    }

    /// Replace the telemetry the driver reports for a session.
    pub fn set_telemetry(&self, session: u32, telemetry: Telemetry) -> io::Result<()> {
        self.kernel().session_mut(session)?.telemetry = telemetry;
        Ok(())
    }

    /// Tear a session down from the driver side, waking blocked receivers.
    pub fn teardown(&self, session: u32) -> bool {
        let removed = self.kernel().sessions.remove(&session).is_some();
        self.shared.wake.notify_all();
        removed
    }

    /// The remote end of a session.
    pub fn peer(&self, session: u32) -> Peer {
        Peer {
            shared: Arc::clone(&self.shared),
            session,
        }
    }

    fn kernel(&self) -> MutexGuard<'_, Kernel> {
        self.shared.lock()
    }

    fn count(&self) {
        self.shared.calls.fetch_add(1, Ordering::SeqCst);
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Kernel> {
        self.kernel.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wait<'a>(&self, guard: MutexGuard<'a, Kernel>) -> MutexGuard<'a, Kernel> {
        self.wake.wait(guard).unwrap_or_else(PoisonError::into_inner)
    }

    fn wait_timeout<'a>(
        &self,
        guard: MutexGuard<'a, Kernel>,
        timeout: Duration,
    ) -> MutexGuard<'a, Kernel> {
        match self.wake.wait_timeout(guard, timeout) {
            Ok((guard, _)) => guard,
            Err(poisoned) => poisoned.into_inner().0,
        }
    }
}

impl Kernel {
    fn insert(&mut self, peer: Addr) -> io::Result<u32> {
        if self.sessions.len() >= self.capacity {
            return Err(errno(libc::ENOSPC));
        }
        let index = self.next_index;
        self.next_index += 1;
        self.sessions.insert(index, SimSession::new(index, peer));
        Ok(index)
    }

    fn session_mut(&mut self, session: u32) -> io::Result<&mut SimSession> {
        self.sessions
            .get_mut(&session)
            .ok_or_else(|| errno(libc::ENOTCONN))
    }
}

impl Opener for MemoryDriver {
    fn open(&self) -> io::Result<Arc<dyn Driver>> {
        if !self.kernel().available {
            return Err(errno(libc::ENOENT));
        }
        Ok(Arc::new(self.clone()))
    }
}

impl Driver for MemoryDriver {
    fn listen(&self, port: u16) -> io::Result<()> {
        self.count();
        self.kernel().listening = Some(port);
        Ok(())
    }

    fn stop(&self) -> io::Result<()> {
        self.count();
        self.kernel().listening = None;
        Ok(())
    }

    fn connect(&self, peer: &Addr) -> io::Result<u32> {
        self.count();
        let delay = self.kernel().connect_delay;
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }

        let mut kernel = self.kernel();
        if kernel.unreachable.contains(peer) {
            return Err(errno(libc::ENETUNREACH));
        }
        if kernel.refused.contains(peer) {
            return Err(errno(libc::ECONNREFUSED));
        }
        kernel.insert(*peer)
    }

    fn send(&self, session: u32, channel: u8, data: &[u8]) -> io::Result<()> {
        self.count();
        if data.len() > MAX_PAYLOAD {
            return Err(errno(libc::EMSGSIZE));
        }
        {
            let mut kernel = self.kernel();
            let s = kernel.session_mut(session)?;
            s.outbound.entry(channel).or_default().push_back(data.to_vec());
            s.bytes_sent += data.len() as u64;
            s.packets_sent += 1;
        }
        self.shared.wake.notify_all();
        Ok(())
    }

    fn recv(&self, session: u32, channel: u8, buf: &mut [u8]) -> io::Result<usize> {
        self.count();
        let mut kernel = self.kernel();
        loop {
            let s = kernel.session_mut(session)?;
            if let Some(queue) = s.inbound.get_mut(&channel) {
                if let Some(front) = queue.front() {
                    if front.len() > buf.len() {
                        return Err(errno(libc::EMSGSIZE));
                    }
                    let msg = queue.pop_front().unwrap_or_default();
                    buf[..msg.len()].copy_from_slice(&msg);
                    s.bytes_recv += msg.len() as u64;
                    s.packets_recv += 1;
                    return Ok(msg.len());
                }
            }
            kernel = self.shared.wait(kernel);
        }
    }

    fn sessions(&self) -> io::Result<Vec<SessionInfo>> {
        self.count();
        let kernel = self.kernel();
        Ok(kernel
            .sessions
            .iter()
            .map(|(index, s)| s.info(*index))
            .collect())
    }

    fn close_session(&self, session: u32) -> io::Result<()> {
        self.count();
        let removed = self.kernel().sessions.remove(&session);
        self.shared.wake.notify_all();
        removed.map(drop).ok_or_else(|| errno(libc::ENOTCONN))
    }

    fn channel_subscribe(&self, session: u32, channel: u8) -> io::Result<()> {
        self.count();
        self.kernel().session_mut(session)?.channels.insert(channel);
        Ok(())
    }

    fn channel_unsubscribe(&self, session: u32, channel: u8) -> io::Result<()> {
        self.count();
        let mut kernel = self.kernel();
        let s = kernel.session_mut(session)?;
        s.channels.remove(channel);
        s.inbound.remove(&channel);
        Ok(())
    }

    fn channel_list(&self, session: u32) -> io::Result<ChannelMap> {
        self.count();
        Ok(self.kernel().session_mut(session)?.channels)
    }
}

/// The remote end of one simulated session.
#[derive(Debug, Clone)]
pub struct Peer {
    shared: Arc<Shared>,
    session: u32,
}

impl Peer {
    /// Session index this peer belongs to.
    pub fn session(&self) -> u32 {
        self.session
    }

    /// Deliver a message to the local side.
    ///
    /// Returns `Ok(false)` when the channel is not subscribed and the driver
    /// drops the message.
    pub fn deliver(&self, channel: u8, data: &[u8]) -> io::Result<bool> {
        let delivered = {
            let mut kernel = self.shared.lock();
            let s = kernel.session_mut(self.session)?;
            if s.channels.contains(channel) {
                s.inbound.entry(channel).or_default().push_back(data.to_vec());
                true
            } else {
                false
            }
        };
        self.shared.wake.notify_all();
        Ok(delivered)
    }

    /// Take the next message the local side sent on `channel`, waiting up
    /// to `timeout`. `None` on timeout or once the session is gone.
    pub fn next_sent(&self, channel: u8, timeout: Duration) -> Option<Vec<u8>> {
        let deadline = Instant::now() + timeout;
        let mut kernel = self.shared.lock();
        loop {
            let s = kernel.sessions.get_mut(&self.session)?;
            if let Some(msg) = s.outbound.get_mut(&channel).and_then(VecDeque::pop_front) {
                return Some(msg);
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            kernel = self.shared.wait_timeout(kernel, deadline - now);
        }
    }

    /// Echo one message on `channel` back to the local side.
    pub fn echo_once(&self, channel: u8, timeout: Duration) -> bool {
        match self.next_sent(channel, timeout) {
            Some(msg) => self.deliver(channel, &msg).unwrap_or(false),
            None => false,
        }
    }

    /// Echo everything on `channel` until nothing arrives for `idle`.
    /// Returns the number of messages echoed.
    pub fn echo(&self, channel: u8, idle: Duration) -> usize {
        let mut echoed = 0;
        while self.echo_once(channel, idle) {
            echoed += 1;
        }
        echoed
    }
}
