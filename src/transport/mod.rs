//! POOL session streams.
//!
//! This module turns driver sessions into async byte-message streams:
//!
//! - [`Connection`]: one session, with read and write deadlines, telemetry
//!   and session state
//! - [`Channel`]: one subscribed channel of a connection
//!
//! Every message maps to exactly one send or receive control call. Calls
//! that can block run on the blocking pool and race their deadline there.
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │            Application                  │
//! ├─────────────────────────────────────────┤
//! │   Connection / Channel                  │  ← This module
//! │   deadlines, closed state, channels     │
//! ├─────────────────────────────────────────┤
//! │   Device (control calls)                │
//! ├─────────────────────────────────────────┤
//! │   /dev/pool                             │
//! └─────────────────────────────────────────┘
//! ```

mod channel;
pub(crate) mod connection;
pub(crate) mod deadline;

pub use channel::Channel;
pub use connection::Connection;
