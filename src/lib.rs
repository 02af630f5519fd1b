//! # pool-net
//!
//! Async client library for the **POOL** kernel transport.
//!
//! POOL is an authenticated, encrypted session protocol implemented by a
//! kernel module and reached through control calls on `/dev/pool`. This
//! crate exposes those sessions as ordinary connections:
//!
//! - **Dialing**: resolve a `host:port`, run the handshake, get a
//!   [`Connection`](transport::Connection)
//! - **Listening**: a [`Listener`](server::Listener) that hands out each
//!   inbound session exactly once
//! - **Deadlines**: per-direction read/write deadlines raced against the
//!   blocking driver calls
//! - **Channels**: up to 256 independently subscribed sub-streams per session
//! - **Telemetry**: RTT, jitter, loss and throughput reported by the driver
//!
//! ## Feature Flags
//!
//! - `transport` (default): connections, channels and dialing
//! - `server` (default): the listener
//! - `memory` (default): an in-process driver for tests and demos
//!
//! ## Modules
//!
//! - [`core`]: constants and error types (always included)
//! - [`addr`]: POOL addresses and resolution (always included)
//! - [`device`]: the control-call transport and driver seam
//! - [`transport`]: connections and channels (requires `transport`)
//! - [`server`]: the listener (requires `server`)
//! - [`endpoint`]: configuration and entry points (requires `transport`)
//!
//! ## Example Usage
//!
//! ```rust
//! use pool_net::device::memory::MemoryDriver;
//! use pool_net::prelude::*;
//! use std::time::Duration;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> pool_net::Result<()> {
//! let driver = MemoryDriver::new();
//! let endpoint = Endpoint::with_opener(driver.clone());
//!
//! let conn = endpoint.dial("pool", "10.0.0.1:9253").await?;
//! conn.write(b"hello").await?;
//!
//! // The in-memory peer echoes what it receives.
//! driver.peer(conn.session_index()).echo_once(0, Duration::from_secs(1));
//!
//! let mut buf = [0u8; 64];
//! let n = conn.read(&mut buf).await?;
//! assert_eq!(&buf[..n], b"hello");
//! conn.close()?;
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

// Core module (always included)
pub mod core;

// Addresses (always included)
pub mod addr;

// Control-call transport (always included)
pub mod device;

// Connections and channels (feature-gated)
#[cfg(feature = "transport")]
#[cfg_attr(docsrs, doc(cfg(feature = "transport")))]
pub mod transport;

// Listener (feature-gated)
#[cfg(feature = "server")]
#[cfg_attr(docsrs, doc(cfg(feature = "server")))]
pub mod server;

// Entry points (feature-gated)
#[cfg(feature = "transport")]
#[cfg_attr(docsrs, doc(cfg(feature = "transport")))]
pub mod endpoint;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::addr::{Addr, resolve};
    pub use crate::core::{Error, Result};
    pub use crate::device::{ChannelMap, SessionInfo, SessionState, Telemetry};

    #[cfg(feature = "transport")]
    pub use crate::endpoint::{Endpoint, EndpointBuilder, EndpointConfig, dial, dial_timeout};
    #[cfg(feature = "transport")]
    pub use crate::transport::{Channel, Connection};

    #[cfg(feature = "server")]
    pub use crate::endpoint::listen;
    #[cfg(feature = "server")]
    pub use crate::server::Listener;
}

// Re-export commonly used items at crate root
pub use crate::addr::{Addr, resolve};
pub use crate::core::{Error, Result};

#[cfg(feature = "transport")]
pub use crate::endpoint::{Endpoint, dial, dial_timeout};
#[cfg(feature = "transport")]
pub use crate::transport::{Channel, Connection};

#[cfg(feature = "server")]
pub use crate::endpoint::listen;
#[cfg(feature = "server")]
pub use crate::server::Listener;
