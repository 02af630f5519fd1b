//! Server side: accepting inbound sessions.

mod listener;

pub use listener::Listener;
