//! Core constants and error types for POOL.

pub mod constants;
mod error;

pub use error::{Error, Op, Result, map_errno};
