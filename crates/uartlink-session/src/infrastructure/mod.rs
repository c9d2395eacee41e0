//! Infrastructure layer for the session crate.
//!
//! Contains the OS-facing adapters: the serial transport (plus an in-memory
//! stand-in for tests), the TOML configuration store, and the session that
//! ties a transport to a reader thread.
//!
//! **Dependency rule**: this layer may depend on `application` and
//! `uartlink_core`, but MUST NOT be imported by the `application` layer.

pub mod session;
pub mod storage;
pub mod transport;
