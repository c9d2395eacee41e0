//! uartlink-session library entry point.
//!
//! Re-exports all public modules so that integration tests in `tests/`
//! and the binary entry point in `main.rs` share the same module tree.

pub mod application;
pub mod infrastructure;

pub use application::sink::{ChannelSink, EventSink, SessionEvent, TracingSink, WriteErrorKind};
pub use application::stats::{LinkStats, LinkStatsSnapshot, StatsSink};
pub use infrastructure::session::{SerialPortSession, SessionError};
pub use infrastructure::storage::config::{AppConfig, ConfigError, LoggingConfig, SerialConfig};
pub use infrastructure::transport::{PortSettings, Transport, TransportError, TransportOpener};
