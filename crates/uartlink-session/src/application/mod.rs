//! Application layer: the consumers of what a session produces.
//!
//! # What lives here? (for beginners)
//!
//! The session (in `infrastructure`) owns the serial port and the read
//! thread.  It does not decide what to *do* with a decoded frame; it simply
//! hands every outcome to an [`sink::EventSink`].  This layer defines that
//! trait and the stock implementations:
//!
//! - **`sink`**  – The `EventSink` contract, a sink that logs through
//!   `tracing`, and a sink that forwards events to an async channel.
//!
//! - **`stats`** – A wrapping sink that counts frames, each kind of link
//!   noise, and write outcomes, so operators can tell a healthy link from a
//!   noisy one.
//!
//! Nothing in this layer performs I/O.

pub mod sink;
pub mod stats;
