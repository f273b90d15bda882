//! A sans-I/O TCP protocol engine.
//!
//! The core is a pure state machine: `handle(state, now, bytes) -> (state',
//! out_segments)`. Nothing in this crate opens a socket, spawns a thread, or
//! reads the clock; every external dependency (time, randomness, the wire
//! format, the network) is passed in by the caller or lives in a small
//! swappable module (`wire`, `rng`) at the edge.
//!
//! Module map:
//! - [`seq`] — 32-bit modular sequence number arithmetic.
//! - [`segment`] — the decoded segment record and its constructors.
//! - [`timer`] — the generic armed-timer primitive every per-connection
//!   timer is built from.
//! - [`reassembly`] — the out-of-order segment queue.
//! - [`tcb`] — control block, connection state, and the TCP state enum.
//! - [`config`] — tunable constants.
//! - [`subroutines`] — shared computations used by both the input and
//!   output paths (RTT update, retransmit timer arming, MSS/window-scale
//!   negotiation).
//! - [`input`] — the segment-arrival dispatch (`deliver_in_*`).
//! - [`output`] — turning pending send-queue bytes into outbound segments.
//! - [`ops`] — the user-facing operations (`connect`, `listen`, `send`, ...).
//! - [`timer_tick`] — what happens when a timer fires.
//! - [`engine`] — ties the above into one `Engine` that owns the listener
//!   set and the connection table.
//! - [`wire`] — RFC 9293 byte encode/decode, the one layer that actually
//!   touches a byte slice.
//! - [`rng`] — the injected randomness source for initial sequence numbers.
//! - [`error`] — the error and drop-cause types surfaced to callers and to
//!   logging.

pub mod config;
pub mod engine;
pub mod error;
pub mod input;
pub mod ops;
pub mod output;
pub mod reassembly;
pub mod rng;
pub mod seq;
pub mod segment;
pub mod subroutines;
pub mod tcb;
pub mod timer;
pub mod timer_tick;
pub mod wire;

pub use engine::{Engine, Event};
pub use tcb::{Dual, Quad, TcpState};

/// The 4-tuple identifying a connection: local and remote (IP, port) pairs.
pub type ConnectionId = Quad;
