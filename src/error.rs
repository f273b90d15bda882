//! Error and drop-cause types (spec §7 "Error handling").
//!
//! The engine's pure core never returns a `Result` from `handle`/`timer` —
//! an invalid or unacceptable segment is simply dropped, per spec §4.4's
//! "silently discard" rules. These types exist so that drop, and any
//! user-operation failure, carries a typed reason for logging and for the
//! handful of operations (`send`, `recv`, `close`) that *can* fail.

use thiserror::Error;

/// Why an incoming segment was decoded but then dropped without a state
/// transition. Distinct from a caller-visible error: nothing surfaces this
/// to the user, it exists for `tracing` spans (spec §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DropCause {
    #[error("segment failed the acceptability test")]
    SegmentNotAcceptable,
    #[error("peer sent RST, connection reset")]
    ConnectionReset,
    #[error("local FIN handshake completed; connection closed gracefully")]
    ConnectionClosed,
    #[error("ACK outside the unacknowledged window; sent challenge ACK")]
    AckNotAcceptable,
    #[error("retransmission count exceeded tcp_maxrxtshift or R2")]
    RetransmissionExceeded,
    #[error("connection idle in TIME_WAIT past 2MSL")]
    Timer2msl,
    #[error("handshake did not complete before the connection-establishment timer fired")]
    TimerConnectionEstablished,
    #[error("peer never closed its half of the connection before the FIN_WAIT_2 timer fired")]
    TimerFinWait2,
    #[error("segment targeted a connection id this engine has no record of")]
    NoMatchingConnection,
}

/// Failures a user-facing operation (spec §4.7) can report.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UserOpError {
    #[error("connection is closed; no more data will arrive")]
    Eof,
    #[error("{0}")]
    Msg(String),
}

/// Failures decoding a raw byte slice into a `Segment` (spec §4.2
/// supplement, the `wire` module). `Engine::handle` treats all of these as
/// a silent drop at the call site, same as any other unacceptable segment —
/// the typed value only exists to label what was logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum WireError {
    #[error("buffer shorter than a minimal TCP header")]
    Truncated,
    #[error("TCP checksum did not match")]
    BadChecksum,
    #[error("unrecognized or malformed TCP option")]
    BadOption,
    #[error("IP header was not IPv4")]
    UnsupportedVersion,
}
