//! User-facing operations (spec §4.7): `connect`, `listen`, `unlisten`,
//! `send`, `recv`, `close`. These are called directly by the host, not in
//! response to an incoming segment, so each one only ever touches the
//! connection(s) named in its arguments plus whatever output the resulting
//! state change produces.

use std::time::Instant;

use crate::config::Config;
use crate::error::UserOpError;
use crate::output;
use crate::rng::IssRng;
use crate::segment::Segment;
use crate::tcb::{ConnectionState, ControlBlock, TcpState};
use crate::timer;

/// `connect(id, now)`: start an active open. Returns the fresh connection
/// state (SYN_SENT) and the SYN segment to send.
pub fn connect(
    id: crate::ConnectionId,
    now: Instant,
    rng: &mut dyn IssRng,
    config: &Config,
) -> (ConnectionState, Segment) {
    let iss = rng.next_iss();
    let mut cb = ControlBlock::new_active(iss, config);
    subroutines_start_conn_est(&mut cb, now, config);
    let syn = Segment::make_syn(&cb, id);
    let mut state = ConnectionState::new(TcpState::SynSent, cb, config);
    crate::subroutines::start_rexmt_timer(&mut state.cb, now, crate::tcb::RexmtMode::RexmtSyn, 0, config);
    (state, syn)
}

fn subroutines_start_conn_est(cb: &mut ControlBlock, now: Instant, config: &Config) {
    cb.timers.tt_conn_est = timer::arm(
        (),
        now,
        std::time::Duration::from_millis(config.r2_syn_ms as u64),
    );
}

/// `listen(port)` / `unlisten(port)` only touch the engine's listener port
/// set, not any `ConnectionState` — see [`crate::engine::Engine`].
/// `send(conn, bytes)`: append bytes to the send queue and drain whatever
/// the window currently allows.
pub fn send(
    state: &mut ConnectionState,
    bytes: &[u8],
    now: Instant,
    id: crate::ConnectionId,
    config: &Config,
) -> Result<Vec<Segment>, UserOpError> {
    if state.cantsndmore {
        return Err(UserOpError::Msg(
            "connection's send half is already closed".to_string(),
        ));
    }
    if !matches!(
        state.tcp_state,
        TcpState::Established | TcpState::CloseWait
    ) {
        return Err(UserOpError::Msg(format!(
            "cannot send in state {:?}",
            state.tcp_state
        )));
    }
    let free = state.sndbufsize.saturating_sub(state.sndq.len());
    if free == 0 {
        return Err(UserOpError::Msg("send buffer is full".to_string()));
    }
    let take = bytes.len().min(free);
    state.sndq.extend_from_slice(&bytes[..take]);
    Ok(output::build_outgoing(state, now, id, config))
}

/// `recv(conn, now, id)`: pull up to `max_len` bytes of already-delivered
/// data out of the receive queue. Returns `Err(Eof)` once the peer's FIN
/// has been seen and the queue has been fully drained. May return a
/// window-update ACK alongside the bytes once draining reopens the receive
/// window past the point where a zero window was last advertised.
pub fn recv(
    state: &mut ConnectionState,
    max_len: usize,
    _now: Instant,
    id: crate::ConnectionId,
) -> Result<(Vec<u8>, Vec<Segment>), UserOpError> {
    if state.rcvq.is_empty() {
        if state.cantrcvmore {
            return Err(UserOpError::Eof);
        }
        return Ok((Vec::new(), Vec::new()));
    }
    let take = max_len.min(state.rcvq.len());
    let bytes: Vec<u8> = state.rcvq.drain(..take).collect();
    state.refresh_rcv_wnd();

    let mut segs = Vec::new();
    let half_open_again = state.cb.rcv.wnd as usize >= state.rcvbufsize / 2;
    if state.cb.rcv.tf_rxwin0sent && half_open_again {
        state.cb.rcv.tf_rxwin0sent = false;
        segs.push(Segment::make_ack(&state.cb, false, id));
    }
    Ok((bytes, segs))
}

/// `close(conn, now)`: initiate (or continue) the local half-close. Marks
/// `cantsndmore`, queues a FIN behind any unsent data, and transitions per
/// RFC 9293 §3.10.4's CLOSE-call state table.
pub fn close(
    state: &mut ConnectionState,
    now: Instant,
    id: crate::ConnectionId,
    config: &Config,
) -> Vec<Segment> {
    if state.cantsndmore {
        return Vec::new();
    }
    state.cantsndmore = true;

    state.tcp_state = match state.tcp_state {
        TcpState::SynSent => {
            // No SYN ever got an ACK; there's nothing to gracefully close.
            return Vec::new();
        }
        TcpState::Established | TcpState::SynReceived => TcpState::FinWait1,
        TcpState::CloseWait => TcpState::LastAck,
        other => other,
    };

    output::build_outgoing(state, now, id, config)
}
