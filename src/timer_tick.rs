//! What happens when a timer fires (spec §4.6 "Timer tick").
//!
//! There is no internal clock: the host calls `Engine::timer(id, now)` (or
//! sweeps every connection) whenever it believes a deadline may have
//! passed, and this module decides whether anything was actually due.

use std::time::Instant;

use crate::config::Config;
use crate::error::DropCause;
use crate::segment::Segment;
use crate::subroutines;
use crate::tcb::{ConnectionState, RexmtMode, TcpState};
use crate::timer;

/// Disposition after a timer check: nothing was due, the connection should
/// be torn down, or segments went out (a retransmit, a persist probe).
pub enum TickResult {
    Idle,
    Drop(DropCause),
    Replies(Vec<Segment>),
}

/// `tt_rexmt`: retransmit / SYN-retransmit / persist timer.
fn tick_rexmt(
    state: &mut ConnectionState,
    now: Instant,
    id: crate::ConnectionId,
    config: &Config,
) -> TickResult {
    let Some(armed) = state.cb.timers.tt_rexmt else {
        return TickResult::Idle;
    };
    if !armed.expired(now) {
        return TickResult::Idle;
    }

    let mode = armed.value.mode;
    let (r1, r2) = match mode {
        RexmtMode::RexmtSyn => (config.r1_syn_ms, config.r2_syn_ms),
        RexmtMode::Rexmt | RexmtMode::Persist => (config.r1_data_ms, config.r2_data_ms),
    };
    let elapsed_since_armed_count = armed.value.shift;
    // Once backoff has run long enough to exceed the R2 time bound, give up
    // on the connection outright. `tcp_maxrxtshift` is the SYN retransmit's
    // own shift cap (spec §9's open question: resolved as RexmtSyn-only in
    // DESIGN.md) and must not also bound ordinary data/persist
    // retransmissions, which are bounded by R1/R2 alone.
    let time_budget_ms = elapsed_since_armed_count.saturating_mul(config.rto_min_ms.max(1));
    let shift_exceeded =
        mode == RexmtMode::RexmtSyn && elapsed_since_armed_count >= config.tcp_maxrxtshift;
    if shift_exceeded || time_budget_ms >= r2 {
        return TickResult::Drop(DropCause::RetransmissionExceeded);
    }
    if time_budget_ms >= r1 {
        state.cb.t_softerror = Some("retransmission timeout exceeded R1".to_string());
    }

    let shift = subroutines::backoff_rexmt_timer(&mut state.cb, now, config);
    let _ = shift;

    match mode {
        RexmtMode::RexmtSyn => {
            let syn = Segment::make_syn(&state.cb, id);
            TickResult::Replies(vec![syn])
        }
        RexmtMode::Rexmt => {
            // Cut the window back as if loss were detected (RFC 5681),
            // then resend everything already in flight.
            let mss = state.cb.negotiated.t_maxseg as u32;
            subroutines::enter_congestion_recovery(&mut state.cb, mss, state.cb.snd.max);
            state.cb.snd.nxt = state.cb.snd.una;
            TickResult::Replies(crate::output::build_outgoing(state, now, id, config))
        }
        RexmtMode::Persist => {
            // A one-byte probe, sent from the first unacknowledged byte,
            // to provoke a fresh window update from the peer.
            let probe_byte = state
                .sndq
                .get(0)
                .copied()
                .map(|b| vec![b])
                .unwrap_or_default();
            let seg = Segment {
                src_port: id.local.port,
                dst_port: id.remote.port,
                seq: state.cb.snd.una,
                ack: state.cb.rcv.nxt,
                window: 0,
                flags: crate::segment::Flags::ack(),
                options: Default::default(),
                payload: probe_byte,
            };
            TickResult::Replies(vec![seg])
        }
    }
}

/// `tt_2msl`: TIME_WAIT expiry.
fn tick_2msl(state: &mut ConnectionState, now: Instant) -> TickResult {
    if timer::is_expired(&state.cb.timers.tt_2msl, now) {
        TickResult::Drop(DropCause::Timer2msl)
    } else {
        TickResult::Idle
    }
}

/// `tt_conn_est`: handshake never completed in time.
fn tick_conn_est(state: &mut ConnectionState, now: Instant) -> TickResult {
    if matches!(state.tcp_state, TcpState::SynSent | TcpState::SynReceived)
        && timer::is_expired(&state.cb.timers.tt_conn_est, now)
    {
        TickResult::Drop(DropCause::TimerConnectionEstablished)
    } else {
        TickResult::Idle
    }
}

/// `tt_fin_wait_2`: peer never closed its half.
fn tick_fin_wait_2(state: &mut ConnectionState, now: Instant) -> TickResult {
    if matches!(state.tcp_state, TcpState::FinWait2)
        && timer::is_expired(&state.cb.timers.tt_fin_wait_2, now)
    {
        TickResult::Drop(DropCause::TimerFinWait2)
    } else {
        TickResult::Idle
    }
}

/// `tt_delack`: a deferred ACK is now due.
fn tick_delack(
    state: &mut ConnectionState,
    now: Instant,
    id: crate::ConnectionId,
) -> TickResult {
    if state.cb.tf_shouldacknow && timer::is_expired(&state.cb.timers.tt_delack, now) {
        state.cb.tf_shouldacknow = false;
        timer::cancel(&mut state.cb.timers.tt_delack);
        TickResult::Replies(vec![Segment::make_ack(&state.cb, false, id)])
    } else {
        TickResult::Idle
    }
}

/// Check every timer on this connection in priority order: a drop cause
/// from an earlier timer always wins over a later one still producing
/// output, since the connection no longer exists to act on.
pub fn on_timer(
    state: &mut ConnectionState,
    now: Instant,
    id: crate::ConnectionId,
    config: &Config,
) -> TickResult {
    match tick_conn_est(state, now) {
        TickResult::Idle => {}
        other => return other,
    }
    match tick_2msl(state, now) {
        TickResult::Idle => {}
        other => return other,
    }
    match tick_fin_wait_2(state, now) {
        TickResult::Idle => {}
        other => return other,
    }
    match tick_rexmt(state, now, id, config) {
        TickResult::Idle => {}
        other => return other,
    }
    tick_delack(state, now, id)
}
