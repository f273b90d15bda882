//! Segment-arrival dispatch (spec §4.4 "Input path").
//!
//! `on_segment` is the heart of the state machine: given a decoded
//! [`Segment`] addressed to an already-open connection, it validates the
//! segment, applies it, and returns the connection's next disposition.
//! Passive-open (a SYN arriving on a listening port with no existing
//! connection record) is handled one level up, in [`crate::engine`], since
//! it needs the listener port set rather than an existing
//! [`ConnectionState`] — everything downstream of that first SYN goes
//! through this module.

use std::time::{Duration, Instant};

use crate::config::Config;
use crate::error::DropCause;
use crate::segment::{Flags, Segment};
use crate::seq::Seq;
use crate::subroutines;
use crate::tcb::{ConnectionState, RexmtMode, TcpState};
use crate::timer;

/// What happened to a connection after one segment was delivered to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// State updated in place, connection remains live.
    Continue,
    /// The connection is done and should be removed from the engine's map.
    Delete,
}

/// The result of `on_segment`: what the connection should do now, plus any
/// segments to send in reply.
pub struct InputResult {
    pub disposition: Disposition,
    pub replies: Vec<Segment>,
    /// Newly available in-order bytes for the user to `recv`, if any.
    pub delivered: Vec<u8>,
    /// Set once the peer's FIN has been seen and acknowledged in order.
    pub peer_closed: bool,
    /// Why the connection was destroyed; `Some` iff `disposition` is
    /// `Delete`.
    pub cause: Option<DropCause>,
}

impl InputResult {
    fn continue_with(replies: Vec<Segment>) -> Self {
        InputResult {
            disposition: Disposition::Continue,
            replies,
            delivered: Vec::new(),
            peer_closed: false,
            cause: None,
        }
    }

    fn delete(replies: Vec<Segment>, cause: DropCause) -> Self {
        InputResult {
            disposition: Disposition::Delete,
            replies,
            delivered: Vec::new(),
            peer_closed: false,
            cause: Some(cause),
        }
    }
}

/// `deliver_in_3a`: RFC 9293 §3.10.7.4 segment-acceptability test, this
/// engine's only form of sequence validity check (urgent pointers and SACK
/// are Non-goals). A zero-length segment against a zero receive window is
/// acceptable only if it carries no data and seq == rcv_nxt.
fn is_segment_acceptable(state: &ConnectionState, seg: &Segment) -> bool {
    let cb = &state.cb;
    let seg_len = seg.seg_len();
    let rcv_nxt = cb.rcv.nxt;
    let rcv_end = rcv_nxt.addi(cb.rcv.wnd);

    if cb.rcv.wnd == 0 {
        return seg_len == 0 && seg.seq == rcv_nxt;
    }
    if seg_len == 0 {
        return seg.seq.in_window(rcv_nxt, rcv_end) || seg.seq == rcv_nxt;
    }
    let seg_end = seg.seq.addi(seg_len - 1);
    seg.seq.in_window(rcv_nxt, rcv_end) || seg_end.in_window(rcv_nxt, rcv_end)
}

/// Entry point: apply one incoming segment to a connection already past the
/// initial handshake step (i.e. not the very first SYN on a listening
/// port).
pub fn on_segment(
    state: &mut ConnectionState,
    now: Instant,
    seg: &Segment,
    id: crate::ConnectionId,
    config: &Config,
) -> InputResult {
    match state.tcp_state {
        TcpState::SynSent => deliver_in_2(state, now, seg, id, config),
        TcpState::SynReceived => deliver_in_3c_3d(state, now, seg, id, config),
        _ => deliver_in_synchronized(state, now, seg, id, config),
    }
}

/// `deliver_in_2` / `deliver_in_2a` / `deliver_in_2b`: SYN-SENT processing
/// (RFC 9293 §3.10.7.3).
fn deliver_in_2(
    state: &mut ConnectionState,
    now: Instant,
    seg: &Segment,
    id: crate::ConnectionId,
    config: &Config,
) -> InputResult {
    let cb = &mut state.cb;

    // deliver_in_2a: an ACK in SYN-SENT must ack exactly our unconfirmed
    // SYN; anything else is answered with a RST (unless the segment is
    // itself a RST) and the connection is untouched otherwise... but since
    // SYN-SENT has nothing durable yet, a bad ACK here is simply rejected.
    if seg.flags.ack && !(cb.snd.una.less(seg.ack) && seg.ack.less_equal(cb.snd.nxt)) {
        return match Segment::dropwithreset(seg, id) {
            Some(rst) => InputResult::continue_with(vec![rst]),
            None => InputResult::continue_with(vec![]),
        };
    }

    if seg.flags.rst {
        if seg.flags.ack {
            return InputResult::delete(vec![], DropCause::ConnectionReset);
        }
        return InputResult::continue_with(vec![]);
    }

    if !seg.flags.syn || seg.flags.fin {
        // Anything other than exactly {SYN} or exactly {SYN,ACK} is "any
        // other flag/ack combination" per spec §4.4 — drop the segment.
        return InputResult::continue_with(vec![]);
    }

    // deliver_in_2: a SYN (with or without ACK) completes the negotiation.
    cb.rcv.irs = seg.seq;
    cb.rcv.nxt = seg.seq.incr();
    cb.rcv.adv = cb.rcv.nxt.addi(cb.rcv.wnd);
    cb.snd.wnd = seg.window as u32;
    cb.snd.wl1 = seg.seq;
    cb.snd.wl2 = seg.ack;

    let mss = subroutines::select_mss(seg.options.mss, config);
    cb.negotiated.t_maxseg = mss;
    let (doing_ws, snd_scale, rcv_scale) =
        subroutines::negotiate_window_scale(seg.options.window_scale, cb.negotiated.rcv_scale);
    cb.negotiated.tf_doing_ws = doing_ws;
    cb.negotiated.snd_scale = snd_scale;
    cb.negotiated.rcv_scale = rcv_scale;

    if seg.flags.ack {
        // deliver_in_2: our SYN is acked, handshake done in two segments.
        cb.snd.una = seg.ack;
        timer::cancel(&mut cb.timers.tt_rexmt);
        timer::cancel(&mut cb.timers.tt_conn_est);
        state.tcp_state = TcpState::Established;
        let ack = Segment::make_ack(&state.cb, false, id);
        InputResult::continue_with(vec![ack])
    } else {
        // deliver_in_2b: simultaneous open — peer's SYN arrived with no ACK
        // of ours. Answer with our own SYN+ACK and wait in SYN-RECEIVED.
        state.tcp_state = TcpState::SynReceived;
        subroutines::start_rexmt_timer(&mut state.cb, now, RexmtMode::RexmtSyn, 0, config);
        let synack = Segment::make_syn_ack(&state.cb, id);
        InputResult::continue_with(vec![synack])
    }
}

/// `deliver_in_3c_3d`: SYN-RECEIVED processing. Only an ACK of our SYN
/// completes the handshake; anything else drops back to a reset.
fn deliver_in_3c_3d(
    state: &mut ConnectionState,
    now: Instant,
    seg: &Segment,
    id: crate::ConnectionId,
    config: &Config,
) -> InputResult {
    if !is_segment_acceptable(state, seg) {
        return InputResult::continue_with(challenge_or_drop(state, seg, id));
    }
    if seg.flags.rst {
        return InputResult::delete(vec![], DropCause::ConnectionReset);
    }
    let cb = &mut state.cb;
    if !(seg.flags.ack
        && !seg.flags.syn
        && !seg.flags.fin
        && cb.snd.una.less(seg.ack)
        && seg.ack.less_equal(cb.snd.nxt))
    {
        let rst = Segment::dropwithreset(seg, id);
        return InputResult::delete(rst.into_iter().collect(), DropCause::ConnectionReset);
    }

    cb.snd.una = seg.ack;
    cb.snd.wnd = seg.window as u32;
    cb.snd.wl1 = seg.seq;
    cb.snd.wl2 = seg.ack;
    timer::cancel(&mut cb.timers.tt_rexmt);
    timer::cancel(&mut cb.timers.tt_conn_est);
    state.tcp_state = TcpState::Established;

    deliver_in_synchronized(state, now, seg, id, config)
}

/// Build the RFC 5961 challenge-ACK reply for an in-connection segment that
/// fails acceptability, or a plain RST if the segment itself was a RST/SYN
/// that needs answering per RFC 9293 §3.10.7.4's per-case table. `None`
/// means "silently discard" with no reply at all.
fn challenge_or_drop(state: &ConnectionState, seg: &Segment, id: crate::ConnectionId) -> Vec<Segment> {
    if seg.flags.rst {
        return Vec::new();
    }
    vec![Segment::make_ack(&state.cb, false, id)]
}

/// `deliver_in_3` / `deliver_in_4` / `deliver_in_5`: the synchronized-state
/// dispatch (ESTABLISHED through TIME_WAIT), covering RST/SYN handling,
/// `di3_ackstuff` (ACK processing and congestion control), `di3_datastuff`
/// (payload reassembly and delivery) and `di3_ststuff` (the `tcp_state`
/// transition table) in that order, as RFC 9293 §3.10.7.4 lays the steps
/// out.
fn deliver_in_synchronized(
    state: &mut ConnectionState,
    now: Instant,
    seg: &Segment,
    id: crate::ConnectionId,
    config: &Config,
) -> InputResult {
    if !is_segment_acceptable(state, seg) {
        return InputResult::continue_with(challenge_or_drop(state, seg, id));
    }

    if let Some(result) = di3_rststuff(state, seg, id) {
        return result;
    }

    if seg.flags.syn {
        // RFC 5961 §4: an in-window SYN in a synchronized state is always
        // a challenge ACK, never processed as a new connection.
        return InputResult::continue_with(vec![Segment::make_ack(&state.cb, false, id)]);
    }

    if !seg.flags.ack {
        return InputResult::continue_with(vec![]);
    }

    // deliver_in_3: record that this connection was just heard from.
    state.cb.timers.t_idletime = Some(now);

    di3_ackstuff(state, now, seg, config);
    let (delivered, fin_now) = di3_datastuff(state, seg);

    if let Some(result) = di3_ststuff(state, now, config, fin_now) {
        return result;
    }

    let mut replies = Vec::new();
    if state.cb.tf_shouldacknow {
        replies.push(Segment::make_ack(&state.cb, false, id));
        state.cb.tf_shouldacknow = false;
        timer::cancel(&mut state.cb.timers.tt_delack);
    }

    InputResult {
        disposition: Disposition::Continue,
        replies,
        delivered,
        peer_closed: fin_now,
        cause: None,
    }
}

/// RST control-bit processing for synchronized states (part of what the
/// reference calls `di3_ststuff`). Returns `Some` when the segment was
/// fully handled here (a RST terminating the connection, or TIME_WAIT's
/// RFC 1337 defense), `None` to let the caller continue with ACK/data
/// processing.
fn di3_rststuff(
    state: &mut ConnectionState,
    seg: &Segment,
    id: crate::ConnectionId,
) -> Option<InputResult> {
    if !seg.flags.rst {
        return None;
    }
    if matches!(state.tcp_state, TcpState::TimeWait) {
        // RFC 1337: ignore RSTs in TIME_WAIT outright rather than let a
        // wandering duplicate assassinate the wait state early.
        return Some(InputResult::continue_with(vec![]));
    }
    // RFC 5961 §3.2: a RST is only actionable if it lands exactly on
    // rcv_nxt; anything merely in-window gets a challenge ACK instead of
    // tearing the connection down.
    if seg.seq == state.cb.rcv.nxt {
        Some(InputResult::delete(vec![], DropCause::ConnectionReset))
    } else {
        Some(InputResult::continue_with(vec![Segment::make_ack(
            &state.cb, false, id,
        )]))
    }
}

/// `di3_ackstuff`: advance `snd.una`, update the send window, sample RTT,
/// and grow the congestion window on a fresh ACK.
fn di3_ackstuff(state: &mut ConnectionState, now: Instant, seg: &Segment, config: &Config) {
    let cb = &mut state.cb;
    if !cb.snd.una.less(seg.ack) {
        // Old or duplicate ACK: nothing new acknowledged.
        return;
    }
    if seg.ack.greater(cb.snd.max) {
        // Acks something never sent; caller already validated acceptability
        // for sequence space, but ack space is checked here instead.
        return;
    }

    let acked = seg.ack.sub(cb.snd.una).max(0) as u32;
    cb.snd.una = seg.ack;

    if cb.snd.wl1.less(seg.seq) || (cb.snd.wl1 == seg.seq && cb.snd.wl2.less_equal(seg.ack)) {
        cb.snd.wnd = seg.window as u32;
        cb.snd.wl1 = seg.seq;
        cb.snd.wl2 = seg.ack;
    }

    if let Some(rttseg) = cb.t_rttseg {
        if rttseg.seq.less(seg.ack) {
            let sample_ms = now.saturating_duration_since(rttseg.sent_at).as_millis() as u32;
            subroutines::rtt_sample(&mut cb.t_rttinf, sample_ms.max(1));
            cb.t_rttseg = None;
        }
    }

    subroutines::grow_cwnd_on_ack(cb, acked, cb.negotiated.t_maxseg as u32);

    if cb.snd.una == cb.snd.max {
        timer::cancel(&mut cb.timers.tt_rexmt);
    } else {
        // spec §4.4: "restart with zero shift for partial ACK" — this ACK
        // covered some but not all outstanding data, so the connection is
        // making progress and any prior backoff no longer applies.
        subroutines::start_rexmt_timer(cb, now, RexmtMode::Rexmt, 0, config);
    }
}

/// `di3_datastuff`: feed payload bytes (and, if this segment carries one, a
/// FIN marker) into the reassembly queue, then pull out whatever in-order
/// prefix is now available. Returns the delivered bytes and whether the
/// drain consumed a FIN — this is how a FIN that arrived behind a gap gets
/// noticed once the gap later fills in, instead of only when it arrives
/// itself in order.
fn di3_datastuff(state: &mut ConnectionState, seg: &Segment) -> (Vec<u8>, bool) {
    let cb = &mut state.cb;
    if !seg.payload.is_empty() {
        cb.reass.insert(seg.seq, false, seg.payload.clone());
    }
    if seg.flags.fin {
        let fin_seq = seg.seq.addi(seg.payload.len() as u32);
        cb.reass.insert(fin_seq, true, Vec::new());
    }

    let mut out = Vec::new();
    let mut fin = false;
    while let Some((chunk, chunk_fin)) = cb.reass.maybe_take(cb.rcv.nxt) {
        cb.rcv.nxt = cb.rcv.nxt.addi(chunk.len() as u32);
        out.extend_from_slice(&chunk);
        if chunk_fin {
            cb.rcv.nxt = cb.rcv.nxt.incr();
            fin = true;
            break;
        }
    }
    if !out.is_empty() {
        state.rcvq.extend_from_slice(&out);
    }
    if !out.is_empty() || fin {
        state.cb.tf_shouldacknow = true;
    }
    if fin {
        state.cantrcvmore = true;
    }
    state.refresh_rcv_wnd();
    (out, fin)
}

/// `di3_ststuff`: the state-transition table of spec §4.4 step 4, run after
/// ACK and data processing on every synchronized-state segment (not just
/// ones carrying a FIN — a pure ACK can complete `FIN_WAIT_1 -> FIN_WAIT_2`,
/// `CLOSING -> TIME_WAIT`, or `LAST_ACK ->` destroy just as well as a FIN
/// can). Returns `Some` only for the `LAST_ACK` row, which destroys the
/// connection instead of merely changing `tcp_state`.
fn di3_ststuff(
    state: &mut ConnectionState,
    now: Instant,
    config: &Config,
    fin_now: bool,
) -> Option<InputResult> {
    let ourfinisacked = state.our_fin_is_acked();

    state.tcp_state = match state.tcp_state {
        TcpState::Established => {
            if fin_now {
                TcpState::CloseWait
            } else {
                TcpState::Established
            }
        }
        TcpState::FinWait1 => match (fin_now, ourfinisacked) {
            (false, false) => TcpState::FinWait1,
            (false, true) => {
                state.cb.timers.tt_fin_wait_2 = timer::arm(
                    (),
                    now,
                    Duration::from_millis(config.fin_wait_2_ms as u64),
                );
                TcpState::FinWait2
            }
            (true, false) => TcpState::Closing,
            (true, true) => {
                enter_time_wait(state, now, config);
                TcpState::TimeWait
            }
        },
        TcpState::FinWait2 => {
            if fin_now {
                enter_time_wait(state, now, config);
                TcpState::TimeWait
            } else {
                TcpState::FinWait2
            }
        }
        TcpState::Closing => {
            if ourfinisacked {
                enter_time_wait(state, now, config);
                TcpState::TimeWait
            } else {
                TcpState::Closing
            }
        }
        TcpState::LastAck => {
            if ourfinisacked {
                return Some(InputResult::delete(vec![], DropCause::ConnectionClosed));
            }
            TcpState::LastAck
        }
        TcpState::TimeWait => {
            state.cb.timers.tt_2msl = timer::arm(
                (),
                now,
                Duration::from_millis(config.msl_ms as u64 * 2),
            );
            TcpState::TimeWait
        }
        other => other,
    };
    None
}

/// Entering TIME_WAIT: arm the 2MSL linger and cancel every timer that no
/// longer applies once the connection is fully quiesced on our side.
fn enter_time_wait(state: &mut ConnectionState, now: Instant, config: &Config) {
    state.cb.timers.tt_2msl = timer::arm((), now, Duration::from_millis(config.msl_ms as u64 * 2));
    timer::cancel(&mut state.cb.timers.tt_fin_wait_2);
    timer::cancel(&mut state.cb.timers.tt_rexmt);
}
