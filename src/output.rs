//! Turning pending send-queue bytes into outbound segments (spec §4.5
//! "Output path").

use std::time::Instant;

use crate::config::Config;
use crate::segment::{Flags, Options, Segment};
use crate::subroutines;
use crate::tcb::{ConnectionState, RexmtMode};
use crate::timer;

/// How much more data (in bytes) we're currently allowed to put on the
/// wire: the lesser of the congestion window and the peer's advertised
/// window (scaled), minus what's already in flight.
fn usable_window(state: &ConnectionState) -> u32 {
    let cb = &state.cb;
    let peer_wnd = cb.snd.wnd << cb.negotiated.snd_scale;
    let allowed = peer_wnd.min(cb.snd.cwnd);
    let in_flight = cb.snd.nxt.sub(cb.snd.una).max(0) as u32;
    allowed.saturating_sub(in_flight)
}

/// Bytes from `sndq` still waiting to go out for the first time (i.e. past
/// everything already covered by `[snd.una, snd.nxt)`).
fn unsent_offset(state: &ConnectionState) -> usize {
    state.cb.snd.nxt.sub(state.cb.snd.una).max(0) as usize
}

/// Drain as much of `sndq` as the window and MSS allow into a run of
/// outbound segments, advancing `snd.nxt`/`snd.max` as it goes. Called after
/// every `send()` and after every ACK that might have opened the window.
pub fn build_outgoing(
    state: &mut ConnectionState,
    now: Instant,
    id: crate::ConnectionId,
    config: &Config,
) -> Vec<Segment> {
    let mss = state.cb.negotiated.t_maxseg as usize;
    let mut out = Vec::new();

    loop {
        let offset = unsent_offset(state);
        let remaining = state.sndq.len().saturating_sub(offset);
        let window = usable_window(state) as usize;

        // spec §4.5: the drained-and-closing case is the one time this loop
        // still has work to do with nothing left in `remaining` — a bare
        // FIN segment to flip the local half closed.
        let drained_fin_due = remaining == 0 && state.cantsndmore && !state.fin_sent;

        if remaining == 0 && !drained_fin_due {
            break;
        }
        if remaining > 0 && window == 0 {
            arm_persist_if_idle(state, now, config);
            break;
        }

        // spec §4.5's gate: "usable ≥ t_maxseg or (sndq drained AND
        // cantsndmore AND FIN not yet sent) or tf_shouldacknow" — anything
        // short of that and the window/MSS cut a chunk too small to be
        // worth sending yet (silly-window-syndrome avoidance).
        let should_send = window >= mss || drained_fin_due || state.cb.tf_shouldacknow;
        if remaining > 0 && !should_send {
            break;
        }

        let take = remaining.min(mss).min(window);
        let payload = state.sndq[offset..offset + take].to_vec();
        let is_last_chunk = offset + take == state.sndq.len();
        let fin = is_last_chunk && state.cantsndmore;

        let seg = Segment {
            src_port: id.local.port,
            dst_port: id.remote.port,
            seq: state.cb.snd.nxt,
            ack: state.cb.rcv.nxt,
            window: advertise_window(state),
            flags: Flags {
                ack: true,
                fin,
                // spec §4.5: "PSH if the slice empties sndq".
                psh: is_last_chunk,
                ..Default::default()
            },
            options: Options::default(),
            payload,
        };

        if state.cb.t_rttseg.is_none() {
            state.cb.t_rttseg = Some(crate::tcb::RttSeg {
                seq: seg.seq,
                sent_at: now,
            });
        }

        if fin {
            state.fin_sent = true;
        }

        let seg_len = seg.seg_len();
        state.cb.snd.nxt = state.cb.snd.nxt.addi(seg_len);
        state.cb.snd.max = state.cb.snd.max.max(state.cb.snd.nxt);
        state.cb.rcv.last_ack_sent = state.cb.rcv.nxt;
        // spec §4.5: "update rcv_adv = rcv_nxt + rcv_wnd" on every segment
        // this path emits.
        state.cb.rcv.adv = state.cb.rcv.nxt.addi(state.cb.rcv.wnd);
        if seg.window > 0 {
            state.cb.rcv.tf_rxwin0sent = false;
        }

        out.push(seg);

        if take < remaining {
            // Window or MSS cut the chunk short; don't also try to send a
            // FIN on this pass, next call will pick up the remainder.
            break;
        }
    }

    if !out.is_empty() {
        let shift = state.cb.timers.tt_rexmt.map(|t| t.value.shift).unwrap_or(0);
        subroutines::start_rexmt_timer(&mut state.cb, now, RexmtMode::Rexmt, shift, config);
        state.cb.tf_shouldacknow = false;
        timer::cancel(&mut state.cb.timers.tt_delack);
    }

    out
}

/// Zero-window condition with nothing outstanding: arm the persist timer so
/// `timer_tick` starts probing instead of stalling forever (spec §4.6).
fn arm_persist_if_idle(state: &mut ConnectionState, now: Instant, config: &Config) {
    let in_flight = state.cb.snd.nxt.sub(state.cb.snd.una).max(0);
    if in_flight == 0 && state.cb.snd.wnd == 0 && state.cb.timers.tt_rexmt.is_none() {
        subroutines::start_rexmt_timer(&mut state.cb, now, RexmtMode::Persist, 0, config);
    }
}

fn advertise_window(state: &ConnectionState) -> u16 {
    (state.cb.rcv.wnd >> state.cb.negotiated.rcv_scale).min(u16::MAX as u32) as u16
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tcb::ControlBlock;
    use crate::{Dual, Quad};
    use crate::seq::Seq;
    use std::net::Ipv4Addr;

    fn id() -> crate::ConnectionId {
        Quad {
            local: Dual {
                ip: Ipv4Addr::new(10, 0, 0, 1),
                port: 80,
            },
            remote: Dual {
                ip: Ipv4Addr::new(10, 0, 0, 2),
                port: 4000,
            },
        }
    }

    fn established(config: &Config) -> ConnectionState {
        let mut cb = ControlBlock::new_active(Seq::new(1000), config);
        cb.snd.una = Seq::new(1001);
        cb.snd.nxt = Seq::new(1001);
        cb.snd.max = Seq::new(1001);
        cb.snd.wnd = 4096;
        cb.rcv.nxt = Seq::new(5001);
        ConnectionState::new(crate::tcb::TcpState::Established, cb, config)
    }

    #[test]
    fn sends_queued_bytes_within_the_window() {
        let config = Config::default();
        let mut state = established(&config);
        state.sndq = b"hello world".to_vec();
        let out = build_outgoing(&mut state, Instant::now(), id(), &config);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].payload, b"hello world".to_vec());
        assert_eq!(state.cb.snd.nxt, Seq::new(1001 + 11));
    }

    #[test]
    fn sets_fin_on_the_final_chunk_once_cantsndmore() {
        let config = Config::default();
        let mut state = established(&config);
        state.sndq = b"bye".to_vec();
        state.cantsndmore = true;
        let out = build_outgoing(&mut state, Instant::now(), id(), &config);
        assert_eq!(out.len(), 1);
        assert!(out[0].flags.fin);
        assert!(out[0].flags.psh);
        assert_eq!(state.cb.snd.nxt, Seq::new(1001 + 3 + 1));
    }

    #[test]
    fn a_bare_fin_goes_out_once_sndq_is_already_drained() {
        let config = Config::default();
        let mut state = established(&config);
        // Nothing queued at all: snd.nxt already caught up with snd.una.
        state.cantsndmore = true;
        let out = build_outgoing(&mut state, Instant::now(), id(), &config);
        assert_eq!(out.len(), 1);
        assert!(out[0].flags.fin);
        assert!(out[0].payload.is_empty());
        assert!(state.fin_sent);
    }

    #[test]
    fn undersized_window_withholds_a_partial_segment() {
        let config = Config::default();
        let mut state = established(&config);
        // Window well under one MSS, no FIN pending, no ACK owed: spec
        // §4.5's gate says wait rather than emit an undersized segment.
        state.cb.snd.wnd = 10;
        state.sndq = b"hello world".to_vec();
        let out = build_outgoing(&mut state, Instant::now(), id(), &config);
        assert!(out.is_empty());
        assert_eq!(state.cb.snd.nxt, Seq::new(1001));
    }

    #[test]
    fn a_deferred_ack_forces_an_undersized_segment_out() {
        let config = Config::default();
        let mut state = established(&config);
        state.cb.snd.wnd = 10;
        state.cb.tf_shouldacknow = true;
        state.sndq = b"hello world".to_vec();
        let out = build_outgoing(&mut state, Instant::now(), id(), &config);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].payload.len(), 10);
    }

    #[test]
    fn zero_peer_window_stalls_and_arms_persist() {
        let config = Config::default();
        let mut state = established(&config);
        state.cb.snd.wnd = 0;
        state.sndq = b"stuck".to_vec();
        let out = build_outgoing(&mut state, Instant::now(), id(), &config);
        assert!(out.is_empty());
        assert!(state.cb.timers.tt_rexmt.is_some());
    }
}
