//! Shared computations used by both the input and output paths (spec §4
//! "Subroutines"): MSS/window-scale negotiation, RTT estimation, and
//! retransmit-timer arming. Kept separate from `input`/`output` because both
//! paths call into this set — input negotiates and samples RTT off an
//! incoming ACK, output arms the next retransmit timer after sending.

use std::time::Instant;

use crate::config::Config;
use crate::seq::Seq;
use crate::tcb::{ControlBlock, RexmtMode, RexmtTimer, RttInfo};
use crate::timer;

/// Pick the segment size both ends will use: the peer's advertised MSS
/// (or the RFC 9293 default if it sent none), clamped to our own advertised
/// ceiling and floored at `config.min_mss()`.
pub fn select_mss(peer_mss: Option<u16>, config: &Config) -> u16 {
    let peer = peer_mss.unwrap_or(config.default_mss);
    peer.min(config.advertised_mss).max(config.min_mss())
}

/// Window scaling is all-or-nothing (RFC 9293 §3.2.2): it only takes effect
/// if *both* sides sent the option on the SYN exchange. Returns
/// `(tf_doing_ws, snd_scale, rcv_scale)`.
pub fn negotiate_window_scale(
    peer_ws: Option<u8>,
    our_requested_scale: u8,
) -> (bool, u8, u8) {
    match peer_ws {
        Some(peer_scale) => (true, peer_scale, our_requested_scale),
        None => (false, 0, 0),
    }
}

/// Jacobson/Karels RTT estimator (RFC 6298), fixed-point in milliseconds.
/// `sample_ms` is one round-trip observation; updates `srtt`/`rttvar` in
/// place and clears the backoff shift (a fresh sample means the connection
/// is no longer in backoff).
pub fn rtt_sample(rttinfo: &mut RttInfo, sample_ms: u32) {
    if rttinfo.updates == 0 {
        rttinfo.srtt_ms = sample_ms;
        rttinfo.rttvar_ms = sample_ms / 2;
    } else {
        let delta = (sample_ms as i64 - rttinfo.srtt_ms as i64).unsigned_abs() as u32;
        rttinfo.rttvar_ms = rttinfo.rttvar_ms - rttinfo.rttvar_ms / 4 + delta / 4;
        rttinfo.srtt_ms = rttinfo.srtt_ms - rttinfo.srtt_ms / 8 + sample_ms / 8;
    }
    rttinfo.min_ms = rttinfo.min_ms.min(sample_ms);
    rttinfo.updates += 1;
    rttinfo.last_shift = 0;
}

/// RTO per RFC 6298: `srtt + max(clock_granularity, 4*rttvar)`, clamped to
/// `[rto_min, rto_max]`. Before any sample has ever been taken, a
/// conservative fixed start value is used instead (RFC 6298 §2.1).
pub fn base_rto_ms(rttinfo: &RttInfo, config: &Config) -> u32 {
    let raw = if rttinfo.updates == 0 {
        1_000
    } else {
        rttinfo.srtt_ms + (4 * rttinfo.rttvar_ms).max(10)
    };
    raw.clamp(config.rto_min_ms, config.rto_max_ms)
}

/// Apply exponential backoff for the `shift`'th consecutive retransmission
/// of the same segment, capped at `rto_max_ms`.
pub fn backoff_rto_ms(base_ms: u32, shift: u32, config: &Config) -> u32 {
    base_ms.saturating_mul(1u32 << shift.min(6)).min(config.rto_max_ms)
}

/// Arm (or re-arm) `tt_rexmt` for the given mode at the given backoff
/// `shift`. SYN retransmissions use a fixed base RTO (there's no RTT sample
/// yet by definition); ordinary data and persist probes use the live
/// estimator. Callers pass `shift` explicitly rather than have it inferred
/// from whatever was previously armed: spec §4.4 requires the timer be
/// "restart[ed] with zero shift for partial ACK", which only holds if
/// resetting to zero is the caller's choice, not this function's default.
pub fn start_rexmt_timer(
    cb: &mut ControlBlock,
    now: Instant,
    mode: RexmtMode,
    shift: u32,
    config: &Config,
) {
    let base = match mode {
        RexmtMode::RexmtSyn => 1_000,
        RexmtMode::Rexmt | RexmtMode::Persist => base_rto_ms(&cb.t_rttinf, config),
    };
    let rto = backoff_rto_ms(base, shift, config);
    cb.timers.tt_rexmt = timer::arm(
        RexmtTimer { mode, shift },
        now,
        std::time::Duration::from_millis(rto as u64),
    );
}

/// Bump `tt_rexmt`'s backoff shift by one and re-arm at the same mode.
/// Returns the new shift so the caller (timer_tick) can compare it against
/// `tcp_maxrxtshift`.
pub fn backoff_rexmt_timer(cb: &mut ControlBlock, now: Instant, config: &Config) -> u32 {
    let (mode, prev_shift) = cb
        .timers
        .tt_rexmt
        .map(|t| (t.value.mode, t.value.shift))
        .unwrap_or((RexmtMode::Rexmt, 0));
    let shift = prev_shift + 1;
    let base = match mode {
        RexmtMode::RexmtSyn => 1_000,
        RexmtMode::Rexmt | RexmtMode::Persist => base_rto_ms(&cb.t_rttinf, config),
    };
    let rto = backoff_rto_ms(base, shift, config);
    cb.timers.tt_rexmt = timer::arm(
        RexmtTimer { mode, shift },
        now,
        std::time::Duration::from_millis(rto as u64),
    );
    shift
}

/// Van Jacobson slow-start / congestion-avoidance growth on a fresh ACK.
pub fn grow_cwnd_on_ack(cb: &mut ControlBlock, acked_bytes: u32, mss: u32) {
    if cb.snd.cwnd < cb.snd.ssthresh {
        cb.snd.cwnd = cb.snd.cwnd.saturating_add(acked_bytes.min(mss));
    } else {
        let incr = (mss.saturating_mul(mss) / cb.snd.cwnd.max(1)).max(1);
        cb.snd.cwnd = cb.snd.cwnd.saturating_add(incr);
    }
}

/// Multiplicative decrease on loss: halve the send window and remember it
/// as the new slow-start threshold (RFC 5681 §3.1).
pub fn enter_congestion_recovery(cb: &mut ControlBlock, mss: u32, recovery_point: Seq) {
    let flight = cb.snd.max.sub(cb.snd.una).max(0) as u32;
    let half = (flight / 2).max(2 * mss);
    cb.retransmit.prev_cwnd = cb.snd.cwnd;
    cb.retransmit.prev_ssthresh = cb.snd.ssthresh;
    cb.snd.ssthresh = half;
    cb.snd.cwnd = mss;
    cb.snd.recover = recovery_point;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn select_mss_prefers_peer_but_respects_our_ceiling() {
        let cfg = Config::default();
        assert_eq!(select_mss(Some(1000), &cfg), 1000);
        assert_eq!(select_mss(Some(9000), &cfg), cfg.advertised_mss);
        assert_eq!(select_mss(None, &cfg), cfg.default_mss);
        assert_eq!(select_mss(Some(10), &cfg), cfg.min_mss());
    }

    #[test]
    fn window_scale_requires_both_sides() {
        assert_eq!(negotiate_window_scale(Some(7), 6), (true, 7, 6));
        assert_eq!(negotiate_window_scale(None, 6), (false, 0, 0));
    }

    #[test]
    fn rtt_sample_seeds_on_first_update() {
        let mut rtt = RttInfo::default();
        rtt_sample(&mut rtt, 100);
        assert_eq!(rtt.srtt_ms, 100);
        assert_eq!(rtt.rttvar_ms, 50);
        assert_eq!(rtt.updates, 1);
    }

    #[test]
    fn rtt_sample_smooths_subsequent_updates() {
        let mut rtt = RttInfo::default();
        rtt_sample(&mut rtt, 100);
        rtt_sample(&mut rtt, 100);
        assert_eq!(rtt.srtt_ms, 100);
        assert_eq!(rtt.rttvar_ms, 38);
    }

    #[test]
    fn backoff_doubles_each_shift_until_capped() {
        let cfg = Config::default();
        assert_eq!(backoff_rto_ms(1000, 0, &cfg), 1000);
        assert_eq!(backoff_rto_ms(1000, 1, &cfg), 2000);
        assert_eq!(backoff_rto_ms(1000, 10, &cfg), cfg.rto_max_ms);
    }

    #[test]
    fn congestion_recovery_halves_and_sets_mss_cwnd() {
        let mut cb = ControlBlock::new_active(Seq::new(0), &Config::default());
        cb.snd.nxt = Seq::new(10_000);
        cb.snd.max = Seq::new(10_000);
        cb.snd.una = Seq::new(0);
        enter_congestion_recovery(&mut cb, 536, Seq::new(10_000));
        assert_eq!(cb.snd.cwnd, 536);
        assert_eq!(cb.snd.ssthresh, 5_000);
    }
}
