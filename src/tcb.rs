//! Control block and connection state (spec §3, §4 "Control block &
//! connection state").

use std::net::Ipv4Addr;
use std::time::Instant;

use crate::config::Config;
use crate::reassembly::Reassembly;
use crate::seq::Seq;
use crate::timer::Timed;

/// One endpoint of a connection: IP address and port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Dual {
    pub ip: Ipv4Addr,
    pub port: u16,
}

/// The 4-tuple connection id (spec §3 "Connection id").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Quad {
    pub local: Dual,
    pub remote: Dual,
}

/// The nine synchronized TCP states (spec §3 "TCP state"). There is
/// deliberately no `Listen` or `Closed` variant: listening is a port set at
/// the engine level (spec §4.9) and a would-be-CLOSED connection is removed
/// from the engine's map instead of represented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TcpState {
    SynSent,
    SynReceived,
    Established,
    CloseWait,
    FinWait1,
    FinWait2,
    Closing,
    LastAck,
    TimeWait,
}

impl TcpState {
    /// ESTABLISHED/SYN_* can still receive; everything past a received FIN
    /// cannot. Spec §9 allows `cantrcvmore` to be derived exactly when this
    /// table holds; we store the flag explicitly (see `ConnectionState`) but
    /// this is the table it must agree with.
    pub fn normally_can_recv(self) -> bool {
        matches!(
            self,
            TcpState::SynSent | TcpState::SynReceived | TcpState::Established
        )
    }
}

/// Which kind of retransmit timer `tt_rexmt` is currently running as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RexmtMode {
    RexmtSyn,
    Rexmt,
    Persist,
}

/// `tt_rexmt`'s value: which mode, and how many consecutive backoffs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RexmtTimer {
    pub mode: RexmtMode,
    pub shift: u32,
}

/// Send-side scalars (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendBlock {
    pub una: Seq,
    pub max: Seq,
    pub nxt: Seq,
    pub wl1: Seq,
    pub wl2: Seq,
    pub iss: Seq,
    /// Peer-advertised window, pre-scale (as carried on the wire).
    pub wnd: u32,
    pub cwnd: u32,
    pub ssthresh: u32,
    pub recover: Seq,
}

/// Receive-side scalars (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecvBlock {
    pub wnd: u32,
    pub nxt: Seq,
    pub irs: Seq,
    pub adv: Seq,
    pub last_ack_sent: Seq,
    pub tf_rxwin0sent: bool,
}

/// Negotiated connection parameters (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Negotiated {
    pub t_maxseg: u16,
    pub t_advmss: u16,
    pub tf_doing_ws: bool,
    pub snd_scale: u8,
    pub rcv_scale: u8,
    pub request_r_scale: Option<u8>,
}

/// Smoothed round-trip-time estimator state (spec §3 "RTT state").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RttInfo {
    pub srtt_ms: u32,
    pub rttvar_ms: u32,
    pub min_ms: u32,
    pub updates: u32,
    pub last_shift: u32,
}

impl Default for RttInfo {
    fn default() -> Self {
        RttInfo {
            srtt_ms: 0,
            rttvar_ms: 0,
            min_ms: u32::MAX,
            updates: 0,
            last_shift: 0,
        }
    }
}

/// Duplicate-ACK / spurious-retransmit bookkeeping (spec §3 "retransmit
/// state").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RetransmitState {
    pub t_dupacks: u8,
    pub t_badrxtwin: Option<Seq>,
    pub prev_cwnd: u32,
    pub prev_ssthresh: u32,
}

/// The segment currently being timed for an RTT sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RttSeg {
    pub seq: Seq,
    pub sent_at: Instant,
}

/// Every per-connection timer (spec §3 "timers").
#[derive(Debug, Clone, Default)]
pub struct Timers {
    pub tt_rexmt: Option<Timed<RexmtTimer>>,
    pub tt_2msl: Option<Timed<()>>,
    pub tt_delack: Option<Timed<()>>,
    pub tt_conn_est: Option<Timed<()>>,
    pub tt_fin_wait_2: Option<Timed<()>>,
    pub t_idletime: Option<Instant>,
}

/// The per-connection control block (spec §3 "Control block").
#[derive(Debug, Clone)]
pub struct ControlBlock {
    pub snd: SendBlock,
    pub rcv: RecvBlock,
    pub negotiated: Negotiated,
    pub timers: Timers,
    pub t_rttseg: Option<RttSeg>,
    pub t_rttinf: RttInfo,
    pub retransmit: RetransmitState,
    pub reass: Reassembly,
    pub t_softerror: Option<String>,
    /// Set once `tf_shouldacknow` becomes true (an ACK is owed but not yet
    /// sent); cleared by the output path.
    pub tf_shouldacknow: bool,
}

impl ControlBlock {
    /// Build the control block for an active open (`connect`), about to
    /// send the initial SYN.
    pub fn new_active(iss: Seq, config: &Config) -> Self {
        ControlBlock {
            snd: SendBlock {
                una: iss,
                max: iss.incr(),
                nxt: iss.incr(),
                wl1: Seq::ZERO,
                wl2: Seq::ZERO,
                iss,
                wnd: 0,
                cwnd: config.initial_cwnd(config.default_mss),
                ssthresh: u32::MAX,
                recover: iss,
            },
            rcv: RecvBlock {
                wnd: config.rcvbufsize as u32,
                nxt: Seq::ZERO,
                irs: Seq::ZERO,
                adv: Seq::new(config.rcvbufsize as u32),
                last_ack_sent: Seq::ZERO,
                tf_rxwin0sent: false,
            },
            negotiated: Negotiated {
                t_maxseg: config.default_mss,
                t_advmss: config.advertised_mss,
                tf_doing_ws: false,
                snd_scale: 0,
                rcv_scale: config.rcv_scale,
                request_r_scale: Some(config.rcv_scale),
            },
            timers: Timers::default(),
            t_rttseg: None,
            t_rttinf: RttInfo::default(),
            retransmit: RetransmitState::default(),
            reass: Reassembly::new(),
            t_softerror: None,
            tf_shouldacknow: false,
        }
    }

    /// Build the control block for a passive open (`deliver_in_1`), having
    /// just validated an incoming bare SYN. `peer_mss`/`peer_ws` are the
    /// SYN's own MSS and window-scale options, already pulled out of its
    /// `Options` by the caller.
    pub fn new_passive(
        iss: Seq,
        irs: Seq,
        peer_wnd: u16,
        peer_mss: Option<u16>,
        peer_ws: Option<u8>,
        config: &Config,
    ) -> Self {
        let mut cb = Self::new_active(iss, config);
        cb.rcv.irs = irs;
        cb.rcv.nxt = irs.incr();
        cb.rcv.adv = cb.rcv.nxt.addi(cb.rcv.wnd);
        cb.snd.wnd = peer_wnd as u32;
        cb.negotiated.t_maxseg = crate::subroutines::select_mss(peer_mss, config);

        // Window scaling above 14 is nonsensical (would overflow a 32-bit
        // window past all practical use) and per RFC 1323 must be rejected
        // rather than silently clamped.
        let peer_ws = peer_ws.filter(|&shift| shift <= 14);
        let (doing_ws, snd_scale, rcv_scale) =
            crate::subroutines::negotiate_window_scale(peer_ws, cb.negotiated.rcv_scale);
        cb.negotiated.tf_doing_ws = doing_ws;
        cb.negotiated.snd_scale = snd_scale;
        cb.negotiated.rcv_scale = rcv_scale;
        cb
    }
}

/// The full state of one connection (spec §3 "Connection state").
#[derive(Debug, Clone)]
pub struct ConnectionState {
    pub tcp_state: TcpState,
    pub cb: ControlBlock,
    pub cantrcvmore: bool,
    pub cantsndmore: bool,
    pub sndbufsize: usize,
    pub rcvbufsize: usize,
    /// Bytes handed to `send` but not yet turned into outbound segments'
    /// acknowledged range; logically the stream `[snd_una, snd_una + len)`.
    pub sndq: Vec<u8>,
    /// Bytes delivered in order but not yet consumed by `recv`.
    pub rcvq: Vec<u8>,
    /// Set once a segment carrying FIN has actually gone out, so
    /// `ourfinisacked` can be told apart from "nothing to ack yet".
    pub fin_sent: bool,
}

impl ConnectionState {
    pub fn new(tcp_state: TcpState, cb: ControlBlock, config: &Config) -> Self {
        ConnectionState {
            tcp_state,
            cb,
            cantrcvmore: false,
            cantsndmore: false,
            sndbufsize: config.sndbufsize,
            rcvbufsize: config.rcvbufsize,
            sndq: Vec::new(),
            rcvq: Vec::new(),
            fin_sent: false,
        }
    }

    /// `ourfinisacked` (spec §4.4's `di3_ackstuff`): true once a FIN this
    /// side sent has itself been fully acknowledged.
    pub fn our_fin_is_acked(&self) -> bool {
        self.fin_sent && self.cb.snd.una == self.cb.snd.max
    }

    /// Recompute `rcv.wnd` from how much receive-buffer space is actually
    /// free (spec invariant: `rcv_wnd = rcv_adv - rcv_nxt` scaled, kept
    /// consistent by deriving the window from occupancy first and letting
    /// the output path re-derive `rcv_adv` from it). Held bytes include both
    /// what's queued for the user and what's buffered out-of-order.
    pub fn refresh_rcv_wnd(&mut self) {
        let held = self.rcvq.len() + self.cb.reass.buffered_bytes();
        let free = self.rcvbufsize.saturating_sub(held) as u32;
        self.cb.rcv.wnd = free;
        if free == 0 {
            self.cb.rcv.tf_rxwin0sent = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cantrcvmore_table_matches_state_classification() {
        assert!(TcpState::SynSent.normally_can_recv());
        assert!(TcpState::SynReceived.normally_can_recv());
        assert!(TcpState::Established.normally_can_recv());
        for s in [
            TcpState::CloseWait,
            TcpState::FinWait1,
            TcpState::FinWait2,
            TcpState::Closing,
            TcpState::LastAck,
            TcpState::TimeWait,
        ] {
            assert!(!s.normally_can_recv());
        }
    }

    #[test]
    fn new_active_keeps_send_invariant() {
        let cb = ControlBlock::new_active(Seq::new(1000), &Config::default());
        assert!(cb.snd.una.less_equal(cb.snd.nxt));
        assert!(cb.snd.nxt.less_equal(cb.snd.max));
    }
}
