//! The decoded segment record and its constructors (spec §4.2).

use crate::seq::Seq;
use crate::tcb::ControlBlock;
use crate::ConnectionId;

/// Control flags a segment may carry. Urgent data and SACK are Non-goals;
/// timestamps are a Non-goal too, so this set only needs what the state
/// machine in §4.4 dispatches on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Flags {
    pub syn: bool,
    pub fin: bool,
    pub rst: bool,
    pub ack: bool,
    pub psh: bool,
}

impl Flags {
    pub const fn syn() -> Self {
        Flags { syn: true, ..EMPTY }
    }
    pub const fn syn_ack() -> Self {
        Flags {
            syn: true,
            ack: true,
            ..EMPTY
        }
    }
    pub const fn ack() -> Self {
        Flags { ack: true, ..EMPTY }
    }
    pub const fn rst() -> Self {
        Flags { rst: true, ..EMPTY }
    }
    pub const fn rst_ack() -> Self {
        Flags {
            rst: true,
            ack: true,
            ..EMPTY
        }
    }

    /// Invariant (spec §3): at most one of SYN, FIN, RST may be set in any
    /// segment this engine emits.
    pub fn at_most_one_control_bit(&self) -> bool {
        (self.syn as u8 + self.fin as u8 + self.rst as u8) <= 1
    }
}

const EMPTY: Flags = Flags {
    syn: false,
    fin: false,
    rst: false,
    ack: false,
    psh: false,
};

/// Negotiated options carried on SYN / SYN-ACK segments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Options {
    pub mss: Option<u16>,
    pub window_scale: Option<u8>,
}

/// A fully decoded TCP segment, independent of wire representation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub src_port: u16,
    pub dst_port: u16,
    pub seq: Seq,
    pub ack: Seq,
    /// Window as carried on the wire, pre-scale.
    pub window: u16,
    pub flags: Flags,
    pub options: Options,
    pub payload: Vec<u8>,
}

impl Segment {
    /// SEG.LEN per RFC 9293: payload length plus one for each of SYN/FIN.
    pub fn seg_len(&self) -> u32 {
        self.payload.len() as u32 + self.flags.syn as u32 + self.flags.fin as u32
    }

    /// `make_syn(cb, id)` — active-open SYN.
    pub fn make_syn(cb: &ControlBlock, id: ConnectionId) -> Segment {
        Segment {
            src_port: id.local.port,
            dst_port: id.remote.port,
            seq: cb.snd.iss,
            ack: Seq::ZERO,
            window: advertise_window(cb),
            flags: Flags::syn(),
            options: handshake_options(cb),
            payload: Vec::new(),
        }
    }

    /// `make_syn_ack(cb, id)` — passive-open SYN+ACK.
    pub fn make_syn_ack(cb: &ControlBlock, id: ConnectionId) -> Segment {
        Segment {
            src_port: id.local.port,
            dst_port: id.remote.port,
            seq: cb.snd.iss,
            ack: cb.rcv.nxt,
            window: advertise_window(cb),
            flags: Flags::syn_ack(),
            options: handshake_options(cb),
            payload: Vec::new(),
        }
    }

    /// `make_ack(cb, fin?, id)`.
    pub fn make_ack(cb: &ControlBlock, fin: bool, id: ConnectionId) -> Segment {
        Segment {
            src_port: id.local.port,
            dst_port: id.remote.port,
            seq: cb.snd.nxt,
            ack: cb.rcv.nxt,
            window: advertise_window(cb),
            flags: Flags {
                ack: true,
                fin,
                ..EMPTY
            },
            options: Options::default(),
            payload: Vec::new(),
        }
    }

    /// `dropwithreset(seg)` — the reset response to an offending segment,
    /// `None` iff the input itself had RST set (a RST is never answered with
    /// a RST).
    pub fn dropwithreset(seg: &Segment, id: ConnectionId) -> Option<Segment> {
        if seg.flags.rst {
            return None;
        }
        let (seq, ack, flags) = if seg.flags.ack {
            (seg.ack, Seq::ZERO, Flags::rst())
        } else {
            (
                Seq::ZERO,
                seg.seq.addi(seg.seg_len()),
                Flags::rst_ack(),
            )
        };
        Some(Segment {
            src_port: id.local.port,
            dst_port: id.remote.port,
            seq,
            ack,
            window: 0,
            flags,
            options: Options::default(),
            payload: Vec::new(),
        })
    }
}

fn advertise_window(cb: &ControlBlock) -> u16 {
    let scaled = (cb.rcv.wnd >> cb.negotiated.rcv_scale).min(u16::MAX as u32);
    scaled as u16
}

fn handshake_options(cb: &ControlBlock) -> Options {
    Options {
        mss: Some(cb.negotiated.t_advmss),
        window_scale: cb.negotiated.request_r_scale,
    }
}
