//! The top-level `Engine`: owns the listener port set and the connection
//! table, and ties `wire`, `input`, `output`, `ops` and `timer_tick`
//! together into the single entry point a host actually calls (spec §4.9 /
//! §6 "External interfaces").
//!
//! `Engine` itself holds no sockets, threads, or implicit clock — every
//! method takes `now` and returns data, never blocks, and touches nothing
//! outside its own connection map.

use std::collections::{HashMap, HashSet};
use std::net::Ipv4Addr;
use std::time::Instant;

use tracing::{debug, trace, warn};

use crate::config::Config;
use crate::error::{DropCause, UserOpError};
use crate::input::{self, Disposition};
use crate::ops;
use crate::rng::IssRng;
use crate::segment::Segment;
use crate::tcb::{ConnectionState, ControlBlock, Dual, Quad, TcpState};
use crate::timer_tick::{self, TickResult};
use crate::wire;
use crate::ConnectionId;

/// A single outbound wire segment, addressed and ready for the host to
/// hand to its IP layer.
pub struct Outgoing {
    pub src_ip: Ipv4Addr,
    pub dst_ip: Ipv4Addr,
    pub bytes: Vec<u8>,
}

/// Something worth telling the host about, distinct from raw bytes to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A passive or active open completed the three-way handshake.
    Established(ConnectionId),
    /// New in-order bytes are available via `recv`.
    Received(ConnectionId),
    /// The peer closed its half of the connection; `recv` will return EOF
    /// once the queue drains.
    PeerClosed(ConnectionId),
    /// The connection was removed from the engine, and why.
    Closed(ConnectionId, DropCause),
}

/// The result of feeding one incoming wire segment to the engine.
#[derive(Default)]
pub struct HandleResult {
    pub outgoing: Vec<Outgoing>,
    pub events: Vec<Event>,
}

/// The engine: a listener port set, a connection table, and everything
/// needed to drive both (an ISN source, the local IP this engine answers
/// on, and the tunables in `Config`).
pub struct Engine {
    host_id: Ipv4Addr,
    rng: Box<dyn IssRng + Send>,
    config: Config,
    listeners: HashSet<u16>,
    connections: HashMap<ConnectionId, ConnectionState>,
}

impl Engine {
    /// `Engine::empty(host_id, rng)`: a fresh engine with no listeners and
    /// no connections.
    pub fn empty(host_id: Ipv4Addr, rng: Box<dyn IssRng + Send>) -> Self {
        Engine {
            host_id,
            rng,
            config: Config::default(),
            listeners: HashSet::new(),
            connections: HashMap::new(),
        }
    }

    pub fn with_config(host_id: Ipv4Addr, rng: Box<dyn IssRng + Send>, config: Config) -> Self {
        Engine {
            host_id,
            rng,
            config,
            listeners: HashSet::new(),
            connections: HashMap::new(),
        }
    }

    pub fn connections(&self) -> impl Iterator<Item = (&ConnectionId, &ConnectionState)> {
        self.connections.iter()
    }

    pub fn state_of(&self, id: &ConnectionId) -> Option<TcpState> {
        self.connections.get(id).map(|c| c.tcp_state)
    }

    /// `listen(port)`.
    pub fn listen(&mut self, port: u16) {
        self.listeners.insert(port);
    }

    /// `unlisten(port)`: stop accepting new connections on `port`. Already
    /// established connections on that port are unaffected.
    pub fn unlisten(&mut self, port: u16) {
        self.listeners.remove(&port);
    }

    /// `connect(remote, now)`: active open.
    pub fn connect(&mut self, local_port: u16, remote: Dual, now: Instant) -> Vec<Outgoing> {
        let id = Quad {
            local: Dual {
                ip: self.host_id,
                port: local_port,
            },
            remote,
        };
        let (state, syn) = ops::connect(id, now, self.rng.as_mut(), &self.config);
        let bytes = wire::encode(self.host_id, remote.ip, &syn);
        self.connections.insert(id, state);
        vec![Outgoing {
            src_ip: self.host_id,
            dst_ip: remote.ip,
            bytes,
        }]
    }

    /// `send(id, bytes, now)`.
    pub fn send(
        &mut self,
        id: ConnectionId,
        bytes: &[u8],
        now: Instant,
    ) -> Result<Vec<Outgoing>, UserOpError> {
        let state = self
            .connections
            .get_mut(&id)
            .ok_or_else(|| UserOpError::Msg("no such connection".to_string()))?;
        let segs = ops::send(state, bytes, now, id, &self.config)?;
        Ok(self.addressed(id, segs))
    }

    /// `recv(id, max_len, now)`.
    pub fn recv(
        &mut self,
        id: ConnectionId,
        max_len: usize,
        now: Instant,
    ) -> Result<(Vec<u8>, Vec<Outgoing>), UserOpError> {
        let state = self
            .connections
            .get_mut(&id)
            .ok_or_else(|| UserOpError::Msg("no such connection".to_string()))?;
        let (bytes, segs) = ops::recv(state, max_len, now, id)?;
        Ok((bytes, self.addressed(id, segs)))
    }

    /// `close(id, now)`.
    pub fn close(&mut self, id: ConnectionId, now: Instant) -> Vec<Outgoing> {
        let Some(state) = self.connections.get_mut(&id) else {
            return Vec::new();
        };
        let segs = ops::close(state, now, id, &self.config);
        self.addressed(id, segs)
    }

    /// `handle(now, src_ip, dst_ip, bytes)`: the bytes entry point. Decodes
    /// the segment, then dispatches to an existing connection, a listening
    /// port (passive open), or a bare reset.
    pub fn handle(
        &mut self,
        now: Instant,
        src_ip: Ipv4Addr,
        dst_ip: Ipv4Addr,
        bytes: &[u8],
    ) -> HandleResult {
        let seg = match wire::decode(src_ip, dst_ip, bytes) {
            Ok(seg) => seg,
            Err(e) => {
                trace!(error = %e, "dropped segment that failed to decode");
                return HandleResult::default();
            }
        };
        self.handle_segment(now, src_ip, dst_ip, &seg)
    }

    /// Same as `handle`, for a caller that already has a decoded `Segment`
    /// (spec §1's resolved scope note: the pure core never needs `wire`
    /// itself).
    pub fn handle_segment(
        &mut self,
        now: Instant,
        src_ip: Ipv4Addr,
        dst_ip: Ipv4Addr,
        seg: &Segment,
    ) -> HandleResult {
        let id = Quad {
            local: Dual {
                ip: dst_ip,
                port: seg.dst_port,
            },
            remote: Dual {
                ip: src_ip,
                port: seg.src_port,
            },
        };

        if let Some(state) = self.connections.get_mut(&id) {
            let was_established = state.tcp_state == TcpState::Established;
            let result = input::on_segment(state, now, seg, id, &self.config);
            let mut out = HandleResult::default();
            if !was_established && state.tcp_state == TcpState::Established {
                debug!(?id, "connection synchronized");
                out.events.push(Event::Established(id));
            }
            if !result.delivered.is_empty() {
                out.events.push(Event::Received(id));
            }
            if result.peer_closed {
                out.events.push(Event::PeerClosed(id));
            }
            out.outgoing = self.addressed(id, result.replies);
            if result.disposition == Disposition::Delete {
                self.connections.remove(&id);
                let cause = result.cause.unwrap_or(DropCause::ConnectionReset);
                trace!(?id, %cause, "connection removed");
                out.events.push(Event::Closed(id, cause));
            }
            return out;
        }

        self.deliver_in_1(now, id, seg)
    }

    /// `deliver_in_1`: a segment arrived for a connection id this engine
    /// has no record of. Three cases: a bare SYN on a listening port starts
    /// a passive open; anything carrying RST is silently discarded
    /// (`deliver_in_1b`); anything else gets a RST in reply.
    fn deliver_in_1(&mut self, now: Instant, id: ConnectionId, seg: &Segment) -> HandleResult {
        let mut result = HandleResult::default();

        if seg.flags.rst {
            return result;
        }

        if seg.flags.syn && !seg.flags.ack && self.listeners.contains(&id.local.port) {
            let iss = self.rng.next_iss();
            let cb = ControlBlock::new_passive(
                iss,
                seg.seq,
                seg.window,
                seg.options.mss,
                seg.options.window_scale,
                &self.config,
            );
            let mut state = ConnectionState::new(TcpState::SynReceived, cb, &self.config);
            crate::subroutines::start_rexmt_timer(
                &mut state.cb,
                now,
                crate::tcb::RexmtMode::RexmtSyn,
                0,
                &self.config,
            );
            state.cb.timers.tt_conn_est = crate::timer::arm(
                (),
                now,
                std::time::Duration::from_millis(self.config.r2_syn_ms as u64),
            );
            let synack = Segment::make_syn_ack(&state.cb, id);
            self.connections.insert(id, state);
            result.outgoing = self.addressed(id, vec![synack]);
            return result;
        }

        if let Some(rst) = Segment::dropwithreset(seg, id) {
            warn!(?id, "no matching connection; replying with reset");
            result.outgoing = self.addressed(id, vec![rst]);
        }
        result
    }

    /// `timer(id, now)`: check every timer on one connection.
    pub fn timer(&mut self, id: ConnectionId, now: Instant) -> HandleResult {
        let Some(state) = self.connections.get_mut(&id) else {
            return HandleResult::default();
        };
        let mut result = HandleResult::default();
        match timer_tick::on_timer(state, now, id, &self.config) {
            TickResult::Idle => {}
            TickResult::Replies(segs) => {
                result.outgoing = self.addressed(id, segs);
            }
            TickResult::Drop(cause) => {
                self.connections.remove(&id);
                trace!(?id, %cause, "connection removed by timer");
                result.events.push(Event::Closed(id, cause));
            }
        }
        result
    }

    /// Sweep every open connection's timers; for hosts that don't track
    /// per-connection deadlines themselves.
    pub fn timer_tick_all(&mut self, now: Instant) -> HandleResult {
        let mut result = HandleResult::default();
        let ids: Vec<ConnectionId> = self.connections.keys().copied().collect();
        for id in ids {
            let partial = self.timer(id, now);
            result.outgoing.extend(partial.outgoing);
            result.events.extend(partial.events);
        }
        result
    }

    fn addressed(&self, id: ConnectionId, segs: Vec<Segment>) -> Vec<Outgoing> {
        segs.into_iter()
            .map(|seg| Outgoing {
                src_ip: id.local.ip,
                dst_ip: id.remote.ip,
                bytes: wire::encode(id.local.ip, id.remote.ip, &seg),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rng::FixedIssRng;

    fn engine_with_iss(values: Vec<u32>) -> Engine {
        Engine::empty(
            Ipv4Addr::new(10, 0, 0, 1),
            Box::new(FixedIssRng {
                values: values.into(),
            }),
        )
    }

    #[test]
    fn passive_open_on_a_listening_port_answers_synack() {
        let mut engine = engine_with_iss(vec![9000]);
        engine.listen(80);

        let syn = Segment {
            src_port: 4000,
            dst_port: 80,
            seq: crate::seq::Seq::new(100),
            ack: crate::seq::Seq::ZERO,
            window: 4096,
            flags: crate::segment::Flags::syn(),
            options: Default::default(),
            payload: Vec::new(),
        };
        let result = engine.handle_segment(
            Instant::now(),
            Ipv4Addr::new(10, 0, 0, 2),
            Ipv4Addr::new(10, 0, 0, 1),
            &syn,
        );
        assert_eq!(result.outgoing.len(), 1);

        let id = Quad {
            local: Dual {
                ip: Ipv4Addr::new(10, 0, 0, 1),
                port: 80,
            },
            remote: Dual {
                ip: Ipv4Addr::new(10, 0, 0, 2),
                port: 4000,
            },
        };
        assert_eq!(engine.state_of(&id), Some(TcpState::SynReceived));
    }

    #[test]
    fn full_passive_open_reaches_established_and_emits_event() {
        let mut engine = engine_with_iss(vec![9000]);
        engine.listen(80);
        let now = Instant::now();

        let syn = Segment {
            src_port: 4000,
            dst_port: 80,
            seq: crate::seq::Seq::new(100),
            ack: crate::seq::Seq::ZERO,
            window: 4096,
            flags: crate::segment::Flags::syn(),
            options: Default::default(),
            payload: Vec::new(),
        };
        engine.handle_segment(now, Ipv4Addr::new(10, 0, 0, 2), Ipv4Addr::new(10, 0, 0, 1), &syn);

        let id = Quad {
            local: Dual {
                ip: Ipv4Addr::new(10, 0, 0, 1),
                port: 80,
            },
            remote: Dual {
                ip: Ipv4Addr::new(10, 0, 0, 2),
                port: 4000,
            },
        };

        let ack = Segment {
            src_port: 4000,
            dst_port: 80,
            seq: crate::seq::Seq::new(101),
            ack: crate::seq::Seq::new(9001),
            window: 4096,
            flags: crate::segment::Flags::ack(),
            options: Default::default(),
            payload: Vec::new(),
        };
        let result =
            engine.handle_segment(now, Ipv4Addr::new(10, 0, 0, 2), Ipv4Addr::new(10, 0, 0, 1), &ack);

        assert_eq!(engine.state_of(&id), Some(TcpState::Established));
        assert!(result.events.contains(&Event::Established(id)));
    }

    #[test]
    fn no_listener_and_no_connection_replies_with_reset() {
        let mut engine = engine_with_iss(vec![]);
        let syn = Segment {
            src_port: 4000,
            dst_port: 81,
            seq: crate::seq::Seq::new(100),
            ack: crate::seq::Seq::ZERO,
            window: 4096,
            flags: crate::segment::Flags::syn(),
            options: Default::default(),
            payload: Vec::new(),
        };
        let result = engine.handle_segment(
            Instant::now(),
            Ipv4Addr::new(10, 0, 0, 2),
            Ipv4Addr::new(10, 0, 0, 1),
            &syn,
        );
        assert_eq!(result.outgoing.len(), 1);
        assert!(engine.connections().next().is_none());
    }

    #[test]
    fn full_active_open_reaches_established() {
        let mut engine = engine_with_iss(vec![1000]);
        let now = Instant::now();
        let out = engine.connect(
            4000,
            Dual {
                ip: Ipv4Addr::new(10, 0, 0, 2),
                port: 80,
            },
            now,
        );
        assert_eq!(out.len(), 1);

        let id = Quad {
            local: Dual {
                ip: Ipv4Addr::new(10, 0, 0, 1),
                port: 4000,
            },
            remote: Dual {
                ip: Ipv4Addr::new(10, 0, 0, 2),
                port: 80,
            },
        };
        assert_eq!(engine.state_of(&id), Some(TcpState::SynSent));

        let synack = Segment {
            src_port: 80,
            dst_port: 4000,
            seq: crate::seq::Seq::new(5000),
            ack: crate::seq::Seq::new(1001),
            window: 4096,
            flags: crate::segment::Flags::syn_ack(),
            options: Default::default(),
            payload: Vec::new(),
        };
        let result = engine.handle_segment(
            now,
            Ipv4Addr::new(10, 0, 0, 2),
            Ipv4Addr::new(10, 0, 0, 1),
            &synack,
        );
        assert_eq!(result.outgoing.len(), 1);
        assert_eq!(engine.state_of(&id), Some(TcpState::Established));
        assert!(result.events.contains(&Event::Established(id)));
    }
}
