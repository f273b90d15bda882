//! Tunable constants (spec §3 "Config"), gathered in one place the way a
//! production stack exposes its `net.inet.tcp.*` sysctls as a single struct
//! instead of scattered literals.

/// Reference values below mirror common BSD-derived TCP stack defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    pub sndbufsize: usize,
    pub rcvbufsize: usize,

    /// MSS assumed for a peer that sends no MSS option (RFC 9293 §3.7.1).
    pub default_mss: u16,
    /// MSS this engine advertises in its own SYN/SYN-ACK options.
    pub advertised_mss: u16,
    /// Window-scale shift this engine requests.
    pub rcv_scale: u8,

    /// Cap on consecutive retransmit backoffs before a connection is
    /// abandoned outright, regardless of the R1/R2 time bounds below.
    pub tcp_maxrxtshift: u32,

    /// Retransmit-timeout bounds, in milliseconds.
    pub rto_min_ms: u32,
    pub rto_max_ms: u32,

    /// Soft-error (R1) and hard-error (R2) time thresholds for ordinary
    /// data retransmissions.
    pub r1_data_ms: u32,
    pub r2_data_ms: u32,
    /// Same, for the initial SYN's retransmit timer.
    pub r1_syn_ms: u32,
    pub r2_syn_ms: u32,

    /// 2MSL as it actually times TIME_WAIT (spec: 240s, i.e. 2 * 120s MSL).
    pub msl_ms: u32,
    /// Delayed-ACK timer.
    pub delack_ms: u32,
    /// FIN_WAIT_2 idle timeout before the connection is dropped outright.
    pub fin_wait_2_ms: u32,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            sndbufsize: 64 * 1024,
            rcvbufsize: 64 * 1024,
            default_mss: 536,
            advertised_mss: 1460,
            rcv_scale: 6,
            tcp_maxrxtshift: 12,
            rto_min_ms: 200,
            rto_max_ms: 64_000,
            r1_data_ms: 50_000,
            r2_data_ms: 100_000,
            r1_syn_ms: 60_000,
            r2_syn_ms: 180_000,
            msl_ms: 120_000,
            delack_ms: 200,
            fin_wait_2_ms: 600_000,
        }
    }
}

impl Config {
    /// Smallest MSS this engine will negotiate down to, floor from a
    /// pathologically small peer-advertised MSS.
    pub fn min_mss(&self) -> u16 {
        88
    }

    /// RFC 3390 initial congestion window: `min(4*MSS, max(2*MSS, 4380))`.
    pub fn initial_cwnd(&self, mss: u16) -> u32 {
        let mss = mss as u32;
        (4 * mss).min((2 * mss).max(4380))
    }
}
