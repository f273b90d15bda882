//! RFC 9293 wire encode/decode (spec §4.2 supplement).
//!
//! This is the one module that touches a byte slice. `Engine::handle` takes
//! `src_ip`/`dst_ip` and a raw TCP segment (the caller has already stripped
//! the IP header); the rest of the crate only ever sees a decoded
//! [`Segment`].

use std::net::Ipv4Addr;

use etherparse::{TcpHeader, TcpOptionElement};

use crate::error::WireError;
use crate::segment::{Flags, Options, Segment};
use crate::seq::Seq;

/// Decode a raw TCP segment (header + options + payload), validating its
/// checksum against the given pseudo-header addresses.
pub fn decode(src_ip: Ipv4Addr, dst_ip: Ipv4Addr, bytes: &[u8]) -> Result<Segment, WireError> {
    let (header, rest) = TcpHeader::from_slice(bytes).map_err(|_| WireError::Truncated)?;

    let expected = header
        .calc_checksum_ipv4_raw(src_ip.octets(), dst_ip.octets(), rest)
        .map_err(|_| WireError::Truncated)?;
    if expected != header.checksum {
        return Err(WireError::BadChecksum);
    }

    let mut options = Options::default();
    for opt in header.options_iterator() {
        match opt.map_err(|_| WireError::BadOption)? {
            TcpOptionElement::MaximumSegmentSize(mss) => options.mss = Some(mss),
            TcpOptionElement::WindowScale(shift) => options.window_scale = Some(shift),
            _ => {}
        }
    }

    Ok(Segment {
        src_port: header.source_port,
        dst_port: header.destination_port,
        seq: Seq::new(header.sequence_number),
        ack: Seq::new(header.acknowledgment_number),
        window: header.window_size,
        flags: Flags {
            syn: header.syn,
            fin: header.fin,
            rst: header.rst,
            ack: header.ack,
            psh: header.psh,
        },
        options,
        payload: rest.to_vec(),
    })
}

/// Encode a segment into an RFC 9293 TCP header followed by its payload,
/// with the checksum filled in against the given pseudo-header addresses.
pub fn encode(src_ip: Ipv4Addr, dst_ip: Ipv4Addr, seg: &Segment) -> Vec<u8> {
    let mut header = TcpHeader::new(seg.src_port, seg.dst_port, seg.seq.0, seg.window);
    header.acknowledgment_number = seg.ack.0;
    header.syn = seg.flags.syn;
    header.fin = seg.flags.fin;
    header.rst = seg.flags.rst;
    header.ack = seg.flags.ack;
    header.psh = seg.flags.psh;

    let mut opts = Vec::new();
    if let Some(mss) = seg.options.mss {
        opts.push(TcpOptionElement::MaximumSegmentSize(mss));
    }
    if let Some(shift) = seg.options.window_scale {
        opts.push(TcpOptionElement::WindowScale(shift));
    }
    if !opts.is_empty() {
        header
            .set_options(&opts)
            .expect("a SYN carries at most two options, well under the 40-byte option budget");
    }

    header.checksum = header
        .calc_checksum_ipv4_raw(src_ip.octets(), dst_ip.octets(), &seg.payload)
        .expect("payload length was validated against u16 seg_len when it was queued");

    let mut out = Vec::with_capacity(header.header_len() as usize + seg.payload.len());
    header.write(&mut out).expect("writing into a Vec never fails");
    out.extend_from_slice(&seg.payload);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::Options;

    fn addrs() -> (Ipv4Addr, Ipv4Addr) {
        (Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 0, 0, 2))
    }

    #[test]
    fn round_trips_a_plain_ack_segment() {
        let (src, dst) = addrs();
        let seg = Segment {
            src_port: 4000,
            dst_port: 80,
            seq: Seq::new(1000),
            ack: Seq::new(2000),
            window: 4096,
            flags: Flags::ack(),
            options: Options::default(),
            payload: b"hello".to_vec(),
        };
        let bytes = encode(src, dst, &seg);
        let decoded = decode(src, dst, &bytes).unwrap();
        assert_eq!(decoded, seg);
    }

    #[test]
    fn round_trips_a_syn_with_mss_and_window_scale() {
        let (src, dst) = addrs();
        let seg = Segment {
            src_port: 4000,
            dst_port: 80,
            seq: Seq::new(500),
            ack: Seq::ZERO,
            window: 64240,
            flags: Flags::syn(),
            options: Options {
                mss: Some(1460),
                window_scale: Some(7),
            },
            payload: Vec::new(),
        };
        let bytes = encode(src, dst, &seg);
        let decoded = decode(src, dst, &bytes).unwrap();
        assert_eq!(decoded.options.mss, Some(1460));
        assert_eq!(decoded.options.window_scale, Some(7));
    }

    #[test]
    fn rejects_a_corrupted_checksum() {
        let (src, dst) = addrs();
        let seg = Segment {
            src_port: 4000,
            dst_port: 80,
            seq: Seq::new(1),
            ack: Seq::ZERO,
            window: 1024,
            flags: Flags::syn(),
            options: Options::default(),
            payload: Vec::new(),
        };
        let mut bytes = encode(src, dst, &seg);
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        assert_eq!(decode(src, dst, &bytes), Err(WireError::BadChecksum));
    }

    #[test]
    fn rejects_a_truncated_buffer() {
        let (src, dst) = addrs();
        assert_eq!(decode(src, dst, &[0u8; 4]), Err(WireError::Truncated));
    }
}
