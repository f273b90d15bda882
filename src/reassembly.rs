//! Out-of-order reassembly queue with coalescing (spec §4.3).
//!
//! Modeled as a sorted `Vec` for clarity, as the reference permits ("may use
//! a balanced tree or interval map keyed by seq"); the queue is small in
//! practice (bounded by how far ahead of `rcv_nxt` a peer can get within the
//! advertised window), so the `O(n)` scan on each insert is not a concern.

use crate::seq::Seq;

#[derive(Debug, Clone, PartialEq, Eq)]
struct Elt {
    seq: Seq,
    fin: bool,
    data: Vec<u8>,
}

impl Elt {
    fn end(&self) -> Seq {
        self.seq.addi(self.data.len() as u32)
    }
}

/// A sorted, disjoint set of out-of-order segments awaiting in-order
/// delivery.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Reassembly {
    elems: Vec<Elt>,
}

impl Reassembly {
    pub fn new() -> Self {
        Reassembly { elems: Vec::new() }
    }

    pub fn is_empty(&self) -> bool {
        self.elems.is_empty()
    }

    pub fn len(&self) -> usize {
        self.elems.len()
    }

    /// Total bytes currently buffered, across all held intervals.
    pub fn buffered_bytes(&self) -> usize {
        self.elems.iter().map(|e| e.data.len()).sum()
    }

    /// `insert(q, seq, fin, data)`: merge the new interval into the queue,
    /// coalescing with any existing interval it overlaps or touches.
    /// Existing bytes always win on overlap (oldest-bytes-win tiebreak).
    pub fn insert(&mut self, seq: Seq, fin: bool, data: Vec<u8>) {
        if data.is_empty() && !fin {
            return;
        }

        let mut cur_seq = seq;
        let mut cur_fin = fin;
        let mut cur_data = data;

        loop {
            let cur_end = cur_seq.addi(cur_data.len() as u32);
            let overlap_idx = self.elems.iter().position(|e| {
                let e_end = e.end();
                !(cur_end.less(e.seq) || e_end.less(cur_seq))
            });

            let Some(idx) = overlap_idx else { break };
            let existing = self.elems.remove(idx);
            let e_end = existing.end();

            let union_start = if cur_seq.less_equal(existing.seq) {
                cur_seq
            } else {
                existing.seq
            };
            let union_end = if cur_end.greater_equal(e_end) {
                cur_end
            } else {
                e_end
            };
            let union_len = union_end.sub(union_start) as usize;

            let mut merged = vec![0u8; union_len];
            let cur_off = cur_seq.sub(union_start) as usize;
            merged[cur_off..cur_off + cur_data.len()].copy_from_slice(&cur_data);
            // Existing bytes are overlaid last so they win any overlap.
            let existing_off = existing.seq.sub(union_start) as usize;
            merged[existing_off..existing_off + existing.data.len()]
                .copy_from_slice(&existing.data);

            cur_seq = union_start;
            cur_data = merged;
            cur_fin = cur_fin || existing.fin;
        }

        let pos = self
            .elems
            .iter()
            .position(|e| cur_seq.less(e.seq))
            .unwrap_or(self.elems.len());
        self.elems.insert(
            pos,
            Elt {
                seq: cur_seq,
                fin: cur_fin,
                data: cur_data,
            },
        );
    }

    /// `maybe_take(q, wanted_seq)`: extract the in-order-deliverable prefix
    /// starting at `wanted_seq`, if any is present.
    pub fn maybe_take(&mut self, wanted: Seq) -> Option<(Vec<u8>, bool)> {
        let first = self.elems.first()?;
        let elt_end = first.end();

        if wanted == first.seq {
            let e = self.elems.remove(0);
            Some((e.data, e.fin))
        } else if first.seq.less(wanted) && wanted.less(elt_end) {
            let e = self.elems.remove(0);
            let offset = wanted.sub(e.seq) as usize;
            Some((e.data[offset..].to_vec(), e.fin))
        } else {
            // wanted before the first element, or wanted >= elt_end (caller
            // error): leave the queue untouched either way.
            None
        }
    }
}
