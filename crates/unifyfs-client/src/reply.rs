use std::collections::BTreeMap;

use unifyfs_shm::ByteRegion;

/// Steers possibly-out-of-order [`proto_unifyfs::ReadReply`] payloads into a
/// client's reply [`ByteRegion`] at the logical offset each reply carries,
/// and tracks a tail pointer that only advances once a contiguous run of
/// bytes from the start of the request is fully in place (spec.md §4.5,
/// "Reply assembly"). One assembler covers one in-flight read request.
pub struct ReplyAssembler {
    region: ByteRegion,
    region_offset: usize,
    base_offset: u64,
    total_length: u64,
    received: BTreeMap<u64, u64>,
    tail: u64,
    errors: Vec<i32>,
}

impl ReplyAssembler {
    /// `region_offset` is where this request's reply window begins inside
    /// `region`; `base_offset`/`total_length` describe the logical file
    /// range the request covers.
    pub fn new(region: ByteRegion, region_offset: usize, base_offset: u64, total_length: u64) -> Self {
        Self {
            region,
            region_offset,
            base_offset,
            total_length,
            received: BTreeMap::new(),
            tail: 0,
            errors: Vec::new(),
        }
    }

    /// Apply one reply. A nonzero `errcode` is recorded but the payload
    /// (if any) is still written, matching the original RPC's best-effort
    /// delivery; callers should check [`ReplyAssembler::errors`] before
    /// trusting a complete assembly.
    pub fn accept(&mut self, reply: &proto_unifyfs::ReadReply) {
        if reply.errcode != 0 {
            self.errors.push(reply.errcode);
        }
        if reply.payload.is_empty() {
            return;
        }

        let rel_start = reply.src_offset.saturating_sub(self.base_offset);
        let rel_end = rel_start + reply.payload.len() as u64;
        self.region.write_at(self.region_offset + rel_start as usize, &reply.payload);

        self.mark_received(rel_start, rel_end);
        self.advance_tail();
    }

    /// Insert `[start, end)` into the received-ranges map, merging with
    /// any adjacent or overlapping neighbor so the map always holds the
    /// minimal set of disjoint covered intervals.
    fn mark_received(&mut self, mut start: u64, mut end: u64) {
        if let Some((&prev_start, &prev_end)) = self.received.range(..=start).next_back() {
            if prev_end >= start {
                start = start.min(prev_start);
                end = end.max(prev_end);
                self.received.remove(&prev_start);
            }
        }
        while let Some((&next_start, &next_end)) = self.received.range(start..).next() {
            if next_start > end {
                break;
            }
            end = end.max(next_end);
            self.received.remove(&next_start);
        }
        self.received.insert(start, end);
    }

    fn advance_tail(&mut self) {
        if let Some((&start, &end)) = self.received.iter().next() {
            if start <= self.tail {
                self.tail = self.tail.max(end);
            }
        }
    }

    /// Bytes available for sequential consumption, counted from the start
    /// of the request.
    pub fn tail(&self) -> u64 {
        self.tail
    }

    pub fn is_complete(&self) -> bool {
        self.tail >= self.total_length
    }

    /// Error codes observed across every reply accepted so far, in
    /// arrival order.
    pub fn errors(&self) -> &[i32] {
        &self.errors
    }

    pub fn region(&self) -> &ByteRegion {
        &self.region
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn reply(src_offset: u64, payload: &[u8]) -> proto_unifyfs::ReadReply {
        proto_unifyfs::ReadReply {
            src_offset,
            length: payload.len() as u64,
            src_fid: 1,
            errcode: 0,
            payload: payload.to_vec(),
        }
    }

    fn region(capacity: usize) -> ByteRegion {
        let file = tempfile::tempfile().unwrap();
        ByteRegion::create(&file, capacity).unwrap()
    }

    #[test]
    fn in_order_replies_advance_tail_as_they_land() {
        let mut asm = ReplyAssembler::new(region(64), 0, 0, 12);
        asm.accept(&reply(0, b"abcd"));
        assert_eq!(asm.tail(), 4);
        asm.accept(&reply(4, b"efgh"));
        assert_eq!(asm.tail(), 8);
        asm.accept(&reply(8, b"ijkl"));
        assert_eq!(asm.tail(), 12);
        assert!(asm.is_complete());
    }

    #[test]
    fn out_of_order_reply_only_advances_tail_once_the_gap_closes() {
        let mut asm = ReplyAssembler::new(region(64), 0, 0, 12);
        asm.accept(&reply(8, b"ijkl"));
        assert_eq!(asm.tail(), 0, "a later chunk must not advance the tail past a gap");
        asm.accept(&reply(0, b"abcd"));
        assert_eq!(asm.tail(), 4, "still a gap at [4, 8)");
        asm.accept(&reply(4, b"efgh"));
        assert_eq!(asm.tail(), 12, "the gap just closed, so the whole run becomes visible");
        assert!(asm.is_complete());
    }

    #[test]
    fn payload_lands_at_the_offset_the_reply_carries() {
        let mut asm = ReplyAssembler::new(region(64), 0, 100, 4);
        asm.accept(&reply(100, b"data"));
        assert_eq!(asm.region().read_at(0, 4), b"data");
    }

    #[test]
    fn nonzero_errcode_is_recorded_without_blocking_assembly() {
        let mut asm = ReplyAssembler::new(region(64), 0, 0, 4);
        let mut bad = reply(0, b"");
        bad.errcode = -5;
        asm.accept(&bad);
        assert_eq!(asm.errors(), &[-5]);
        assert!(!asm.is_complete());
    }
}
