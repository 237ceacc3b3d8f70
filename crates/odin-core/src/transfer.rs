//! Sequence and part arithmetic for file uploads.
//!
//! A file of `N` bytes is cut into parts of `P` bytes, and parts are
//! grouped into sequences of at most `S` parts. Only the last part of the
//! whole file may be short; it is still sent as a full `P`-byte packet.

use crate::protocol::constants::PIT_PART_SIZE;

/// Number of part requests needed to download a PIT of `file_size` bytes.
pub fn pit_part_count(file_size: u32) -> u32 {
    file_size.div_ceil(PIT_PART_SIZE as u32)
}

/// Sequence layout of one upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferPlan {
    pub total_bytes: u64,
    pub packet_size: u64,
    pub sequence_length: u64,
    pub sequence_count: u64,
    /// Parts in the final sequence.
    pub last_sequence_size: u64,
    /// Bytes in the short final part, zero when the file ends on a part
    /// boundary.
    pub partial_tail_bytes: u64,
}

impl TransferPlan {
    /// `packet_size` and `sequence_length` must be non-zero.
    pub fn new(total_bytes: u64, packet_size: u32, sequence_length: u32) -> Self {
        let packet_size = u64::from(packet_size.max(1));
        let sequence_length = u64::from(sequence_length.max(1));
        let sequence_bytes = sequence_length * packet_size;

        let mut sequence_count = total_bytes / sequence_bytes;
        let mut last_sequence_size = sequence_length;
        let partial_tail_bytes = total_bytes % packet_size;

        let last_sequence_bytes = total_bytes % sequence_bytes;
        if last_sequence_bytes != 0 {
            sequence_count += 1;
            last_sequence_size = last_sequence_bytes / packet_size;
            if partial_tail_bytes != 0 {
                last_sequence_size += 1;
            }
        }

        Self {
            total_bytes,
            packet_size,
            sequence_length,
            sequence_count,
            last_sequence_size,
            partial_tail_bytes,
        }
    }

    /// Total number of parts across every sequence.
    pub fn part_count(&self) -> u64 {
        match self.sequence_count {
            0 => 0,
            n => (n - 1) * self.sequence_length + self.last_sequence_size,
        }
    }

    /// Sequences in send order.
    pub fn sequences(&self) -> SequencePlanIter {
        SequencePlanIter {
            plan: *self,
            next: 0,
        }
    }
}

/// One sequence of a [`TransferPlan`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequencePlan {
    pub index: u64,
    pub is_last: bool,
    /// Parts in this sequence.
    pub size: u64,
    /// Byte offset of the first part within the file.
    pub start_offset: u64,
    /// `size * packet_size`, announced before the parts are sent.
    pub byte_count: u64,
    /// Bytes of real data, reported when the sequence is closed.
    pub effective_byte_count: u64,
}

impl SequencePlan {
    /// File range `[start, end)` of part `part` within this sequence,
    /// clamped to the file length.
    pub fn part_range(&self, plan: &TransferPlan, part: u64) -> (u64, u64) {
        let start = (self.start_offset + part * plan.packet_size).min(plan.total_bytes);
        let end = (start + plan.packet_size).min(plan.total_bytes);
        (start, end)
    }
}

pub struct SequencePlanIter {
    plan: TransferPlan,
    next: u64,
}

impl Iterator for SequencePlanIter {
    type Item = SequencePlan;

    fn next(&mut self) -> Option<Self::Item> {
        let plan = &self.plan;
        if self.next >= plan.sequence_count {
            return None;
        }
        let index = self.next;
        self.next += 1;

        let is_last = index == plan.sequence_count - 1;
        let size = if is_last {
            plan.last_sequence_size
        } else {
            plan.sequence_length
        };
        let byte_count = size * plan.packet_size;
        let effective_byte_count = if is_last && plan.partial_tail_bytes != 0 {
            plan.packet_size * (plan.last_sequence_size - 1) + plan.partial_tail_bytes
        } else {
            byte_count
        };

        Some(SequencePlan {
            index,
            is_last,
            size,
            start_offset: index * plan.sequence_length * plan.packet_size,
            byte_count,
            effective_byte_count,
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (self.plan.sequence_count - self.next) as usize;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for SequencePlanIter {}
