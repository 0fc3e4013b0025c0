//! Reconciles out-of-order write completions into in-order retirement.
//!
//! Every submitted write is recorded with the write cursor it retires up to.
//! Completions may arrive in any order, but the retire cursor only moves past
//! a record once every record submitted before it has completed too:
//!
//! ```text
//! submitted:  [10] [16] [20]       retire = 0
//! ack 20:     [10] [16] [20✓]      retire = 0   (waits on 10 and 16)
//! ack 10:          [16] [20✓]      retire = 10
//! ack 16:                          retire = 20  (16, then 20 cascades)
//! ```

use crate::error::ProtocolViolation;
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy)]
struct Record {
    target: u32,
    done: bool,
}

/// Ordered pending-completion records plus the cursor they retire into.
#[derive(Debug, Default)]
pub struct InflightQueue {
    records: VecDeque<Record>,
    retire_cursor: u32,
}

impl InflightQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cursor up to which every submitted write has completed.
    #[inline]
    pub fn retire_cursor(&self) -> u32 {
        self.retire_cursor
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records a submitted write that retires up to `target` once complete.
    pub fn enqueue(&mut self, target: u32) {
        self.records.push_back(Record {
            target,
            done: false,
        });
    }

    /// Marks the write retiring up to `target` complete.
    ///
    /// Returns how many records were retired: zero when the write is still
    /// waiting on an earlier submission.
    ///
    /// # Errors
    /// [`ProtocolViolation::UnknownTarget`] if nothing inflight matches
    /// `target`, [`ProtocolViolation::DoubleAck`] if it was already marked.
    pub fn complete(&mut self, target: u32) -> Result<usize, ProtocolViolation> {
        let idx = self
            .records
            .iter()
            .position(|r| r.target == target)
            .ok_or(ProtocolViolation::UnknownTarget { cursor: target })?;

        let record = &mut self.records[idx];
        if record.done {
            return Err(ProtocolViolation::DoubleAck { cursor: target });
        }
        record.done = true;
        if idx != 0 {
            return Ok(0);
        }

        let mut retired = 0;
        while let Some(front) = self.records.front().copied()
            && front.done
        {
            self.retire_cursor = front.target;
            self.records.pop_front();
            retired += 1;
        }
        Ok(retired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn in_order_completions_retire_immediately() {
        let mut q = InflightQueue::new();
        q.enqueue(4);
        q.enqueue(9);
        assert_eq!(q.complete(4), Ok(1));
        assert_eq!(q.retire_cursor(), 4);
        assert_eq!(q.complete(9), Ok(1));
        assert_eq!(q.retire_cursor(), 9);
        assert!(q.is_empty());
    }

    #[test]
    fn later_completion_waits_for_predecessor_then_cascades() {
        let mut q = InflightQueue::new();
        q.enqueue(10);
        q.enqueue(16);
        q.enqueue(20);

        assert_eq!(q.complete(20), Ok(0));
        assert_eq!(q.retire_cursor(), 0);
        assert_eq!(q.complete(10), Ok(1));
        assert_eq!(q.retire_cursor(), 10);
        assert_eq!(q.complete(16), Ok(2));
        assert_eq!(q.retire_cursor(), 20);
        assert!(q.is_empty());
    }

    #[test]
    fn unknown_and_duplicate_acks_are_violations() {
        let mut q = InflightQueue::new();
        q.enqueue(3);
        q.enqueue(6);

        assert_eq!(
            q.complete(5),
            Err(ProtocolViolation::UnknownTarget { cursor: 5 })
        );
        assert_eq!(q.complete(6), Ok(0));
        assert_eq!(q.complete(6), Err(ProtocolViolation::DoubleAck { cursor: 6 }));
        assert_eq!(q.complete(3), Ok(2));
        // Already retired: no longer tracked.
        assert_eq!(
            q.complete(3),
            Err(ProtocolViolation::UnknownTarget { cursor: 3 })
        );
    }

    #[test]
    fn targets_may_wrap_the_counter() {
        let mut q = InflightQueue::new();
        let a = u32::MAX - 1;
        let b = a.wrapping_add(8);
        q.enqueue(a);
        q.enqueue(b);
        assert_eq!(q.complete(b), Ok(0));
        assert_eq!(q.complete(a), Ok(2));
        assert_eq!(q.retire_cursor(), 6);
    }

    proptest! {
        #[test]
        fn any_completion_order_retires_in_submission_order(
            sizes in prop::collection::vec(1u32..64, 1..24),
            seed in any::<u64>(),
        ) {
            let mut q = InflightQueue::new();
            let mut targets = Vec::with_capacity(sizes.len());
            let mut cursor = 0u32;
            for size in &sizes {
                cursor += size;
                q.enqueue(cursor);
                targets.push(cursor);
            }

            // Deterministic shuffle driven by the seed.
            let mut order: Vec<usize> = (0..targets.len()).collect();
            let mut state = seed | 1;
            for i in (1..order.len()).rev() {
                state ^= state << 13;
                state ^= state >> 7;
                state ^= state << 17;
                order.swap(i, (state % (i as u64 + 1)) as usize);
            }

            let mut last = 0u32;
            for idx in order {
                q.complete(targets[idx]).expect("known target");
                let retired = q.retire_cursor();
                prop_assert!(retired >= last);
                // Retirement never passes an incomplete submission.
                prop_assert!(targets.contains(&retired) || retired == 0);
                last = retired;
            }
            prop_assert_eq!(q.retire_cursor(), sizes.iter().sum::<u32>());
            prop_assert!(q.is_empty());
        }
    }
}
