//! Single-pass cursor over an [`IdRange`].

use crate::model::{IdRange, VALUE_REPRESENTING_NULL};

/// Yields the defrag ids of a range in order, then its contiguous part.
///
/// Once exhausted every call to [`next_id`](Self::next_id) returns
/// [`VALUE_REPRESENTING_NULL`]; running dry is for the caller to handle.
#[derive(Debug, Clone)]
pub struct IdRangeIterator {
    range: IdRange,
    defrag_position: usize,
    range_offset: u64,
}

impl IdRangeIterator {
    pub fn new(range: IdRange) -> Self {
        Self {
            range,
            defrag_position: 0,
            range_offset: 0,
        }
    }

    /// An iterator that is exhausted from the start.
    pub fn empty() -> Self {
        Self::new(IdRange::empty())
    }

    pub fn next_id(&mut self) -> u64 {
        if let Some(&id) = self.range.defrag_ids().get(self.defrag_position) {
            self.defrag_position += 1;
            return id;
        }
        if self.range_offset < self.range.range_length() {
            let id = self.range.range_start() + self.range_offset;
            self.range_offset += 1;
            return id;
        }
        VALUE_REPRESENTING_NULL
    }

    /// Number of ids left before exhaustion.
    pub fn remaining(&self) -> u64 {
        let defrag_left = self.range.defrag_ids().len() - self.defrag_position;
        (defrag_left as u64).saturating_add(self.range.range_length() - self.range_offset)
    }

    /// Takes up to `size` ids out of the contiguous part only.
    ///
    /// Returns `(start, length)`; the length is 0 once the contiguous part is
    /// used up. Defrag ids are left for [`next_id`](Self::next_id).
    pub fn next_id_batch(&mut self, size: u64) -> (u64, u64) {
        let available = self.range.range_length() - self.range_offset;
        let length = available.min(size);
        let start = self.range.range_start() + self.range_offset;
        self.range_offset += length;
        (start, length)
    }

    /// The range this iterator was created from.
    pub fn range(&self) -> &IdRange {
        &self.range
    }
}

impl Iterator for IdRangeIterator {
    type Item = u64;

    fn next(&mut self) -> Option<u64> {
        match self.next_id() {
            VALUE_REPRESENTING_NULL => None,
            id => Some(id),
        }
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn should_yield_defrag_ids_before_range() {
        // given
        let mut iterator = IdRangeIterator::new(IdRange::new(vec![7, 8, 9], 1024, 4));

        // when
        let ids: Vec<u64> = (0..7).map(|_| iterator.next_id()).collect();

        // then
        assert_eq!(ids, vec![7, 8, 9, 1024, 1025, 1026, 1027]);
    }

    #[test]
    fn should_return_sentinel_forever_after_exhaustion() {
        // given
        let mut iterator = IdRangeIterator::new(IdRange::new(vec![3], 10, 1));
        iterator.next_id();
        iterator.next_id();

        // then
        for _ in 0..3 {
            assert_eq!(iterator.next_id(), VALUE_REPRESENTING_NULL);
        }
        assert_eq!(iterator.remaining(), 0);
    }

    #[test]
    fn should_be_exhausted_when_empty() {
        let mut iterator = IdRangeIterator::empty();
        assert_eq!(iterator.next_id(), VALUE_REPRESENTING_NULL);
    }

    #[test]
    fn should_take_batches_from_contiguous_part() {
        // given
        let mut iterator = IdRangeIterator::new(IdRange::new(vec![1, 2], 100, 10));

        // when
        let first = iterator.next_id_batch(4);
        let second = iterator.next_id_batch(10);
        let third = iterator.next_id_batch(1);

        // then
        assert_eq!(first, (100, 4));
        assert_eq!(second, (104, 6));
        assert_eq!(third.1, 0);
        assert_eq!(iterator.next_id(), 1);
        assert_eq!(iterator.next_id(), 2);
    }

    proptest! {
        #[test]
        fn should_yield_every_id_exactly_once(
            defrag in proptest::collection::vec(0u64..1000, 0..20),
            start in 1000u64..2000,
            length in 0u64..50,
        ) {
            let range = IdRange::new(defrag.clone(), start, length);
            let ids: Vec<u64> = IdRangeIterator::new(range).collect();

            let mut expected = defrag;
            expected.extend(start..start + length);
            prop_assert_eq!(ids, expected);
        }
    }
}
