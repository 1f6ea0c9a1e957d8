use std::ops::Range;

use fixedbitset::FixedBitSet;

use crate::object_model::Object;

/// Number of `granule`-sized slots needed to cover `range`
fn granules(range: &Range<u64>, granule: u64) -> u64 {
    range.end.saturating_sub(range.start).div_ceil(granule)
}

/// One mark bit per possible object start in a reserved address range
///
/// Objects are aligned to `granule` bytes (the identifier width), so bit `i`
/// stands for address `range.start + i * granule`. Marking an address
/// outside the range is a bug in the caller and panics.
pub struct MarkBits {
    bits: FixedBitSet,
    start: u64,
    end: u64,
    granule: u64,
}

impl MarkBits {
    pub fn new(range: Range<u64>, granule: u64) -> Self {
        assert!(granule.is_power_of_two(), "granule {} is not a power of two", granule);
        Self {
            bits: FixedBitSet::with_capacity(granules(&range, granule) as usize),
            start: range.start,
            end: range.end,
            granule,
        }
    }

    fn index(&self, o: Object) -> usize {
        let a = o.raw();
        assert!(
            a >= self.start && a < self.end,
            "{} is outside the marked range [0x{:x}, 0x{:x})",
            o,
            self.start,
            self.end
        );
        ((a - self.start) / self.granule) as usize
    }

    /// Returns `true` if `o` was not marked before
    pub fn mark(&mut self, o: Object) -> bool {
        let idx = self.index(o);
        !self.bits.put(idx)
    }

    pub fn is_marked(&self, o: Object) -> bool {
        self.bits.contains(self.index(o))
    }

    pub fn clear(&mut self, o: Object) {
        let idx = self.index(o);
        self.bits.set(idx, false);
    }

    pub fn clear_all(&mut self) {
        self.bits.clear();
    }

    pub fn count(&self) -> usize {
        self.bits.count_ones(..)
    }

    pub fn entries(&self) -> usize {
        self.bits.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const START: u64 = 0x1000_0000;

    #[test]
    fn test_mark_once() {
        let mut bits = MarkBits::new(START..START + 0x1000, 8);
        assert_eq!(bits.entries(), 0x200);
        let o = Object::from_raw(START + 0x40);
        assert!(!bits.is_marked(o));
        assert!(bits.mark(o));
        assert!(!bits.mark(o));
        assert!(bits.is_marked(o));
        // the neighbouring granule is independent
        assert!(bits.mark(Object::from_raw(START + 0x48)));
        assert_eq!(bits.count(), 2);
    }

    #[test]
    fn test_clear() {
        let mut bits = MarkBits::new(START..START + 0x1000, 4);
        let a = Object::from_raw(START);
        let b = Object::from_raw(START + 0xffc);
        bits.mark(a);
        bits.mark(b);
        bits.clear(a);
        assert!(!bits.is_marked(a));
        assert!(bits.is_marked(b));
        bits.clear_all();
        assert_eq!(bits.count(), 0);
        assert!(bits.mark(b));
    }

    #[test]
    fn test_granules_near_address_space_end() {
        assert_eq!(granules(&(0..u64::MAX), 8), u64::MAX / 8 + 1);
        assert_eq!(granules(&(8..u64::MAX), 8), (u64::MAX - 8) / 8 + 1);
        assert_eq!(granules(&(START..START + 0x1001), 8), 0x201);
        assert_eq!(granules(&(START..START), 8), 0);
    }

    #[test]
    #[should_panic(expected = "outside the marked range")]
    fn test_out_of_range() {
        let mut bits = MarkBits::new(START..START + 0x1000, 8);
        bits.mark(Object::from_raw(START + 0x1000));
    }
}
