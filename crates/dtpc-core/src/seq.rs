//! Two-limb sequence counter.
//!
//! A [`SeqNo`] is a `(high, low)` pair read as `high * 2^30 + low`, with the
//! low limb always kept below [`ONE_GIG`]. Ordering is plain magnitude
//! comparison: there is no modular wraparound at this layer, so callers are
//! expected to keep counters within practical ranges.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::DtpcError;

/// Radix of the low limb.
pub const ONE_GIG: u32 = 1 << 30;

/// Practically unbounded sequence number.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SeqNo {
    high: u64,
    low: u32,
}

impl SeqNo {
    pub const ZERO: SeqNo = SeqNo { high: 0, low: 0 };
    pub const ONE: SeqNo = SeqNo { high: 0, low: 1 };

    /// Builds a counter from raw limbs, carrying any low-limb excess upward.
    pub fn new(high: u64, low: u32) -> Self {
        let mut seq = Self {
            high,
            low: low % ONE_GIG,
        };
        seq.high = seq.high.saturating_add(u64::from(low / ONE_GIG));
        seq
    }

    pub fn from_u64(value: u64) -> Self {
        Self {
            high: value >> 30,
            low: (value & u64::from(ONE_GIG - 1)) as u32,
        }
    }

    /// Converts a flat value, failing when the high limb would overflow.
    pub fn from_u128(value: u128) -> Result<Self, DtpcError> {
        let high = value >> 30;
        if high > u128::from(u64::MAX) {
            return Err(DtpcError::SeqOutOfRange);
        }
        Ok(Self {
            high: high as u64,
            low: (value & u128::from(ONE_GIG - 1)) as u32,
        })
    }

    pub fn to_u128(self) -> u128 {
        (u128::from(self.high) << 30) | u128::from(self.low)
    }

    pub fn high(self) -> u64 {
        self.high
    }

    pub fn low(self) -> u32 {
        self.low
    }

    pub fn is_zero(self) -> bool {
        self.high == 0 && self.low == 0
    }

    /// True when the value fits in the low limb and is below `threshold`.
    pub fn is_below(self, threshold: u32) -> bool {
        self.high == 0 && self.low < threshold
    }

    /// Three-way magnitude comparison of the two limbs.
    pub fn compare(&self, other: &SeqNo) -> Ordering {
        self.high
            .cmp(&other.high)
            .then_with(|| self.low.cmp(&other.low))
    }

    /// Adds `n`, carrying into the high limb.
    pub fn increase(&mut self, n: u64) {
        let carry = n >> 30;
        let add = (n & u64::from(ONE_GIG - 1)) as u32;
        self.high = self.high.saturating_add(carry);
        let low = self.low + add;
        if low >= ONE_GIG {
            self.high = self.high.saturating_add(1);
            self.low = low - ONE_GIG;
        } else {
            self.low = low;
        }
    }

    /// Subtracts `n`, borrowing from the high limb and stopping at zero.
    pub fn reduce(&mut self, n: u64) {
        self.subtract(&SeqNo::from_u64(n));
    }

    /// Subtracts another counter, stopping at zero.
    pub fn subtract(&mut self, other: &SeqNo) {
        if self.compare(other) != Ordering::Greater {
            *self = SeqNo::ZERO;
            return;
        }
        let mut high = self.high - other.high;
        let low = if self.low >= other.low {
            self.low - other.low
        } else {
            high -= 1;
            self.low + ONE_GIG - other.low
        };
        self.high = high;
        self.low = low;
    }

    /// Returns `self + 1`.
    pub fn next(self) -> SeqNo {
        let mut next = self;
        next.increase(1);
        next
    }

    /// Returns `self - 1`, or zero when already zero.
    pub fn prev(self) -> SeqNo {
        let mut prev = self;
        prev.reduce(1);
        prev
    }
}

impl Ord for SeqNo {
    fn cmp(&self, other: &Self) -> Ordering {
        self.compare(other)
    }
}

impl PartialOrd for SeqNo {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl From<u64> for SeqNo {
    fn from(value: u64) -> Self {
        SeqNo::from_u64(value)
    }
}

impl fmt::Display for SeqNo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_u128())
    }
}

#[cfg(test)]
mod tests {
    use std::cmp::Ordering;

    use super::{SeqNo, ONE_GIG};

    #[test]
    fn new_normalizes_low_limb() {
        let seq = SeqNo::new(2, ONE_GIG + 5);
        assert_eq!(seq.high(), 3);
        assert_eq!(seq.low(), 5);
    }

    #[test]
    fn compare_uses_high_limb_first() {
        let a = SeqNo::new(1, 0);
        let b = SeqNo::new(0, ONE_GIG - 1);
        assert_eq!(a.compare(&b), Ordering::Greater);
        assert_eq!(b.compare(&a), Ordering::Less);
        assert_eq!(a.compare(&SeqNo::new(1, 0)), Ordering::Equal);
    }

    #[test]
    fn increase_carries_into_high_limb() {
        let mut seq = SeqNo::new(0, ONE_GIG - 1);
        seq.increase(1);
        assert_eq!(seq, SeqNo::new(1, 0));

        seq.increase(u64::from(ONE_GIG) * 3 + 7);
        assert_eq!(seq, SeqNo::new(4, 7));
    }

    #[test]
    fn reduce_borrows_and_stops_at_zero() {
        let mut seq = SeqNo::new(1, 0);
        seq.reduce(1);
        assert_eq!(seq, SeqNo::new(0, ONE_GIG - 1));

        let mut small = SeqNo::from_u64(3);
        small.reduce(10);
        assert!(small.is_zero());
    }

    #[test]
    fn subtract_matches_flat_arithmetic() {
        let mut a = SeqNo::from_u64(5 * u64::from(ONE_GIG) + 3);
        let b = SeqNo::from_u64(2 * u64::from(ONE_GIG) + 9);
        a.subtract(&b);
        assert_eq!(
            a.to_u128(),
            u128::from(3 * u64::from(ONE_GIG)) + 3 - 9
        );
    }

    #[test]
    fn flat_conversions_agree() {
        let value = 0x0123_4567_89ab_cdef_u64;
        let seq = SeqNo::from_u64(value);
        assert_eq!(seq.to_u128(), u128::from(value));
        assert_eq!(SeqNo::from_u128(u128::from(value)), Ok(seq));
        assert!(SeqNo::from_u128(u128::MAX).is_err());
    }

    #[test]
    fn next_and_prev_step_by_one() {
        let seq = SeqNo::from_u64(41);
        assert_eq!(seq.next(), SeqNo::from_u64(42));
        assert_eq!(seq.prev(), SeqNo::from_u64(40));
        assert_eq!(SeqNo::ZERO.prev(), SeqNo::ZERO);
    }

    #[test]
    fn is_below_requires_empty_high_limb() {
        assert!(SeqNo::from_u64(999).is_below(1000));
        assert!(!SeqNo::from_u64(1000).is_below(1000));
        assert!(!SeqNo::new(1, 1).is_below(1000));
    }
}
