//! 32-bit modular sequence-number arithmetic (spec §4.1).
//!
//! TCP sequence space is cyclic: comparisons are defined modulo 2^32 rather
//! than as plain integer comparisons, per RFC 1323's guidance that a number
//! is "old" or "new" depending on which half of the space it falls in
//! relative to another. Wraparound is silent; there is no overflow error.

use std::fmt;
use std::ops::{Add, Sub};

/// A sequence number living in 32-bit modular space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Seq(pub u32);

impl Seq {
    pub const ZERO: Seq = Seq(0);

    pub fn new(v: u32) -> Self {
        Seq(v)
    }

    /// `self + 1`.
    pub fn incr(self) -> Self {
        Seq(self.0.wrapping_add(1))
    }

    /// `self + i`.
    pub fn addi(self, i: u32) -> Self {
        Seq(self.0.wrapping_add(i))
    }

    /// Signed distance `self - other`, as it would be computed with 32-bit
    /// wraparound (positive when `self` is "ahead" of `other`).
    pub fn sub(self, other: Seq) -> i32 {
        self.0.wrapping_sub(other.0) as i32
    }

    /// `self < other` in modular order: true iff `(other - self) mod 2^32`
    /// lies in `(0, 2^31)`.
    pub fn less(self, other: Seq) -> bool {
        let d = other.0.wrapping_sub(self.0);
        d != 0 && d < 0x8000_0000
    }

    pub fn less_equal(self, other: Seq) -> bool {
        self == other || self.less(other)
    }

    pub fn greater(self, other: Seq) -> bool {
        other.less(self)
    }

    pub fn greater_equal(self, other: Seq) -> bool {
        self == other || self.greater(other)
    }

    pub fn equal(self, other: Seq) -> bool {
        self == other
    }

    pub fn max(self, other: Seq) -> Seq {
        if self.greater_equal(other) {
            self
        } else {
            other
        }
    }

    pub fn min(self, other: Seq) -> Seq {
        if self.less_equal(other) {
            self
        } else {
            other
        }
    }

    /// True iff `self` lies in the half-open window `[lo, hi)`, modularly.
    pub fn in_window(self, lo: Seq, hi: Seq) -> bool {
        lo.less_equal(self) && self.less(hi)
    }
}

impl Add<u32> for Seq {
    type Output = Seq;
    fn add(self, rhs: u32) -> Seq {
        self.addi(rhs)
    }
}

impl Sub<Seq> for Seq {
    type Output = i32;
    fn sub(self, rhs: Seq) -> i32 {
        self.sub(rhs)
    }
}

impl fmt::Display for Seq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for Seq {
    fn from(v: u32) -> Self {
        Seq(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn less_is_modular() {
        assert!(Seq(0).less(Seq(1)));
        assert!(!Seq(1).less(Seq(0)));
        // Wraps: u32::MAX is "before" 0.
        assert!(Seq(u32::MAX).less(Seq(0)));
        assert!(!Seq(0).less(Seq(u32::MAX)));
    }

    #[test]
    fn less_is_irreflexive() {
        assert!(!Seq(42).less(Seq(42)));
        assert!(Seq(42).less_equal(Seq(42)));
    }

    #[test]
    fn sub_signed_distance() {
        assert_eq!(Seq(10).sub(Seq(5)), 5);
        assert_eq!(Seq(5).sub(Seq(10)), -5);
        assert_eq!(Seq(0).sub(Seq(u32::MAX)), 1);
    }

    #[test]
    fn addi_wraps_silently() {
        assert_eq!(Seq(u32::MAX).addi(1), Seq(0));
        assert_eq!(Seq(u32::MAX).incr(), Seq(0));
    }

    #[test]
    fn in_window_half_open() {
        let lo = Seq(100);
        let hi = Seq(110);
        assert!(Seq(100).in_window(lo, hi));
        assert!(Seq(109).in_window(lo, hi));
        assert!(!Seq(110).in_window(lo, hi));
        assert!(!Seq(99).in_window(lo, hi));
    }

    #[test]
    fn max_min() {
        assert_eq!(Seq(5).max(Seq(10)), Seq(10));
        assert_eq!(Seq(5).min(Seq(10)), Seq(5));
        // Wrapped case: 0xFFFF_FFFF is "before" 10.
        assert_eq!(Seq(u32::MAX).max(Seq(10)), Seq(10));
    }
}
