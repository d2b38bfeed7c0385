use std::{cmp::Ordering, fmt, num::Wrapping};

/// 16-bit sequence number compared modulo 2^16.
///
/// `a < b` holds when `b` is at most half the sequence space ahead of `a`,
/// so ordering stays meaningful across wraparound as long as the compared
/// numbers are less than `u16::MAX / 2` apart.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
pub struct Seq16 {
    n: u16,
}

impl Seq16 {
    pub const MAX: Seq16 = Seq16 { n: u16::MAX };

    pub fn from_u16(n: u16) -> Self {
        Seq16 { n }
    }

    pub fn to_u16(&self) -> u16 {
        self.n
    }

    pub fn add_u16(&self, n: u16) -> Seq16 {
        let s = Wrapping(self.n) + Wrapping(n);
        Seq16 { n: s.0 }
    }

    pub fn sub_u16(&self, n: u16) -> Seq16 {
        let s = Wrapping(self.n) - Wrapping(n);
        Seq16 { n: s.0 }
    }

    /// Distance walking forward from `other` to `self`.
    pub fn sub_seq(&self, other: Seq16) -> u16 {
        let s = Wrapping(self.n) - Wrapping(other.n);
        s.0
    }

    pub fn increment(&mut self) {
        *self = self.add_u16(1);
    }

    pub fn max(lhs: Seq16, rhs: Seq16) -> Seq16 {
        if lhs < rhs {
            rhs
        } else {
            lhs
        }
    }
}

impl fmt::Display for Seq16 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.n)
    }
}

impl PartialOrd for Seq16 {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Seq16 {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.n.wrapping_sub(other.n) {
            0 => Ordering::Equal,
            // exactly half the space apart: the larger raw value comes first
            0x8000 => other.n.cmp(&self.n),
            diff if (diff as i16) > 0 => Ordering::Greater,
            _ => Ordering::Less,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Seq16;

    #[test]
    fn cmp_wraparound() {
        let a = Seq16::from_u16(u16::MAX);
        let b = Seq16::from_u16(u16::MIN);
        assert!(a < b);
    }

    #[test]
    fn cmp_wo_wraparound() {
        let a = Seq16::from_u16(0);
        let b = Seq16::from_u16(1);
        assert!(a < b);
    }

    #[test]
    fn cmp_far() {
        let a = Seq16::from_u16(0);
        let b = Seq16::from_u16(i16::MAX as u16);
        let c = Seq16::from_u16(i16::MAX as u16 + 1);
        assert!(a < b);
        assert!(c < a);
        assert!(a > c);
        assert!(b > a);
    }

    #[test]
    fn add_wraparound() {
        let a = Seq16::MAX;
        assert_eq!(a.add_u16(1).to_u16(), 0);
        assert_eq!(Seq16::from_u16(0).sub_u16(1), Seq16::MAX);
    }

    #[test]
    fn increment_wo_wraparound() {
        let mut a = Seq16::from_u16(0);
        a.increment();
        assert_eq!(a.to_u16(), 1);
    }

    #[test]
    fn sub_wraparound() {
        let a = Seq16::from_u16(2);
        let b = Seq16::from_u16(u16::MAX);
        assert_eq!(a.sub_seq(b), 3);
    }

    #[test]
    fn max_across_wraparound() {
        let a = Seq16::from_u16(u16::MAX - 1);
        let b = Seq16::from_u16(3);
        assert_eq!(Seq16::max(a, b), b);
        assert_eq!(Seq16::max(b, a), b);
    }
}
