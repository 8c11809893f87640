//! Rational numbers for graph clock rates.

/// A rational number, used for clock rates (e.g. `1/48000`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fraction {
    pub num: u32,
    pub denom: u32,
}

impl Fraction {
    /// Create a new fraction.
    #[inline]
    pub const fn new(num: u32, denom: u32) -> Self {
        Self { num, denom }
    }
}

impl Default for Fraction {
    fn default() -> Self {
        Self { num: 0, denom: 1 }
    }
}
