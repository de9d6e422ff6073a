//! Residues modulo an arbitrary prime, backed by GMP integers

use rug::{ops::RemRoundingAssign, Integer};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};
use std::sync::Arc;

/// An element of `Z/mZ`, kept in `[0, m)`.
#[derive(PartialEq, Eq, Clone, Debug, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct IntField {
    pub(crate) i: Integer,
    m: Arc<Integer>,
}

impl Display for IntField {
    /// Small residues print as `#f{i}m{m}`; those near the modulus print negated, as
    /// `#f-{m - i}m{m}`.
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        if self.i.significant_bits() + 1 < self.m.significant_bits() {
            write!(f, "#f{}m{}", self.i, self.m)
        } else {
            write!(f, "#f-{}m{}", Integer::from(&*self.m - &self.i), self.m)
        }
    }
}

impl From<IntField> for Integer {
    fn from(f: IntField) -> Self {
        f.i
    }
}

impl From<&IntField> for Integer {
    fn from(f: &IntField) -> Self {
        f.i.clone()
    }
}

impl IntField {
    /// Reduce `i` into `[0, m)`
    pub fn new(i: Integer, m: Arc<Integer>) -> Self {
        let mut r = Self { i, m };
        r.reduce();
        r
    }

    fn reduce(&mut self) {
        if self.i < 0 || self.i >= *self.m {
            self.i.rem_floor_assign(&*self.m);
        }
    }

    #[track_caller]
    #[inline]
    /// Check value in-range (debug only)
    pub fn check(&self, location: &str) {
        debug_assert!(
            self.i >= 0 && self.i < *self.m,
            "residue {} out of range for modulus {} at {}",
            self.i,
            self.m,
            location
        );
    }

    /// Is the residue in `[0, m)` for a modulus of at least 2? Decoded values may not be.
    pub fn is_canonical(&self) -> bool {
        *self.m > 1 && self.i >= 0 && self.i < *self.m
    }

    /// The modulus
    pub fn modulus(&self) -> &Integer {
        &self.m
    }

    /// The modulus, shared
    pub fn modulus_arc(&self) -> Arc<Integer> {
        self.m.clone()
    }

    /// Invert mod m. Zero has no inverse and maps to zero.
    pub fn recip(mut self) -> Self {
        self.i = self.i.invert(&self.m).unwrap_or_default();
        self
    }

    /// Is this zero?
    pub fn is_zero(&self) -> bool {
        self.i == 0
    }

    pub(crate) fn add_assign(&mut self, other: &IntField) {
        self.i += &other.i;
        self.reduce();
    }

    pub(crate) fn sub_assign(&mut self, other: &IntField) {
        self.i -= &other.i;
        self.reduce();
    }

    pub(crate) fn mul_assign(&mut self, other: &IntField) {
        self.i *= &other.i;
        self.reduce();
    }

    pub(crate) fn add_assign_i64(&mut self, other: i64) {
        self.i += other;
        self.reduce();
    }

    pub(crate) fn sub_assign_i64(&mut self, other: i64) {
        self.i -= other;
        self.reduce();
    }

    pub(crate) fn mul_assign_i64(&mut self, other: i64) {
        self.i *= other;
        self.reduce();
    }

    pub(crate) fn neg(mut self) -> Self {
        self.i = -self.i;
        self.reduce();
        self
    }
}
