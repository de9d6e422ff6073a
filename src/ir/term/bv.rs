//! Bit-vector literals

use rug::Integer;
use serde::{Deserialize, Serialize};

use std::fmt::{self, Display, Formatter};
use std::ops::{Add, BitAnd, BitOr, BitXor, Mul, Sub};

#[derive(Clone, PartialEq, Eq, Hash, Debug, PartialOrd, Ord, Serialize, Deserialize)]
/// A bit-vector constant: an unsigned integer below `2^width`
pub struct BitVector {
    uint: Integer,
    width: usize,
}

macro_rules! bv_arith_impl {
    ($Trait:ident, $fn:ident) => {
        impl $Trait for BitVector {
            type Output = Self;
            fn $fn(self, other: Self) -> Self {
                self.$fn(&other)
            }
        }
        impl $Trait<&Self> for BitVector {
            type Output = Self;
            fn $fn(self, other: &Self) -> Self {
                assert_eq!(self.width, other.width);
                BitVector::wrap(self.uint.$fn(&other.uint), self.width)
            }
        }
    };
}

bv_arith_impl!(Add, add);
bv_arith_impl!(Sub, sub);
bv_arith_impl!(Mul, mul);
bv_arith_impl!(BitAnd, bitand);
bv_arith_impl!(BitOr, bitor);
bv_arith_impl!(BitXor, bitxor);

impl std::ops::Neg for BitVector {
    type Output = Self;
    fn neg(self) -> Self {
        BitVector::wrap(-self.uint, self.width)
    }
}

impl std::ops::Not for BitVector {
    type Output = Self;
    fn not(self) -> Self {
        BitVector::wrap(!self.uint, self.width)
    }
}

impl BitVector {
    /// Reduce `i` mod `2^width`.
    pub fn wrap(i: Integer, width: usize) -> Self {
        let r = BitVector {
            uint: i.keep_bits(width as u32),
            width,
        };
        r.check("wrap");
        r
    }

    #[track_caller]
    #[inline]
    /// Check that the integer value fits in the number of bits
    pub fn check(&self, location: &str) {
        debug_assert!(
            self.uint >= 0,
            "Too small bitvector: {:?}\n at {}",
            self,
            location
        );
        debug_assert!(
            (self.uint.significant_bits() as usize) <= self.width,
            "Too big bitvector: {:?}\n at {}",
            self,
            location
        );
    }

    /// Shift amount, saturated at the width
    fn shift_amount(&self) -> u32 {
        self.uint
            .to_u32()
            .map(|s| s.min(self.width as u32))
            .unwrap_or(self.width as u32)
    }

    /// unsigned division; division by zero gives all ones
    pub fn udiv(self, other: &Self) -> Self {
        assert_eq!(self.width, other.width);
        if other.uint == 0 {
            BitVector::ones(self.width)
        } else {
            BitVector::wrap(self.uint / &other.uint, self.width)
        }
    }

    /// unsigned remainder; remainder by zero gives the dividend
    pub fn urem(self, other: &Self) -> Self {
        assert_eq!(self.width, other.width);
        if other.uint == 0 {
            self
        } else {
            BitVector::wrap(self.uint % &other.uint, self.width)
        }
    }

    /// left shift
    pub fn shl(self, other: &Self) -> Self {
        assert_eq!(self.width, other.width);
        BitVector::wrap(self.uint << other.shift_amount(), self.width)
    }

    /// arithmetic right shift
    pub fn ashr(self, other: &Self) -> Self {
        assert_eq!(self.width, other.width);
        BitVector::wrap(self.as_sint() >> other.shift_amount(), self.width)
    }

    /// logical right shift
    pub fn lshr(self, other: &Self) -> Self {
        assert_eq!(self.width, other.width);
        BitVector::wrap(self.uint >> other.shift_amount(), self.width)
    }

    /// binary concatenation: `self` gets the high-order bits
    pub fn concat(self, other: Self) -> Self {
        BitVector::wrap((self.uint << other.width as u32) | other.uint, self.width + other.width)
    }

    /// Gets the bits from `high` to `low`, inclusive. Zero-indexed.
    pub fn extract(self, high: usize, low: usize) -> Self {
        BitVector::wrap(self.uint >> low as u32, high - low + 1)
    }

    /// zero-extend by `n` bits
    pub fn uext(self, n: usize) -> Self {
        BitVector::wrap(self.uint, self.width + n)
    }

    /// sign-extend by `n` bits
    pub fn sext(self, n: usize) -> Self {
        BitVector::wrap(self.as_sint(), self.width + n)
    }

    /// Get the two's complement signed integer.
    pub fn as_sint(&self) -> Integer {
        if self.width > 0 && self.bit(self.width - 1) {
            self.uint.clone() - (Integer::from(1) << self.width as u32)
        } else {
            self.uint.clone()
        }
    }
    /// Get the unsigned integer.
    pub fn uint(&self) -> &Integer {
        &self.uint
    }
    /// Get the number of bits.
    pub fn width(&self) -> usize {
        self.width
    }
    #[track_caller]
    /// Make a new bit-vector literal. `uint` must fit.
    pub fn new(uint: Integer, width: usize) -> BitVector {
        let r = BitVector { uint, width };
        r.check("new");
        r
    }
    /// Get the `i`th bit.
    pub fn bit(&self, i: usize) -> bool {
        self.uint.get_bit(i as u32)
    }
    /// Make an all-ones bit-vector.
    pub fn ones(n: usize) -> BitVector {
        BitVector {
            uint: (Integer::from(1) << n as u32) - 1,
            width: n,
        }
    }
    /// Make an all-zeroes bit-vector.
    pub fn zeros(n: usize) -> BitVector {
        BitVector {
            uint: Integer::from(0),
            width: n,
        }
    }
    /// Parse the `#bBBBBB` SMT bit-vector constant format
    pub fn from_bin_lit(lit: &[u8]) -> Option<BitVector> {
        if lit.len() < 3 || &lit[..2] != b"#b" {
            return None;
        }
        Some(BitVector {
            uint: Integer::parse_radix(&lit[2..], 2).ok()?.into(),
            width: lit.len() - 2,
        })
    }
    /// Parse the `#xFF` SMT bit-vector constant format
    pub fn from_hex_lit(lit: &[u8]) -> Option<BitVector> {
        if lit.len() < 3 || &lit[..2] != b"#x" {
            return None;
        }
        Some(BitVector {
            uint: Integer::parse_radix(&lit[2..], 16).ok()?.into(),
            width: 4 * (lit.len() - 2),
        })
    }
}

impl Display for BitVector {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "#b")?;
        for i in (0..self.width).rev() {
            write!(f, "{}", self.bit(i) as u8)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn bv(i: i64, w: usize) -> BitVector {
        BitVector::wrap(Integer::from(i), w)
    }

    #[test]
    fn wrapping_arith() {
        assert_eq!(bv(15, 4) + bv(1, 4), bv(0, 4));
        assert_eq!(bv(0, 4) - bv(1, 4), bv(15, 4));
        assert_eq!(-bv(1, 4), bv(15, 4));
        assert_eq!(!bv(5, 4), bv(10, 4));
        assert_eq!(bv(6, 4) * bv(3, 4), bv(2, 4));
    }

    #[test]
    fn division_by_zero() {
        assert_eq!(bv(7, 4).udiv(&bv(0, 4)), BitVector::ones(4));
        assert_eq!(bv(7, 4).urem(&bv(0, 4)), bv(7, 4));
        assert_eq!(bv(7, 4).udiv(&bv(2, 4)), bv(3, 4));
    }

    #[test]
    fn shifts() {
        assert_eq!(bv(0b1001, 4).shl(&bv(1, 4)), bv(0b0010, 4));
        assert_eq!(bv(0b1001, 4).lshr(&bv(1, 4)), bv(0b0100, 4));
        assert_eq!(bv(0b1001, 4).ashr(&bv(1, 4)), bv(0b1100, 4));
        assert_eq!(bv(0b1001, 4).shl(&bv(9, 4)), bv(0, 4));
        assert_eq!(bv(0b1001, 4).ashr(&bv(15, 4)), bv(0b1111, 4));
    }

    #[test]
    fn slicing() {
        assert_eq!(bv(0b1101, 4).extract(2, 1), bv(0b10, 2));
        assert_eq!(bv(0b10, 2).concat(bv(0b01, 2)), bv(0b1001, 4));
        assert_eq!(bv(0b10, 2).sext(2), bv(0b1110, 4));
        assert_eq!(bv(0b10, 2).uext(2), bv(0b0010, 4));
        assert_eq!(format!("{}", bv(5, 4)), "#b0101");
        assert_eq!(BitVector::from_hex_lit(b"#x1f"), Some(bv(31, 8)));
    }
}
