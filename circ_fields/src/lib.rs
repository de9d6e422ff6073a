//! Prime fields for the CirC R1CS backend
//!
//! A field is identified by its modulus. A few moduli that proof systems care about are builtin
//! ([FieldT::Curve25519], [FieldT::Bls12381], [FieldT::Bn254]); any other prime is an
//! [FieldT::IntField]. Every [FieldV] carries its modulus, so nothing here depends on a
//! process-wide "current field".

#![warn(missing_docs)]

mod int_field;


pub use int_field::IntField;

use once_cell::sync::Lazy;
use paste::paste;
use rug::Integer;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};
use std::ops::{Add, AddAssign, Mul, MulAssign, Neg, Sub, SubAssign};
use std::sync::Arc;

macro_rules! def_modulus {
    ($name: ident, $mod: literal) => {
        paste! {
            /// Modulus of a builtin field
            pub static [<$name _FMOD>]: Lazy<Integer> =
                Lazy::new(|| Integer::from_str_radix($mod, 10).unwrap());
            /// Modulus of a builtin field, shared
            pub static [<$name _FMOD_ARC>]: Lazy<Arc<Integer>> =
                Lazy::new(|| Arc::new([<$name _FMOD>].clone()));
        }
    };
}

/// Moduli of the builtin fields
pub mod moduli {
    use super::*;
    def_modulus!(
        F_CURVE25519,
        "7237005577332262213973186563042994240857116359379907606001950938285454250989"
    );
    def_modulus!(
        F_BLS12381,
        "52435875175126190479447740508185965837690552500527637822603658699938581184513"
    );
    def_modulus!(
        F_BN254,
        "21888242871839275222246405745257275088548364400416034343698204186575808495617"
    );
}

use moduli::*;

/// A prime field, identified by its modulus.
#[derive(PartialEq, Eq, Clone, Debug, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum FieldT {
    /// The scalar field of Curve25519 (used by Spartan)
    Curve25519,
    /// The scalar field of BLS12-381
    Bls12381,
    /// The scalar field of BN-254
    Bn254,
    /// Any other prime field
    IntField(Arc<Integer>),
}

impl Default for FieldT {
    fn default() -> Self {
        FieldT::Curve25519
    }
}

impl Display for FieldT {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            Self::Curve25519 => write!(f, "FieldT::Curve25519"),
            Self::Bls12381 => write!(f, "FieldT::Bls12381"),
            Self::Bn254 => write!(f, "FieldT::Bn254"),
            Self::IntField(m) => write!(f, "FieldT::(mod {})", &**m),
        }
    }
}

impl From<Arc<Integer>> for FieldT {
    fn from(m: Arc<Integer>) -> Self {
        match m.as_ref() {
            m if m == &*F_CURVE25519_FMOD => Self::Curve25519,
            m if m == &*F_BLS12381_FMOD => Self::Bls12381,
            m if m == &*F_BN254_FMOD => Self::Bn254,
            _ => Self::IntField(m),
        }
    }
}

impl From<Integer> for FieldT {
    fn from(m: Integer) -> Self {
        Self::from(Arc::new(m))
    }
}

impl From<&Integer> for FieldT {
    fn from(m: &Integer) -> Self {
        Self::from(m.clone())
    }
}

impl FieldT {
    #[inline]
    /// The modulus
    pub fn modulus(&self) -> &Integer {
        match self {
            Self::Curve25519 => &F_CURVE25519_FMOD,
            Self::Bls12381 => &F_BLS12381_FMOD,
            Self::Bn254 => &F_BN254_FMOD,
            Self::IntField(m) => m.as_ref(),
        }
    }

    #[inline]
    /// The modulus, shared
    pub fn modulus_arc(&self) -> Arc<Integer> {
        match self {
            Self::Curve25519 => F_CURVE25519_FMOD_ARC.clone(),
            Self::Bls12381 => F_BLS12381_FMOD_ARC.clone(),
            Self::Bn254 => F_BN254_FMOD_ARC.clone(),
            Self::IntField(m) => m.clone(),
        }
    }

    #[inline]
    /// Zero
    pub fn zero(&self) -> FieldV {
        self.new_v(0)
    }

    #[inline]
    /// One
    pub fn one(&self) -> FieldV {
        self.new_v(1)
    }

    #[inline]
    /// A uniform element.
    pub fn random_v(&self, mut rng: impl rand::RngCore) -> FieldV {
        let mut rug_rng = rug::rand::RandState::new_mersenne_twister();
        rug_rng.seed(&Integer::from(rng.next_u64()));
        let i = Integer::from(self.modulus().random_below_ref(&mut rug_rng));
        self.new_v(i)
    }

    #[inline]
    /// Create an element, reducing `i` mod p.
    pub fn new_v<I>(&self, i: I) -> FieldV
    where
        Integer: From<I>,
    {
        FieldV(IntField::new(Integer::from(i), self.modulus_arc()))
    }
}

/// A field element. It knows its own modulus.
#[derive(PartialEq, Eq, Clone, Debug, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FieldV(IntField);

impl FieldV {
    #[inline]
    /// The field this element belongs to
    pub fn ty(&self) -> FieldT {
        FieldT::from(self.0.modulus_arc())
    }

    #[inline]
    /// Create an element of the field with modulus `m`
    pub fn new<I>(i: I, m: Arc<Integer>) -> Self
    where
        Integer: From<I>,
    {
        FieldV(IntField::new(Integer::from(i), m))
    }

    #[track_caller]
    #[inline]
    /// Check the representation is in-range (debug only)
    pub fn check(&self, loc: &str) {
        self.0.check(loc);
    }

    #[inline]
    /// The modulus
    pub fn modulus(&self) -> &Integer {
        self.0.modulus()
    }

    /// Is the representation reduced, over a modulus of at least 2?
    pub fn is_canonical(&self) -> bool {
        self.0.is_canonical()
    }

    /// The multiplicative inverse. Zero maps to zero.
    #[inline]
    pub fn recip(self) -> Self {
        FieldV(self.0.recip())
    }

    /// The multiplicative inverse, by reference. Zero maps to zero.
    #[inline]
    pub fn recip_ref(&self) -> Self {
        self.clone().recip()
    }

    #[inline]
    /// The canonical integer in `[0, p)`
    pub fn i(&self) -> Integer {
        self.into()
    }

    /// The representative in `(-p/2, p/2]`
    pub fn signed_i(&self) -> Integer {
        let i = self.i();
        if i.clone() * 2 > *self.modulus() {
            i - self.modulus()
        } else {
            i
        }
    }

    #[inline]
    /// Is this zero?
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    #[inline]
    /// Is this one?
    pub fn is_one(&self) -> bool {
        self.0.i == 1
    }
}

impl Display for FieldV {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        self.0.fmt(f)
    }
}

macro_rules! arith_impl {
    ($Trait: ident, $fn: ident) => {
        paste! {
            impl $Trait<FieldV> for FieldV {
                type Output = Self;
                fn $fn(mut self, other: Self) -> Self {
                    self.[<$fn _assign>](&other);
                    self
                }
            }

            impl $Trait<&FieldV> for FieldV {
                type Output = Self;
                fn $fn(mut self, other: &Self) -> Self {
                    self.[<$fn _assign>](other);
                    self
                }
            }

            impl [<$Trait Assign>]<&FieldV> for FieldV {
                #[track_caller]
                fn [<$fn _assign>](&mut self, other: &FieldV) {
                    assert_eq!(
                        self.modulus(),
                        other.modulus(),
                        "{} on elements of different fields",
                        stringify!($Trait),
                    );
                    self.0.[<$fn _assign>](&other.0);
                }
            }

            impl [<$Trait Assign>]<FieldV> for FieldV {
                fn [<$fn _assign>](&mut self, other: FieldV) {
                    self.[<$fn _assign>](&other);
                }
            }

            impl [<$Trait Assign>]<i64> for FieldV {
                fn [<$fn _assign>](&mut self, other: i64) {
                    self.0.[<$fn _assign_i64>](other);
                }
            }
        }
    };
}

arith_impl!(Add, add);
arith_impl!(Mul, mul);
arith_impl!(Sub, sub);

impl Neg for FieldV {
    type Output = Self;
    fn neg(self) -> Self {
        FieldV(self.0.neg())
    }
}

impl From<IntField> for FieldV {
    fn from(i: IntField) -> Self {
        FieldV(i)
    }
}

impl From<FieldV> for Integer {
    fn from(f: FieldV) -> Self {
        f.0.into()
    }
}

impl From<&FieldV> for Integer {
    fn from(f: &FieldV) -> Self {
        (&f.0).into()
    }
}
