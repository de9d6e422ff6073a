//! Terms in the IR
//!
//! A term is a hash-consed tree of operators. Every term has a [Sort], computed (and cached) by
//! [check]. Terms are built with [term] or the [term!] macro, and are compared by pointer.

use circ_fields::{FieldT, FieldV};
use fxhash::{FxHashMap, FxHashSet};
use hashconsing::{consign, HConsed, WHConsed};
use lazy_static::lazy_static;
use log::debug;
use rug::Integer;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt::{self, Display, Formatter};
use std::sync::RwLock;

#[macro_export]
/// Make a term.
///
/// Syntax:
///
///    * without children: `term![OP]`
///    * with children: `term![OP; ARG0, ARG1, ... ]`
///       * Note the semi-colon
macro_rules! term {
    ($x:expr) => {
        $crate::ir::term::leaf_term($x)
    };
    ($x:expr; $($y:expr),+) => {
        $crate::ir::term::term($x, vec![$($y),+])
    };
}

pub mod bv;
#[cfg(test)]
pub mod dist;
pub mod eval;
pub mod extras;
pub mod precomp;
pub mod text;

pub use bv::BitVector;
pub use eval::{eval, eval_cached, eval_op};

#[derive(Clone, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
/// An operator
pub enum Op {
    /// if-then-else: ternary
    Ite,
    /// equality
    Eq,
    /// a variable, with its name and sort
    Var(String, Sort),
    /// a constant
    Const(Value),

    /// bit-vector binary operator
    BvBinOp(BvBinOp),
    /// bit-vector binary predicate
    BvBinPred(BvBinPred),
    /// bit-vector n-ary operator
    BvNaryOp(BvNaryOp),
    /// bit-vector unary operator
    BvUnOp(BvUnOp),
    /// single-bit bit-vector from a boolean
    BoolToBv,
    /// Get bits `high` through `low`, inclusive, zero-indexed
    BvExtract(usize, usize),
    /// bit-vector concatenation. n-ary. First element has the highest-order bits.
    BvConcat,
    /// add this many zero bits
    BvUext(usize),
    /// add this many copies of the sign bit
    BvSext(usize),
    /// the low bits of a field element's canonical integer, as a bit-vector of this width
    PfToBv(usize),
    /// unsigned bit-vector to field element
    UbvToPf(FieldT),

    /// boolean implication (binary)
    Implies,
    /// boolean n-ary operator
    BoolNaryOp(BoolNaryOp),
    /// boolean not
    Not,
    /// get this index bit from an input bit-vector
    BvBit(usize),

    /// prime-field unary operator
    PfUnOp(PfUnOp),
    /// prime-field n-ary operator
    PfNaryOp(PfNaryOp),

    /// tuple constructor
    Tuple,
    /// get the n'th element of a tuple
    Field(usize),
    /// replace the n'th element of a tuple
    Update(usize),

    /// Array with this key sort and size, and every value equal to the child
    ConstArray(Sort, usize),
    /// Array select: (array, key)
    Select,
    /// Array store: (array, key, value)
    Store,
}

/// Boolean AND
pub const AND: Op = Op::BoolNaryOp(BoolNaryOp::And);
/// Boolean OR
pub const OR: Op = Op::BoolNaryOp(BoolNaryOp::Or);
/// Boolean XOR
pub const XOR: Op = Op::BoolNaryOp(BoolNaryOp::Xor);
/// Boolean NOT
pub const NOT: Op = Op::Not;
/// Equality
pub const EQ: Op = Op::Eq;
/// If-then-else
pub const ITE: Op = Op::Ite;
/// Prime-field addition
pub const PF_ADD: Op = Op::PfNaryOp(PfNaryOp::Add);
/// Prime-field multiplication
pub const PF_MUL: Op = Op::PfNaryOp(PfNaryOp::Mul);
/// Prime-field negation
pub const PF_NEG: Op = Op::PfUnOp(PfUnOp::Neg);
/// Prime-field reciprocal
pub const PF_RECIP: Op = Op::PfUnOp(PfUnOp::Recip);
/// Bit-vector addition
pub const BV_ADD: Op = Op::BvNaryOp(BvNaryOp::Add);
/// Bit-vector multiplication
pub const BV_MUL: Op = Op::BvNaryOp(BvNaryOp::Mul);
/// Bit-vector subtraction
pub const BV_SUB: Op = Op::BvBinOp(BvBinOp::Sub);
/// Bit-vector unsigned division
pub const BV_UDIV: Op = Op::BvBinOp(BvBinOp::Udiv);
/// Bit-vector unsigned remainder
pub const BV_UREM: Op = Op::BvBinOp(BvBinOp::Urem);
/// Bit-vector shift left
pub const BV_SHL: Op = Op::BvBinOp(BvBinOp::Shl);
/// Bit-vector arithmetic shift right
pub const BV_ASHR: Op = Op::BvBinOp(BvBinOp::Ashr);
/// Bit-vector logical shift right
pub const BV_LSHR: Op = Op::BvBinOp(BvBinOp::Lshr);
/// Bit-vector AND
pub const BV_AND: Op = Op::BvNaryOp(BvNaryOp::And);
/// Bit-vector OR
pub const BV_OR: Op = Op::BvNaryOp(BvNaryOp::Or);
/// Bit-vector XOR
pub const BV_XOR: Op = Op::BvNaryOp(BvNaryOp::Xor);
/// Bit-vector NOT
pub const BV_NOT: Op = Op::BvUnOp(BvUnOp::Not);
/// Bit-vector negation
pub const BV_NEG: Op = Op::BvUnOp(BvUnOp::Neg);
/// Bit-vector concatenation
pub const BV_CONCAT: Op = Op::BvConcat;
/// Boolean implication
pub const IMPLIES: Op = Op::Implies;

impl Op {
    /// Number of arguments for this operator. `None` if n-ary.
    pub fn arity(&self) -> Option<usize> {
        match self {
            Op::Ite => Some(3),
            Op::Eq => Some(2),
            Op::Var(_, _) => Some(0),
            Op::Const(_) => Some(0),
            Op::BvBinOp(_) => Some(2),
            Op::BvBinPred(_) => Some(2),
            Op::BvNaryOp(_) => None,
            Op::BvUnOp(_) => Some(1),
            Op::BoolToBv => Some(1),
            Op::BvExtract(_, _) => Some(1),
            Op::BvConcat => None,
            Op::BvUext(_) => Some(1),
            Op::BvSext(_) => Some(1),
            Op::PfToBv(_) => Some(1),
            Op::UbvToPf(_) => Some(1),
            Op::Implies => Some(2),
            Op::BoolNaryOp(_) => None,
            Op::Not => Some(1),
            Op::BvBit(_) => Some(1),
            Op::PfUnOp(_) => Some(1),
            Op::PfNaryOp(_) => None,
            Op::Tuple => None,
            Op::Field(_) => Some(1),
            Op::Update(_) => Some(2),
            Op::ConstArray(_, _) => Some(1),
            Op::Select => Some(2),
            Op::Store => Some(3),
        }
    }

    /// Is this a variable or constant?
    pub fn is_leaf(&self) -> bool {
        matches!(self, Op::Var(..) | Op::Const(_))
    }
}

impl Display for Op {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            Op::Ite => write!(f, "ite"),
            Op::Eq => write!(f, "="),
            Op::Var(n, _) => write!(f, "{}", n),
            Op::Const(c) => write!(f, "{}", c),
            Op::BvBinOp(a) => write!(f, "{}", a),
            Op::BvBinPred(a) => write!(f, "{}", a),
            Op::BvNaryOp(a) => write!(f, "{}", a),
            Op::BvUnOp(a) => write!(f, "{}", a),
            Op::BoolToBv => write!(f, "bool2bv"),
            Op::BvExtract(a, b) => write!(f, "(extract {} {})", a, b),
            Op::BvConcat => write!(f, "concat"),
            Op::BvUext(a) => write!(f, "(uext {})", a),
            Op::BvSext(a) => write!(f, "(sext {})", a),
            Op::PfToBv(a) => write!(f, "(pf2bv {})", a),
            Op::UbvToPf(a) => write!(f, "(bv2pf {})", a.modulus()),
            Op::Implies => write!(f, "=>"),
            Op::BoolNaryOp(a) => write!(f, "{}", a),
            Op::Not => write!(f, "not"),
            Op::BvBit(a) => write!(f, "(bit {})", a),
            Op::PfUnOp(a) => write!(f, "{}", a),
            Op::PfNaryOp(a) => write!(f, "{}", a),
            Op::Tuple => write!(f, "tuple"),
            Op::Field(i) => write!(f, "(field {})", i),
            Op::Update(i) => write!(f, "(update {})", i),
            Op::ConstArray(k, s) => write!(f, "(const-array {} {})", k, s),
            Op::Select => write!(f, "select"),
            Op::Store => write!(f, "store"),
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
/// Boolean n-ary operator
pub enum BoolNaryOp {
    /// Boolean AND
    And,
    /// Boolean XOR
    Xor,
    /// Boolean OR
    Or,
}

impl Display for BoolNaryOp {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            BoolNaryOp::And => write!(f, "and"),
            BoolNaryOp::Or => write!(f, "or"),
            BoolNaryOp::Xor => write!(f, "xor"),
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
/// Bit-vector binary operator
pub enum BvBinOp {
    /// Bit-vector (-)
    Sub,
    /// Bit-vector (/), unsigned. Division by zero gives all ones.
    Udiv,
    /// Bit-vector (%), unsigned. Remainder by zero gives the dividend.
    Urem,
    /// Bit-vector (<<)
    Shl,
    /// Bit-vector arithmetic (sign extend) (>>)
    Ashr,
    /// Bit-vector logical (zero fill) (>>)
    Lshr,
}

impl Display for BvBinOp {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            BvBinOp::Sub => write!(f, "bvsub"),
            BvBinOp::Udiv => write!(f, "bvudiv"),
            BvBinOp::Urem => write!(f, "bvurem"),
            BvBinOp::Shl => write!(f, "bvshl"),
            BvBinOp::Ashr => write!(f, "bvashr"),
            BvBinOp::Lshr => write!(f, "bvlshr"),
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
/// Bit-vector binary predicate
pub enum BvBinPred {
    /// unsigned less than
    Ult,
    /// unsigned greater than
    Ugt,
    /// unsigned less than or equal
    Ule,
    /// unsigned greater than or equal
    Uge,
    /// signed less than
    Slt,
    /// signed greater than
    Sgt,
    /// signed less than or equal
    Sle,
    /// signed greater than or equal
    Sge,
}

impl Display for BvBinPred {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            BvBinPred::Ult => write!(f, "bvult"),
            BvBinPred::Ugt => write!(f, "bvugt"),
            BvBinPred::Ule => write!(f, "bvule"),
            BvBinPred::Uge => write!(f, "bvuge"),
            BvBinPred::Slt => write!(f, "bvslt"),
            BvBinPred::Sgt => write!(f, "bvsgt"),
            BvBinPred::Sle => write!(f, "bvsle"),
            BvBinPred::Sge => write!(f, "bvsge"),
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
/// Bit-vector n-ary operator
pub enum BvNaryOp {
    /// Bit-vector (+)
    Add,
    /// Bit-vector (*)
    Mul,
    /// Bit-vector (|)
    Or,
    /// Bit-vector (&)
    And,
    /// Bit-vector (^)
    Xor,
}

impl Display for BvNaryOp {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            BvNaryOp::Add => write!(f, "bvadd"),
            BvNaryOp::Mul => write!(f, "bvmul"),
            BvNaryOp::Or => write!(f, "bvor"),
            BvNaryOp::And => write!(f, "bvand"),
            BvNaryOp::Xor => write!(f, "bvxor"),
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
/// Bit-vector unary operator
pub enum BvUnOp {
    /// Bit-vector bitwise not
    Not,
    /// Bit-vector two's complement negation
    Neg,
}

impl Display for BvUnOp {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            BvUnOp::Not => write!(f, "bvnot"),
            BvUnOp::Neg => write!(f, "bvneg"),
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
/// Finite field n-ary operator
pub enum PfNaryOp {
    /// Finite field (+)
    Add,
    /// Finite field (*)
    Mul,
}

impl Display for PfNaryOp {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            PfNaryOp::Add => write!(f, "+"),
            PfNaryOp::Mul => write!(f, "*"),
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
/// Finite field n-ary operator
pub enum PfUnOp {
    /// Finite field negation
    Neg,
    /// Finite field reciprocal. Zero maps to zero.
    Recip,
}

impl Display for PfUnOp {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            PfUnOp::Neg => write!(f, "-"),
            PfUnOp::Recip => write!(f, "pfrecip"),
        }
    }
}

#[derive(Clone, PartialEq, Eq, Hash, Debug)]
/// A term: an operator applied to its children
pub struct TermData {
    /// the operator
    pub op: Op,
    /// the children
    pub cs: Vec<Term>,
}

impl TermData {
    /// Get the underlying boolean constant, if possible.
    pub fn as_bool_opt(&self) -> Option<bool> {
        if let Op::Const(Value::Bool(b)) = &self.op {
            Some(*b)
        } else {
            None
        }
    }
    /// Get the underlying bit-vector constant, if possible.
    pub fn as_bv_opt(&self) -> Option<&BitVector> {
        if let Op::Const(Value::BitVector(b)) = &self.op {
            Some(b)
        } else {
            None
        }
    }
    /// Get the underlying prime field constant, if possible.
    pub fn as_pf_opt(&self) -> Option<&FieldV> {
        if let Op::Const(Value::Field(b)) = &self.op {
            Some(b)
        } else {
            None
        }
    }
    /// Get the underlying constant value, if possible.
    pub fn as_value_opt(&self) -> Option<&Value> {
        if let Op::Const(v) = &self.op {
            Some(v)
        } else {
            None
        }
    }
    /// Is this a variable?
    pub fn is_var(&self) -> bool {
        matches!(self.op, Op::Var(..))
    }
    /// Is this a constant?
    pub fn is_const(&self) -> bool {
        matches!(self.op, Op::Const(..))
    }
}

impl Display for TermData {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        if self.op.arity() == Some(0) {
            write!(f, "{}", self.op)
        } else {
            write!(f, "({}", self.op)?;
            for c in &self.cs {
                write!(f, " {}", c)?;
            }
            write!(f, ")")
        }
    }
}

#[derive(Clone, PartialEq, Eq, Hash, Debug, PartialOrd, Ord, Serialize, Deserialize)]
/// An IR array value.
///
/// A sized, space array. Keys are `0..size`, enumerated by [Sort::nth_elem].
pub struct Array {
    /// Key sort
    pub key_sort: Sort,
    /// Default (the value at keys without an explicit entry)
    pub default: Box<Value>,
    /// Key-> Value map
    pub map: BTreeMap<Value, Value>,
    /// Size of array. There are this many valid keys.
    pub size: usize,
}

impl Array {
    /// Create a new [Array]
    pub fn new(key_sort: Sort, default: Box<Value>, map: BTreeMap<Value, Value>, size: usize) -> Self {
        Self {
            key_sort,
            default,
            map,
            size,
        }
    }

    /// An array with every key mapped to `default`
    pub fn constant(key_sort: Sort, default: Value, size: usize) -> Self {
        Self::new(key_sort, Box::new(default), BTreeMap::new(), size)
    }

    /// The position of key `idx`, if it is one of the `size` valid keys
    pub fn index_of(&self, idx: &Value) -> Option<usize> {
        let i = match idx {
            Value::Bool(b) => *b as usize,
            Value::BitVector(b) => b.uint().to_usize()?,
            Value::Field(f) => f.i().to_usize()?,
            _ => return None,
        };
        (i < self.size && idx.sort() == self.key_sort).then_some(i)
    }

    /// Store. A key outside the array leaves it unchanged.
    pub fn store(mut self, idx: Value, val: Value) -> Self {
        if self.index_of(&idx).is_none() {
            return self;
        }
        if val == *self.default {
            self.map.remove(&idx);
        } else {
            self.map.insert(idx, val);
        }
        self
    }

    /// Select. A key outside the array yields the default value of the element sort.
    pub fn select(&self, idx: &Value) -> Value {
        if self.index_of(idx).is_none() {
            return self.value_sort().default_value();
        }
        match self.map.get(idx) {
            Some(v) => v.clone(),
            None => (*self.default).clone(),
        }
    }

    /// Do `self` and `other` hold the same elements? Defaults only matter through the elements
    /// they fill.
    pub fn same_elements(&self, other: &Array) -> bool {
        self.size == other.size && self.elements() == other.elements()
    }

    /// The elements, in key order
    pub fn elements(&self) -> Vec<Value> {
        (0..self.size)
            .map(|i| self.select(&self.key_sort.nth_elem(i)))
            .collect()
    }

    /// The sort of the values
    pub fn value_sort(&self) -> Sort {
        self.default.sort()
    }

    fn is_well_formed(&self) -> bool {
        let sort = self.value_sort();
        Sort::Array(
            Box::new(self.key_sort.clone()),
            Box::new(sort.clone()),
            self.size,
        )
        .is_well_formed()
            && self.default.is_well_formed()
            && self.map.iter().all(|(k, v)| {
                k.is_well_formed()
                    && self.index_of(k).is_some()
                    && v.is_well_formed()
                    && v.sort() == sort
            })
    }
}

#[derive(Clone, PartialEq, Eq, Hash, Debug, PartialOrd, Ord, Serialize, Deserialize)]
/// A constant value
pub enum Value {
    /// Boolean
    Bool(bool),
    /// Bit-vector
    BitVector(BitVector),
    /// Prime field element
    Field(FieldV),
    /// Tuple
    Tuple(Box<[Value]>),
    /// Array
    Array(Array),
}

impl Display for Value {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{}", b),
            Value::Field(b) => write!(f, "{}", b),
            Value::BitVector(b) => write!(f, "{}", b),
            Value::Tuple(fields) => {
                write!(f, "(#t")?;
                for field in fields.iter() {
                    write!(f, " {}", field)?;
                }
                write!(f, ")")
            }
            Value::Array(a) => {
                write!(f, "(#a {} {} {} (", a.key_sort, a.default, a.size)?;
                let mut first = true;
                for (k, v) in &a.map {
                    if !first {
                        write!(f, " ")?;
                    }
                    first = false;
                    write!(f, "({} {})", k, v)?;
                }
                write!(f, "))")
            }
        }
    }
}

impl Value {
    /// Compute the sort of this value
    /// Is this value in normal form? Residues and bit-vectors are reduced, and arrays are
    /// well-formed with explicit entries only at valid keys.
    pub fn is_well_formed(&self) -> bool {
        match self {
            Value::Bool(_) => true,
            Value::BitVector(b) => {
                Sort::BitVector(b.width()).is_well_formed()
                    && *b.uint() >= 0
                    && b.uint().significant_bits() as usize <= b.width()
            }
            Value::Field(f) => f.is_canonical(),
            Value::Tuple(vs) => vs.iter().all(Value::is_well_formed),
            Value::Array(a) => a.is_well_formed(),
        }
    }
    /// The sort of this value
    pub fn sort(&self) -> Sort {
        match &self {
            Value::Bool(_) => Sort::Bool,
            Value::Field(f) => Sort::Field(f.ty()),
            Value::BitVector(b) => Sort::BitVector(b.width()),
            Value::Tuple(fields) => Sort::Tuple(fields.iter().map(Value::sort).collect()),
            Value::Array(a) => Sort::Array(
                Box::new(a.key_sort.clone()),
                Box::new(a.value_sort()),
                a.size,
            ),
        }
    }
    #[track_caller]
    /// Unwrap the constituent value of this boolean, panicking otherwise.
    pub fn as_bool(&self) -> bool {
        if let Value::Bool(b) = self {
            *b
        } else {
            panic!("Not a bool: {}", self)
        }
    }
    #[track_caller]
    /// Unwrap the constituent value of this bit-vector, panicking otherwise.
    pub fn as_bv(&self) -> &BitVector {
        if let Value::BitVector(b) = self {
            b
        } else {
            panic!("Not a bit-vec: {}", self)
        }
    }
    #[track_caller]
    /// Unwrap the constituent value of this field element, panicking otherwise.
    pub fn as_pf(&self) -> &FieldV {
        if let Value::Field(b) = self {
            b
        } else {
            panic!("Not a field-elem: {}", self)
        }
    }
    #[track_caller]
    /// Unwrap the constituent value of this tuple, panicking otherwise.
    pub fn as_tuple(&self) -> &[Value] {
        if let Value::Tuple(b) = self {
            b
        } else {
            panic!("Not a tuple: {}", self)
        }
    }
    #[track_caller]
    /// Unwrap the constituent value of this array, panicking otherwise.
    pub fn as_array(&self) -> &Array {
        if let Value::Array(w) = self {
            w
        } else {
            panic!("{} is not an array", self)
        }
    }
    /// Get the underlying boolean, if possible.
    pub fn as_bool_opt(&self) -> Option<bool> {
        if let Value::Bool(b) = self {
            Some(*b)
        } else {
            None
        }
    }
    /// Get the underlying bit-vector, if possible.
    pub fn as_bv_opt(&self) -> Option<&BitVector> {
        if let Value::BitVector(b) = self {
            Some(b)
        } else {
            None
        }
    }
    /// Get the underlying field element, if possible.
    pub fn as_pf_opt(&self) -> Option<&FieldV> {
        if let Value::Field(b) = self {
            Some(b)
        } else {
            None
        }
    }
    /// If this value is a valid array key, its position.
    pub fn as_key_index(&self) -> Option<usize> {
        match self {
            Value::Bool(b) => Some(*b as usize),
            Value::BitVector(b) => b.uint().to_usize(),
            Value::Field(f) => f.i().to_usize(),
            _ => None,
        }
    }
}

#[derive(Clone, PartialEq, Eq, Hash, Debug, PartialOrd, Ord, Serialize, Deserialize)]
/// The "type" of an IR term
pub enum Sort {
    /// boolean
    Bool,
    /// bit-vectors of this width
    BitVector(usize),
    /// prime field, with this modulus
    Field(FieldT),
    /// tuples of these sorts
    Tuple(Box<[Sort]>),
    /// key sort, value sort, size
    Array(Box<Sort>, Box<Sort>, usize),
}

impl Sort {
    #[track_caller]
    /// Unwrap the bitsize of this bit-vector, panicking otherwise.
    pub fn as_bv(&self) -> usize {
        if let Sort::BitVector(w) = self {
            *w
        } else {
            panic!("{} is not a bit-vector", self)
        }
    }

    #[track_caller]
    /// Unwrap the field of this prime field sort, panicking otherwise.
    pub fn as_pf(&self) -> &FieldT {
        if let Sort::Field(f) = self {
            f
        } else {
            panic!("{} is not a field", self)
        }
    }

    #[track_caller]
    /// Unwrap the constituent sorts of this tuple, panicking otherwise.
    pub fn as_tuple(&self) -> &[Sort] {
        if let Sort::Tuple(w) = self {
            w
        } else {
            panic!("{} is not a tuple", self)
        }
    }

    #[track_caller]
    /// Unwrap the key sort, value sort, and size of this array, panicking otherwise.
    pub fn as_array(&self) -> (&Sort, &Sort, usize) {
        if let Sort::Array(k, v, s) = self {
            (k, v, *s)
        } else {
            panic!("{} is not an array", self)
        }
    }

    /// Could this sort have been built by the front end? Widths are positive, moduli are at
    /// least 2, and arrays have no more entries than their key sort has values.
    pub fn is_well_formed(&self) -> bool {
        match self {
            Sort::Bool => true,
            Sort::BitVector(w) => *w > 0 && *w <= u32::MAX as usize,
            Sort::Field(f) => *f.modulus() > 1,
            Sort::Tuple(ss) => ss.iter().all(Sort::is_well_formed),
            Sort::Array(k, v, n) => {
                k.is_scalar()
                    && k.is_well_formed()
                    && v.is_well_formed()
                    && match &**k {
                        Sort::Bool => *n <= 2,
                        Sort::BitVector(w) => *w >= usize::BITS as usize || *n >> *w == 0,
                        Sort::Field(f) => *f.modulus() >= *n,
                        _ => false,
                    }
            }
        }
    }

    /// Is this a boolean, bit-vector, or field sort?
    pub fn is_scalar(&self) -> bool {
        !matches!(self, Sort::Tuple(..) | Sort::Array(..))
    }

    /// Does a tuple appear anywhere in this sort?
    pub fn contains_tuple(&self) -> bool {
        match self {
            Sort::Tuple(_) => true,
            Sort::Array(k, v, _) => k.contains_tuple() || v.contains_tuple(),
            _ => false,
        }
    }

    /// The `n`th element of this sort, in its canonical key order.
    /// Only defined for booleans, bit-vectors, and field elements.
    #[track_caller]
    pub fn nth_elem(&self, n: usize) -> Value {
        match self {
            Sort::Bool => {
                assert!(n < 2);
                Value::Bool(n == 1)
            }
            Sort::BitVector(w) => Value::BitVector(BitVector::new(Integer::from(n), *w)),
            Sort::Field(f) => Value::Field(f.new_v(n)),
            _ => panic!("Cannot get the {}th element of {}", n, self),
        }
    }

    /// A default value of this sort: false, zero, or aggregates thereof.
    pub fn default_value(&self) -> Value {
        match self {
            Sort::Bool => Value::Bool(false),
            Sort::BitVector(w) => Value::BitVector(BitVector::zeros(*w)),
            Sort::Field(f) => Value::Field(f.zero()),
            Sort::Tuple(ss) => Value::Tuple(ss.iter().map(Sort::default_value).collect()),
            Sort::Array(k, v, n) => {
                Value::Array(Array::constant((**k).clone(), v.default_value(), *n))
            }
        }
    }

    /// A default term of this sort
    pub fn default_term(&self) -> Term {
        leaf_term(Op::Const(self.default_value()))
    }
}

impl Display for Sort {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            Sort::Bool => write!(f, "bool"),
            Sort::BitVector(n) => write!(f, "(bv {})", n),
            Sort::Field(i) => write!(f, "(mod {})", i.modulus()),
            Sort::Tuple(fields) => {
                write!(f, "(tuple")?;
                for field in fields.iter() {
                    write!(f, " {}", field)?;
                }
                write!(f, ")")
            }
            Sort::Array(k, v, n) => write!(f, "(array {} {} {})", k, v, n),
        }
    }
}

/// A (perfectly shared) pointer to a term
pub type Term = HConsed<TermData>;
// "Temporary" terms.
/// A weak (perfectly shared) pointer to a term
pub type TTerm = WHConsed<TermData>;

consign! {
    /// Factory for terms.
    let TERM_FACTORY = consign(10000) for TermData;
}

lazy_static! {
    static ref TERM_TYPES: RwLock<HashMap<TTerm, Sort>> = RwLock::new(HashMap::new());
}

/// Scans the term database and the type database and removes dead terms.
pub fn garbage_collect() {
    use hashconsing::HashConsign;
    TERM_FACTORY.collect();
    let mut ty_map = TERM_TYPES.write().unwrap();
    let old_size = ty_map.len();
    ty_map.retain(|term, _| term.to_hconsed().is_some());
    let new_size = ty_map.len();
    debug!(target: "ir::term::gc", "{} of {} types collected", old_size - new_size, old_size);
}

fn bv_or<'a>(a: &'a Sort, ctx: &'static str) -> Result<&'a Sort, TypeErrorReason> {
    if let Sort::BitVector(_) = a {
        Ok(a)
    } else {
        Err(TypeErrorReason::ExpectedBv(a.clone(), ctx))
    }
}

fn bool_or<'a>(a: &'a Sort, ctx: &'static str) -> Result<&'a Sort, TypeErrorReason> {
    if let &Sort::Bool = a {
        Ok(a)
    } else {
        Err(TypeErrorReason::ExpectedBool(a.clone(), ctx))
    }
}

fn pf_or<'a>(a: &'a Sort, ctx: &'static str) -> Result<&'a Sort, TypeErrorReason> {
    match a {
        Sort::Field(_) => Ok(a),
        _ => Err(TypeErrorReason::ExpectedPf(a.clone(), ctx)),
    }
}

fn eq_or(a: &Sort, b: &Sort, ctx: &'static str) -> Result<(), TypeErrorReason> {
    if a == b {
        Ok(())
    } else {
        Err(TypeErrorReason::NotEqual(a.clone(), b.clone(), ctx))
    }
}

fn all_eq_or<'a, I: Iterator<Item = &'a Sort>>(
    mut a: I,
    ctx: &'static str,
) -> Result<&'a Sort, TypeErrorReason> {
    let first = a
        .next()
        .ok_or_else(|| TypeErrorReason::EmptyNary(ctx.to_owned()))?;
    for x in a {
        if first != x {
            return Err(TypeErrorReason::NotEqual(
                (*first).clone(),
                (*x).clone(),
                ctx,
            ));
        }
    }
    Ok(first)
}

fn out_of_bounds(msg: String) -> Result<Sort, TypeErrorReason> {
    Err(TypeErrorReason::OutOfBounds(msg))
}

fn extended(extra: usize, w: usize) -> Result<Sort, TypeErrorReason> {
    match extra.checked_add(w) {
        Some(n) => Ok(Sort::BitVector(n)),
        None => out_of_bounds(format!("Cannot extend a {}-bit bit-vector by {}", w, extra)),
    }
}

/// The sort of `op` applied to arguments of sorts `args`, without building a term.
pub fn check_op(op: &Op, args: &[&Sort]) -> Result<Sort, TypeError> {
    sort_of(op, args).map_err(|reason| TypeError {
        op: op.clone(),
        args: args.iter().map(|s| (*s).clone()).collect(),
        reason,
    })
}

fn sort_of(op: &Op, tys: &[&Sort]) -> Result<Sort, TypeErrorReason> {
    match (op, tys) {
        (Op::Eq, &[a, b]) => eq_or(a, b, "=").map(|_| Sort::Bool),
        (Op::Ite, &[c, b, d]) => bool_or(c, "ite")
            .and_then(|_| eq_or(b, d, "ite"))
            .map(|_| b.clone()),
        (Op::Var(_, s), &[]) => Ok(s.clone()),
        (Op::Const(c), &[]) => Ok(c.sort()),
        (Op::BvBinOp(_), &[a, b]) => {
            let ctx = "bv binary op";
            bv_or(a, ctx)
                .and_then(|_| eq_or(a, b, ctx))
                .map(|_| a.clone())
        }
        (Op::BvBinPred(_), &[a, b]) => {
            let ctx = "bv binary predicate";
            bv_or(a, ctx)
                .and_then(|_| eq_or(a, b, ctx))
                .map(|_| Sort::Bool)
        }
        (Op::BvNaryOp(_), a) => {
            let ctx = "bv nary op";
            all_eq_or(a.iter().cloned(), ctx)
                .and_then(|t| bv_or(t, ctx))
                .map(|a| a.clone())
        }
        (Op::BvUnOp(_), &[a]) => bv_or(a, "bv unary op").map(|a| a.clone()),
        (Op::BoolToBv, &[a]) => bool_or(a, "bool2bv").map(|_| Sort::BitVector(1)),
        (Op::BvExtract(high, low), &[Sort::BitVector(w)]) => {
            if low <= high && high < w {
                Ok(Sort::BitVector(high - low + 1))
            } else {
                out_of_bounds(format!(
                    "Cannot slice from {} to {} in a bit-vector of width {}",
                    high, low, w
                ))
            }
        }
        (Op::BvConcat, a) if !a.is_empty() => a
            .iter()
            .try_fold(0, |w, x| match x {
                Sort::BitVector(ww) => Ok(w + ww),
                s => Err(TypeErrorReason::ExpectedBv((*s).clone(), "concat")),
            })
            .map(Sort::BitVector),
        (Op::BvSext(a), &[b]) => bv_or(b, "sext").and_then(|b| extended(*a, b.as_bv())),
        (Op::BvUext(a), &[b]) => bv_or(b, "uext").and_then(|b| extended(*a, b.as_bv())),
        (Op::PfToBv(a), &[b]) => pf_or(b, "pf2bv").map(|_| Sort::BitVector(*a)),
        (Op::UbvToPf(f), &[a]) => bv_or(a, "bv2pf").map(|_| Sort::Field(f.clone())),
        (Op::Implies, &[a, b]) => {
            let ctx = "bool binary op";
            bool_or(a, ctx)
                .and_then(|_| eq_or(a, b, ctx))
                .map(|_| a.clone())
        }
        (Op::BoolNaryOp(_), a) => {
            let ctx = "bool nary op";
            all_eq_or(a.iter().cloned(), ctx)
                .and_then(|t| bool_or(t, ctx))
                .map(|a| a.clone())
        }
        (Op::Not, &[a]) => bool_or(a, "bool unary op").map(|a| a.clone()),
        (Op::BvBit(i), &[Sort::BitVector(w)]) => {
            if i < w {
                Ok(Sort::Bool)
            } else {
                out_of_bounds(format!("Cannot get bit {} of a {}-bit bit-vector", i, w))
            }
        }
        (Op::PfNaryOp(_), a) => {
            let ctx = "pf nary op";
            all_eq_or(a.iter().cloned(), ctx)
                .and_then(|t| pf_or(t, ctx))
                .map(|a| a.clone())
        }
        (Op::PfUnOp(_), &[a]) => pf_or(a, "pf unary op").map(|a| a.clone()),
        (Op::Tuple, a) => Ok(Sort::Tuple(a.iter().map(|s| (*s).clone()).collect())),
        (Op::Field(i), &[Sort::Tuple(fields)]) => match fields.get(*i) {
            Some(s) => Ok(s.clone()),
            None => out_of_bounds(format!(
                "Cannot get field {} of a {}-tuple",
                i,
                fields.len()
            )),
        },
        (Op::Update(i), &[Sort::Tuple(fields), v]) => match fields.get(*i) {
            Some(s) => eq_or(s, v, "update").map(|_| Sort::Tuple(fields.clone())),
            None => out_of_bounds(format!(
                "Cannot update field {} of a {}-tuple",
                i,
                fields.len()
            )),
        },
        (Op::ConstArray(s, n), &[a]) => {
            if s.is_scalar() {
                Ok(Sort::Array(Box::new(s.clone()), Box::new(a.clone()), *n))
            } else {
                Err(TypeErrorReason::Custom(format!("bad array key sort {}", s)))
            }
        }
        (Op::Select, &[Sort::Array(k, v, _), a]) => eq_or(k, a, "select").map(|_| (**v).clone()),
        (Op::Store, &[Sort::Array(k, v, n), a, b]) => eq_or(k, a, "store")
            .and_then(|_| eq_or(v, b, "store"))
            .map(|_| Sort::Array(k.clone(), v.clone(), *n)),
        (_, _) => Err(TypeErrorReason::Custom("bad arguments".to_owned())),
    }
}

/// Type-check this term, recursively as needed.
/// All results are stored in the global type table.
pub fn check_raw(t: &Term) -> Result<Sort, TypeError> {
    if let Some(s) = TERM_TYPES.read().unwrap().get(&t.to_weak()) {
        return Ok(s.clone());
    }
    let mut term_tys = TERM_TYPES.write().unwrap();
    // to_check is a stack of (node, cs checked) pairs.
    let mut to_check = vec![(t.clone(), false)];
    while let Some(back) = to_check.last_mut() {
        let weak = back.0.to_weak();
        if let Some((p, _)) = term_tys.get_key_value(&weak) {
            if p.to_hconsed().is_some() {
                to_check.pop();
                continue;
            } else {
                term_tys.remove(&weak);
            }
        }
        if !back.1 {
            back.1 = true;
            for c in back.0.cs.clone() {
                to_check.push((c, false));
            }
        } else {
            let tys = back
                .0
                .cs
                .iter()
                .map(|c| term_tys.get(&c.to_weak()).unwrap())
                .collect::<Vec<_>>();
            let ty = sort_of(&back.0.op, &tys).map_err(|reason| TypeError {
                op: back.0.op.clone(),
                args: tys.iter().map(|s| (*s).clone()).collect(),
                reason,
            })?;
            term_tys.insert(weak, ty);
            to_check.pop();
        }
    }
    Ok(term_tys.get(&t.to_weak()).unwrap().clone())
}

#[track_caller]
/// Type-check this term, panicking on a type error.
pub fn check(t: &Term) -> Sort {
    match check_raw(t) {
        Ok(s) => s,
        Err(e) => panic!("{}", e),
    }
}

#[derive(Debug, PartialEq, Eq, Clone)]
/// An IR type error.
pub struct TypeError {
    /// The operator
    pub op: Op,
    /// The sorts of its arguments
    pub args: Vec<Sort>,
    /// What went wrong
    pub reason: TypeErrorReason,
}

impl Display for TypeError {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "type error on {} applied to [", self.op)?;
        for (i, a) in self.args.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", a)?;
        }
        write!(f, "]: {}", self.reason)
    }
}

impl std::error::Error for TypeError {}

#[derive(Debug, PartialEq, Eq, Clone)]
/// Underlying cause of a type error
pub enum TypeErrorReason {
    /// Two sorts should be equal
    NotEqual(Sort, Sort, &'static str),
    /// A sort should be boolean
    ExpectedBool(Sort, &'static str),
    /// A sort should be a bit-vector
    ExpectedBv(Sort, &'static str),
    /// A sort should be a prime field
    ExpectedPf(Sort, &'static str),
    /// An empty n-ary operator.
    EmptyNary(String),
    /// Something else
    Custom(String),
    /// Bad bounds
    OutOfBounds(String),
}

impl Display for TypeErrorReason {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            TypeErrorReason::NotEqual(a, b, ctx) => write!(f, "{}: {} != {}", ctx, a, b),
            TypeErrorReason::ExpectedBool(s, ctx) => write!(f, "{}: expected bool, got {}", ctx, s),
            TypeErrorReason::ExpectedBv(s, ctx) => {
                write!(f, "{}: expected bit-vector, got {}", ctx, s)
            }
            TypeErrorReason::ExpectedPf(s, ctx) => write!(f, "{}: expected field, got {}", ctx, s),
            TypeErrorReason::EmptyNary(ctx) => write!(f, "{}: no arguments", ctx),
            TypeErrorReason::Custom(s) => write!(f, "{}", s),
            TypeErrorReason::OutOfBounds(s) => write!(f, "{}", s),
        }
    }
}

fn mk_term(op: Op, cs: Vec<Term>) -> Term {
    use hashconsing::HashConsign;
    TERM_FACTORY.mk(TermData { op, cs })
}

/// Make a term with no arguments, just an operator.
pub fn leaf_term(op: Op) -> Term {
    term(op, Vec::new())
}

/// Make a term with arguments. Panics if the term is ill-sorted.
#[track_caller]
pub fn term(op: Op, cs: Vec<Term>) -> Term {
    let t = mk_term(op, cs);
    check(&t);
    t
}

/// Make a term with arguments, reporting an ill-sorted term as an error.
pub fn try_term(op: Op, cs: Vec<Term>) -> Result<Term, TypeError> {
    let t = mk_term(op, cs);
    check_raw(&t)?;
    Ok(t)
}

/// Make a bit-vector constant term.
pub fn bv_lit<T>(uint: T, width: usize) -> Term
where
    Integer: From<T>,
{
    leaf_term(Op::Const(Value::BitVector(BitVector::new(
        uint.into(),
        width,
    ))))
}

/// Make a prime-field constant term.
pub fn pf_lit(elem: FieldV) -> Term {
    leaf_term(Op::Const(Value::Field(elem)))
}

/// Make a boolean constant term.
pub fn bool_lit(b: bool) -> Term {
    leaf_term(Op::Const(Value::Bool(b)))
}

/// Make a constant term.
pub fn const_(v: Value) -> Term {
    leaf_term(Op::Const(v))
}

/// Make a variable term.
pub fn var(name: String, sort: Sort) -> Term {
    leaf_term(Op::Var(name, sort))
}

/// Map from terms
pub type TermMap<T> = hashconsing::coll::HConMap<Term, T>;
/// Set of terms
pub type TermSet = hashconsing::coll::HConSet<Term>;

/// Iterator over descendants in child-first order.
pub struct PostOrderIter {
    // (cs stacked, term)
    stack: Vec<(bool, Term)>,
    visited: TermSet,
}

impl PostOrderIter {
    /// Make an iterator over the descendants of `root`.
    pub fn new(root: Term) -> Self {
        Self {
            stack: vec![(false, root)],
            visited: TermSet::new(),
        }
    }

    /// Make an iterator over the descendants of `roots`, in order, stopping at `skips`.
    pub fn from_roots_and_skips(roots: impl IntoIterator<Item = Term>, skips: TermSet) -> Self {
        let mut stack: Vec<(bool, Term)> = roots.into_iter().map(|t| (false, t)).collect();
        stack.reverse();
        Self {
            stack,
            visited: skips,
        }
    }
}

impl std::iter::Iterator for PostOrderIter {
    type Item = Term;
    fn next(&mut self) -> Option<Term> {
        while let Some((children_pushed, t)) = self.stack.last() {
            if self.visited.contains(t) {
                self.stack.pop();
            } else if !children_pushed {
                let last = t.clone();
                self.stack.last_mut().unwrap().0 = true;
                self.stack
                    .extend(last.cs.iter().rev().map(|c| (false, c.clone())));
            } else {
                break;
            }
        }
        self.stack.pop().map(|(_, t)| {
            self.visited.insert(t.clone());
            t
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
/// Who supplies an input, and when.
pub enum InputVis {
    /// Known to the verifier
    Public,
    /// Known only to the prover
    Private,
    /// Private, but committed to (as part of this commitment group) before any round
    Committed(usize),
    /// Private, chosen by the prover in this interaction round
    Round(usize),
    /// Chosen at random by the verifier at the end of this round
    Random(usize),
}

impl Display for InputVis {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            InputVis::Public => write!(f, "public"),
            InputVis::Private => write!(f, "private"),
            InputVis::Committed(g) => write!(f, "(committed {})", g),
            InputVis::Round(r) => write!(f, "(round {})", r),
            InputVis::Random(r) => write!(f, "(random {})", r),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
/// A declared input to a computation
pub struct InputDecl {
    /// The variable name
    pub name: String,
    /// Its sort
    pub sort: Sort,
    /// Its visibility
    pub vis: InputVis,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
/// Information about the inputs of a computation, in declaration order.
pub struct ComputationMetadata {
    inputs: Vec<InputDecl>,
}

impl ComputationMetadata {
    /// Declare an input, returning its variable term.
    #[track_caller]
    pub fn new_input(&mut self, name: String, sort: Sort, vis: InputVis) -> Term {
        assert!(
            self.input(&name).is_none(),
            "{} is already an input",
            name
        );
        debug!("Input: {} {} ({})", name, sort, vis);
        let t = var(name.clone(), sort.clone());
        self.inputs.push(InputDecl { name, sort, vis });
        t
    }

    /// All declared inputs, in order
    pub fn inputs(&self) -> &[InputDecl] {
        &self.inputs
    }

    /// The declaration of the input `name`
    pub fn input(&self, name: &str) -> Option<&InputDecl> {
        self.inputs.iter().find(|i| i.name == name)
    }

    /// Is `name` a public input?
    pub fn is_public(&self, name: &str) -> bool {
        self.input(name).map(|i| i.vis) == Some(InputVis::Public)
    }

    /// Names of all public inputs
    pub fn public_input_names(&self) -> FxHashSet<String> {
        self.inputs
            .iter()
            .filter(|i| i.vis == InputVis::Public)
            .map(|i| i.name.clone())
            .collect()
    }

    /// Public inputs and their sorts
    pub fn public_inputs_and_sorts(&self) -> FxHashMap<String, Sort> {
        self.inputs
            .iter()
            .filter(|i| i.vis == InputVis::Public)
            .map(|i| (i.name.clone(), i.sort.clone()))
            .collect()
    }

    /// Replace the input `name` with `parts`, at the same position and with the same visibility.
    pub fn replace_input(&mut self, name: &str, parts: Vec<(String, Sort)>) {
        if let Some(pos) = self.inputs.iter().position(|i| i.name == name) {
            let vis = self.inputs[pos].vis;
            self.inputs.splice(
                pos..pos + 1,
                parts
                    .into_iter()
                    .map(|(name, sort)| InputDecl { name, sort, vis }),
            );
        }
    }

    /// Commitment groups, in group order, each with its inputs in declaration order
    pub fn commitment_groups(&self) -> BTreeMap<usize, Vec<&InputDecl>> {
        let mut groups: BTreeMap<usize, Vec<&InputDecl>> = BTreeMap::new();
        for i in &self.inputs {
            if let InputVis::Committed(g) = i.vis {
                groups.entry(g).or_default().push(i);
            }
        }
        groups
    }

    /// The number of interaction rounds (one more than the highest round or challenge number)
    pub fn num_rounds(&self) -> usize {
        self.inputs
            .iter()
            .filter_map(|i| match i.vis {
                InputVis::Round(r) | InputVis::Random(r) => Some(r + 1),
                _ => None,
            })
            .max()
            .unwrap_or(0)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
/// An IR computation: a list of boolean assertions over declared inputs.
pub struct Computation {
    /// The assertions, all of which must hold
    pub outputs: Vec<Term>,
    /// Input declarations
    pub metadata: ComputationMetadata,
    /// How the prover computes some inputs from others
    pub precomputes: precomp::PreComp,
}

impl Computation {
    /// An empty computation
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare an input, returning its variable term.
    pub fn new_var(&mut self, name: &str, sort: Sort, vis: InputVis) -> Term {
        self.metadata.new_input(name.to_owned(), sort, vis)
    }

    /// Add an assertion
    #[track_caller]
    pub fn assert(&mut self, s: Term) {
        assert_eq!(check(&s), Sort::Bool);
        debug!("Assert: {}", s);
        self.outputs.push(s);
    }

    /// The assertions
    pub fn outputs(&self) -> &Vec<Term> {
        &self.outputs
    }

    /// Every subterm of the assertions, children first
    pub fn terms_postorder(&self) -> PostOrderIter {
        PostOrderIter::from_roots_and_skips(self.outputs.clone(), TermSet::new())
    }

    /// The number of distinct subterms of the assertions
    pub fn terms(&self) -> usize {
        self.terms_postorder().count()
    }

    /// Evaluate every assertion under `values`, after running the precomputation.
    pub fn eval_all(&self, values: &FxHashMap<String, Value>) -> crate::Result<Vec<Value>> {
        let values = self.precomputes.eval(values)?;
        let mut cache = TermMap::new();
        self.outputs
            .iter()
            .map(|o| eval_cached(o, &values, &mut cache).map(|v| v.clone()))
            .collect()
    }
}
