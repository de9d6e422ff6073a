//! Rank 1 Constraint Systems

use circ_fields::{FieldT, FieldV};
use fxhash::FxHashMap as HashMap;
use log::trace;
use paste::paste;
use rayon::prelude::*;
use rug::Integer;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{self, Debug, Display, Formatter};
use std::hash::Hash;

use crate::error::{Error, Result};
use crate::ir::term::*;

pub mod bundle;
pub mod inspect;
pub mod opt;
pub mod proof;
#[cfg(feature = "spartan")]
pub mod spartan;
pub mod trans;
pub mod wit_comp;

#[derive(Debug, Clone)]
/// A Rank 1 Constraint System, under construction.
///
/// Extended to comprehend witness commitments and verifier challenges.
///
/// We view the R1CS relation as R(x, cw_0 .. cw_C, w_0, r_0, w_1, r_1, .. w), where all
/// variables are vectors of field elements and
/// * x is the instance
/// * cw_i is a committed witness
///   * i.e., the commitment is part of the instance, but the data is part of the witness
/// * i from 0 to R is a "round number":
///   * w_i is a witness set by the prover in round i
///   * r_i is a random challenge, sampled as round i ends and round i+1 begins
/// * w is the final round of witnesses
///
/// Every variable carries the IR term that computes its value. Those terms are how
/// [R1cs::finalize] builds the staged witness computation; the constraints are never inverted.
///
/// Only variables in w can be eliminated ([R1cs::can_eliminate]). The optimizer may remove them,
/// leaving unused variable numbers.
pub struct R1cs {
    field: FieldT,
    idx_to_sig: BiMap<Var, String>,
    num_insts: usize,
    num_cwits: Vec<usize>,
    next_cwit: usize,
    round_wit_ends: Vec<usize>,
    next_round_wit: usize,
    round_chall_ends: Vec<usize>,
    next_round_chall: usize,
    num_final_wits: usize,

    challenge_names: Vec<String>,

    /// The contraints themselves
    constraints: Vec<(Lc, Lc, Lc)>,

    /// Terms for computing them.
    terms: HashMap<Var, Term>,
}

/// An assembled R1CS relation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct R1csFinal {
    field: FieldT,
    vars: Vec<Var>,
    constraints: Vec<(Lc, Lc, Lc)>,
    names: BTreeMap<Var, String>,

    commitments: Vec<Vec<Var>>,
}

/// A variable
///
/// The top three bits hold the [VarType]; the rest hold a per-type number.
#[derive(Hash, PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Serialize, Deserialize)]
#[serde(try_from = "usize", into = "usize")]
#[repr(transparent)]
pub struct Var(usize);

impl Var {
    const NUMBER_BITS: u32 = usize::BITS - 3;
    const NUMBER_MASK: usize = !(0b111 << Self::NUMBER_BITS);
    /// Make the `number`th variable of type `ty`.
    #[track_caller]
    pub fn new(ty: VarType, number: usize) -> Self {
        assert!(!Self::NUMBER_MASK & number == 0);
        let ty_repr = match ty {
            VarType::Inst => 0b000,
            VarType::CWit => 0b001,
            VarType::RoundWit => 0b010,
            VarType::Chall => 0b011,
            VarType::FinalWit => 0b100,
        };
        Var(ty_repr << Self::NUMBER_BITS | number)
    }
    fn ty_code(code: usize) -> Option<VarType> {
        match code {
            0b000 => Some(VarType::Inst),
            0b001 => Some(VarType::CWit),
            0b010 => Some(VarType::RoundWit),
            0b011 => Some(VarType::Chall),
            0b100 => Some(VarType::FinalWit),
            _ => None,
        }
    }
    /// The type of this variable.
    pub fn ty(&self) -> VarType {
        Self::ty_code(self.0 >> Self::NUMBER_BITS).expect("checked at construction")
    }
    /// The number of this variable, among those of its type.
    pub fn number(&self) -> usize {
        self.0 & Self::NUMBER_MASK
    }
}

impl TryFrom<usize> for Var {
    type Error = String;
    fn try_from(u: usize) -> std::result::Result<Self, String> {
        match Self::ty_code(u >> Self::NUMBER_BITS) {
            Some(_) => Ok(Var(u)),
            None => Err(format!("bad variable type code {}", u >> Self::NUMBER_BITS)),
        }
    }
}

impl From<Var> for usize {
    fn from(v: Var) -> usize {
        v.0
    }
}

impl Debug for Var {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({})", self.ty(), self.number())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
/// A variable type
pub enum VarType {
    /// x
    Inst,
    /// cw_i
    CWit,
    /// w_i
    RoundWit,
    /// r_i
    Chall,
    /// w
    FinalWit,
}

/// Builder interface
impl R1cs {
    /// Make an empty constraint system over `field`.
    pub fn new(field: FieldT) -> Self {
        R1cs {
            field,
            idx_to_sig: BiMap::new(),
            num_insts: Default::default(),
            num_cwits: Default::default(),
            next_cwit: Default::default(),
            round_wit_ends: Default::default(),
            next_round_wit: Default::default(),
            round_chall_ends: Default::default(),
            next_round_chall: Default::default(),
            num_final_wits: Default::default(),
            challenge_names: Default::default(),
            constraints: Vec::new(),
            terms: Default::default(),
        }
    }

    fn var(&mut self, s: String, t: Term, ty: VarType) -> Var {
        let id = match ty {
            VarType::Inst => {
                self.num_insts += 1;
                self.num_insts - 1
            }
            VarType::CWit => {
                self.next_cwit += 1;
                self.next_cwit - 1
            }
            VarType::RoundWit => {
                self.next_round_wit += 1;
                self.next_round_wit - 1
            }
            VarType::Chall => {
                self.next_round_chall += 1;
                self.next_round_chall - 1
            }
            VarType::FinalWit => {
                self.num_final_wits += 1;
                self.num_final_wits - 1
            }
        };
        if let VarType::Chall = ty {
            self.challenge_names.push(s.clone());
        }
        let var = Var::new(ty, id);
        trace!("Var {:?}: {}", var, s);
        self.idx_to_sig.insert(var, s);
        self.terms.insert(var, t);
        var
    }

    /// End a round of witnesses and challenges. The challenges will be set after the witnesses.
    pub fn end_round(&mut self) {
        self.round_wit_ends.push(self.next_round_wit);
        self.round_chall_ends.push(self.next_round_chall);
    }

    /// Add a (uncommitted) variable, named `s`, whose value `t` computes.
    #[track_caller]
    pub fn add_var(&mut self, s: String, t: Term, ty: VarType) -> Var {
        assert!(!matches!(ty, VarType::CWit));
        self.var(s, t, ty)
    }

    /// The number of (live) variables
    pub fn num_vars(&self) -> usize {
        self.idx_to_sig.len()
    }

    /// Add a vector of committed witness variables
    pub fn add_committed_witness(&mut self, names_and_terms: Vec<(String, Term)>) {
        let n = names_and_terms.len();
        for (name, value) in names_and_terms {
            self.var(name, value, VarType::CWit);
        }
        self.num_cwits.push(n);
    }

    /// Get the zero combination for this system.
    pub fn zero(&self) -> Lc {
        Lc {
            field: self.field.clone(),
            constant: self.field.zero(),
            monomials: HashMap::default(),
        }
    }
    /// Get a constant constraint for this system.
    #[track_caller]
    pub fn constant(&self, c: FieldV) -> Lc {
        assert_eq!(c.ty(), self.field);
        Lc {
            field: self.field.clone(),
            constant: c,
            monomials: HashMap::default(),
        }
    }
    /// Get combination which is just the wire `s`.
    #[track_caller]
    pub fn signal_lc(&self, s: &str) -> Lc {
        let idx = self
            .idx_to_sig
            .get_rev(s)
            .expect("Missing signal in signal_lc");
        let mut lc = self.zero();
        lc.monomials.insert(*idx, self.field.new_v(1));
        lc
    }
    /// Make `a * b = c` a constraint.
    #[track_caller]
    pub fn constraint(&mut self, a: Lc, b: Lc, c: Lc) {
        assert_eq!(&self.field, &a.field);
        assert_eq!(&self.field, &b.field);
        assert_eq!(&self.field, &c.field);
        trace!(
            "Constraint:\n    {}\n  * {}\n  = {}",
            self.format_lc(&a),
            self.format_lc(&b),
            self.format_lc(&c)
        );
        self.constraints.push((a, b, c));
    }

    /// Get a nice string represenation of the combination `a`.
    pub fn format_lc(&self, a: &Lc) -> String {
        format_lc(&self.field, a, |v| self.idx_to_sig.get_fwd(v).map(|s| s.as_str()))
    }

    /// Can this variable be eliminated?
    pub fn can_eliminate(&self, var: Var) -> bool {
        matches!(var.ty(), VarType::FinalWit)
    }

    /// Get a nice string represenation of the tuple.
    pub fn format_qeq(&self, (a, b, c): &(Lc, Lc, Lc)) -> String {
        format!(
            "({})({}) = {}",
            self.format_lc(a),
            self.format_lc(b),
            self.format_lc(c)
        )
    }

    /// The field
    pub fn field(&self) -> &FieldT {
        &self.field
    }

    /// Access the raw constraints.
    pub fn constraints(&self) -> &Vec<(Lc, Lc, Lc)> {
        &self.constraints
    }

    /// The name of variable `v`
    pub fn name(&self, v: Var) -> Option<&str> {
        self.idx_to_sig.get_fwd(&v).map(|s| s.as_str())
    }

    /// Forget an eliminated variable.
    fn remove_var(&mut self, v: Var) {
        debug_assert!(self.can_eliminate(v));
        self.idx_to_sig.remove_fwd(&v);
        self.terms.remove(&v);
    }

    /// Check all constraints, given values for the variables.
    pub fn check_all(&self, values: &HashMap<Var, FieldV>) -> Result<()> {
        for qeq in &self.constraints {
            check_qeq(qeq, values, |v| self.idx_to_sig.get_fwd(v).map(|s| s.as_str()), |q| {
                self.format_qeq(q)
            })?;
        }
        Ok(())
    }
}

/// Render `a` as signed terms: the constant, then each monomial in variable order.
fn format_lc<'a>(field: &FieldT, a: &Lc, name: impl Fn(&Var) -> Option<&'a str>) -> String {
    let mut s = String::new();

    let half_m: Integer = field.modulus().clone() / 2;
    let abs = |i: Integer| {
        if i <= half_m {
            i
        } else {
            field.modulus() - i
        }
    };
    let sign = |i: &Integer| if i <= &half_m { "+" } else { "-" };
    let format_i = |i: &FieldV| {
        let ii: Integer = i.into();
        format!("{}{}", sign(&ii), abs(ii))
    };

    s.push_str(&format_i(&a.constant));
    for (idx, coeff) in a.sorted_monomials() {
        s.push_str(&format!(
            " {} {}",
            format_i(coeff),
            name(idx).unwrap_or("<eliminated>")
        ));
    }
    s
}

fn eval_lc<'a>(
    lc: &Lc,
    values: &HashMap<Var, FieldV>,
    name: impl Fn(&Var) -> Option<&'a str>,
) -> Result<FieldV> {
    let mut acc = lc.constant.clone();
    for (var, coeff) in &lc.monomials {
        let val = values.get(var).ok_or_else(|| Error::MissingWitnessValue {
            name: name(var).map_or_else(|| format!("{:?}", var), |s| s.to_owned()),
        })?;
        acc += val.clone() * coeff;
    }
    Ok(acc)
}

fn check_qeq<'a>(
    qeq: &(Lc, Lc, Lc),
    values: &HashMap<Var, FieldV>,
    name: impl Fn(&Var) -> Option<&'a str> + Copy,
    format: impl Fn(&(Lc, Lc, Lc)) -> String,
) -> Result<()> {
    let (a, b, c) = qeq;
    let av = eval_lc(a, values, name)?;
    let bv = eval_lc(b, values, name)?;
    let cv = eval_lc(c, values, name)?;
    if av.clone() * &bv != cv {
        return Err(Error::Unsatisfied(format!(
            "{} (values {} * {} != {})",
            format(qeq),
            av,
            bv,
            cv
        )));
    }
    Ok(())
}

impl R1csFinal {
    /// Check `a * b = c` in this constraint system.
    pub fn check(&self, qeq: &(Lc, Lc, Lc), values: &HashMap<Var, FieldV>) -> Result<()> {
        check_qeq(qeq, values, |v| self.name(*v), |q| self.format_qeq(q))
    }

    /// Get a nice string represenation of the combination `a`.
    pub fn format_lc(&self, a: &Lc) -> String {
        format_lc(&self.field, a, |v| self.name(*v))
    }

    /// Get a nice string represenation of the tuple.
    pub fn format_qeq(&self, (a, b, c): &(Lc, Lc, Lc)) -> String {
        format!(
            "({})({}) = {}",
            self.format_lc(a),
            self.format_lc(b),
            self.format_lc(c)
        )
    }

    /// Check all constraints, reporting the first that fails.
    pub fn check_all(&self, values: &HashMap<Var, FieldV>) -> Result<()> {
        self.constraints
            .par_iter()
            .map(|qeq| self.check(qeq, values))
            .find_first(|r| r.is_err())
            .unwrap_or(Ok(()))
    }

    /// The field
    pub fn field(&self) -> &FieldT {
        &self.field
    }

    /// The variables, in witness order
    pub fn vars(&self) -> &[Var] {
        &self.vars
    }

    /// The constraints
    pub fn constraints(&self) -> &[(Lc, Lc, Lc)] {
        &self.constraints
    }

    /// The name of `v`
    pub fn name(&self, v: Var) -> Option<&str> {
        self.names.get(&v).map(|s| s.as_str())
    }

    /// The committed witness groups
    pub fn commitments(&self) -> &[Vec<Var>] {
        &self.commitments
    }

    /// Check the invariants that construction guarantees but decoding does not: each variable
    /// is listed once and named, committed variables are listed committed witnesses, and every
    /// combination is over this field with reduced, non-zero coefficients on listed variables.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if *self.field.modulus() < 2 {
            return Err(format!("bad field {}", self.field));
        }
        let mut listed = BTreeSet::new();
        for v in &self.vars {
            if !listed.insert(*v) {
                return Err(format!("{:?} is listed twice", v));
            }
        }
        if let Some(v) = listed.iter().find(|v| !self.names.contains_key(v)) {
            return Err(format!("{:?} has no name", v));
        }
        if let Some(v) = self.names.keys().find(|v| !listed.contains(v)) {
            return Err(format!("{:?} is named but not listed", v));
        }
        for v in self.commitments.iter().flatten() {
            if v.ty() != VarType::CWit || !listed.contains(v) {
                return Err(format!("bad committed variable {:?}", v));
            }
        }
        for (i, (a, b, c)) in self.constraints.iter().enumerate() {
            for lc in [a, b, c] {
                self.validate_lc(lc, &listed)
                    .map_err(|e| format!("constraint {}: {}", i, e))?;
            }
        }
        Ok(())
    }

    fn validate_lc(&self, lc: &Lc, listed: &BTreeSet<Var>) -> std::result::Result<(), String> {
        if lc.field != self.field {
            return Err(format!("combination over {}, expected {}", lc.field, self.field));
        }
        let in_field = |c: &FieldV| c.is_canonical() && c.modulus() == self.field.modulus();
        if !in_field(&lc.constant) {
            return Err(format!("bad constant {}", lc.constant));
        }
        for (v, c) in &lc.monomials {
            if !listed.contains(v) {
                return Err(format!("{:?} is not listed", v));
            }
            if c.is_zero() || !in_field(c) {
                return Err(format!("bad coefficient {} on {:?}", c, v));
            }
        }
        Ok(())
    }
}

impl ProverData {
    /// Compute an R1CS witness. Challenges are derived from their names.
    pub fn extend_r1cs_witness(
        &self,
        values: &HashMap<String, Value>,
    ) -> Result<HashMap<Var, FieldV>> {
        let vars = &self.r1cs.vars;
        // we need to evaluate all R1CS variables
        let mut var_values: HashMap<Var, FieldV> = Default::default();
        let mut eval = wit_comp::StagedWitCompEvaluator::new(&self.precompute);
        // this will hold inputs to the multi-round evaluator.
        let mut inputs = values.clone();
        while !eval.is_done() {
            trace!(
                "Have {}/{} values, doing another round",
                var_values.len(),
                vars.len()
            );
            for value in eval.eval_stage(std::mem::take(&mut inputs))? {
                let var = *vars.get(var_values.len()).ok_or_else(|| {
                    Error::deserialization("the witness plan computes more values than there are variables")
                })?;
                let value = value.as_pf_opt().ok_or_else(|| Error::BadInput {
                    name: self.r1cs.name(var).unwrap_or_default().to_owned(),
                    reason: format!("computed the non-field value {}", value),
                })?;
                trace!("var {:?} : {}", var, value);
                var_values.insert(var, value.clone());
            }
            while let Some(var) = vars
                .get(var_values.len())
                .filter(|v| v.ty() == VarType::Chall)
            {
                let name = self.r1cs.name(*var).unwrap_or_default().to_owned();
                let val = eval::pf_challenge(&name, &self.r1cs.field);
                var_values.insert(*var, val.clone());
                inputs.insert(name, Value::Field(val));
            }
        }
        if var_values.len() != vars.len() {
            return Err(Error::deserialization(format!(
                "the witness plan computes {} of {} variables",
                var_values.len(),
                vars.len()
            )));
        }
        Ok(var_values)
    }

    /// Compute the witness and check all constraints.
    pub fn check_all(&self, values: &HashMap<String, Value>) -> Result<()> {
        self.r1cs.check_all(&self.extend_r1cs_witness(values)?)
    }

    /// The witness, as (name, value) pairs in variable order.
    pub fn witness_values(&self, values: &HashMap<String, Value>) -> Result<Vec<(String, FieldV)>> {
        let mut var_values = self.extend_r1cs_witness(values)?;
        Ok(self
            .r1cs
            .vars
            .iter()
            .filter_map(|v| {
                let name = self.r1cs.name(*v)?.to_owned();
                Some((name, var_values.remove(v)?))
            })
            .collect())
    }

    /// How many commitments?
    pub fn num_commitments(&self) -> usize {
        self.r1cs.commitments.len()
    }
}

/// A bidirectional map.
#[derive(Debug, Clone)]
struct BiMap<S: Hash + Eq + Clone, T: Hash + Eq + Clone> {
    fwd: HashMap<S, T>,
    rev: HashMap<T, S>,
}

impl<S: Hash + Eq + Clone + Debug, T: Hash + Eq + Clone + Debug> BiMap<S, T> {
    fn new() -> Self {
        Self {
            fwd: Default::default(),
            rev: Default::default(),
        }
    }
    fn len(&self) -> usize {
        debug_assert_eq!(self.fwd.len(), self.rev.len());
        self.fwd.len()
    }
    #[track_caller]
    fn insert(&mut self, s: S, t: T) {
        assert!(
            self.fwd.insert(s.clone(), t.clone()).is_none(),
            "Duplicate key {:?}",
            s
        );
        assert!(
            self.rev.insert(t.clone(), s).is_none(),
            "Duplicate value {:?}",
            t
        );
    }
    fn contains_key<Q>(&self, s: &Q) -> bool
    where
        S: std::borrow::Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.fwd.contains_key(s)
    }
    fn get_fwd<Q>(&self, s: &Q) -> Option<&T>
    where
        S: std::borrow::Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.fwd.get(s)
    }
    fn get_rev<Q>(&self, t: &Q) -> Option<&S>
    where
        T: std::borrow::Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.rev.get(t)
    }
    fn remove_fwd(&mut self, s: &S) {
        if let Some(t) = self.fwd.remove(s) {
            self.rev.remove(&t);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// A linear combination
pub struct Lc {
    field: FieldT,
    constant: FieldV,
    #[serde(with = "sorted_monomials")]
    monomials: HashMap<Var, FieldV>,
}

/// Monomials are written in variable order, so equal combinations encode identically.
mod sorted_monomials {
    use super::{HashMap, Var};
    use circ_fields::FieldV;
    use serde::{de::Error, Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(m: &HashMap<Var, FieldV>, s: S) -> Result<S::Ok, S::Error> {
        let mut entries: Vec<(&Var, &FieldV)> = m.iter().collect();
        entries.sort_by_key(|(v, _)| **v);
        entries.serialize(s)
    }

    /// Entries must be strictly increasing by variable, with non-zero coefficients.
    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<HashMap<Var, FieldV>, D::Error> {
        let entries: Vec<(Var, FieldV)> = Vec::deserialize(d)?;
        if entries.windows(2).any(|w| w[0].0 >= w[1].0) {
            return Err(D::Error::custom("monomials are repeated or out of order"));
        }
        if let Some((v, _)) = entries.iter().find(|(_, c)| c.is_zero()) {
            return Err(D::Error::custom(format!("zero coefficient on {:?}", v)));
        }
        Ok(entries.into_iter().collect())
    }
}

impl Lc {
    /// Is this the zero combination?
    pub fn is_zero(&self) -> bool {
        self.monomials.is_empty() && self.constant.is_zero()
    }
    /// Make this the zero combination.
    pub fn clear(&mut self) {
        self.monomials.clear();
        self.constant = self.field.zero();
    }
    /// Take this linear combination, leaving zero in its place.
    pub fn take(&mut self) -> Self {
        let monomials = std::mem::take(&mut self.monomials);
        let constant = std::mem::replace(&mut self.constant, self.field.zero());
        Self {
            field: self.field.clone(),
            constant,
            monomials,
        }
    }
    /// Is this a constant? If so, return that constant.
    pub fn as_const(&self) -> Option<&FieldV> {
        self.monomials.is_empty().then_some(&self.constant)
    }
    /// The constant term
    pub fn constant(&self) -> &FieldV {
        &self.constant
    }
    /// The (variable, non-zero coefficient) pairs
    pub fn monomials(&self) -> &HashMap<Var, FieldV> {
        &self.monomials
    }
    /// The monomials, in variable order
    pub fn sorted_monomials(&self) -> Vec<(&Var, &FieldV)> {
        let mut m: Vec<(&Var, &FieldV)> = self.monomials.iter().collect();
        m.sort_by_key(|(v, _)| **v);
        m
    }
    /// The field
    pub fn field(&self) -> &FieldT {
        &self.field
    }
}

macro_rules! arith_impl {
    ($Trait: ident, $fn: ident) => {
        paste! {
            impl $Trait<&Lc> for Lc {
                type Output = Self;
                fn $fn(mut self, other: &Self) -> Self {
                    self.[<$fn _assign>](other);
                    self
                }
            }

            impl [<$Trait Assign>]<&Lc> for Lc {
                fn [<$fn _assign>](&mut self, other: &Self) {
                    assert_eq!(&self.field, &other.field);
                    self.constant.[<$fn _assign>](&other.constant);
                    for (i, v) in &other.monomials {
                        match self.monomials.entry(*i) {
                            std::collections::hash_map::Entry::Occupied(mut e) => {
                                e.get_mut().[<$fn _assign>](v);
                                if e.get().is_zero() {
                                    e.remove_entry();
                                }
                            }
                            std::collections::hash_map::Entry::Vacant(e) => {
                                let mut m = self.field.zero();
                                m.[<$fn _assign>](v);
                                e.insert(m);
                            }
                        }
                    }
                }
            }

            impl $Trait<&FieldV> for Lc {
                type Output = Self;
                fn $fn(mut self, other: &FieldV) -> Self {
                    self.[<$fn _assign>](other);
                    self
                }
            }

            impl [<$Trait Assign>]<&FieldV> for Lc {
                fn [<$fn _assign>](&mut self, other: &FieldV) {
                    self.constant.[<$fn _assign>](other);
                }
            }

            impl [<$Trait Assign>]<FieldV> for Lc {
                fn [<$fn _assign>](&mut self, other: FieldV) {
                    self.[<$fn _assign>](&other);
                }
            }

            impl $Trait<isize> for Lc {
                type Output = Self;
                fn $fn(mut self, other: isize) -> Self {
                    self.[<$fn _assign>](other);
                    self
                }
            }

            impl [<$Trait Assign>]<isize> for Lc {
                fn [<$fn _assign>](&mut self, other: isize) {
                    self.constant.[<$fn _assign>](self.field.new_v(other));
                }
            }
        }
    };
}

use std::ops::{Add, AddAssign, Mul, MulAssign, Neg, Sub, SubAssign};

impl Neg for Lc {
    type Output = Lc;
    fn neg(mut self) -> Lc {
        self.constant = -self.constant;
        for v in &mut self.monomials.values_mut() {
            *v = -v.clone();
        }
        self
    }
}

arith_impl! {Add, add}
arith_impl! {Sub, sub}

impl Mul<&FieldV> for Lc {
    type Output = Lc;
    fn mul(mut self, other: &FieldV) -> Lc {
        self *= other;
        self
    }
}

impl MulAssign<FieldV> for Lc {
    fn mul_assign(&mut self, other: FieldV) {
        self.mul_assign(&other);
    }
}

impl MulAssign<&FieldV> for Lc {
    fn mul_assign(&mut self, other: &FieldV) {
        self.constant *= other;
        if other.is_zero() {
            self.monomials.clear();
        } else {
            for v in &mut self.monomials.values_mut() {
                *v *= other;
            }
        }
    }
}

impl Mul<isize> for Lc {
    type Output = Lc;
    fn mul(mut self, other: isize) -> Lc {
        self *= other;
        self
    }
}

impl MulAssign<isize> for Lc {
    fn mul_assign(&mut self, other: isize) {
        self.mul_assign(self.field.new_v(other));
    }
}

/// The free variables of `ts`, with their sorts
fn free_vars<'a>(ts: impl IntoIterator<Item = &'a Term>) -> BTreeMap<String, Sort> {
    PostOrderIter::from_roots_and_skips(ts.into_iter().cloned(), TermSet::new())
        .filter_map(|t| match &t.op {
            Op::Var(n, s) => Some((n.clone(), s.clone())),
            _ => None,
        })
        .collect()
}

/// Substitutions that replace each output of `precompute` with its definition over inputs
fn precompute_subs(precompute: &precomp::PreComp) -> TermMap<Term> {
    let mut subs = TermMap::new();
    for (name, t) in precompute.bind() {
        subs.insert(var(name, check(&t)), t);
    }
    subs
}

impl R1cs {
    fn live(&self, ty: VarType, range: std::ops::Range<usize>) -> impl Iterator<Item = Var> + '_ {
        range
            .map(move |i| Var::new(ty, i))
            .filter(move |v| self.idx_to_sig.contains_key(v))
    }

    fn insts_iter(&self) -> impl Iterator<Item = Var> + '_ {
        self.live(VarType::Inst, 0..self.num_insts)
    }

    fn final_wits_iter(&self) -> impl Iterator<Item = Var> + '_ {
        self.live(VarType::FinalWit, 0..self.num_final_wits)
    }

    fn cwits_iter(&self) -> impl Iterator<Item = Var> + '_ {
        self.live(VarType::CWit, 0..self.next_cwit)
    }

    fn cwits(&self) -> Vec<Vec<Var>> {
        let mut i = 0;
        self.num_cwits
            .iter()
            .map(|len| {
                (0..*len)
                    .map(|_| {
                        i += 1;
                        Var::new(VarType::CWit, i - 1)
                    })
                    .collect()
            })
            .collect()
    }

    fn challs_iter(&self, round: usize) -> impl Iterator<Item = Var> + '_ {
        let start = if round == 0 {
            0
        } else {
            self.round_chall_ends[round - 1]
        };
        self.live(VarType::Chall, start..self.round_chall_ends[round])
    }

    fn round_wits_iter(&self, round: usize) -> impl Iterator<Item = Var> + '_ {
        let start = if round == 0 {
            0
        } else {
            self.round_wit_ends[round - 1]
        };
        self.live(VarType::RoundWit, start..self.round_wit_ends[round])
    }

    /// Returns a list of (signal list, challenge list) pairs.
    /// The prover computes the values of signals.
    /// The proof system computes the values of challenges.
    /// All signals are computed from (a) prover inputs and (b) challenge values.
    fn stage_vars(&self) -> Vec<(Vec<Var>, Vec<Var>)> {
        let mut out = Vec::new();
        out.push((
            self.insts_iter().chain(self.cwits_iter()).collect(),
            Vec::new(),
        ));
        for round_idx in 0..self.round_chall_ends.len() {
            out.push((
                self.round_wits_iter(round_idx).collect(),
                self.challs_iter(round_idx).collect(),
            ));
        }
        out.push((self.final_wits_iter().collect(), Vec::new()));
        out
    }

    fn name_of(&self, v: &Var) -> &String {
        self.idx_to_sig.get_fwd(v).expect("live variable")
    }

    /// Prover Data
    fn prover_data(self, cs: &Computation) -> ProverData {
        let mut subs = precompute_subs(&cs.precomputes);
        let stages: Vec<(Vec<Var>, Vec<Var>, Vec<Term>)> = self
            .stage_vars()
            .into_iter()
            .map(|(computed, challs)| {
                let terms = computed
                    .iter()
                    .map(|v| {
                        extras::substitute_cache(
                            self.terms.get(v).expect("variable term"),
                            &mut subs,
                        )
                    })
                    .collect();
                (computed, challs, terms)
            })
            .collect();
        let mut vars = free_vars(stages.iter().flat_map(|(_, _, ts)| ts.iter()));
        for c in &self.challenge_names {
            vars.remove(c);
        }
        let mut comp = wit_comp::StagedWitComp::default();
        let mut var_sequence = Vec::new();
        for (computed_in_stage, challs, terms) in stages {
            comp.add_stage(std::mem::take(&mut vars), terms);
            vars = challs
                .iter()
                .map(|cvar| (self.name_of(cvar).clone(), Sort::Field(self.field.clone())))
                .collect();
            var_sequence.extend(computed_in_stage);
            var_sequence.extend(challs);
        }

        ProverData {
            r1cs: R1csFinal {
                field: self.field.clone(),
                names: var_sequence
                    .iter()
                    .map(|v| (*v, self.name_of(v).clone()))
                    .collect(),
                vars: var_sequence,
                commitments: self.cwits(),
                constraints: self.constraints,
            },
            precompute: comp,
        }
    }

    /// Verifier Data
    fn verifier_data(&self, cs: &Computation) -> VerifierData {
        let mut precompute = cs.precomputes.clone();
        precompute.restrict_to_inputs(cs.metadata.public_input_names());
        let mut subs = precompute_subs(&precompute);
        let terms: Vec<Term> = self
            .insts_iter()
            .map(|v| {
                extras::substitute_cache(self.terms.get(&v).expect("variable term"), &mut subs)
            })
            .collect();
        let vars = free_vars(&terms);
        debug_assert!(self.challenge_names.iter().all(|c| !vars.contains_key(c)));
        let mut comp = wit_comp::StagedWitComp::default();
        comp.add_stage(vars, terms);
        VerifierData {
            precompute: comp,
            num_commitments: self.num_cwits.len(),
        }
    }

    /// Split this R1CS into prover (Proving, Setup) and verifier (Verifying) information.
    pub fn finalize(self, cs: &Computation) -> (ProverData, VerifierData) {
        let vd = self.verifier_data(cs);
        let pd = self.prover_data(cs);
        (pd, vd)
    }
}

impl VerifierData {
    /// Given verifier inputs, compute a vector of field values to feed to the proof system.
    pub fn eval(&self, value_map: &HashMap<String, Value>) -> Result<Vec<FieldV>> {
        let mut eval = wit_comp::StagedWitCompEvaluator::new(&self.precompute);
        eval.eval_stage(value_map.clone())?
            .into_iter()
            .map(|v| {
                v.as_pf_opt().cloned().ok_or_else(|| Error::BadInput {
                    name: "instance".into(),
                    reason: format!("computed the non-field value {}", v),
                })
            })
            .collect()
    }

    /// How many commitments?
    pub fn num_commitments(&self) -> usize {
        self.num_commitments
    }
}

/// Relation-related data that a prover needs to make a proof.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProverData {
    /// R1cs
    pub r1cs: R1csFinal,
    /// Witness computation
    pub precompute: wit_comp::StagedWitComp,
}

/// Relation-related data that a verifier needs to check a proof.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifierData {
    /// Instance computation
    pub precompute: wit_comp::StagedWitComp,
    /// How many commitments in this predicate?
    num_commitments: usize,
}

impl Display for VarType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Debug::fmt(self, f)
    }
}

#[derive(Clone, Debug)]
/// A linear combination with an attached prime-field term that computes its value
pub struct TermLc(pub Term, pub Lc);

impl TermLc {
    /// Is this the zero combination?
    pub fn is_zero(&self) -> bool {
        self.1.is_zero()
    }
    /// Is this a constant? If so, return that constant.
    pub fn as_const(&self) -> Option<&FieldV> {
        self.1.as_const()
    }
    /// Get the field type for this term & linear combination.
    pub fn field(&self) -> FieldT {
        self.1.field.clone()
    }
}

impl std::ops::Add<&TermLc> for TermLc {
    type Output = TermLc;
    fn add(mut self, other: &TermLc) -> TermLc {
        self += other;
        self
    }
}

impl std::ops::AddAssign<&TermLc> for TermLc {
    fn add_assign(&mut self, other: &TermLc) {
        self.1 += &other.1;
        self.0 = term![PF_ADD; self.0.clone(), other.0.clone()];
    }
}

impl std::ops::Add<&FieldV> for TermLc {
    type Output = TermLc;
    fn add(mut self, other: &FieldV) -> TermLc {
        self.0 = term![PF_ADD; self.0.clone(), pf_lit(other.clone())];
        self.1 += other;
        self
    }
}

impl std::ops::Add<isize> for TermLc {
    type Output = TermLc;
    fn add(mut self, other: isize) -> TermLc {
        self += other;
        self
    }
}

impl std::ops::AddAssign<isize> for TermLc {
    fn add_assign(&mut self, other: isize) {
        self.1 += other;
        self.0 = term![PF_ADD; self.0.clone(), pf_lit(self.field().new_v(other))];
    }
}

impl std::ops::Sub<&TermLc> for TermLc {
    type Output = TermLc;
    fn sub(mut self, other: &TermLc) -> TermLc {
        self -= other;
        self
    }
}

impl std::ops::SubAssign<&TermLc> for TermLc {
    fn sub_assign(&mut self, other: &TermLc) {
        self.1 -= &other.1;
        self.0 = term![PF_ADD; self.0.clone(), term![PF_NEG; other.0.clone()]];
    }
}

impl std::ops::Sub<isize> for TermLc {
    type Output = TermLc;
    fn sub(mut self, other: isize) -> TermLc {
        self -= other;
        self
    }
}

impl std::ops::SubAssign<isize> for TermLc {
    fn sub_assign(&mut self, other: isize) {
        self.1 -= other;
        self.0 = term![PF_ADD; self.0.clone(), term![PF_NEG; pf_lit(self.field().new_v(other))]];
    }
}

impl std::ops::Neg for TermLc {
    type Output = TermLc;
    fn neg(mut self) -> TermLc {
        self.1 = -self.1;
        self.0 = term![PF_NEG; self.0];
        self
    }
}

impl std::ops::Mul<&FieldV> for TermLc {
    type Output = TermLc;
    fn mul(mut self, other: &FieldV) -> TermLc {
        self *= other;
        self
    }
}

impl std::ops::MulAssign<&FieldV> for TermLc {
    fn mul_assign(&mut self, other: &FieldV) {
        self.1 *= other;
        self.0 = term![PF_MUL; self.0.clone(), pf_lit(other.clone())];
    }
}

impl std::ops::Mul<isize> for TermLc {
    type Output = TermLc;
    fn mul(mut self, other: isize) -> TermLc {
        self *= other;
        self
    }
}

impl std::ops::MulAssign<isize> for TermLc {
    fn mul_assign(&mut self, other: isize) {
        self.1 *= other;
        self.0 = term![PF_MUL; self.0.clone(), pf_lit(self.field().new_v(other))];
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn field() -> FieldT {
        FieldT::from(Integer::from(101))
    }

    #[test]
    fn var_roles() {
        for ty in [
            VarType::Inst,
            VarType::CWit,
            VarType::RoundWit,
            VarType::Chall,
            VarType::FinalWit,
        ] {
            let v = Var::new(ty, 17);
            assert_eq!(v.ty(), ty);
            assert_eq!(v.number(), 17);
        }
        assert!(Var::new(VarType::Inst, 5) < Var::new(VarType::FinalWit, 0));
        assert!(Var::try_from(usize::MAX).is_err());
        assert_eq!(format!("{:?}", Var::new(VarType::Chall, 2)), "Chall(2)");
    }

    #[test]
    fn lc_arith() {
        let mut r1cs = R1cs::new(field());
        let one = pf_lit(field().new_v(1));
        r1cs.add_var("x".into(), one.clone(), VarType::Inst);
        r1cs.add_var("y".into(), one, VarType::FinalWit);
        let x = r1cs.signal_lc("x");
        let y = r1cs.signal_lc("y");
        let a = x.clone() * 3 + &y + 4;
        let b = a.clone() - &(x.clone() * 3);
        assert_eq!(b, y.clone() + 4);
        assert!((a.clone() - &a).is_zero());
        assert_eq!((x.clone() - &x).monomials().len(), 0);
        assert_eq!((-(y.clone()) + &y).as_const(), Some(&field().zero()));
        assert_eq!(r1cs.format_lc(&(x * -1 + 2)), "+2 -1 x");
        let mut c = y + 5;
        let taken = c.take();
        assert!(c.is_zero());
        assert_eq!(taken.constant(), &field().new_v(5));
    }

    #[test]
    fn monomials_encode_in_order() {
        let mut r1cs = R1cs::new(field());
        let one = pf_lit(field().new_v(1));
        for n in ["a", "b", "c", "d"] {
            r1cs.add_var(n.into(), one.clone(), VarType::FinalWit);
        }
        let fwd = r1cs.signal_lc("a") + &r1cs.signal_lc("b") + &r1cs.signal_lc("c");
        let rev = r1cs.signal_lc("c") + &r1cs.signal_lc("b") + &r1cs.signal_lc("a");
        assert_eq!(fwd, rev);
        assert_eq!(
            bincode::serialize(&fwd).unwrap(),
            bincode::serialize(&rev).unwrap()
        );
    }

    #[test]
    fn unsatisfied_is_reported() {
        let mut r1cs = R1cs::new(field());
        let one = pf_lit(field().new_v(1));
        let x = r1cs.add_var("x".into(), one.clone(), VarType::FinalWit);
        let y = r1cs.add_var("y".into(), one, VarType::FinalWit);
        r1cs.constraint(r1cs.signal_lc("x"), r1cs.signal_lc("x"), r1cs.signal_lc("y"));
        let mut values = HashMap::default();
        values.insert(x, field().new_v(3));
        values.insert(y, field().new_v(9));
        assert!(r1cs.check_all(&values).is_ok());
        values.insert(y, field().new_v(8));
        assert!(matches!(r1cs.check_all(&values), Err(Error::Unsatisfied(_))));
        values.remove(&y);
        assert!(matches!(
            r1cs.check_all(&values),
            Err(Error::MissingWitnessValue { name }) if name == "y"
        ));
    }
}
