//! Array elimination
//!
//! Every array becomes a sequence of element terms: array variable `a` of size `n` becomes
//! `a.0 .. a.{n-1}`. Each access site chooses an [ArrayStrategy] from its index.

mod visit;
pub mod lin;
pub mod obliv;

use self::visit::MemVisitor;
use crate::error::{Error, Result};
use crate::ir::term::*;

use log::{debug, trace};
use std::iter::repeat;

pub(super) const CONTEXT: &str = "array elimination";

/// How a single `select` or `store` is compiled
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ArrayStrategy {
    /// The index is a compile-time constant: pick (or replace) the element directly
    Oblivious,
    /// The index is dynamic: compare it against every position
    LinearScan,
}

impl ArrayStrategy {
    /// The strategy for an access at index `k`
    pub fn for_index(k: &Term) -> Self {
        if k.is_const() {
            ArrayStrategy::Oblivious
        } else {
            ArrayStrategy::LinearScan
        }
    }
}

/// How many access sites used each strategy
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ArrayStats {
    /// accesses with constant indices
    pub oblivious: usize,
    /// accesses with dynamic indices
    pub linear_scan: usize,
}

/// The element sequence for array `name`'s scalar components
pub fn element_names(name: &str, size: usize) -> impl Iterator<Item = String> + '_ {
    (0..size).map(move |i| format!("{}.{}", name, i))
}

fn scalar_values(key_sort: &Sort, val_sort: &Sort, size: usize) -> Result<()> {
    lin::check_keys(key_sort, size)?;
    if val_sort.is_scalar() {
        Ok(())
    } else {
        Err(Error::unsupported(
            format!("array with element sort {}", val_sort),
            CONTEXT,
        ))
    }
}

#[derive(Default)]
struct ArrayEliminator {
    /// A map from (original) array terms, to their element sequences.
    sequences: TermMap<Vec<Term>>,
    stats: ArrayStats,
}

impl ArrayEliminator {
    fn seq(&self, orig: &Term, i: usize) -> Result<&Vec<Term>> {
        self.sequences
            .get(&orig.cs[i])
            .ok_or_else(|| Error::unsupported(&orig.cs[i].op, CONTEXT))
    }

    fn strategy(&mut self, k: &Term) -> ArrayStrategy {
        let s = ArrayStrategy::for_index(k);
        match s {
            ArrayStrategy::Oblivious => self.stats.oblivious += 1,
            ArrayStrategy::LinearScan => self.stats.linear_scan += 1,
        }
        trace!("Access at {} is {:?}", k, s);
        s
    }
}

impl MemVisitor for ArrayEliminator {
    fn visit_const_array(
        &mut self,
        orig: &Term,
        key_sort: &Sort,
        val: &Term,
        size: usize,
    ) -> Result<()> {
        scalar_values(key_sort, &check_raw(val)?, size)?;
        self.sequences
            .insert(orig.clone(), repeat(val).cloned().take(size).collect());
        Ok(())
    }
    fn visit_array_lit(&mut self, orig: &Term, a: &Array) -> Result<()> {
        scalar_values(&a.key_sort, &a.value_sort(), a.size)?;
        self.sequences.insert(
            orig.clone(),
            a.elements().into_iter().map(const_).collect(),
        );
        Ok(())
    }
    fn visit_eq(&mut self, orig: &Term, _a: &Term, _b: &Term) -> Result<Option<Term>> {
        let a_seq = self.seq(orig, 0)?;
        let b_seq = self.seq(orig, 1)?;
        let mut eqs: Vec<Term> = a_seq
            .iter()
            .zip(b_seq.iter())
            .map(|(a, b)| term![Op::Eq; a.clone(), b.clone()])
            .collect();
        Ok(Some(match eqs.len() {
            0 => bool_lit(true),
            1 => eqs.pop().unwrap(),
            _ => term(AND, eqs),
        }))
    }
    fn visit_ite(&mut self, orig: &Term, c: &Term, _t: &Term, _f: &Term) -> Result<()> {
        let ites: Vec<Term> = self
            .seq(orig, 1)?
            .iter()
            .zip(self.seq(orig, 2)?.iter())
            .map(|(a, b)| term![Op::Ite; c.clone(), a.clone(), b.clone()])
            .collect();
        self.sequences.insert(orig.clone(), ites);
        Ok(())
    }
    fn visit_store(&mut self, orig: &Term, _a: &Term, k: &Term, v: &Term) -> Result<()> {
        let key_sort = check_raw(k)?;
        let new = match self.strategy(k) {
            ArrayStrategy::Oblivious => obliv::store(self.seq(orig, 0)?, k, v)?,
            ArrayStrategy::LinearScan => lin::store(self.seq(orig, 0)?, &key_sort, k, v),
        };
        self.sequences.insert(orig.clone(), new);
        Ok(())
    }
    fn visit_select(&mut self, orig: &Term, _a: &Term, k: &Term) -> Result<Option<Term>> {
        let key_sort = check_raw(k)?;
        Ok(Some(match self.strategy(k) {
            ArrayStrategy::Oblivious => obliv::select(self.seq(orig, 0)?, k)?,
            ArrayStrategy::LinearScan => {
                lin::select(self.seq(orig, 0)?, &key_sort, &check_raw(orig)?, k)
            }
        }))
    }
    fn visit_var(&mut self, orig: &Term, name: &str, s: &Sort) -> Result<()> {
        let (k, v, size) = s.as_array();
        scalar_values(k, v, size)?;
        self.sequences.insert(
            orig.clone(),
            element_names(name, size)
                .map(|n| leaf_term(Op::Var(n, v.clone())))
                .collect(),
        );
        Ok(())
    }
}

/// Run the array elimination pass.
///
/// Array inputs and array precomputation outputs are replaced by their elements, at the same
/// position.
pub fn eliminate_arrays(cs: &mut Computation) -> Result<ArrayStats> {
    let mut pass = ArrayEliminator::default();
    let mut cache = TermMap::new();
    let outputs = std::mem::take(&mut cs.outputs);
    for o in &outputs {
        let new = pass.traverse(o, &mut cache)?;
        cs.outputs.push(new);
    }

    let mut array_precomps = Vec::new();
    let seq: Vec<String> = cs.precomputes.sequence().to_vec();
    for name in &seq {
        if let Some(t) = cs.precomputes.outputs().get(name).cloned() {
            pass.traverse(&t, &mut cache)?;
            if let Sort::Array(..) = check_raw(&t)? {
                let elems = pass
                    .sequences
                    .get(&t)
                    .ok_or_else(|| Error::unsupported(&t.op, CONTEXT))?;
                array_precomps.push((
                    name.clone(),
                    element_names(name, elems.len()).zip(elems.iter().cloned()).collect(),
                ));
            }
        }
    }
    cs.precomputes
        .try_map_terms(|_, t| Ok(cache.get(t).expect("traversed precompute").clone()))?;
    for (name, parts) in array_precomps {
        cs.precomputes.replace_output(&name, parts);
    }

    let array_inputs: Vec<(String, Sort)> = cs
        .metadata
        .inputs()
        .iter()
        .filter(|i| matches!(i.sort, Sort::Array(..)))
        .map(|i| (i.name.clone(), i.sort.clone()))
        .collect();
    for (name, sort) in array_inputs {
        let (k, v, size) = sort.as_array();
        scalar_values(k, v, size)?;
        debug!("Scalarizing input {}", name);
        cs.metadata.replace_input(
            &name,
            element_names(&name, size).map(|n| (n, v.clone())).collect(),
        );
    }

    let roots = cs
        .outputs
        .iter()
        .chain(cs.precomputes.outputs().values())
        .cloned();
    for t in PostOrderIter::from_roots_and_skips(roots, TermSet::new()) {
        if let Sort::Array(..) = check_raw(&t)? {
            return Err(Error::unsupported(&t.op, CONTEXT));
        }
    }
    debug!(
        "Array accesses: {} oblivious, {} linear scan",
        pass.stats.oblivious, pass.stats.linear_scan
    );
    Ok(pass.stats)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ir::opt::flatten_value_map;
    use crate::ir::term::text::{parse_computation, parse_value_map};

    fn array_free(cs: &Computation) -> bool {
        cs.terms_postorder()
            .all(|t| !matches!(check(&t), Sort::Array(..)))
    }

    #[test]
    fn strategies_per_site() {
        let mut cs = parse_computation(
            b"
            (computation
                (metadata (inputs (a (array (bv 2) (bv 4) 4) public) (i (bv 2)) (v (bv 4))))
                (= (select (store a #b01 v) i) (select a #b11)))
            ",
        )
        .unwrap();
        let stats = eliminate_arrays(&mut cs).unwrap();
        assert_eq!(
            stats,
            ArrayStats {
                oblivious: 2,
                linear_scan: 1
            }
        );
        assert!(array_free(&cs));
        let names: Vec<&str> = cs.metadata.inputs().iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["a.0", "a.1", "a.2", "a.3", "i", "v"]);
        assert!(cs.metadata.is_public("a.2"));
    }

    #[test]
    fn semantics_preserved() {
        let src = b"
            (computation
                (metadata (inputs (i (bv 2)) (j (bv 2)) (v (bv 4))))
                (=
                    (select (store ((const-array (bv 2) 4) #x0) i v) j)
                    (ite (= i j) v #x0)))
            ";
        let orig = parse_computation(src).unwrap();
        let mut cs = orig.clone();
        eliminate_arrays(&mut cs).unwrap();
        assert!(array_free(&cs));
        for (i, j) in [(0, 0), (1, 2), (3, 3), (2, 1)] {
            let env = parse_value_map(
                format!(
                    "(let ((i #b{:02b}) (j #b{:02b}) (v #x9)) true)",
                    i, j
                )
                .as_bytes(),
            )
            .unwrap();
            assert_eq!(orig.eval_all(&env).unwrap(), cs.eval_all(&env).unwrap());
            assert_eq!(cs.eval_all(&env).unwrap(), vec![Value::Bool(true)]);
        }
    }

    #[test]
    fn dynamic_index_past_the_end() {
        let src = b"
            (computation
                (metadata (inputs (a (array (bv 4) (bv 4) 4)) (i (bv 4)) (v (bv 4))))
                (and
                    (= (select a i) #x0)
                    (= (select (store a i v) #x2) #x3)
                    (= (store a i v) a)))
            ";
        let orig = parse_computation(src).unwrap();
        let mut cs = orig.clone();
        eliminate_arrays(&mut cs).unwrap();
        for (i, expected) in [("#x7", true), ("#xf", true), ("#x2", false), ("#x0", false)] {
            let env = parse_value_map(
                format!(
                    "(let ((a (#l (bv 4) (#x1 #x2 #x3 #x4))) (i {}) (v #x9)) true)",
                    i
                )
                .as_bytes(),
            )
            .unwrap();
            let before = orig.eval_all(&env).unwrap();
            assert_eq!(before, vec![Value::Bool(expected)]);
            assert_eq!(before, cs.eval_all(&flatten_value_map(&env)).unwrap());
        }
    }

    #[test]
    fn array_equality() {
        let mut cs = parse_computation(
            b"
            (computation
                (metadata (inputs (a (array bool (bv 4) 2)) (b (array bool (bv 4) 2))))
                (= a b))
            ",
        )
        .unwrap();
        eliminate_arrays(&mut cs).unwrap();
        let a0 = var("a.0".to_owned(), Sort::BitVector(4));
        let a1 = var("a.1".to_owned(), Sort::BitVector(4));
        let b0 = var("b.0".to_owned(), Sort::BitVector(4));
        let b1 = var("b.1".to_owned(), Sort::BitVector(4));
        assert_eq!(
            cs.outputs[0],
            term![AND; term![Op::Eq; a0, b0], term![Op::Eq; a1, b1]]
        );
    }

    #[test]
    fn constant_index_out_of_bounds() {
        let mut cs = parse_computation(
            b"
            (computation
                (metadata (inputs (a (array (bv 4) bool 4))))
                (select a #x7))
            ",
        )
        .unwrap();
        assert!(matches!(
            eliminate_arrays(&mut cs),
            Err(Error::UnsupportedOp { .. })
        ));
    }

    #[test]
    fn nested_arrays_are_unsupported() {
        let mut cs = parse_computation(
            b"
            (computation
                (metadata (inputs (a (array bool (array bool bool 2) 2)) (i bool)))
                (select (select a i) i))
            ",
        )
        .unwrap();
        assert!(matches!(
            eliminate_arrays(&mut cs),
            Err(Error::UnsupportedOp { .. })
        ));
    }
}
