//! # Tuple elimination pass
//!
//! Elimates tuple-related terms.
//!
//! The idea is to do a bottom-up pass mapping all terms to tuple-free trees of terms.
//!
//!    * Tuple variables are suffixed. `x: (bool, bool)` becomes `x.0: bool, x.1: bool`.
//!    * Tuple constants are replaced with trees
//!    * Tuple constructors make trees
//!    * Tuple accesses open up trees
//!    * Tuple ITEs yield trees of ITEs
//!    * Tuple EQs yield conjunctions of EQs
//!
//! Arrays whose values (or keys) contain tuples are not supported.

use crate::error::{Error, Result};
use crate::ir::opt::visit::RewritePass;
use crate::ir::term::{
    bool_lit, check, leaf_term, term, Computation, Op, PostOrderIter, Sort, Term, TermSet, Value,
    AND,
};

use itertools::zip_eq;
use log::{debug, trace};

const CONTEXT: &str = "tuple elimination";

#[derive(Clone, PartialEq, Eq, Debug)]
struct TupleTree(Term);

impl TupleTree {
    fn flatten(&self) -> impl Iterator<Item = Term> {
        let mut out = Vec::new();
        fn rec_unroll_into(t: &Term, out: &mut Vec<Term>) {
            if t.op == Op::Tuple {
                for c in &t.cs {
                    rec_unroll_into(c, out);
                }
            } else {
                out.push(t.clone());
            }
        }
        rec_unroll_into(&self.0, &mut out);
        out.into_iter()
    }
    fn structure(&self, flattened: impl IntoIterator<Item = Term>) -> Self {
        fn term_structure(t: &Term, iter: &mut impl Iterator<Item = Term>) -> Term {
            if t.op == Op::Tuple {
                term(
                    Op::Tuple,
                    t.cs.iter().map(|c| term_structure(c, iter)).collect(),
                )
            } else {
                iter.next().expect("bad structure")
            }
        }
        Self(term_structure(&self.0, &mut flattened.into_iter()))
    }
    fn bimap(&self, mut f: impl FnMut(Term, Term) -> Term, other: &Self) -> Self {
        self.structure(zip_eq(self.flatten(), other.flatten()).map(|(a, b)| f(a, b)))
    }
    fn get(&self, i: usize) -> Result<Self> {
        if self.0.op != Op::Tuple || i >= self.0.cs.len() {
            return Err(Error::unsupported(Op::Field(i), CONTEXT));
        }
        Ok(Self(self.0.cs[i].clone()))
    }
    fn update(&self, i: usize, v: &Term) -> Result<Self> {
        if self.0.op != Op::Tuple || i >= self.0.cs.len() {
            return Err(Error::unsupported(Op::Update(i), CONTEXT));
        }
        let mut cs = self.0.cs.clone();
        cs[i] = v.clone();
        Ok(Self(term(Op::Tuple, cs)))
    }
}

fn termify_val_tuples(v: Value) -> Term {
    if let Value::Tuple(vs) = v {
        term(
            Op::Tuple,
            Vec::from(vs).into_iter().map(termify_val_tuples).collect(),
        )
    } else {
        leaf_term(Op::Const(v))
    }
}

/// The scalar components of a tuple-sorted `name`, named `name.i` (recursively), in order.
pub fn tuple_leaves(name: &str, sort: &Sort) -> Vec<(String, Sort)> {
    match sort {
        Sort::Tuple(sorts) => sorts
            .iter()
            .enumerate()
            .flat_map(|(i, s)| tuple_leaves(&format!("{}.{}", name, i), s))
            .collect(),
        _ => vec![(name.to_owned(), sort.clone())],
    }
}

/// A tree of fresh variables for the tuple-sorted `name`
fn var_tree(name: &str, sort: &Sort) -> Term {
    match sort {
        Sort::Tuple(sorts) => term(
            Op::Tuple,
            sorts
                .iter()
                .enumerate()
                .map(|(i, s)| var_tree(&format!("{}.{}", name, i), s))
                .collect(),
        ),
        _ => leaf_term(Op::Var(name.to_owned(), sort.clone())),
    }
}

fn array_of_tuples(s: &Sort) -> bool {
    match s {
        Sort::Array(k, v, _) => k.contains_tuple() || v.contains_tuple(),
        Sort::Tuple(ss) => ss.iter().any(array_of_tuples),
        _ => false,
    }
}

struct TupleLifter;

impl RewritePass for TupleLifter {
    fn visit<F: Fn() -> Vec<Term>>(
        &mut self,
        orig: &Term,
        rewritten_children: F,
    ) -> Result<Option<Term>> {
        Ok(match &orig.op {
            Op::Var(name, sort @ Sort::Tuple(_)) => {
                trace!("Splitting tuple variable {}", name);
                Some(var_tree(name, sort))
            }
            Op::Const(v @ Value::Tuple(_)) => Some(termify_val_tuples(v.clone())),
            Op::Ite => {
                let mut cs = rewritten_children();
                let f = TupleTree(cs.pop().unwrap());
                let t = TupleTree(cs.pop().unwrap());
                let c = cs.pop().unwrap();
                debug_assert!(cs.is_empty());
                Some(t.bimap(|a, b| term![Op::Ite; c.clone(), a, b], &f).0)
            }
            Op::Eq => {
                let mut cs = rewritten_children();
                let b = TupleTree(cs.pop().unwrap());
                let a = TupleTree(cs.pop().unwrap());
                debug_assert!(cs.is_empty());
                let mut eqs: Vec<Term> = zip_eq(a.flatten(), b.flatten())
                    .map(|(a, b)| term![Op::Eq; a, b])
                    .collect();
                Some(match eqs.len() {
                    0 => bool_lit(true),
                    1 => eqs.pop().unwrap(),
                    _ => term(AND, eqs),
                })
            }
            Op::Field(i) => {
                let mut cs = rewritten_children();
                let t = TupleTree(cs.pop().unwrap());
                debug_assert!(cs.is_empty());
                Some(t.get(*i)?.0)
            }
            Op::Update(i) => {
                let mut cs = rewritten_children();
                let v = cs.pop().unwrap();
                let t = TupleTree(cs.pop().unwrap());
                debug_assert!(cs.is_empty());
                Some(t.update(*i, &v)?.0)
            }
            // The default rewrite is correct here.
            Op::Tuple => None,
            _ => None,
        })
    }
}

fn tuple_free(t: &Term) -> bool {
    !PostOrderIter::new(t.clone()).any(|c| check(&c).contains_tuple())
}

/// Run the tuple elimination pass.
///
/// Tuple inputs and tuple precomputation outputs are replaced by their scalar leaves, at the
/// same position.
pub fn eliminate_tuples(cs: &mut Computation) -> Result<()> {
    for i in cs.metadata.inputs() {
        if array_of_tuples(&i.sort) {
            return Err(Error::unsupported(
                format!("input {} of sort {}", i.name, i.sort),
                CONTEXT,
            ));
        }
    }
    let roots = cs
        .outputs
        .iter()
        .chain(cs.precomputes.outputs().values())
        .cloned();
    for t in PostOrderIter::from_roots_and_skips(roots, TermSet::new()) {
        if array_of_tuples(&check(&t)) {
            return Err(Error::unsupported(&t.op, CONTEXT));
        }
    }

    let mut pass = TupleLifter;
    pass.traverse(cs)?;

    let tuple_inputs: Vec<(String, Sort)> = cs
        .metadata
        .inputs()
        .iter()
        .filter(|i| matches!(i.sort, Sort::Tuple(_)))
        .map(|i| (i.name.clone(), i.sort.clone()))
        .collect();
    for (name, sort) in tuple_inputs {
        debug!("Scalarizing input {}", name);
        cs.metadata.replace_input(&name, tuple_leaves(&name, &sort));
    }
    let tuple_precomps: Vec<(String, Term)> = cs
        .precomputes
        .sequence()
        .iter()
        .filter_map(|n| {
            let t = cs.precomputes.outputs().get(n)?;
            (t.op == Op::Tuple).then(|| (n.clone(), t.clone()))
        })
        .collect();
    for (name, t) in tuple_precomps {
        let sort = check(&t);
        let parts = tuple_leaves(&name, &sort)
            .into_iter()
            .map(|(n, _)| n)
            .zip(TupleTree(t).flatten())
            .collect();
        cs.precomputes.replace_output(&name, parts);
    }

    for o in cs
        .outputs
        .iter()
        .chain(cs.precomputes.outputs().values())
    {
        if !tuple_free(o) {
            return Err(Error::unsupported(&o.op, CONTEXT));
        }
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ir::term::text::parse_computation;
    use crate::ir::term::{var, BitVector, InputVis};
    use fxhash::FxHashMap;

    fn bv(name: &str, w: usize) -> Term {
        var(name.to_owned(), Sort::BitVector(w))
    }

    #[test]
    fn variables_are_split() {
        let mut cs = parse_computation(
            b"
            (computation
                (metadata (inputs (x (tuple (bv 4) (tuple bool (bv 4))) public) (y (bv 4))))
                (= ((field 0) x) ((field 1) ((field 1) x))))
            ",
        )
        .unwrap();
        eliminate_tuples(&mut cs).unwrap();
        let names: Vec<(&str, InputVis)> = cs
            .metadata
            .inputs()
            .iter()
            .map(|i| (i.name.as_str(), i.vis))
            .collect();
        assert_eq!(
            names,
            vec![
                ("x.0", InputVis::Public),
                ("x.1.0", InputVis::Public),
                ("x.1.1", InputVis::Public),
                ("y", InputVis::Private)
            ]
        );
        assert_eq!(cs.outputs[0], term![Op::Eq; bv("x.0", 4), bv("x.1.1", 4)]);
    }

    #[test]
    fn eq_ite_update() {
        let mut cs = parse_computation(
            b"
            (computation
                (metadata (inputs (c bool) (a (bv 4)) (b (bv 4))))
                (= (ite c (tuple a b) ((update 1) (tuple a b) a)) (tuple a a)))
            ",
        )
        .unwrap();
        eliminate_tuples(&mut cs).unwrap();
        let c = var("c".to_owned(), Sort::Bool);
        assert_eq!(
            cs.outputs[0],
            term![AND;
                term![Op::Eq; term![Op::Ite; c.clone(), bv("a", 4), bv("a", 4)], bv("a", 4)],
                term![Op::Eq; term![Op::Ite; c, bv("b", 4), bv("a", 4)], bv("a", 4)]
            ]
        );
    }

    #[test]
    fn precompute_outputs_are_split() {
        let mut cs = parse_computation(
            b"
            (computation
                (metadata (inputs (a (bv 4)) (p (tuple (bv 4) bool) public)))
                (precompute ((a (bv 4))) ((p (tuple (bv 4) bool))) (tuple (tuple a true)))
                (= ((field 0) p) a))
            ",
        )
        .unwrap();
        eliminate_tuples(&mut cs).unwrap();
        assert_eq!(cs.precomputes.sequence(), &["p.0".to_owned(), "p.1".to_owned()]);
        let mut env = FxHashMap::default();
        env.insert("a".to_owned(), Value::BitVector(BitVector::new(7.into(), 4)));
        let env = cs.precomputes.eval(&env).unwrap();
        assert_eq!(env.get("p.1"), Some(&Value::Bool(true)));
        assert_eq!(cs.eval_all(&env).unwrap(), vec![Value::Bool(true)]);
    }

    #[test]
    fn array_of_tuples_is_unsupported() {
        let mut cs = parse_computation(
            b"
            (computation
                (metadata (inputs (a (array (bv 2) (tuple bool bool) 4)) (i (bv 2))))
                ((field 0) (select a i)))
            ",
        )
        .unwrap();
        assert!(matches!(
            eliminate_tuples(&mut cs),
            Err(Error::UnsupportedOp { .. })
        ));
    }
}
