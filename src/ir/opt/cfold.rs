//! Constant folding

use crate::error::Result;
use crate::ir::term::*;

use circ_fields::FieldV;
use fxhash::FxHashMap;
use log::debug;

/// Create a constant boolean
fn cbool(b: bool) -> Option<Term> {
    Some(leaf_term(Op::Const(Value::Bool(b))))
}

/// Fold away operators over constants.
pub fn fold(node: &Term) -> Term {
    let mut cache = TermMap::new();
    fold_cache(node, &mut cache)
}

/// Fold every assertion and precomputation output of `cs`, repeating until a round changes
/// nothing. Assertions that fold to `true` are dropped.
pub fn fold_computation(cs: &mut Computation) -> Result<()> {
    let mut rounds = 0;
    loop {
        rounds += 1;
        let mut cache = TermMap::new();
        let outputs: Vec<Term> = cs
            .outputs
            .iter()
            .map(|o| fold_cache(o, &mut cache))
            .filter(|o| o.as_bool_opt() != Some(true))
            .collect();
        let mut changed = outputs != cs.outputs;
        cs.outputs = outputs;
        cs.precomputes.try_map_terms(|_, t| {
            let new_t = fold_cache(t, &mut cache);
            changed |= &new_t != t;
            Ok(new_t)
        })?;
        if !changed {
            break;
        }
    }
    debug!("Constant folding reached a fixed point after {} rounds", rounds);
    Ok(())
}

/// Do constant-folding backed by a cache.
pub fn fold_cache(node: &Term, cache: &mut TermMap<Term>) -> Term {
    // (node, children pushed)
    let mut stack = vec![(node.clone(), false)];

    // Maps terms to their rewritten versions.
    while let Some((t, children_pushed)) = stack.pop() {
        if cache.contains_key(&t) {
            continue;
        }
        if !children_pushed {
            stack.push((t.clone(), true));
            stack.extend(t.cs.iter().map(|c| (c.clone(), false)));
            continue;
        }
        let c_get = |x: &Term| -> Term { cache.get(x).expect("postorder cache").clone() };
        let get = |i: usize| c_get(&t.cs[i]);
        let new_t_opt = if !t.op.is_leaf() && t.cs.iter().all(|c| c_get(c).is_const()) {
            fold_all_const(&t.op, &t.cs.iter().map(c_get).collect::<Vec<_>>())
        } else {
            match &t.op {
                &IMPLIES => match get(0).as_bool_opt() {
                    Some(true) => Some(get(1)),
                    Some(false) => cbool(true),
                    None => match get(1).as_bool_opt() {
                        Some(true) => cbool(true),
                        Some(false) => Some(neg_bool(get(0))),
                        None => None,
                    },
                },
                Op::BoolNaryOp(o) => Some(o.flatten(t.cs.iter().map(c_get))),
                Op::BvBinOp(o) => {
                    let c0 = get(0);
                    let c1 = get(1);
                    use BvBinOp::*;
                    match (o, c1.as_bv_opt()) {
                        (Sub, Some(b)) if b.uint() == &0 => Some(c0),
                        (Udiv, Some(b)) if b.uint() == &1 => Some(c0),
                        (Shl | Lshr | Ashr, Some(b)) => Some(const_shift(*o, c0, b)),
                        _ => None,
                    }
                }
                Op::BvNaryOp(o) => Some(o.flatten(t.cs.iter().map(c_get))),
                Op::Ite => {
                    let c = get(0);
                    let t = get(1);
                    let f = get(2);
                    match c.as_bool_opt() {
                        Some(true) => Some(t),
                        Some(false) => Some(f),
                        None if t == f => Some(t),
                        None => match t.as_bool_opt() {
                            Some(true) => Some(fold_cache(&term![OR; c, f], cache)),
                            Some(false) => {
                                Some(fold_cache(&term![AND; neg_bool(c), f], cache))
                            }
                            _ => match f.as_bool_opt() {
                                Some(true) => Some(fold_cache(&term![OR; neg_bool(c), t], cache)),
                                Some(false) => Some(fold_cache(&term![AND; c, t], cache)),
                                _ => None,
                            },
                        },
                    }
                }
                Op::PfNaryOp(o) => Some(o.flatten(t.cs.iter().map(c_get))),
                Op::Field(i) => {
                    let c0 = get(0);
                    match &c0.op {
                        Op::Tuple => Some(c0.cs[*i].clone()),
                        _ => None,
                    }
                }
                _ => None,
            }
        };
        let c_get = |x: &Term| -> Term { cache.get(x).expect("postorder cache").clone() };
        let new_t =
            new_t_opt.unwrap_or_else(|| term(t.op.clone(), t.cs.iter().map(c_get).collect()));
        cache.insert(t, new_t);
    }
    cache.get(node).expect("postorder cache").clone()
}

/// Evaluate `op` over constant children.
fn fold_all_const(op: &Op, cs: &[Term]) -> Option<Term> {
    let args: Vec<&Value> = cs.iter().filter_map(|c| c.as_value_opt()).collect();
    eval_op(op, &args, &FxHashMap::default())
        .ok()
        .map(|v| leaf_term(Op::Const(v)))
}

/// Rewrite a shift by the constant `amt` into extraction and extension.
fn const_shift(o: BvBinOp, a: Term, amt: &BitVector) -> Term {
    let w = amt.width();
    let n = amt.uint().to_usize().map(|n| n.min(w)).unwrap_or(w);
    if n == 0 {
        return a;
    }
    match o {
        BvBinOp::Shl if n == w => bv_lit(0, w),
        BvBinOp::Lshr if n == w => bv_lit(0, w),
        BvBinOp::Ashr if n == w => {
            term![Op::BvSext(w - 1); term![Op::BvExtract(w - 1, w - 1); a]]
        }
        BvBinOp::Shl => term![BV_CONCAT;
            term![Op::BvExtract(w - n - 1, 0); a],
            bv_lit(0, n)
        ],
        BvBinOp::Ashr => term![Op::BvSext(n); term![Op::BvExtract(w - 1, n); a]],
        BvBinOp::Lshr => term![Op::BvUext(n); term![Op::BvExtract(w - 1, n); a]],
        _ => unreachable!("not a shift: {}", o),
    }
}

fn neg_bool(t: Term) -> Term {
    match &t.op {
        &NOT => t.cs[0].clone(),
        _ => term![NOT; t],
    }
}

trait NaryFlat<T: Clone>: Sized {
    fn as_const(t: Term) -> std::result::Result<T, Term>;
    fn combine(self, children: Vec<Term>, consts: Vec<T>) -> Term;
    fn flatten<I: IntoIterator<Item = Term>>(self, children: I) -> Term {
        let mut real_children = Vec::new();
        let mut consts = Vec::new();
        for c in children {
            match Self::as_const(c) {
                Ok(t) => consts.push(t),
                Err(t) => real_children.push(t),
            }
        }
        self.combine(real_children, consts)
    }
}

impl NaryFlat<bool> for BoolNaryOp {
    fn as_const(t: Term) -> std::result::Result<bool, Term> {
        match t.op {
            Op::Const(Value::Bool(b)) => Ok(b),
            _ => Err(t),
        }
    }
    fn combine(self, children: Vec<Term>, consts: Vec<bool>) -> Term {
        match self {
            BoolNaryOp::Or => {
                if consts.iter().any(|b| *b) {
                    bool_lit(true)
                } else if children.is_empty() {
                    bool_lit(false)
                } else {
                    safe_nary(OR, children)
                }
            }
            BoolNaryOp::And => {
                if consts.iter().any(|b| !*b) {
                    bool_lit(false)
                } else if children.is_empty() {
                    bool_lit(true)
                } else {
                    safe_nary(AND, children)
                }
            }
            BoolNaryOp::Xor => {
                let odd_trues = consts.into_iter().filter(|b| *b).count() % 2 == 1;
                if children.is_empty() {
                    bool_lit(odd_trues)
                } else {
                    let t = safe_nary(XOR, children);
                    if odd_trues {
                        neg_bool(t)
                    } else {
                        t
                    }
                }
            }
        }
    }
}

impl NaryFlat<BitVector> for BvNaryOp {
    fn as_const(t: Term) -> std::result::Result<BitVector, Term> {
        match &t.op {
            Op::Const(Value::BitVector(b)) => Ok(b.clone()),
            _ => Err(t),
        }
    }
    fn combine(self, mut children: Vec<Term>, mut consts: Vec<BitVector>) -> Term {
        let c = match consts.pop() {
            Some(c) => c,
            None => return safe_nary(Op::BvNaryOp(self), children),
        };
        match self {
            BvNaryOp::Or => {
                let c = consts.into_iter().fold(c, std::ops::BitOr::bitor);
                if children.is_empty() {
                    leaf_term(Op::Const(Value::BitVector(c)))
                } else if c.uint() == &0 {
                    safe_nary(BV_OR, children)
                } else {
                    bitwise(&c, |i, bit| {
                        if bit {
                            bool_lit(true)
                        } else {
                            safe_nary(OR, bits_of(&children, i))
                        }
                    })
                }
            }
            BvNaryOp::And => {
                let c = consts.into_iter().fold(c, std::ops::BitAnd::bitand);
                if children.is_empty() {
                    leaf_term(Op::Const(Value::BitVector(c)))
                } else if c == BitVector::ones(c.width()) {
                    safe_nary(BV_AND, children)
                } else {
                    bitwise(&c, |i, bit| {
                        if bit {
                            safe_nary(AND, bits_of(&children, i))
                        } else {
                            bool_lit(false)
                        }
                    })
                }
            }
            BvNaryOp::Xor => {
                let c = consts.into_iter().fold(c, std::ops::BitXor::bitxor);
                if children.is_empty() {
                    leaf_term(Op::Const(Value::BitVector(c)))
                } else if c.uint() == &0 {
                    safe_nary(BV_XOR, children)
                } else {
                    bitwise(&c, |i, bit| {
                        let t = safe_nary(XOR, bits_of(&children, i));
                        if bit {
                            neg_bool(t)
                        } else {
                            t
                        }
                    })
                }
            }
            BvNaryOp::Add => {
                let c = consts.into_iter().fold(c, std::ops::Add::add);
                if c.uint() != &0 || children.is_empty() {
                    children.push(leaf_term(Op::Const(Value::BitVector(c))));
                }
                safe_nary(BV_ADD, children)
            }
            BvNaryOp::Mul => {
                let c = consts.into_iter().fold(c, std::ops::Mul::mul);
                if c.uint() == &0 {
                    leaf_term(Op::Const(Value::BitVector(c)))
                } else {
                    if c.uint() != &1 || children.is_empty() {
                        children.push(leaf_term(Op::Const(Value::BitVector(c))));
                    }
                    safe_nary(BV_MUL, children)
                }
            }
        }
    }
}

/// Bit `i` of each of `children`
fn bits_of(children: &[Term], i: usize) -> Vec<Term> {
    children
        .iter()
        .cloned()
        .map(|t| term![Op::BvBit(i); t])
        .collect()
}

/// Build a bit-vector of `c`'s width, one bit at a time
fn bitwise(c: &BitVector, mut f: impl FnMut(usize, bool) -> Term) -> Term {
    safe_nary(
        BV_CONCAT,
        (0..c.width())
            .map(|i| term![Op::BoolToBv; f(i, c.bit(i))])
            .rev()
            .collect(),
    )
}

impl NaryFlat<FieldV> for PfNaryOp {
    fn as_const(t: Term) -> std::result::Result<FieldV, Term> {
        match &t.op {
            Op::Const(Value::Field(b)) => Ok(b.clone()),
            _ => Err(t),
        }
    }
    fn combine(self, mut children: Vec<Term>, mut consts: Vec<FieldV>) -> Term {
        match self {
            PfNaryOp::Add => {
                if let Some(c) = consts.pop() {
                    let c = consts.into_iter().fold(c, std::ops::Add::add);
                    if !c.is_zero() || children.is_empty() {
                        children.push(leaf_term(Op::Const(Value::Field(c))));
                    }
                }
                safe_nary(PF_ADD, children)
            }
            PfNaryOp::Mul => {
                if let Some(c) = consts.pop() {
                    let c = consts.into_iter().fold(c, std::ops::Mul::mul);
                    if c.is_zero() || children.is_empty() {
                        leaf_term(Op::Const(Value::Field(c)))
                    } else {
                        if !c.is_one() {
                            children.push(leaf_term(Op::Const(Value::Field(c))));
                        }
                        safe_nary(PF_MUL, children)
                    }
                } else {
                    safe_nary(PF_MUL, children)
                }
            }
        }
    }
}

fn safe_nary(op: Op, mut children: Vec<Term>) -> Term {
    match children.len() {
        0 => panic!("Empty {}", op),
        1 => children.pop().unwrap(),
        _ => term(op, children),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ir::term::dist::test::*;
    use quickcheck_macros::quickcheck;

    fn v_bv(n: &str, w: usize) -> Term {
        leaf_term(Op::Var(n.to_owned(), Sort::BitVector(w)))
    }

    #[quickcheck]
    fn semantics_random(ArbitraryTermEnv(t, vs): ArbitraryTermEnv) {
        let tt = fold(&t);
        let orig = eval(&t, &vs).unwrap();
        let new = eval(&tt, &vs).unwrap();
        assert!(orig == new, "{} ({}) vs {} ({})", t, orig, tt, new);
    }

    #[test]
    fn b_xor() {
        assert_eq!(fold(&term![XOR; bool_lit(false), bool_lit(true)]), bool_lit(true));
    }

    #[test]
    fn b_or() {
        assert_eq!(fold(&term![OR; bool_lit(false), bool_lit(true)]), bool_lit(true));
    }

    #[test]
    fn b_and() {
        assert_eq!(fold(&term![AND; bool_lit(false), bool_lit(true)]), bool_lit(false));
    }

    #[test]
    fn shl() {
        assert_eq!(
            fold(&term![BV_SHL; v_bv("a", 8), bv_lit(2, 8)]),
            term![BV_CONCAT; term![Op::BvExtract(5, 0); v_bv("a", 8)], bv_lit(0, 2)],
        );
        assert_eq!(fold(&term![BV_SHL; v_bv("a", 8), bv_lit(9, 8)]), bv_lit(0, 8));
    }

    #[test]
    fn ashr() {
        assert_eq!(
            fold(&term![BV_ASHR; v_bv("a", 8), bv_lit(2, 8)]),
            term![Op::BvSext(2); term![Op::BvExtract(7, 2); v_bv("a", 8)]],
        );
        assert_eq!(
            fold(&term![BV_ASHR; v_bv("a", 8), bv_lit(200, 8)]),
            term![Op::BvSext(7); term![Op::BvExtract(7, 7); v_bv("a", 8)]],
        );
    }

    #[test]
    fn lshr() {
        assert_eq!(
            fold(&term![BV_LSHR; v_bv("a", 8), bv_lit(2, 8)]),
            term![Op::BvUext(2); term![Op::BvExtract(7, 2); v_bv("a", 8)]],
        );
        assert_eq!(fold(&term![BV_LSHR; v_bv("a", 8), bv_lit(0, 8)]), v_bv("a", 8));
    }

    #[test]
    fn field_arith() {
        let f = test_field();
        let x = var("x".into(), Sort::Field(f.clone()));
        let t = term![PF_ADD;
            term![PF_MUL; pf_lit(f.new_v(2)), pf_lit(f.new_v(3))],
            x.clone(),
            pf_lit(f.new_v(-6))];
        assert_eq!(fold(&t), x);
        let t = term![PF_MUL; x.clone(), pf_lit(f.zero())];
        assert_eq!(fold(&t), pf_lit(f.zero()));
    }

    #[test]
    fn tuple_projection() {
        let x = var("x".into(), Sort::Bool);
        let t = term![Op::Field(1); term![Op::Tuple; bool_lit(true), x.clone()]];
        assert_eq!(fold(&t), x);
    }

    #[test]
    fn computation_fixed_point() {
        let mut cs = text::parse_computation(
            b"
            (computation
                (metadata (inputs (x bool) (y (bv 4))))
                (and true (=> false x))
                (= y (bvadd #x1 #x2)))
            ",
        )
        .unwrap();
        fold_computation(&mut cs).unwrap();
        assert_eq!(cs.outputs.len(), 1);
        assert_eq!(
            cs.outputs[0],
            term![EQ; var("y".into(), Sort::BitVector(4)), bv_lit(3, 4)]
        );
    }
}
