//! IR Evaluation

use super::{
    Array, BitVector, BoolNaryOp, BvBinOp, BvBinPred, BvNaryOp, BvUnOp, Op, PfNaryOp, PfUnOp,
    Term, TermMap, Value,
};
use crate::error::{Error, Result};

use circ_fields::{FieldT, FieldV};
use fxhash::FxHashMap;
use rug::Integer;

use log::trace;

/// Recursively evaluate the term `t`, using variable values in `h` and storing intermediate
/// evaluations in the cache `vs`.
pub fn eval_cached<'a>(
    t: &Term,
    h: &FxHashMap<String, Value>,
    vs: &'a mut TermMap<Value>,
) -> Result<&'a Value> {
    // the custom traversal (rather than [PostOrderIter]) allows us to break early based on the cache

    // (children pushed, term)
    let mut stack = vec![(false, t.clone())];
    while let Some((children_pushed, node)) = stack.pop() {
        if vs.contains_key(&node) {
            continue;
        }
        if children_pushed {
            let v = {
                let args: Vec<&Value> = node.cs.iter().map(|c| vs.get(c).unwrap()).collect();
                eval_op(&node.op, &args, h)?
            };
            trace!("Eval {} => {}", node.op, v);
            vs.insert(node, v);
        } else {
            stack.push((true, node.clone()));
            for c in node.cs.iter().rev() {
                // vs doubles as our visited set.
                if !vs.contains_key(c) {
                    stack.push((false, c.clone()));
                }
            }
        }
    }
    Ok(vs.get(t).unwrap())
}

/// Recursively evaluate the term `t`, using variable values in `h`.
pub fn eval(t: &Term, h: &FxHashMap<String, Value>) -> Result<Value> {
    let mut vs = TermMap::<Value>::new();
    eval_cached(t, h, &mut vs).map(|v| v.clone())
}

fn fold_nary<T: Clone>(args: &[&Value], get: impl Fn(&Value) -> &T, f: impl Fn(T, T) -> T) -> T {
    let mut xs = args.iter().map(|a| get(a).clone());
    let first = xs.next().expect("empty n-ary operator");
    xs.fold(first, f)
}

/// Evaluate a single operator on its argument values.
///
/// Variables are looked up in `var_vals`; an absent variable is a
/// [Error::MissingWitnessValue], and a value of the wrong sort is an [Error::BadInput].
pub fn eval_op(op: &Op, args: &[&Value], var_vals: &FxHashMap<String, Value>) -> Result<Value> {
    Ok(match op {
        Op::Var(n, s) => {
            let v = var_vals
                .get(n)
                .ok_or_else(|| Error::MissingWitnessValue { name: n.clone() })?;
            let found = v.sort();
            if &found != s {
                return Err(Error::BadInput {
                    name: n.clone(),
                    reason: format!("expected sort {}, found a value of sort {}", s, found),
                });
            }
            v.clone()
        }
        Op::Const(v) => v.clone(),
        Op::Eq => Value::Bool(match (args[0], args[1]) {
            (Value::Array(a), Value::Array(b)) => a.same_elements(b),
            (a, b) => a == b,
        }),
        Op::Ite => {
            if args[0].as_bool() {
                args[1].clone()
            } else {
                args[2].clone()
            }
        }
        Op::Not => Value::Bool(!args[0].as_bool()),
        Op::Implies => Value::Bool(!args[0].as_bool() || args[1].as_bool()),
        Op::BoolNaryOp(BoolNaryOp::Or) => Value::Bool(args.iter().any(|a| a.as_bool())),
        Op::BoolNaryOp(BoolNaryOp::And) => Value::Bool(args.iter().all(|a| a.as_bool())),
        Op::BoolNaryOp(BoolNaryOp::Xor) => Value::Bool(
            args.iter()
                .map(|a| a.as_bool())
                .fold(false, std::ops::BitXor::bitxor),
        ),
        Op::BvBit(i) => Value::Bool(args[0].as_bv().bit(*i)),
        Op::BvConcat => Value::BitVector(fold_nary(args, Value::as_bv, BitVector::concat)),
        Op::BvExtract(h, l) => Value::BitVector(args[0].as_bv().clone().extract(*h, *l)),
        Op::BvBinOp(o) => Value::BitVector({
            let a = args[0].as_bv().clone();
            let b = args[1].as_bv();
            match o {
                BvBinOp::Udiv => a.udiv(b),
                BvBinOp::Urem => a.urem(b),
                BvBinOp::Sub => a - b,
                BvBinOp::Ashr => a.ashr(b),
                BvBinOp::Lshr => a.lshr(b),
                BvBinOp::Shl => a.shl(b),
            }
        }),
        Op::BvUnOp(o) => Value::BitVector({
            let a = args[0].as_bv().clone();
            match o {
                BvUnOp::Not => !a,
                BvUnOp::Neg => -a,
            }
        }),
        Op::BvNaryOp(o) => Value::BitVector({
            let f: fn(BitVector, BitVector) -> BitVector = match o {
                BvNaryOp::Add => std::ops::Add::add,
                BvNaryOp::Mul => std::ops::Mul::mul,
                BvNaryOp::Xor => std::ops::BitXor::bitxor,
                BvNaryOp::Or => std::ops::BitOr::bitor,
                BvNaryOp::And => std::ops::BitAnd::bitand,
            };
            fold_nary(args, Value::as_bv, f)
        }),
        Op::BvBinPred(o) => Value::Bool({
            let a = args[0].as_bv();
            let b = args[1].as_bv();
            match o {
                BvBinPred::Sge => a.as_sint() >= b.as_sint(),
                BvBinPred::Sgt => a.as_sint() > b.as_sint(),
                BvBinPred::Sle => a.as_sint() <= b.as_sint(),
                BvBinPred::Slt => a.as_sint() < b.as_sint(),
                BvBinPred::Uge => a.uint() >= b.uint(),
                BvBinPred::Ugt => a.uint() > b.uint(),
                BvBinPred::Ule => a.uint() <= b.uint(),
                BvBinPred::Ult => a.uint() < b.uint(),
            }
        }),
        Op::BvSext(w) => Value::BitVector(args[0].as_bv().clone().sext(*w)),
        Op::BvUext(w) => Value::BitVector(args[0].as_bv().clone().uext(*w)),
        Op::BoolToBv => Value::BitVector(BitVector::new(Integer::from(args[0].as_bool()), 1)),
        Op::PfToBv(w) => Value::BitVector(BitVector::wrap(args[0].as_pf().i(), *w)),
        Op::UbvToPf(f) => Value::Field(f.new_v(args[0].as_bv().uint())),
        Op::PfUnOp(o) => Value::Field({
            let a = args[0].as_pf().clone();
            match o {
                PfUnOp::Recip => a.recip(),
                PfUnOp::Neg => -a,
            }
        }),
        Op::PfNaryOp(o) => Value::Field({
            let f: fn(FieldV, FieldV) -> FieldV = match o {
                PfNaryOp::Add => std::ops::Add::add,
                PfNaryOp::Mul => std::ops::Mul::mul,
            };
            fold_nary(args, Value::as_pf, f)
        }),
        Op::Tuple => Value::Tuple(args.iter().map(|a| (*a).clone()).collect()),
        Op::Field(i) => args[0].as_tuple()[*i].clone(),
        Op::Update(i) => {
            let mut fields = args[0].as_tuple().to_vec();
            fields[*i] = args[1].clone();
            Value::Tuple(fields.into())
        }
        Op::ConstArray(key_sort, size) => {
            Value::Array(Array::constant(key_sort.clone(), args[0].clone(), *size))
        }
        Op::Select => args[0].as_array().select(args[1]),
        Op::Store => Value::Array(
            args[0]
                .as_array()
                .clone()
                .store(args[1].clone(), args[2].clone()),
        ),
    })
}

/// Compute a (deterministic) prime-field challenge.
pub fn pf_challenge(name: &str, field: &FieldT) -> FieldV {
    use rand::SeedableRng;
    use rand_chacha::ChaChaRng;
    use std::hash::{Hash, Hasher};
    // hash the string
    let mut hasher = fxhash::FxHasher::default();
    name.hash(&mut hasher);
    let hash: u64 = hasher.finish();
    // seed ChaCha with the hash
    let mut seed = [0u8; 32];
    seed[0..8].copy_from_slice(&hash.to_le_bytes());
    let mut rng = ChaChaRng::from_seed(seed);
    // sample from ChaCha
    field.random_v(&mut rng)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ir::term::{bool_lit, bv_lit, pf_lit, var, Sort, PF_ADD, PF_MUL, PF_RECIP};

    fn f101() -> FieldT {
        FieldT::from(Integer::from(101))
    }

    #[test]
    fn missing_variable() {
        let x = var("x".to_owned(), Sort::Field(f101()));
        let t = term![PF_MUL; x.clone(), x];
        match eval(&t, &FxHashMap::default()) {
            Err(Error::MissingWitnessValue { name }) => assert_eq!(name, "x"),
            r => panic!("expected a missing value, got {:?}", r),
        }
    }

    #[test]
    fn wrong_sort() {
        let x = var("x".to_owned(), Sort::Field(f101()));
        let mut h = FxHashMap::default();
        h.insert("x".to_owned(), Value::Bool(true));
        assert!(matches!(eval(&x, &h), Err(Error::BadInput { .. })));
    }

    #[test]
    fn field_ops() {
        let f = f101();
        let x = var("x".to_owned(), Sort::Field(f.clone()));
        let mut h = FxHashMap::default();
        h.insert("x".to_owned(), Value::Field(f.new_v(4)));
        let t = term![PF_ADD; term![PF_MUL; pf_lit(f.new_v(2)), x.clone()], pf_lit(f.new_v(3))];
        assert_eq!(eval(&t, &h).unwrap(), Value::Field(f.new_v(11)));
        let t = term![PF_RECIP; pf_lit(f.zero())];
        assert_eq!(eval(&t, &h).unwrap(), Value::Field(f.zero()));
        let t = term![Op::PfToBv(4); pf_lit(f.new_v(-1))];
        assert_eq!(eval(&t, &h).unwrap(), Value::BitVector(BitVector::new(Integer::from(4), 4)));
    }

    #[test]
    fn aggregates() {
        let a = term![Op::ConstArray(Sort::BitVector(2), 4); bv_lit(0, 4)];
        let a = term![Op::Store; a, bv_lit(2, 2), bv_lit(9, 4)];
        let h = FxHashMap::default();
        let s = term![Op::Select; a.clone(), bv_lit(2, 2)];
        assert_eq!(eval(&s, &h).unwrap().as_bv().uint(), &9);
        let s = term![Op::Select; a, bv_lit(1, 2)];
        assert_eq!(eval(&s, &h).unwrap().as_bv().uint(), &0);
        let t = term![Op::Update(0); term![Op::Tuple; bool_lit(false), bv_lit(1, 2)], bool_lit(true)];
        let t = term![Op::Field(0); t];
        assert_eq!(eval(&t, &h).unwrap(), Value::Bool(true));
    }

    #[test]
    fn challenges_are_deterministic() {
        let f = FieldT::Curve25519;
        assert_eq!(pf_challenge("r", &f), pf_challenge("r", &f));
        assert_ne!(pf_challenge("r", &f), pf_challenge("s", &f));
    }
}
