//! Random term distributions, for property tests

use super::*;
use rand::distributions::Distribution;
use rand::seq::SliceRandom;
use rand::Rng;

/// A distribution of boolean terms with some size.
/// All subterms are booleans.
pub struct PureBoolDist(pub usize);

/// A distribution of n usizes that sum to this value.
/// (n, sum)
pub struct Sum(usize, usize);

impl Distribution<Vec<usize>> for Sum {
    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Vec<usize> {
        let mut acc = self.1;
        let mut ns = Vec::new();
        assert!(acc == 0 || self.0 > 0);
        while acc > 0 && ns.len() < self.0 {
            let x = rng.gen_range(0..acc);
            acc -= x;
            ns.push(x);
        }
        while ns.len() < self.0 {
            ns.push(0);
        }
        if acc > 0 {
            *ns.last_mut().unwrap() += acc;
        }
        ns.shuffle(rng);
        ns
    }
}

fn letter<R: Rng + ?Sized>(rng: &mut R) -> String {
    ((b'a' + rng.gen_range(0..26)) as char).to_string()
}

impl Distribution<Term> for PureBoolDist {
    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Term {
        let ops = &[
            Op::Const(Value::Bool(rng.gen())),
            Op::Var(letter(rng), Sort::Bool),
            Op::Not,
            Op::Implies,
            Op::BoolNaryOp(BoolNaryOp::Or),
            Op::BoolNaryOp(BoolNaryOp::And),
            Op::BoolNaryOp(BoolNaryOp::Xor),
        ];
        let o = match self.0 {
            1 => ops[..2].choose(rng),  // arity 0
            2 => ops[2..3].choose(rng), // arity 1
            _ => ops[2..].choose(rng),  // others
        }
        .unwrap()
        .clone();
        // Now, self.0 is a least arity+1
        let a = o.arity().unwrap_or_else(|| rng.gen_range(2..self.0));
        let excess = self.0 - 1 - a;
        let ns = Sum(a, excess).sample(rng);
        let subterms = ns
            .into_iter()
            .map(|n| PureBoolDist(n + 1).sample(rng))
            .collect::<Vec<_>>();
        term(o, subterms)
    }
}

/// Terms of one sort, with a fixed number of nodes (counting shared nodes repeatedly)
pub struct FixedSizeDist {
    pub size: usize,
    pub bv_width: usize,
    pub field: FieldT,
    pub sort: Sort,
}

impl FixedSizeDist {
    fn with_size(&self, size: usize) -> Self {
        FixedSizeDist {
            size,
            sort: self.sort.clone(),
            bv_width: self.bv_width,
            field: self.field.clone(),
        }
    }
    fn with_sort(&self, sort: Sort) -> Self {
        FixedSizeDist {
            size: self.size,
            sort,
            bv_width: self.bv_width,
            field: self.field.clone(),
        }
    }
}

pub struct UniformBitVector(pub usize);

impl Distribution<BitVector> for UniformBitVector {
    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> BitVector {
        let mut rug_rng = rug::rand::RandState::new_mersenne_twister();
        rug_rng.seed(&Integer::from(rng.next_u32()));
        BitVector::new(
            Integer::from(Integer::random_bits(self.0 as u32, &mut rug_rng)),
            self.0,
        )
    }
}

/// A uniform value of a scalar sort
pub struct UniformValue<'a>(pub &'a Sort);

impl<'a> Distribution<Value> for UniformValue<'a> {
    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Value {
        match self.0 {
            Sort::Bool => Value::Bool(rng.gen()),
            Sort::BitVector(w) => Value::BitVector(UniformBitVector(*w).sample(rng)),
            Sort::Field(f) => Value::Field(f.random_v(rng)),
            s => panic!("Unsampleable sort: {}", s),
        }
    }
}

impl Distribution<Term> for FixedSizeDist {
    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Term {
        match self.sort.clone() {
            Sort::Bool => {
                let ops = &[
                    Op::Const(Value::Bool(rng.gen())),
                    Op::Var(letter(rng), Sort::Bool),
                    Op::Not, // 2
                    Op::Implies,
                    Op::Eq,
                    Op::BvBinPred(BvBinPred::Sge),
                    Op::BvBinPred(BvBinPred::Sgt),
                    Op::BvBinPred(BvBinPred::Sle),
                    Op::BvBinPred(BvBinPred::Slt),
                    Op::BvBinPred(BvBinPred::Uge),
                    Op::BvBinPred(BvBinPred::Ugt),
                    Op::BvBinPred(BvBinPred::Ule),
                    Op::BvBinPred(BvBinPred::Ult),
                    Op::BoolNaryOp(BoolNaryOp::Or),
                    Op::BoolNaryOp(BoolNaryOp::And),
                    Op::BoolNaryOp(BoolNaryOp::Xor),
                    Op::Ite,
                ];
                let o = match self.size {
                    1 => ops[..2].choose(rng),   // arity 0
                    2 => ops[2..3].choose(rng),  // arity 1
                    3 => ops[2..16].choose(rng), // arity 2
                    _ => ops[2..].choose(rng),   // others
                }
                .unwrap()
                .clone();
                // Now, self.size is a least arity+1
                let a = o.arity().unwrap_or_else(|| rng.gen_range(2..self.size));
                let excess = self.size - 1 - a;
                let ns = Sum(a, excess).sample(rng);
                let sort = match o {
                    Op::Eq => [
                        Sort::Bool,
                        Sort::BitVector(self.bv_width),
                        Sort::Field(self.field.clone()),
                    ]
                    .choose(rng)
                    .unwrap()
                    .clone(),
                    Op::BvBinPred(_) => Sort::BitVector(self.bv_width),
                    _ => Sort::Bool,
                };
                let subterms = ns
                    .into_iter()
                    .map(|n| self.with_size(n + 1).with_sort(sort.clone()).sample(rng))
                    .collect::<Vec<_>>();
                term(o, subterms)
            }
            Sort::BitVector(w) => {
                let ops = &[
                    Op::Const(Value::BitVector(UniformBitVector(w).sample(rng))),
                    Op::Var(format!("{}_bv{}", letter(rng), w), Sort::BitVector(w)),
                    Op::BvUnOp(BvUnOp::Neg),
                    Op::BvUnOp(BvUnOp::Not),
                    Op::BvUext(rng.gen_range(0..w)),
                    Op::BvSext(rng.gen_range(0..w)),
                    Op::BvBinOp(BvBinOp::Sub),
                    Op::BvBinOp(BvBinOp::Udiv),
                    Op::BvBinOp(BvBinOp::Urem),
                    Op::BvNaryOp(BvNaryOp::Or),
                    Op::BvNaryOp(BvNaryOp::And),
                    Op::BvNaryOp(BvNaryOp::Xor),
                    Op::BvNaryOp(BvNaryOp::Add),
                    Op::BvNaryOp(BvNaryOp::Mul),
                ];
                let o = match self.size {
                    1 => ops[..2].choose(rng),  // arity 0
                    2 => ops[2..6].choose(rng), // arity 1
                    _ => ops[2..].choose(rng),  // others
                }
                .unwrap()
                .clone();
                let sort = match o {
                    Op::BvUext(ww) => Sort::BitVector(w - ww),
                    Op::BvSext(ww) => Sort::BitVector(w - ww),
                    _ => Sort::BitVector(w),
                };
                let a = o.arity().unwrap_or_else(|| rng.gen_range(2..self.size));
                let excess = self.size - 1 - a;
                let ns = Sum(a, excess).sample(rng);
                let subterms = ns
                    .into_iter()
                    .map(|n| self.with_size(n + 1).with_sort(sort.clone()).sample(rng))
                    .collect::<Vec<_>>();
                term(o, subterms)
            }
            Sort::Field(f) => {
                let ops = &[
                    Op::Const(Value::Field(f.random_v(&mut *rng))),
                    Op::Var(format!("{}_pf", letter(rng)), Sort::Field(f.clone())),
                    PF_NEG,
                    PF_RECIP,
                    PF_ADD,
                    PF_MUL,
                ];
                let o = match self.size {
                    1 => ops[..2].choose(rng),  // arity 0
                    2 => ops[2..4].choose(rng), // arity 1
                    _ => ops[2..].choose(rng),  // others
                }
                .unwrap()
                .clone();
                let a = o.arity().unwrap_or_else(|| rng.gen_range(2..self.size));
                let excess = self.size - 1 - a;
                let ns = Sum(a, excess).sample(rng);
                let subterms = ns
                    .into_iter()
                    .map(|n| self.with_size(n + 1).sample(rng))
                    .collect::<Vec<_>>();
                term(o, subterms)
            }
            s => panic!("Unsampleable sort: {}", s),
        }
    }
}

pub mod test {
    use super::*;

    use fxhash::FxHashMap;
    use quickcheck::{Arbitrary, Gen};
    use rand::SeedableRng;

    /// The field that random terms are drawn over
    pub fn test_field() -> FieldT {
        FieldT::from(Integer::from(1_000_003))
    }

    /// A value for every variable in `t`
    pub fn random_env<R: Rng>(t: &Term, rng: &mut R) -> FxHashMap<String, Value> {
        PostOrderIter::new(t.clone())
            .filter_map(|c| match &c.op {
                Op::Var(n, s) => Some((n.clone(), UniformValue(s).sample(rng))),
                _ => None,
            })
            .collect()
    }

    fn shrink_term(t: &Term) -> Vec<Term> {
        let sort = check(t);
        PostOrderIter::new(t.clone())
            .filter(|s| s != t && check(s) == sort)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect()
    }

    #[derive(Clone, Debug)]
    /// A random boolean term over booleans, bit-vectors, and field elements
    pub struct ArbitraryTerm(pub Term);

    impl Arbitrary for ArbitraryTerm {
        fn arbitrary(g: &mut Gen) -> Self {
            let mut rng = rand::rngs::StdRng::seed_from_u64(u64::arbitrary(g));
            let d = FixedSizeDist {
                bv_width: 8,
                size: g.size().clamp(1, 20),
                field: test_field(),
                sort: Sort::Bool,
            };
            ArbitraryTerm(d.sample(&mut rng))
        }

        fn shrink(&self) -> Box<dyn Iterator<Item = Self>> {
            Box::new(shrink_term(&self.0).into_iter().map(ArbitraryTerm))
        }
    }

    #[derive(Clone, Debug)]
    /// A random boolean term, with values for its variables
    pub struct ArbitraryTermEnv(pub Term, pub FxHashMap<String, Value>);

    impl Arbitrary for ArbitraryTermEnv {
        fn arbitrary(g: &mut Gen) -> Self {
            let mut rng = rand::rngs::StdRng::seed_from_u64(u64::arbitrary(g));
            let t = ArbitraryTerm::arbitrary(g).0;
            let values = random_env(&t, &mut rng);
            ArbitraryTermEnv(t, values)
        }

        fn shrink(&self) -> Box<dyn Iterator<Item = Self>> {
            let vs = self.1.clone();
            Box::new(
                shrink_term(&self.0)
                    .into_iter()
                    .map(move |t| ArbitraryTermEnv(t, vs.clone())),
            )
        }
    }

    #[derive(Clone, Debug)]
    /// A random pure-boolean term, with values for its variables
    pub struct ArbitraryBoolEnv(pub Term, pub FxHashMap<String, Value>);

    impl Arbitrary for ArbitraryBoolEnv {
        fn arbitrary(g: &mut Gen) -> Self {
            let mut rng = rand::rngs::StdRng::seed_from_u64(u64::arbitrary(g));
            let t = PureBoolDist(g.size().clamp(1, 20)).sample(&mut rng);
            let values = random_env(&t, &mut rng);
            ArbitraryBoolEnv(t, values)
        }

        fn shrink(&self) -> Box<dyn Iterator<Item = Self>> {
            let vs = self.1.clone();
            Box::new(
                shrink_term(&self.0)
                    .into_iter()
                    .map(move |t| ArbitraryBoolEnv(t, vs.clone())),
            )
        }
    }

    #[derive(Clone, Debug)]
    /// A random field term, with values for its variables
    pub struct ArbitraryFieldEnv(pub Term, pub FxHashMap<String, Value>);

    impl Arbitrary for ArbitraryFieldEnv {
        fn arbitrary(g: &mut Gen) -> Self {
            let mut rng = rand::rngs::StdRng::seed_from_u64(u64::arbitrary(g));
            let d = FixedSizeDist {
                bv_width: 8,
                size: g.size().clamp(1, 20),
                field: test_field(),
                sort: Sort::Field(test_field()),
            };
            let t = d.sample(&mut rng);
            let values = random_env(&t, &mut rng);
            ArbitraryFieldEnv(t, values)
        }

        fn shrink(&self) -> Box<dyn Iterator<Item = Self>> {
            let vs = self.1.clone();
            Box::new(
                shrink_term(&self.0)
                    .into_iter()
                    .map(move |t| ArbitraryFieldEnv(t, vs.clone())),
            )
        }
    }
}
