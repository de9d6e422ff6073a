//! Linearity reduction: eliminating witness variables defined by linear constraints

use super::*;
use log::debug;
use std::collections::hash_map::Entry;
use std::collections::{HashSet, VecDeque};

struct LinReducer {
    r1cs: R1cs,
    uses: HashMap<Var, HashSet<usize>>,
    queue: OnceQueue<usize>,
    lc_elim_thresh: usize,
}

struct OnceQueue<T> {
    queue: VecDeque<T>,
    set: HashSet<T>,
}

impl<T: Eq + Hash + Clone> OnceQueue<T> {
    pub fn push(&mut self, t: T) {
        if self.set.insert(t.clone()) {
            self.queue.push_back(t)
        }
    }
    pub fn pop(&mut self) -> Option<T> {
        self.queue.pop_front().map(|t| {
            self.set.remove(&t);
            t
        })
    }
    pub fn new() -> Self {
        Self {
            queue: VecDeque::new(),
            set: HashSet::new(),
        }
    }
}

impl<A: Eq + Hash + Clone> std::iter::FromIterator<A> for OnceQueue<A> {
    fn from_iter<T>(iter: T) -> Self
    where
        T: IntoIterator<Item = A>,
    {
        iter.into_iter().fold(Self::new(), |mut q, i| {
            q.push(i);
            q
        })
    }
}

impl LinReducer {
    fn new(mut r1cs: R1cs, lc_elim_thresh: usize) -> Self {
        let mut uses: HashMap<Var, HashSet<usize>> = HashMap::default();
        for (i, (a, b, c)) in r1cs.constraints.iter().enumerate() {
            for x in a
                .monomials
                .keys()
                .chain(b.monomials.keys())
                .chain(c.monomials.keys())
            {
                uses.entry(*x).or_default().insert(i);
            }
        }
        let queue = (0..r1cs.constraints.len()).collect::<OnceQueue<usize>>();
        for c in &mut r1cs.constraints {
            normalize(c);
        }
        Self {
            r1cs,
            uses,
            queue,
            lc_elim_thresh,
        }
    }

    /// Substitute `val` for `var` in constraint with id `con_id`.
    /// Updates uses conservatively (not precisely)
    /// Returns whether a sub happened.
    fn sub_in(&mut self, var: Var, val: &Lc, con_id: usize) -> bool {
        let (a, b, c) = &mut self.r1cs.constraints[con_id];
        let uses = &mut self.uses;
        let mut do_in = |a: &mut Lc| {
            if let Some(sc) = a.monomials.remove(&var) {
                a.constant += val.constant.clone() * &sc;
                for (i, v) in &val.monomials {
                    match a.monomials.entry(*i) {
                        Entry::Occupied(mut e) => {
                            let m = e.get_mut();
                            *m += v.clone() * &sc;
                            if m.is_zero() {
                                uses.entry(*i).or_default().remove(&con_id);
                                e.remove_entry();
                            }
                        }
                        Entry::Vacant(e) => {
                            e.insert(v.clone() * &sc);
                            uses.entry(*i).or_default().insert(con_id);
                        }
                    }
                }
                true
            } else {
                false
            }
        };
        let change_a = do_in(a);
        let change_b = do_in(b);
        let change_c = do_in(c);
        let change = change_a || change_b || change_c;
        if let Some(u) = self.uses.get_mut(&var) {
            u.remove(&con_id);
        }
        if change {
            normalize(&mut self.r1cs.constraints[con_id]);
        }
        change
    }

    fn clear_constraint(&mut self, i: usize) {
        let (a, b, c) = &mut self.r1cs.constraints[i];
        for lc in [a, b, c] {
            for v in lc.monomials.keys() {
                if let Some(u) = self.uses.get_mut(v) {
                    u.remove(&i);
                }
            }
            lc.clear();
        }
    }

    /// If constraint `i` is linear, and defines an eliminable variable by a small enough
    /// combination, return that variable and its definition.
    fn as_linear_sub(&self, i: usize) -> Option<(Var, Lc)> {
        let (a, b, c) = &self.r1cs.constraints[i];
        if !(a.is_zero() || b.is_zero()) {
            return None;
        }
        let (var, _) = c
            .sorted_monomials()
            .into_iter()
            .find(|(v, _)| self.r1cs.can_eliminate(**v))?;
        let var = *var;
        if c.monomials.len() - 1 >= self.lc_elim_thresh {
            return None;
        }
        let mut lc = c.clone();
        let coeff = lc.monomials.remove(&var).expect("chosen monomial");
        lc *= -coeff.recip();
        Some((var, lc))
    }

    fn run(mut self) -> R1cs {
        let mut eliminated = 0;
        while let Some(con_id) = self.queue.pop() {
            if let Some((var, lc)) = self.as_linear_sub(con_id) {
                self.clear_constraint(con_id);
                let var_uses = self.uses.get(&var).cloned().unwrap_or_default();
                for use_id in var_uses {
                    if self.sub_in(var, &lc, use_id)
                        && (self.r1cs.constraints[use_id].0.is_zero()
                            || self.r1cs.constraints[use_id].1.is_zero())
                    {
                        self.queue.push(use_id);
                    }
                }
                debug_assert!(self.uses.get(&var).map_or(true, |u| u.is_empty()));
                self.r1cs.remove_var(var);
                eliminated += 1;
            }
        }
        self.r1cs.constraints.retain(|c| !constantly_true(c));
        debug!(
            "Linearity reduction: eliminated {} variables, {} constraints remain",
            eliminated,
            self.r1cs.constraints.len()
        );
        self.r1cs
    }
}

fn normalize((a, b, c): &mut (Lc, Lc, Lc)) {
    match (a.as_const(), b.as_const()) {
        (Some(ac), _) => {
            *c -= &(b.take() * ac);
            a.clear();
        }
        (_, Some(bc)) => {
            *c -= &(a.take() * bc);
            b.clear();
        }
        _ => {}
    }
}

fn constantly_true((a, b, c): &(Lc, Lc, Lc)) -> bool {
    match (a.as_const(), b.as_const(), c.as_const()) {
        (Some(x), Some(y), Some(z)) => (x.clone() * y - z).is_zero(),
        _ => false,
    }
}

/// Eliminate final witness variables that linear constraints define, substituting their
/// definitions (of fewer than `lc_elim_thresh` monomials) everywhere else.
///
/// Never increases the number of constraints, and preserves satisfiability: any assignment
/// satisfying the input satisfies the output.
pub fn reduce_linearities(r1cs: R1cs, lc_elim_thresh: usize) -> R1cs {
    LinReducer::new(r1cs, lc_elim_thresh).run()
}

#[cfg(test)]
mod test {

    use super::*;

    use quickcheck::{Arbitrary, Gen};
    use quickcheck_macros::quickcheck;

    #[derive(Clone, Debug)]
    pub struct SatR1cs(R1cs, HashMap<Var, FieldV>);

    fn field() -> FieldT {
        FieldT::from(Integer::from(101))
    }

    impl Arbitrary for SatR1cs {
        fn arbitrary(g: &mut Gen) -> Self {
            let f = field();
            let n_vars = g.size() + 1;
            let names: Vec<_> = (0..n_vars).map(|i| format!("v{}", i)).collect();
            let mut r1cs = R1cs::new(f.clone());
            let mut values = HashMap::default();
            for (i, n) in names.iter().enumerate() {
                let value = f.new_v(u8::arbitrary(g));
                let ty = if i % 3 == 0 {
                    VarType::Inst
                } else {
                    VarType::FinalWit
                };
                let v = r1cs.add_var(n.clone(), pf_lit(value.clone()), ty);
                values.insert(v, value);
            }
            let pick = |g: &mut Gen, r1cs: &R1cs| {
                let c: i8 = Arbitrary::arbitrary(g);
                let lc = if Arbitrary::arbitrary(g) {
                    r1cs.signal_lc(g.choose(&names[..]).unwrap()) * c as isize
                } else {
                    r1cs.zero()
                };
                lc + c as isize
            };
            for _ in 0..(2 * g.size()) {
                let a = pick(g, &r1cs);
                let b = pick(g, &r1cs);
                let mut c = pick(g, &r1cs);
                let name = |v: &Var| r1cs.name(*v);
                let off = eval_lc(&a, &values, name).unwrap() * &eval_lc(&b, &values, name).unwrap()
                    - &eval_lc(&c, &values, name).unwrap();
                c += &off;
                r1cs.constraint(a, b, c);
            }
            SatR1cs(r1cs, values)
        }
        fn shrink(&self) -> Box<dyn Iterator<Item = Self>> {
            let c = self.clone();
            Box::new((0..self.0.constraints.len()).rev().map(move |i| {
                let mut this = c.clone();
                this.0.constraints.truncate(i);
                this
            }))
        }
    }

    #[quickcheck]
    fn random(SatR1cs(r1cs, values): SatR1cs) {
        r1cs.check_all(&values).unwrap();
        let before = r1cs.constraints().len();
        let r1cs2 = reduce_linearities(r1cs, 50);
        r1cs2.check_all(&values).unwrap();
        assert!(r1cs2.constraints().len() <= before);
    }

    #[test]
    fn product_chain() {
        let f = field();
        let mut r1cs = R1cs::new(f.clone());
        let t = pf_lit(f.new_v(0));
        r1cs.add_var("return".into(), t.clone(), VarType::Inst);
        r1cs.add_var("x".into(), t.clone(), VarType::FinalWit);
        r1cs.add_var("y".into(), t.clone(), VarType::FinalWit);
        r1cs.add_var("mul_v0".into(), t, VarType::FinalWit);
        r1cs.constraint(r1cs.signal_lc("x"), r1cs.signal_lc("y"), r1cs.signal_lc("mul_v0"));
        r1cs.constraint(
            r1cs.zero(),
            r1cs.zero(),
            r1cs.signal_lc("return") - &r1cs.signal_lc("mul_v0"),
        );
        let r = reduce_linearities(r1cs, 50);
        assert_eq!(r.constraints().len(), 1);
        assert_eq!(r.format_qeq(&r.constraints()[0]), "(+0 +1 x)(+0 +1 y) = +0 +1 return");
        assert_eq!(r.num_vars(), 3);
    }

    #[test]
    fn instance_variables_stay() {
        let f = field();
        let mut r1cs = R1cs::new(f.clone());
        let t = pf_lit(f.new_v(0));
        r1cs.add_var("a".into(), t.clone(), VarType::Inst);
        r1cs.add_var("b".into(), t, VarType::Inst);
        r1cs.constraint(
            r1cs.zero(),
            r1cs.zero(),
            r1cs.signal_lc("a") - &r1cs.signal_lc("b"),
        );
        let r = reduce_linearities(r1cs, 50);
        assert_eq!(r.constraints().len(), 1);
    }

    #[test]
    fn threshold_limits_substitution() {
        let f = field();
        let mut r1cs = R1cs::new(f.clone());
        let t = pf_lit(f.new_v(0));
        for n in ["a", "b", "c", "w"] {
            r1cs.add_var(n.into(), t.clone(), VarType::Inst);
        }
        r1cs.add_var("s".into(), t, VarType::FinalWit);
        let sum = r1cs.signal_lc("a") + &r1cs.signal_lc("b") + &r1cs.signal_lc("c");
        r1cs.constraint(r1cs.zero(), r1cs.zero(), sum - &r1cs.signal_lc("s"));
        r1cs.constraint(r1cs.signal_lc("s"), r1cs.signal_lc("s"), r1cs.signal_lc("w"));
        assert_eq!(reduce_linearities(r1cs.clone(), 3).constraints().len(), 2);
        assert_eq!(reduce_linearities(r1cs, 4).constraints().len(), 1);
    }
}
