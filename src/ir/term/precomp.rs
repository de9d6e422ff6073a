//! Non-cryptographic pre-computation.
//!
//! A precomputation lets the prover derive some inputs from others before the proof begins:
//! e.g., a public `return` input computed from private arguments.

use fxhash::{FxHashMap, FxHashSet};

use crate::error::Result;
use crate::ir::term::*;

/// A "precomputation".
///
/// Expresses a computation to be run in advance by a single party. Outputs are computed in the
/// order they were added, and later outputs may read earlier ones.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PreComp {
    /// A map from output names to the terms that compute them.
    outputs: FxHashMap<String, Term>,
    sequence: Vec<String>,
}

impl PreComp {
    /// Create a new precomputation
    pub fn new() -> Self {
        Self::default()
    }
    /// immutable access to the outputs
    pub fn outputs(&self) -> &FxHashMap<String, Term> {
        &self.outputs
    }
    /// The output names, in evaluation order
    pub fn sequence(&self) -> &[String] {
        &self.sequence
    }
    /// Add a new output variable to the precomputation. `value` is the term that computes its value.
    #[track_caller]
    pub fn add_output(&mut self, name: String, value: Term) {
        self.sequence.push(name.clone());
        let old = self.outputs.insert(name, value);
        assert!(old.is_none());
    }
    /// Replace the output `name` with `parts`, at the same position.
    pub fn replace_output(&mut self, name: &str, parts: Vec<(String, Term)>) {
        if let Some(pos) = self.sequence.iter().position(|s| s == name) {
            self.outputs.remove(name);
            let names: Vec<String> = parts.iter().map(|(n, _)| n.clone()).collect();
            self.outputs.extend(parts);
            self.sequence.splice(pos..pos + 1, names);
        }
    }
    /// Rewrite every output term with `f`, in order.
    pub fn try_map_terms(&mut self, mut f: impl FnMut(&str, &Term) -> Result<Term>) -> Result<()> {
        for name in &self.sequence {
            let t = self.outputs.get_mut(name).unwrap();
            *t = f(name, t)?;
        }
        Ok(())
    }
    /// Retain only the parts of this precomputation that can be evaluated from
    /// the `known` inputs.
    pub fn restrict_to_inputs(&mut self, mut known: FxHashSet<String>) {
        let os = &mut self.outputs;
        let mut unknown = TermSet::new();
        self.sequence.retain(|s| {
            let o = os.get(s).unwrap().clone();
            for t in PostOrderIter::new(o.clone()) {
                if let Op::Var(ref name, _) = &t.op {
                    if !known.contains(name) {
                        unknown.insert(t);
                    }
                } else if t.cs.iter().any(|c| unknown.contains(c)) {
                    unknown.insert(t);
                }
            }
            let drop = unknown.contains(&o);
            if drop {
                os.remove(s);
            } else {
                known.insert(s.clone());
            }
            !drop
        });
    }
    /// Evaluate the precomputation.
    ///
    /// Requires an input environment that binds all inputs for the underlying computation.
    /// Returns that environment, extended with the outputs.
    pub fn eval(&self, env: &FxHashMap<String, Value>) -> Result<FxHashMap<String, Value>> {
        let mut value_cache: TermMap<Value> = TermMap::new();
        let mut env = env.clone();
        // iterate over all terms, evaluating them using the cache.
        for o_name in &self.sequence {
            let o = self.outputs.get(o_name).unwrap();
            let v = eval_cached(o, &env, &mut value_cache)?.clone();
            env.insert(o_name.clone(), v);
        }
        Ok(env)
    }
    /// The output terms, each rewritten to read only the inputs of the precomputation (never an
    /// earlier output), in evaluation order.
    pub fn bind(&self) -> Vec<(String, Term)> {
        let mut subs = TermMap::new();
        let mut out = Vec::new();
        for o_name in &self.sequence {
            let o = self.outputs.get(o_name).unwrap();
            let bound = extras::substitute_cache(o, &mut subs);
            subs.insert(var(o_name.clone(), check(o)), bound.clone());
            out.push((o_name.clone(), bound));
        }
        out
    }
    /// Compute the inputs for this precomputation, in name order
    pub fn inputs(&self) -> Vec<String> {
        let outputs: FxHashSet<&String> = self.sequence.iter().collect();
        let mut inputs: Vec<String> = self
            .sequence
            .iter()
            .flat_map(|o| extras::free_variables(self.outputs.get(o).unwrap().clone()))
            .filter(|v| !outputs.contains(v))
            .collect();
        inputs.sort();
        inputs.dedup();
        inputs
    }

    /// Bind the outputs of `self` to the inputs of `other`.
    #[track_caller]
    pub fn sequential_compose(mut self, other: &PreComp) -> PreComp {
        for o_name in &other.sequence {
            let o = other.outputs.get(o_name).unwrap().clone();
            self.add_output(o_name.clone(), o);
        }
        self
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use text::parse_term;

    #[test]
    fn restrict_to_inputs() {
        let mut p = PreComp::new();
        p.add_output(
            "out0".into(),
            parse_term(b"(declare ((a bool) (b (bv 4))) (and a (= b #b0000)))").unwrap(),
        );
        p.add_output(
            "out1".into(),
            parse_term(b"(declare ((a bool) (b (bv 4))) (xor a true))").unwrap(),
        );
        p.add_output(
            "out2".into(),
            parse_term(b"(declare ((a bool) (b (bv 4))) (bvuge b #b1000))").unwrap(),
        );
        p.add_output(
            "out3".into(),
            parse_term(b"(declare ((out1 bool)) (not out1))").unwrap(),
        );

        let mut p_with_a = p.clone();
        p_with_a.restrict_to_inputs(vec!["a".into()].into_iter().collect());
        assert_eq!(p_with_a.sequence, vec!["out1", "out3"]);
        assert_eq!(p_with_a.outputs.len(), 2);

        let mut p_with_b = p.clone();
        p_with_b.restrict_to_inputs(vec!["b".into()].into_iter().collect());
        assert_eq!(p_with_b.sequence, vec!["out2"]);
        assert_eq!(p_with_b.outputs.len(), 1);

        let mut p_both = p.clone();
        p_both.restrict_to_inputs(vec!["a".into(), "b".into()].into_iter().collect());
        assert_eq!(p_both.sequence, p.sequence);
        assert_eq!(p_both.outputs.len(), 4);
    }

    #[test]
    fn bind_and_eval_agree() {
        let f = FieldT::from(rug::Integer::from(101));
        let s = Sort::Field(f.clone());
        let x = var("x".into(), s.clone());
        let y = var("y".into(), s.clone());
        let mut p = PreComp::new();
        p.add_output("y".into(), term![PF_MUL; x.clone(), x.clone()]);
        p.add_output("z".into(), term![PF_ADD; y, x.clone()]);
        assert_eq!(p.inputs(), vec!["x".to_owned()]);

        let mut env = FxHashMap::default();
        env.insert("x".to_owned(), Value::Field(f.new_v(3)));
        let out = p.eval(&env).unwrap();
        assert_eq!(out.get("z"), Some(&Value::Field(f.new_v(12))));

        let bound = p.bind();
        assert_eq!(bound[1].0, "z");
        assert_eq!(extras::free_variables(bound[1].1.clone()), vec!["x".to_owned()]);
        assert_eq!(eval(&bound[1].1, &env).unwrap(), Value::Field(f.new_v(12)));
    }

    #[test]
    fn missing_input_is_reported() {
        let mut p = PreComp::new();
        p.add_output("y".into(), term![NOT; var("x".into(), Sort::Bool)]);
        assert!(matches!(
            p.eval(&FxHashMap::default()),
            Err(crate::Error::MissingWitnessValue { .. })
        ));
    }
}
