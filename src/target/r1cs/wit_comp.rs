//! A multi-stage R1CS witness evaluator.

use crate::error::{Error, Result};
use crate::ir::term::*;
use circ_fields::FieldT;
use fxhash::FxHashMap as HashMap;
use serde::{Deserialize, Serialize};

use log::trace;

use std::collections::{BTreeMap, BTreeSet};

/// A witness computation that proceeds in stages.
///
/// In each stage:
/// * it takes a partial assignment
/// * it returns a vector of field values
///
/// The steps form one flat instruction list: each step is an operator and the end of its
/// argument range in `step_args`. Arguments always name earlier steps.
#[derive(Default, Serialize, Deserialize)]
pub struct StagedWitComp {
    vars: BTreeSet<String>,
    stages: Vec<Stage>,
    steps: Vec<(Op, usize)>,
    step_args: Vec<usize>,
    output_steps: Vec<usize>,
    // we don't serialize the cache; it's just used during construction, and terms are expensive to
    // serialize.
    #[serde(skip, default = "TermMap::new")]
    term_to_step: TermMap<usize>,
}

/// Specifies a stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stage {
    inputs: BTreeMap<String, Sort>,
    num_outputs: usize,
}

impl Clone for StagedWitComp {
    fn clone(&self) -> Self {
        let mut term_to_step = TermMap::new();
        for (t, i) in self.term_to_step.iter() {
            term_to_step.insert(t.clone(), *i);
        }
        Self {
            vars: self.vars.clone(),
            stages: self.stages.clone(),
            steps: self.steps.clone(),
            step_args: self.step_args.clone(),
            output_steps: self.output_steps.clone(),
            term_to_step,
        }
    }
}

/// Equal plans have equal (serialized) contents; the construction cache is ignored.
impl PartialEq for StagedWitComp {
    fn eq(&self, other: &Self) -> bool {
        self.vars == other.vars
            && self.stages == other.stages
            && self.steps == other.steps
            && self.step_args == other.step_args
            && self.output_steps == other.output_steps
    }
}

impl Eq for StagedWitComp {}

impl std::fmt::Debug for StagedWitComp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StagedWitComp")
            .field("vars", &self.vars)
            .field("stages", &self.stages)
            .field("steps", &self.steps)
            .field("step_args", &self.step_args)
            .field("output_steps", &self.output_steps)
            .finish()
    }
}

/// Builder interface
impl StagedWitComp {
    /// Add a new stage.
    pub fn add_stage(&mut self, inputs: BTreeMap<String, Sort>, output_values: Vec<Term>) {
        let stage = Stage {
            inputs,
            num_outputs: output_values.len(),
        };
        for input in stage.inputs.keys() {
            debug_assert!(!self.vars.contains(input), "Duplicate input {}", input);
        }
        self.vars.extend(stage.inputs.keys().cloned());
        self.stages.push(stage);
        let mut already_have = TermSet::new();
        for t in self.term_to_step.keys() {
            already_have.insert(t.clone());
        }
        for t in PostOrderIter::from_roots_and_skips(output_values.clone(), already_have) {
            self.add_step(t);
        }
        for t in output_values {
            self.output_steps
                .push(*self.term_to_step.get(&t).expect("output was just added"));
        }
    }

    fn add_step(&mut self, term: Term) {
        debug_assert!(!self.term_to_step.contains_key(&term));
        let step_idx = self.steps.len();
        if let Op::Var(name, _) = &term.op {
            debug_assert!(self.vars.contains(name), "Unbound variable {}", name);
        }
        for child in &term.cs {
            let child_step = self.term_to_step.get(child).expect("children come first");
            self.step_args.push(*child_step);
        }
        self.steps.push((term.op.clone(), self.step_args.len()));
        self.term_to_step.insert(term, step_idx);
    }

    /// The output count of each stage
    pub fn stage_sizes(&self) -> impl Iterator<Item = usize> + '_ {
        self.stages.iter().map(|s| s.num_outputs)
    }

    /// How many inputs are there for this stage?
    pub fn num_stage_inputs(&self, n: usize) -> usize {
        self.stages[n].inputs.len()
    }

    /// The inputs of stage `n`, with their sorts
    pub fn stage_inputs(&self, n: usize) -> &BTreeMap<String, Sort> {
        &self.stages[n].inputs
    }

    /// How many stages?
    pub fn num_stages(&self) -> usize {
        self.stages.len()
    }

    /// How many steps (operator applications)?
    pub fn num_steps(&self) -> usize {
        self.steps.len()
    }

    /// How many step arguments, in total?
    pub fn num_step_args(&self) -> usize {
        self.step_args.len()
    }

    /// Does every step read only earlier steps, and is the plan internally consistent?
    pub fn steps_topologically_ordered(&self) -> bool {
        let mut prev_end = 0;
        for (i, (_, args_end)) in self.steps.iter().enumerate() {
            if *args_end < prev_end || *args_end > self.step_args.len() {
                return false;
            }
            if self.step_args[prev_end..*args_end].iter().any(|a| *a >= i) {
                return false;
            }
            prev_end = *args_end;
        }
        prev_end == self.step_args.len()
            && self.output_steps.iter().all(|o| *o < self.steps.len())
            && self.stage_sizes().sum::<usize>() == self.output_steps.len()
    }

    /// Type-check every step against its arguments, as construction would have.
    ///
    /// Stage inputs must be distinct and well-formed, variables must name a stage input at its
    /// declared sort, constants must be in normal form, and every output must be an element of a
    /// single field. Returns that field, if there are outputs. The plan must already be
    /// [topologically ordered](Self::steps_topologically_ordered).
    pub fn type_check(&self) -> std::result::Result<Option<FieldT>, String> {
        let mut inputs: BTreeMap<&str, &Sort> = BTreeMap::new();
        for (name, sort) in self.stages.iter().flat_map(|s| &s.inputs) {
            if inputs.insert(name.as_str(), sort).is_some() {
                return Err(format!("{} is an input of two stages", name));
            }
            if !sort.is_well_formed() {
                return Err(format!("input {} has the malformed sort {}", name, sort));
            }
        }
        if !inputs.keys().copied().eq(self.vars.iter().map(String::as_str)) {
            return Err("the variables are not the stage inputs".into());
        }
        let mut sorts: Vec<Sort> = Vec::with_capacity(self.steps.len());
        for (i, (op, _)) in self.steps.iter().enumerate() {
            match op {
                Op::Var(name, sort) if inputs.get(name.as_str()) != Some(&sort) => {
                    return Err(format!("step {} reads {} at the wrong sort", i, name));
                }
                Op::Const(v) if !v.is_well_formed() => {
                    return Err(format!("step {} is the malformed constant {}", i, v));
                }
                _ => {}
            }
            let args: Vec<&Sort> = self.step_args(i).map(|a| &sorts[a]).collect();
            let sort = check_op(op, &args).map_err(|e| format!("step {}: {}", i, e))?;
            if !sort.is_well_formed() {
                return Err(format!("step {} has the malformed sort {}", i, sort));
            }
            sorts.push(sort);
        }
        let mut field = None;
        for o in &self.output_steps {
            match (&sorts[*o], &field) {
                (Sort::Field(f), None) => field = Some(f.clone()),
                (Sort::Field(f), Some(g)) if f == g => {}
                (s, _) => return Err(format!("output step {} has sort {}", o, s)),
            }
        }
        Ok(field)
    }
}

/// Evaluator interface
impl StagedWitComp {
    fn step_args(&self, step_idx: usize) -> impl Iterator<Item = usize> + '_ {
        assert!(step_idx < self.steps.len());
        let args_end = self.steps[step_idx].1;
        let args_start = if step_idx == 0 {
            0
        } else {
            self.steps[step_idx - 1].1
        };
        (args_start..args_end).map(move |step_arg_idx| self.step_args[step_arg_idx])
    }
}

/// Evaluates a staged witness computation.
#[derive(Debug)]
pub struct StagedWitCompEvaluator<'a> {
    comp: &'a StagedWitComp,
    variable_values: HashMap<String, Value>,
    step_values: Vec<Value>,
    stages_evaluated: usize,
    outputs_evaluated: usize,
}

impl<'a> StagedWitCompEvaluator<'a> {
    /// Create an empty witness computation.
    pub fn new(comp: &'a StagedWitComp) -> Self {
        Self {
            comp,
            variable_values: Default::default(),
            step_values: Default::default(),
            stages_evaluated: Default::default(),
            outputs_evaluated: 0,
        }
    }
    /// Have all stages been evaluated?
    pub fn is_done(&self) -> bool {
        self.stages_evaluated == self.comp.stages.len()
    }
    fn eval_step(&mut self) -> Result<()> {
        let next_step_idx = self.step_values.len();
        assert!(next_step_idx < self.comp.steps.len());
        let op = &self.comp.steps[next_step_idx].0;
        let step_values = &self.step_values;
        let args: Vec<&Value> = self
            .comp
            .step_args(next_step_idx)
            .map(|i| &step_values[i])
            .collect();
        let value = eval_op(op, &args, &self.variable_values)?;
        trace!(
            "Eval step {}: {} on {:?} -> {}",
            next_step_idx,
            op,
            args,
            value
        );
        self.step_values.push(value);
        Ok(())
    }
    /// Evaluate one stage, given values for its inputs.
    ///
    /// Values for earlier stages' inputs remain visible.
    pub fn eval_stage(&mut self, inputs: HashMap<String, Value>) -> Result<Vec<&Value>> {
        trace!(
            "Beginning stage {}/{}",
            self.stages_evaluated,
            self.comp.stages.len()
        );
        let stage = self.comp.stages.get(self.stages_evaluated).ok_or_else(|| {
            Error::BadInput {
                name: "stage".into(),
                reason: format!("all {} stages are already evaluated", self.comp.stages.len()),
            }
        })?;
        let num_outputs = stage.num_outputs;
        for (k, v) in &inputs {
            trace!("Input {}: {}", k, v);
        }
        self.variable_values.extend(inputs);
        let outputs = self.outputs_evaluated..self.outputs_evaluated + num_outputs;
        if let Some(max_step) = self.comp.output_steps[outputs.clone()].iter().max() {
            while self.step_values.len() <= *max_step {
                self.eval_step()?;
            }
        }
        self.outputs_evaluated += num_outputs;
        self.stages_evaluated += 1;
        Ok(self.comp.output_steps[outputs]
            .iter()
            .map(|output_step| &self.step_values[*output_step])
            .collect())
    }
}

#[cfg(test)]
mod test {

    use rug::Integer;

    use super::*;
    use circ_fields::FieldT;

    fn mk_inputs(v: Vec<(String, Sort)>) -> BTreeMap<String, Sort> {
        v.into_iter().collect()
    }

    fn field() -> FieldT {
        FieldT::from(Integer::from(7))
    }

    fn expect_fields(output: Vec<&Value>, ex_output: &[usize]) {
        assert_eq!(output.len(), ex_output.len());
        for i in 0..ex_output.len() {
            assert_eq!(output[i], &Value::Field(field().new_v(ex_output[i])), "{i}");
        }
    }

    #[test]
    fn one_const() {
        let mut comp = StagedWitComp::default();
        comp.add_stage(mk_inputs(vec![]), vec![pf_lit(field().new_v(0))]);
        assert!(comp.steps_topologically_ordered());

        let mut evaluator = StagedWitCompEvaluator::new(&comp);
        expect_fields(evaluator.eval_stage(Default::default()).unwrap(), &[0]);
        assert!(evaluator.is_done());
    }

    #[test]
    fn built_plans_type_check() {
        let field = field();
        let mut comp = StagedWitComp::default();
        assert_eq!(comp.type_check(), Ok(None));
        comp.add_stage(
            mk_inputs(vec![("a".into(), Sort::Bool)]),
            vec![term![Op::Ite; var("a".into(), Sort::Bool), pf_lit(field.new_v(1)), pf_lit(field.new_v(0))]],
        );
        assert_eq!(comp.type_check(), Ok(Some(field.clone())));

        let mut mixed = comp.clone();
        mixed.add_stage(mk_inputs(vec![]), vec![pf_lit(FieldT::from(Integer::from(11)).new_v(1))]);
        assert!(mixed.type_check().unwrap_err().contains("output step"));

        let mut non_field = comp;
        non_field.add_stage(mk_inputs(vec![]), vec![bv_lit(3, 4)]);
        assert!(non_field.type_check().unwrap_err().contains("output step"));
    }

    #[test]
    fn many_const() {
        let mut comp = StagedWitComp::default();
        let field = field();
        comp.add_stage(mk_inputs(vec![]), vec![pf_lit(field.new_v(0))]);
        comp.add_stage(
            mk_inputs(vec![]),
            vec![pf_lit(field.new_v(1)), pf_lit(field.new_v(4))],
        );
        comp.add_stage(mk_inputs(vec![]), vec![pf_lit(field.new_v(6))]);
        comp.add_stage(mk_inputs(vec![]), vec![pf_lit(field.new_v(0))]);
        // the last stage reuses the first constant
        assert_eq!(comp.num_steps(), 4);
        assert_eq!(comp.stage_sizes().collect::<Vec<_>>(), vec![1, 2, 1, 1]);

        let mut evaluator = StagedWitCompEvaluator::new(&comp);
        expect_fields(evaluator.eval_stage(Default::default()).unwrap(), &[0]);
        expect_fields(evaluator.eval_stage(Default::default()).unwrap(), &[1, 4]);
        expect_fields(evaluator.eval_stage(Default::default()).unwrap(), &[6]);
        expect_fields(evaluator.eval_stage(Default::default()).unwrap(), &[0]);
        assert!(evaluator.is_done());
        assert!(evaluator.eval_stage(Default::default()).is_err());
    }

    #[test]
    fn vars_one_stage() {
        let mut comp = StagedWitComp::default();
        let field = field();
        comp.add_stage(mk_inputs(vec![("a".into(), Sort::Bool), ("b".into(), Sort::Field(field.clone()))]),
        vec![
            var("b".into(), Sort::Field(field.clone())),
            term![Op::Ite; var("a".into(), Sort::Bool), pf_lit(field.new_v(1)), pf_lit(field.new_v(0))],
        ]);
        assert_eq!(comp.num_stage_inputs(0), 2);
        assert_eq!(comp.num_step_args(), 3);

        let mut evaluator = StagedWitCompEvaluator::new(&comp);
        let output = evaluator
            .eval_stage(
                vec![
                    ("a".into(), Value::Bool(true)),
                    ("b".into(), Value::Field(field.new_v(5))),
                ]
                .into_iter()
                .collect(),
            )
            .unwrap();
        expect_fields(output, &[5, 1]);
        assert!(evaluator.is_done());
    }

    #[test]
    fn vars_many_stages() {
        let mut comp = StagedWitComp::default();
        let field = field();
        comp.add_stage(mk_inputs(vec![("a".into(), Sort::Bool), ("b".into(), Sort::Field(field.clone()))]),
        vec![
            var("b".into(), Sort::Field(field.clone())),
            term![Op::Ite; var("a".into(), Sort::Bool), pf_lit(field.new_v(1)), pf_lit(field.new_v(0))],
        ]);
        comp.add_stage(mk_inputs(vec![("c".into(), Sort::Field(field.clone()))]),
        vec![
            term![PF_ADD;
               var("b".into(), Sort::Field(field.clone())),
               var("c".into(), Sort::Field(field.clone()))],
            term![Op::Ite; var("a".into(), Sort::Bool), pf_lit(field.new_v(1)), pf_lit(field.new_v(0))],
            term![Op::Ite; var("a".into(), Sort::Bool), pf_lit(field.new_v(0)), pf_lit(field.new_v(1))],
        ]);
        assert!(comp.steps_topologically_ordered());

        let mut evaluator = StagedWitCompEvaluator::new(&comp);
        let output = evaluator
            .eval_stage(
                vec![
                    ("a".into(), Value::Bool(true)),
                    ("b".into(), Value::Field(field.new_v(5))),
                ]
                .into_iter()
                .collect(),
            )
            .unwrap();
        expect_fields(output, &[5, 1]);

        let output = evaluator
            .eval_stage(
                vec![("c".into(), Value::Field(field.new_v(3)))]
                    .into_iter()
                    .collect(),
            )
            .unwrap();
        expect_fields(output, &[1, 1, 0]);
        assert!(evaluator.is_done());
    }

    #[test]
    fn missing_value() {
        let mut comp = StagedWitComp::default();
        let f = Sort::Field(field());
        comp.add_stage(
            mk_inputs(vec![("a".into(), f.clone())]),
            vec![term![PF_MUL; var("a".into(), f.clone()), var("a".into(), f)]],
        );
        let mut evaluator = StagedWitCompEvaluator::new(&comp);
        assert!(matches!(
            evaluator.eval_stage(Default::default()),
            Err(Error::MissingWitnessValue { name }) if name == "a"
        ));
    }

    #[test]
    fn corrupt_plans_are_detected() {
        let mut comp = StagedWitComp::default();
        let f = Sort::Field(field());
        comp.add_stage(
            mk_inputs(vec![("a".into(), f.clone())]),
            vec![term![PF_NEG; var("a".into(), f)]],
        );
        assert!(comp.steps_topologically_ordered());
        let mut bad = comp.clone();
        bad.step_args[0] = 1;
        assert!(!bad.steps_topologically_ordered());
        assert_ne!(bad, comp);
    }
}
