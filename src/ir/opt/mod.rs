//! Optimizations
pub mod cfold;
pub mod mem;
pub mod tuple;
mod visit;

use super::term::*;
use crate::error::Result;

use fxhash::FxHashMap;
use log::debug;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
/// An optimization pass
pub enum Opt {
    /// Fold constants, to a fixed point
    ConstantFold,
    /// Eliminate tuples.
    /// The scalar variable names are suffixed with .N, where N indicates the tuple position
    Tuple,
    /// Eliminate arrays.
    /// The scalar variable names are suffixed with .N, where N indicates the array position
    Array,
    /// Merge linear chains in the lowered constraint system
    LinearityReduction,
}

impl Opt {
    /// Does this pass rewrite the IR (rather than the lowered constraint system)?
    pub fn is_ir(&self) -> bool {
        !matches!(self, Opt::LinearityReduction)
    }
}

/// Run one IR optimization on `cs`.
///
/// [Opt::LinearityReduction] runs on the lowered constraint system, so it does nothing here.
pub fn apply(cs: &mut Computation, o: Opt) -> Result<()> {
    debug!("Applying: {:?}", o);
    match o {
        Opt::ConstantFold => cfold::fold_computation(cs)?,
        Opt::Tuple => tuple::eliminate_tuples(cs)?,
        Opt::Array => {
            mem::eliminate_arrays(cs)?;
        }
        Opt::LinearityReduction => {}
    }
    debug!("After {:?}: {} terms", o, cs.terms());
    Ok(())
}

/// Split the tuple and array values in `values` into scalars, named the way [Opt::Tuple] and
/// [Opt::Array] name the components of aggregate variables.
///
/// Scalar values are kept. The result works both before and after aggregate elimination.
pub fn flatten_value_map(values: &FxHashMap<String, Value>) -> FxHashMap<String, Value> {
    fn flatten_into(name: &str, v: &Value, out: &mut FxHashMap<String, Value>) {
        let parts: Vec<Value> = match v {
            Value::Tuple(vs) => vs.to_vec(),
            Value::Array(a) => a.elements(),
            _ => return,
        };
        for (i, p) in parts.iter().enumerate() {
            let n = format!("{}.{}", name, i);
            flatten_into(&n, p, out);
            out.insert(n, p.clone());
        }
    }
    let mut out = values.clone();
    for (name, v) in values {
        flatten_into(name, v, &mut out);
    }
    out
}
