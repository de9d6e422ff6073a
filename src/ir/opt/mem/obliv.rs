//! Oblivious array access: every index is a compile-time constant.
//!
//! A select picks its element directly, and a store replaces exactly one element. Neither
//! introduces any terms.

use crate::error::{Error, Result};
use crate::ir::term::extras::as_key_index;
use crate::ir::term::*;

use super::CONTEXT;

/// The position a constant key `k` names in an array of `size` elements.
fn position(op: &Op, k: &Term, size: usize) -> Result<usize> {
    match as_key_index(k) {
        Some(i) if i < size => Ok(i),
        _ => Err(Error::unsupported(
            format!("{} at constant index {} (array size {})", op, k, size),
            CONTEXT,
        )),
    }
}

/// Select the element at constant key `k`.
pub fn select(seq: &[Term], k: &Term) -> Result<Term> {
    let i = position(&Op::Select, k, seq.len())?;
    Ok(seq[i].clone())
}

/// Replace the element at constant key `k` with `v`.
pub fn store(seq: &[Term], k: &Term, v: &Term) -> Result<Vec<Term>> {
    let i = position(&Op::Store, k, seq.len())?;
    let mut new = seq.to_vec();
    new[i] = v.clone();
    Ok(new)
}
