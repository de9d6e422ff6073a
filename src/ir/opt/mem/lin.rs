//! Linear-scan array access: the index is only known at run time.
//!
//! Each access compares the index against every key, so its cost is linear in the array size.

use crate::error::{Error, Result};
use crate::ir::term::*;

use super::CONTEXT;

/// `k = key_sort.nth_elem(i)`
fn key_is(key_sort: &Sort, i: usize, k: &Term) -> Term {
    term![Op::Eq; const_(key_sort.nth_elem(i)), k.clone()]
}

/// Can `key_sort` enumerate `size` keys?
pub fn check_keys(key_sort: &Sort, size: usize) -> Result<()> {
    match key_sort {
        Sort::Bool if size > 2 => Err(Error::unsupported(
            format!("boolean-keyed array of size {}", size),
            CONTEXT,
        )),
        Sort::Bool | Sort::BitVector(_) | Sort::Field(_) => Ok(()),
        _ => Err(Error::unsupported(format!("array key sort {}", key_sort), CONTEXT)),
    }
}

/// Select the element at key `k` with an ITE chain over every position.
///
/// An index matching no key yields the default value of `val_sort`, as evaluation does.
pub fn select(seq: &[Term], key_sort: &Sort, val_sort: &Sort, k: &Term) -> Term {
    seq.iter()
        .enumerate()
        .fold(val_sort.default_term(), |acc, (i, a_i)| {
            term![Op::Ite; key_is(key_sort, i, k), a_i.clone(), acc]
        })
}

/// Store `v` at key `k`: every position becomes an ITE on whether it is the one written. An
/// index matching no key changes nothing.
pub fn store(seq: &[Term], key_sort: &Sort, k: &Term, v: &Term) -> Vec<Term> {
    seq.iter()
        .enumerate()
        .map(|(i, a_i)| term![Op::Ite; key_is(key_sort, i, k), v.clone(), a_i.clone()])
        .collect()
}
