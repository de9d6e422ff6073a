//! Extra algorithms over terms (e.g. substitutions)

use super::*;
use std::collections::BTreeMap;

/// Rewrites `t`, applying the substitutions in `subs`.
///
/// The substitution map is taken mutably; this function will add rewrites to it.
/// This allows the same map to be re-used across multiple rewrites, with caching.
pub fn substitute_cache(t: &Term, subs: &mut TermMap<Term>) -> Term {
    let mut stack = vec![(t.clone(), false)];

    // Maps terms to their rewritten versions.
    while let Some((n, children_pushed)) = stack.pop() {
        if subs.contains_key(&n) {
            continue;
        }
        if !children_pushed {
            stack.push((n.clone(), true));
            stack.extend(n.cs.iter().map(|c| (c.clone(), false)));
            continue;
        }
        let new_n = term(
            n.op.clone(),
            n.cs.iter().map(|c| subs.get(c).unwrap().clone()).collect(),
        );
        subs.insert(n.clone(), new_n);
    }
    subs.get(t).unwrap().clone()
}

/// Rewrites `t`, applying the substitutions in `subs`.
pub fn substitute(t: &Term, mut subs: TermMap<Term>) -> Term {
    substitute_cache(t, &mut subs)
}

/// Get all the free variables in this term, in name order
pub fn free_variables(t: Term) -> Vec<String> {
    free_variables_with_sorts(t).into_keys().collect()
}

/// Get all the free variables in this term, with sorts, in name order
pub fn free_variables_with_sorts(t: Term) -> BTreeMap<String, Sort> {
    PostOrderIter::new(t)
        .filter_map(|n| match &n.op {
            Op::Var(name, sort) => Some((name.clone(), sort.clone())),
            _ => None,
        })
        .collect()
}

/// If this term is a constant field, bit-vector, or boolean, get its key position.
pub fn as_key_index(t: &Term) -> Option<usize> {
    t.as_value_opt().and_then(Value::as_key_index)
}

/// The number of distinct subterms across these terms
pub fn term_count<'a>(ts: impl IntoIterator<Item = &'a Term>) -> usize {
    PostOrderIter::from_roots_and_skips(ts.into_iter().cloned(), TermSet::new()).count()
}
