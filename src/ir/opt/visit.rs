use crate::error::Result;
use crate::ir::term::*;

use log::trace;

/// A rewriting pass.
pub trait RewritePass {
    /// Visit (and possibly rewrite) a term.
    /// Given the original term and a function to get its rewritten childen.
    /// Returns a term if a rewrite happens.
    fn visit<F: Fn() -> Vec<Term>>(
        &mut self,
        orig: &Term,
        rewritten_children: F,
    ) -> Result<Option<Term>>;

    /// Rewrite the assertions and the precomputation of `computation`, bottom-up.
    ///
    /// Terms are visited in post-order from the assertions (in order) and then from the
    /// precomputation outputs (in evaluation order). Each term is visited once.
    fn traverse(&mut self, computation: &mut Computation) -> Result<()> {
        let mut cache = TermMap::<Term>::new();
        let roots: Vec<Term> = computation
            .outputs
            .iter()
            .cloned()
            .chain(
                computation
                    .precomputes
                    .sequence()
                    .iter()
                    .filter_map(|n| computation.precomputes.outputs().get(n).cloned()),
            )
            .collect();
        for t in PostOrderIter::from_roots_and_skips(roots, TermSet::new()) {
            let new_t_opt = {
                let get_children = || -> Vec<Term> {
                    t.cs.iter()
                        .map(|c| cache.get(c).expect("postorder cache").clone())
                        .collect()
                };
                self.visit(&t, get_children)?
            };
            let new_t = match new_t_opt {
                Some(n) => n,
                None => {
                    let cs: Vec<Term> = t
                        .cs
                        .iter()
                        .map(|c| cache.get(c).expect("postorder cache").clone())
                        .collect();
                    if cs == t.cs {
                        t.clone()
                    } else {
                        try_term(t.op.clone(), cs)?
                    }
                }
            };
            trace!("{} -> {}", t, new_t);
            cache.insert(t, new_t);
        }
        for o in &mut computation.outputs {
            *o = cache.get(o).expect("rewritten output").clone();
        }
        computation
            .precomputes
            .try_map_terms(|_, t| Ok(cache.get(t).expect("rewritten precompute").clone()))
    }
}
