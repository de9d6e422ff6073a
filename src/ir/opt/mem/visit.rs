use crate::error::Result;
use crate::ir::term::*;

/// A visitor for traversing terms, and visiting the array-related parts.
///
/// Visits:
/// * EQs over arrays
/// * Constant arrays (both `const-array` terms and array literals)
/// * ITEs over arrays
/// * array variables
/// * STOREs
/// * SELECTs
///
/// For the EQs and SELECTs, you have the ability to (optionally) return a replacement for the
/// term. This can be used to "cut" the array out of the term, since EQs and SELECTs are how
/// information leaves an array.
///
/// All visitors receive the original term and the rewritten children.
pub trait MemVisitor {
    /// Visit a const array
    fn visit_const_array(
        &mut self,
        _orig: &Term,
        _key_sort: &Sort,
        _val: &Term,
        _size: usize,
    ) -> Result<()> {
        Ok(())
    }
    /// Visit an array literal
    fn visit_array_lit(&mut self, _orig: &Term, _a: &Array) -> Result<()> {
        Ok(())
    }
    /// Visit an equality, whose children are `a` and `b`.
    fn visit_eq(&mut self, _orig: &Term, _a: &Term, _b: &Term) -> Result<Option<Term>> {
        Ok(None)
    }
    /// Visit an array-valued ITE
    fn visit_ite(&mut self, _orig: &Term, _c: &Term, _t: &Term, _f: &Term) -> Result<()> {
        Ok(())
    }
    /// Visit a STORE
    fn visit_store(&mut self, _orig: &Term, _a: &Term, _k: &Term, _v: &Term) -> Result<()> {
        Ok(())
    }
    /// Visit a SELECT
    fn visit_select(&mut self, _orig: &Term, _a: &Term, _k: &Term) -> Result<Option<Term>> {
        Ok(None)
    }
    /// Visit an array variable
    fn visit_var(&mut self, _orig: &Term, _name: &str, _s: &Sort) -> Result<()> {
        Ok(())
    }

    /// Traverse a node, visiting memory-related terms.
    ///
    /// Can be used to remove memory-related terms by replacing the EQs and SELECTs which extract
    /// other terms from them. Array-sorted terms map to themselves in `cache`; other terms map to
    /// their rewritten versions. The cache may be shared across calls.
    ///
    /// Returns the transformed term.
    fn traverse(&mut self, node: &Term, cache: &mut TermMap<Term>) -> Result<Term> {
        for t in PostOrderIter::new(node.clone()) {
            if cache.contains_key(&t) {
                continue;
            }
            let c_get = |x: &Term| cache.get(x).expect("postorder cache").clone();
            let get = |i: usize| c_get(&t.cs[i]);
            let new_t_opt = match check_raw(&t)? {
                Sort::Array(..) => {
                    match &t.op {
                        Op::Var(name, s) => self.visit_var(&t, name, s)?,
                        Op::Const(Value::Array(a)) => self.visit_array_lit(&t, a)?,
                        Op::Ite => self.visit_ite(&t, &get(0), &get(1), &get(2))?,
                        Op::Store => self.visit_store(&t, &get(0), &get(1), &get(2))?,
                        Op::ConstArray(s, n) => self.visit_const_array(&t, s, &get(0), *n)?,
                        _ => {}
                    };
                    Some(t.clone())
                }
                _ => match &t.op {
                    Op::Eq if matches!(check_raw(&t.cs[0])?, Sort::Array(..)) => {
                        self.visit_eq(&t, &get(0), &get(1))?
                    }
                    Op::Select => self.visit_select(&t, &get(0), &get(1))?,
                    _ => None,
                },
            };
            let new_t = match new_t_opt {
                Some(n) => n,
                None => {
                    let cs: Vec<Term> = t.cs.iter().map(c_get).collect();
                    if cs == t.cs {
                        t.clone()
                    } else {
                        try_term(t.op.clone(), cs)?
                    }
                }
            };
            cache.insert(t, new_t);
        }
        Ok(cache.get(node).expect("postorder cache").clone())
    }
}
