//! Human-readable summaries of prover bundles

use std::fmt::{self, Write};

use super::{Lc, ProverData, R1csFinal};

/// Render `lc` as a sum: the constant (if non-zero), then `coeff*name` terms in variable order.
/// Unit coefficients are omitted; the zero combination is `0`.
pub fn format_sum(r1cs: &R1csFinal, lc: &Lc) -> String {
    let mut terms = Vec::new();
    if !lc.constant().is_zero() {
        terms.push(lc.constant().i().to_string());
    }
    for (var, coeff) in lc.sorted_monomials() {
        let name = r1cs.name(*var).unwrap_or("?");
        if coeff.is_one() {
            terms.push(name.to_owned());
        } else {
            terms.push(format!("{}*{}", coeff.i(), name));
        }
    }
    if terms.is_empty() {
        "0".to_owned()
    } else {
        terms.join(" + ")
    }
}

fn write_report(pd: &ProverData, out: &mut impl Write) -> fmt::Result {
    let r1cs = &pd.r1cs;
    writeln!(out, "=== R1CS Summary ===")?;
    writeln!(out, "Field modulus: {}", r1cs.field().modulus())?;
    writeln!(out, "Number of variables: {}", r1cs.vars().len())?;
    writeln!(out, "Number of constraints: {}", r1cs.constraints().len())?;

    writeln!(out, "\n=== Variables ===")?;
    for (i, var) in r1cs.vars().iter().enumerate() {
        writeln!(
            out,
            "Var {} ({:?}): {}",
            i,
            var,
            r1cs.name(*var).unwrap_or("<unnamed>")
        )?;
    }

    writeln!(out, "\n=== Constraints ===")?;
    for (i, (a, b, c)) in r1cs.constraints().iter().enumerate() {
        writeln!(out, "\nConstraint {}:", i)?;
        writeln!(out, "  A: {}", format_sum(r1cs, a))?;
        writeln!(out, "  B: {}", format_sum(r1cs, b))?;
        writeln!(out, "  C: {}", format_sum(r1cs, c))?;
    }

    writeln!(out, "\n=== Witness Computation ===")?;
    writeln!(out, "Number of stages: {}", pd.precompute.num_stages())?;
    writeln!(out, "Number of computation steps: {}", pd.precompute.num_steps())?;
    writeln!(out, "Number of step arguments: {}", pd.precompute.num_step_args())
}

/// The full report for `pd`: modulus, variable table, constraints, and witness plan sizes.
pub fn report(pd: &ProverData) -> String {
    let mut s = String::new();
    write_report(pd, &mut s).expect("writing to a String");
    s
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ir::term::text::parse_computation;
    use crate::target::r1cs::opt::reduce_linearities;
    use crate::target::r1cs::trans::to_r1cs;
    use circ_fields::FieldT;
    use rug::Integer;

    #[test]
    fn product_report() {
        let cs = parse_computation(
            b"
            (computation
                (metadata (inputs (x (mod 101)) (y (mod 101)) (return (mod 101) public)))
                (= return (* #f2m101 x y)))
            ",
        )
        .unwrap();
        let r1cs = to_r1cs(&cs, FieldT::from(Integer::from(101))).unwrap();
        let (pd, _) = reduce_linearities(r1cs, 50).finalize(&cs);
        let r = report(&pd);
        assert!(r.contains("Field modulus: 101"));
        assert!(r.contains("Var 0 (Inst(0)): return"));
        assert!(r.contains("Number of constraints: 1"));
        assert!(r.contains("  A: 2*x\n  B: y\n  C: return\n"));
    }
}
