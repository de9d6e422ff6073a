//! The compilation pipeline: IR optimization, lowering, and constraint reduction

use circ_fields::FieldT;
use log::{debug, info};

use crate::error::Result;
use crate::ir::opt::{self, Opt};
use crate::ir::term::{garbage_collect, Computation};
use crate::target::r1cs::opt::reduce_linearities;
use crate::target::r1cs::trans::to_r1cs;
use crate::target::r1cs::{ProverData, R1cs, VerifierData};

/// Pipeline options
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PipelineCfg {
    /// Omit [Opt::LinearityReduction]
    pub skip_linearity_reduction: bool,
    /// Only substitute a linear combination with fewer than this many monomials
    pub lc_elim_thresh: usize,
    /// Collect unused terms after each IR pass
    pub frequent_gc: bool,
}

impl Default for PipelineCfg {
    fn default() -> Self {
        Self {
            skip_linearity_reduction: false,
            lc_elim_thresh: 50,
            frequent_gc: false,
        }
    }
}

/// A fixed sequence of passes
#[derive(Clone, Debug)]
pub struct Pipeline {
    cfg: PipelineCfg,
    passes: Vec<Opt>,
}

impl Pipeline {
    /// The passes, in order: folding, tuples, arrays, then (unless skipped) linearity.
    pub fn new(cfg: PipelineCfg) -> Self {
        let mut passes = vec![Opt::ConstantFold, Opt::Tuple, Opt::Array];
        if !cfg.skip_linearity_reduction {
            passes.push(Opt::LinearityReduction);
        }
        Self { cfg, passes }
    }

    /// The passes this pipeline runs
    pub fn passes(&self) -> &[Opt] {
        &self.passes
    }

    /// Run the IR passes on `cs`.
    pub fn run_ir(&self, cs: &mut Computation) -> Result<()> {
        for o in self.passes.iter().filter(|o| o.is_ir()) {
            opt::apply(cs, *o)?;
            if self.cfg.frequent_gc {
                garbage_collect();
            }
        }
        Ok(())
    }

    /// Run the constraint-system passes on `r1cs`.
    pub fn run_r1cs(&self, mut r1cs: R1cs) -> R1cs {
        for o in self.passes.iter().filter(|o| !o.is_ir()) {
            debug!("Applying: {:?}", o);
            r1cs = reduce_linearities(r1cs, self.cfg.lc_elim_thresh);
        }
        r1cs
    }

    /// Optimize, lower to `field`, reduce, and finalize.
    pub fn compile(&self, mut cs: Computation, field: FieldT) -> Result<(ProverData, VerifierData)> {
        self.run_ir(&mut cs)?;
        let r1cs = to_r1cs(&cs, field)?;
        info!(
            "Lowered: {} constraints, {} variables",
            r1cs.constraints().len(),
            r1cs.num_vars()
        );
        let r1cs = self.run_r1cs(r1cs);
        info!(
            "Final: {} constraints, {} variables",
            r1cs.constraints().len(),
            r1cs.num_vars()
        );
        Ok(r1cs.finalize(&cs))
    }
}
