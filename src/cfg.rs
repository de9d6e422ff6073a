//! Configuration
//!
//! A [CircCfg] is built from command-line/environment options ([CircOpt]) and passed explicitly
//! to whatever needs it. There is no process-wide configuration.

use circ_fields::FieldT;
use rug::Integer;

use crate::error::{Error, Result};
use crate::pipeline::PipelineCfg;

/// Re-export our clap version
pub use circ_opt::clap;
/// Re-export our clap [clap::Args]
pub use circ_opt::CircOpt;

/// A validated configuration. Constructible with [TryFrom::try_from] a [CircOpt].
#[derive(Clone, Debug)]
pub struct CircCfg {
    opt: CircOpt,
    field: FieldT,
}

fn parse_modulus(s: &str) -> Result<FieldT> {
    let error = |r: &str| Error::Parse(format!("The field modulus '{}' is {}", s, r));
    let i = Integer::from_str_radix(s, 10).map_err(|_| error("not an integer"))?;
    if i < 2 || i.is_probably_prime(30) == rug::integer::IsPrime::No {
        return Err(error("not a prime"));
    }
    Ok(FieldT::from(i))
}

impl TryFrom<CircOpt> for CircCfg {
    type Error = Error;
    fn try_from(opt: CircOpt) -> Result<Self> {
        let field = if !opt.field.custom_modulus.is_empty() {
            parse_modulus(&opt.field.custom_modulus)?
        } else {
            match opt.field.builtin {
                circ_opt::BuiltinField::Curve25519 => FieldT::Curve25519,
                circ_opt::BuiltinField::Bls12381 => FieldT::Bls12381,
                circ_opt::BuiltinField::Bn254 => FieldT::Bn254,
            }
        };
        Ok(Self { opt, field })
    }
}

impl Default for CircCfg {
    fn default() -> Self {
        Self {
            opt: CircOpt::default(),
            field: FieldT::default(),
        }
    }
}

/// Used to expose all fields of [CircOpt].
impl std::ops::Deref for CircCfg {
    type Target = CircOpt;

    fn deref(&self) -> &Self::Target {
        &self.opt
    }
}

impl CircCfg {
    /// The field to compile to
    pub fn field(&self) -> &FieldT {
        &self.field
    }

    /// Pipeline options
    pub fn pipeline(&self) -> PipelineCfg {
        PipelineCfg {
            skip_linearity_reduction: self.opt.r1cs.skip_linearity_reduction,
            lc_elim_thresh: self.opt.r1cs.lc_elim_thresh,
            frequent_gc: self.opt.ir.frequent_gc,
        }
    }
}
