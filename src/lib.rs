//! # circ_r1cs
//!
//! An IR-to-R1CS compiler backend.
//!
//! A [Computation](ir::term::Computation) is optimized ([ir::opt]), lowered to a rank-1
//! constraint system ([target::r1cs::trans]), reduced ([target::r1cs::opt]), and finalized into
//! two durable bundles: [ProverData](target::r1cs::ProverData) and
//! [VerifierData](target::r1cs::VerifierData). [pipeline::Pipeline] runs the whole sequence.

#![warn(missing_docs)]

pub mod cfg;
pub mod error;
#[macro_use]
pub mod ir;
pub mod pipeline;
pub mod target;

pub use error::{Error, Result};
