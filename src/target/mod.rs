//! Compilation targets

pub mod r1cs;
