//! The intermediate representation: terms, computations, and passes over them

#[macro_use]
pub mod term;
pub mod opt;
