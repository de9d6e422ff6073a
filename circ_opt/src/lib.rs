//! Options for the CirC R1CS backend.
//!
//! ## Contents
//!
//! * A type for options [CircOpt] containing fields for module options:
//!    * `r1cs`: [R1csOpt]
//!    * `field`: [FieldOpt]
//!    * `ir`: [IrOpt]
//!    * all options types implement:
//!       * std's [Default]
//!       * clap's [Args]; all options are settable by
//!          * environmental variable (SHOUTY_SNEK_CASE), e.g., `"R1CS_LC_ELIM_THRESH"`
//!          * long option (kebab-case), e.g., `"--r1cs-lc-elim-thresh"`
//!       * these a guaranteed to agree (and we test this)
//!
//! ## Constructing custom options in a compiler
//!
//! Use our (rexported) version of clap ([crate::clap]) and include [CircOpt] in your
//! [clap::Parser].
//!
//! ```rust
//! use circ_opt::{CircOpt, clap::Parser};
//!
//! #[derive(Parser, Debug)]
//! struct BinaryOpt {
//!     #[command(flatten)]
//!     pub circ: CircOpt,
//! }
//!
//! fn main() {
//!     let opt = BinaryOpt::parse();
//! }
//! ```

use clap::{ArgAction, Args, ValueEnum};

use std::default::Default;

/// Re-export our version of clap.
pub use clap;

#[derive(Args, Debug, Clone, Default, PartialEq, Eq)]
/// Options that configure the compiler
pub struct CircOpt {
    /// Options for the R1cs backend
    #[command(flatten)]
    pub r1cs: R1csOpt,
    /// Options for the prime field used
    #[command(flatten)]
    pub field: FieldOpt,
    /// Options for the IR itself
    #[command(flatten)]
    pub ir: IrOpt,
}

/// Options for the R1cs backend
#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub struct R1csOpt {
    /// Skip the linearity reduction pass (more constraints, same semantics)
    #[arg(
        long = "r1cs-skip-linearity-reduction",
        env = "R1CS_SKIP_LINEARITY_REDUCTION",
        action = ArgAction::Set,
        default_value = "false"
    )]
    pub skip_linearity_reduction: bool,

    #[arg(
        long = "r1cs-lc-elim-thresh",
        env = "R1CS_LC_ELIM_THRESH",
        default_value = "50"
    )]
    /// linear combination constraints up to this size will be eliminated
    pub lc_elim_thresh: usize,
}

impl Default for R1csOpt {
    fn default() -> Self {
        Self {
            skip_linearity_reduction: false,
            lc_elim_thresh: 50,
        }
    }
}

/// Options for the prime field used
#[derive(Args, Debug, Default, Clone, PartialEq, Eq)]
pub struct FieldOpt {
    /// Which field to use
    #[arg(
        long = "field-builtin",
        env = "FIELD_BUILTIN",
        value_enum,
        default_value = "curve25519"
    )]
    pub builtin: BuiltinField,

    /// Which modulus to use (overrides [FieldOpt::builtin])
    #[arg(
        long = "field-custom-modulus",
        env = "FIELD_CUSTOM_MODULUS",
        default_value = ""
    )]
    pub custom_modulus: String,
}

#[derive(ValueEnum, Debug, PartialEq, Eq, Clone, Copy)]
/// Which field to use
pub enum BuiltinField {
    /// Curve25519 scalar field (Spartan)
    Curve25519,
    /// BLS12-381 scalar field
    Bls12381,
    /// BN-254 scalar field
    Bn254,
}

impl Default for BuiltinField {
    fn default() -> Self {
        BuiltinField::Curve25519
    }
}

/// Options for the IR itself
#[derive(Args, Debug, Default, Clone, PartialEq, Eq)]
pub struct IrOpt {
    /// Garbage collection after each optimization pass.
    #[arg(
        long = "ir-frequent-gc",
        env = "IR_FREQUENT_GC",
        action = ArgAction::Set,
        default_value = "false"
    )]
    pub frequent_gc: bool,
}

#[cfg(test)]
mod test {

    use super::*;

    use clap::{CommandFactory, Parser};
    use heck::{ToKebabCase, ToShoutySnekCase};

    #[derive(Parser, Debug)]
    struct BinaryOpt {
        #[command(flatten)]
        pub circ: CircOpt,
    }

    #[test]
    fn std_and_clap_defaults_agree() {
        let std_default: CircOpt = Default::default();
        let clap_default: CircOpt = BinaryOpt::parse_from::<_, &str>(["bin"]).circ;
        assert_eq!(std_default, clap_default);
    }

    #[test]
    fn skip_flag_parses() {
        let o = BinaryOpt::parse_from([
            "bin",
            "--r1cs-skip-linearity-reduction",
            "true",
            "--field-builtin",
            "bn254",
        ])
        .circ;
        assert!(o.r1cs.skip_linearity_reduction);
        assert_eq!(o.field.builtin, BuiltinField::Bn254);
        assert_eq!(o.r1cs.lc_elim_thresh, 50);
    }

    #[test]
    fn long_and_env_names_agree() {
        for arg in BinaryOpt::command().get_arguments() {
            if let Some(long_name) = arg.get_long() {
                if let Some(env_name) = arg.get_env() {
                    let env_name = env_name.to_str().unwrap();
                    assert_eq!(
                        env_name,
                        long_name.TO_SHOUTY_SNEK_CASE(),
                        "The long name\n    '{}'\ndoes not match the envvar name\n    '{}'\n",
                        long_name,
                        env_name,
                    );
                    assert_eq!(
                        long_name,
                        long_name.to_kebab_case(),
                        "The long name '{}' is not in kebab-case",
                        long_name,
                    );
                } else {
                    panic!("Long option '{}' has no envvar", long_name);
                }
            } else if let Some(env_name) = arg.get_env() {
                let env_name = env_name.to_str().unwrap();
                panic!("Envar option '{}' has no long_name", env_name);
            }
        }
    }
}
