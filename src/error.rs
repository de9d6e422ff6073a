//! Errors

use crate::ir::term::TypeError;
use circ_fields::FieldT;
use thiserror::Error;

#[derive(Debug, Error)]
/// Everything that can go wrong while compiling, staging witnesses, or loading bundles
pub enum Error {
    /// An operator (or aggregate shape) that a pass or gadget has no rule for
    #[error("unsupported operation `{op}` in {context}")]
    UnsupportedOp {
        /// the operator
        op: String,
        /// the pass or gadget that rejected it
        context: String,
    },
    /// Two different prime fields met
    #[error("field mismatch: expected modulus {}, found modulus {}", .expected.modulus(), .found.modulus())]
    FieldMismatch {
        /// the field in use
        expected: FieldT,
        /// the field that was supplied
        found: FieldT,
    },
    /// A variable needed to compute the witness has no value
    #[error("missing value for witness variable `{name}`")]
    MissingWitnessValue {
        /// the variable name
        name: String,
    },
    /// An input value of the wrong sort
    #[error("bad value for input `{name}`: {reason}")]
    BadInput {
        /// the variable name
        name: String,
        /// what was wrong
        reason: String,
    },
    /// A bundle could not be decoded
    #[error("could not deserialize bundle: {reason}")]
    DeserializationFailed {
        /// magic, kind, version, or payload problem
        reason: String,
    },
    /// A bundle, key, or proof could not be encoded
    #[error("could not serialize {0}")]
    Serialization(String),
    /// A constraint does not hold
    #[error("unsatisfied constraint: {0}")]
    Unsatisfied(String),
    /// Textual IR or value-map syntax error
    #[error("parse error: {0}")]
    Parse(String),
    /// Ill-sorted IR
    #[error("{0}")]
    Type(#[from] TypeError),
    /// File access
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// An [Error::UnsupportedOp]
    pub fn unsupported(op: impl ToString, context: impl ToString) -> Self {
        Error::UnsupportedOp {
            op: op.to_string(),
            context: context.to_string(),
        }
    }

    /// An [Error::Serialization]
    pub fn serialization(what: impl ToString) -> Self {
        Error::Serialization(what.to_string())
    }

    /// An [Error::DeserializationFailed]
    pub fn deserialization(reason: impl ToString) -> Self {
        Error::DeserializationFailed {
            reason: reason.to_string(),
        }
    }
}

/// Result type for this crate
pub type Result<T> = std::result::Result<T, Error>;

/// Fail with [Error::FieldMismatch] unless `found` is `expected`.
pub fn check_field(expected: &FieldT, found: &FieldT) -> Result<()> {
    if expected == found {
        Ok(())
    } else {
        Err(Error::FieldMismatch {
            expected: expected.clone(),
            found: found.clone(),
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use rug::Integer;

    #[test]
    fn field_check() {
        assert!(check_field(&FieldT::Bn254, &FieldT::Bn254).is_ok());
        let e = check_field(&FieldT::Curve25519, &FieldT::from(Integer::from(101))).unwrap_err();
        assert!(matches!(e, Error::FieldMismatch { .. }));
        assert!(e.to_string().contains("found modulus 101"));
    }

    #[test]
    fn encoding_failures_are_not_decoding_failures() {
        let e = Error::serialization("Prover bundle: sequence must have a length");
        assert!(e.to_string().starts_with("could not serialize Prover bundle"));
        assert!(!matches!(e, Error::DeserializationFailed { .. }));
    }

    #[test]
    fn messages_name_their_subject() {
        let e = Error::MissingWitnessValue { name: "x".into() };
        assert_eq!(e.to_string(), "missing value for witness variable `x`");
        let e = Error::unsupported("select", "r1cs lowering");
        assert_eq!(e.to_string(), "unsupported operation `select` in r1cs lowering");
    }
}
