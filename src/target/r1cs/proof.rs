//! A trait for proof systems that consume prover and verifier bundles

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use bincode::{deserialize_from, serialize_into};
use circ_fields::FieldT;
use fxhash::FxHashMap as HashMap;
use serde::{Deserialize, Serialize};

use super::{ProverData, VerifierData};
use crate::error::{check_field, Error, Result};
use crate::ir::term::text::parse_value_map_with_field;
use crate::ir::term::Value;

fn serialize_into_file<S: Serialize, P: AsRef<Path>>(data: &S, path: P) -> Result<()> {
    let mut file = BufWriter::new(File::create(path.as_ref())?);
    serialize_into(&mut file, data)
        .map_err(|e| Error::serialization(format!("{}: {}", path.as_ref().display(), e)))
}

fn deserialize_from_file<D: for<'a> Deserialize<'a>, P: AsRef<Path>>(path: P) -> Result<D> {
    deserialize_from(BufReader::new(File::open(path.as_ref())?))
        .map_err(|e| Error::deserialization(format!("{}: {}", path.as_ref().display(), e)))
}

/// Read a value map from `path`; field literals without a modulus are in `field`.
pub fn value_map_from_path<P: AsRef<Path>>(
    path: P,
    field: &FieldT,
) -> Result<HashMap<String, Value>> {
    parse_value_map_with_field(&std::fs::read(path)?, field)
}

/// A proof system over one prime field
///
/// Every entry point checks that the bundle's field is [ProofSystem::modulus] before anything
/// else.
pub trait ProofSystem {
    /// A verifying key
    type VerifyingKey: Serialize + for<'a> Deserialize<'a>;
    /// A proving key
    type ProvingKey: Serialize + for<'a> Deserialize<'a>;
    /// A proof
    type Proof: Serialize + for<'a> Deserialize<'a>;

    /// The field this system proves statements over
    fn modulus() -> FieldT;
    /// Setup
    fn setup(
        p_data: ProverData,
        v_data: VerifierData,
    ) -> Result<(Self::ProvingKey, Self::VerifyingKey)>;
    /// Proving
    fn prove(pk: &Self::ProvingKey, witness: &HashMap<String, Value>) -> Result<Self::Proof>;
    /// Verification
    fn verify(
        vk: &Self::VerifyingKey,
        inst: &HashMap<String, Value>,
        pf: &Self::Proof,
    ) -> Result<bool>;

    /// Setup to files
    fn setup_fs(
        p_data: ProverData,
        v_data: VerifierData,
        pk_path: impl AsRef<Path>,
        vk_path: impl AsRef<Path>,
    ) -> Result<()> {
        let (pk, vk) = Self::setup(p_data, v_data)?;
        Self::write_keys(&pk, &vk, pk_path, vk_path)
    }
    /// Write keys produced by [ProofSystem::setup]
    fn write_keys(
        pk: &Self::ProvingKey,
        vk: &Self::VerifyingKey,
        pk_path: impl AsRef<Path>,
        vk_path: impl AsRef<Path>,
    ) -> Result<()> {
        serialize_into_file(pk, pk_path)?;
        serialize_into_file(vk, vk_path)
    }
    /// Prove to/from files
    fn prove_fs(
        pk_path: impl AsRef<Path>,
        witness_path: impl AsRef<Path>,
        pf_path: impl AsRef<Path>,
    ) -> Result<()> {
        let pk: Self::ProvingKey = deserialize_from_file(pk_path)?;
        let witness = value_map_from_path(witness_path, &Self::modulus())?;
        let pf = Self::prove(&pk, &witness)?;
        serialize_into_file(&pf, pf_path)
    }
    /// Verify from files
    fn verify_fs(
        vk_path: impl AsRef<Path>,
        instance_path: impl AsRef<Path>,
        pf_path: impl AsRef<Path>,
    ) -> Result<bool> {
        let instance = value_map_from_path(&instance_path, &Self::modulus())?;
        let vk: Self::VerifyingKey = deserialize_from_file(vk_path)?;
        let pf: Self::Proof = deserialize_from_file(pf_path)?;
        Self::verify(&vk, &instance, &pf)
    }
}

/// Check that `p_data` is over `S`'s field.
pub fn check_prover_field<S: ProofSystem + ?Sized>(p_data: &ProverData) -> Result<()> {
    check_field(&S::modulus(), p_data.r1cs.field())
}
