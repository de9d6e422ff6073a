//! Durable prover and verifier bundles
//!
//! A bundle is `MAGIC | kind (u8) | version (u16, little-endian) | SHA-256 of payload | bincode
//! payload`. Reading validates the header and digest, rejects truncated or trailing bytes, and
//! then checks everything construction guarantees: the witness plan type-checks and the
//! constraint system is over one field with every variable listed once.

use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::Path;

use bincode::Options;
use log::debug;
use serde::{de::DeserializeOwned, Serialize};
use sha2::{Digest, Sha256};

use circ_fields::FieldT;

use super::{ProverData, VarType, VerifierData};
use crate::error::{Error, Result};

/// The first bytes of every bundle
pub const MAGIC: &[u8; 8] = b"CIRCR1CS";
/// The bundle format this build reads and writes
pub const VERSION: u16 = 1;

const HEADER_LEN: usize = MAGIC.len() + 1 + 2;
const DIGEST_LEN: usize = 32;

/// What a bundle holds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BundleKind {
    /// [ProverData]
    Prover = 0,
    /// [VerifierData]
    Verifier = 1,
}

impl BundleKind {
    fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(BundleKind::Prover),
            1 => Some(BundleKind::Verifier),
            _ => None,
        }
    }
}

fn options() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .reject_trailing_bytes()
}

fn digest(payload: &[u8]) -> [u8; DIGEST_LEN] {
    let mut hasher = Sha256::new();
    hasher.update(payload);
    let mut out = [0u8; DIGEST_LEN];
    out.copy_from_slice(&hasher.finalize());
    out
}

fn encode<T: Serialize>(kind: BundleKind, data: &T) -> Result<Vec<u8>> {
    let payload = options()
        .serialize(data)
        .map_err(|e| Error::serialization(format!("{:?} bundle: {}", kind, e)))?;
    let mut bytes = Vec::with_capacity(HEADER_LEN + DIGEST_LEN + payload.len());
    bytes.extend_from_slice(MAGIC);
    bytes.push(kind as u8);
    bytes.extend_from_slice(&VERSION.to_le_bytes());
    bytes.extend_from_slice(&digest(&payload));
    bytes.extend_from_slice(&payload);
    debug!("Encoded {:?} bundle: {} bytes", kind, bytes.len());
    Ok(bytes)
}

fn corrupt(kind: BundleKind, what: impl std::fmt::Display) -> Error {
    Error::deserialization(format!("corrupt {:?} bundle (version {}): {}", kind, VERSION, what))
}

/// Check the header and digest, then decode the payload. The header is checked before the
/// digest's presence, so bundles from other versions are reported as such.
fn decode<T: DeserializeOwned>(kind: BundleKind, bytes: &[u8]) -> Result<T> {
    if bytes.len() < HEADER_LEN {
        return Err(Error::deserialization(format!(
            "{} bytes is too short for a bundle header (version {})",
            bytes.len(),
            VERSION
        )));
    }
    let (magic, rest) = bytes.split_at(MAGIC.len());
    if magic != MAGIC {
        return Err(Error::deserialization(format!(
            "bad magic {:?}, expected {:?} (version {})",
            String::from_utf8_lossy(magic),
            String::from_utf8_lossy(MAGIC),
            VERSION
        )));
    }
    match BundleKind::from_byte(rest[0]) {
        Some(k) if k == kind => {}
        Some(k) => {
            return Err(Error::deserialization(format!(
                "expected a {:?} bundle, found a {:?} bundle (version {})",
                kind, k, VERSION
            )))
        }
        None => {
            return Err(Error::deserialization(format!(
                "unknown bundle kind {} (version {})",
                rest[0], VERSION
            )))
        }
    }
    let version = u16::from_le_bytes([rest[1], rest[2]]);
    if version != VERSION {
        return Err(Error::deserialization(format!(
            "unsupported bundle version {}, this build reads version {}",
            version, VERSION
        )));
    }
    if rest.len() < 3 + DIGEST_LEN {
        return Err(corrupt(kind, "truncated before the payload digest"));
    }
    let (expected, payload) = rest[3..].split_at(DIGEST_LEN);
    if digest(payload)[..] != *expected {
        return Err(corrupt(kind, "the payload digest does not match"));
    }
    options().deserialize(payload).map_err(|e| corrupt(kind, e))
}

fn check_plan(kind: BundleKind, comp: &super::wit_comp::StagedWitComp) -> Result<Option<FieldT>> {
    if !comp.steps_topologically_ordered() {
        return Err(corrupt(kind, "the witness plan is malformed"));
    }
    comp.type_check()
        .map_err(|e| corrupt(kind, format!("the witness plan is ill-typed: {}", e)))
}

fn write_file(path: impl AsRef<Path>, bytes: &[u8]) -> Result<()> {
    let mut file = BufWriter::new(File::create(path)?);
    file.write_all(bytes)?;
    file.flush()?;
    Ok(())
}

fn read_file(path: impl AsRef<Path>) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    File::open(path)?.read_to_end(&mut bytes)?;
    Ok(bytes)
}

impl ProverData {
    /// Encode as a bundle
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        encode(BundleKind::Prover, self)
    }

    /// Decode a bundle
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let kind = BundleKind::Prover;
        let data: Self = decode(kind, bytes)?;
        data.r1cs.validate().map_err(|e| corrupt(kind, e))?;
        if let Some(f) = check_plan(kind, &data.precompute)? {
            if &f != data.r1cs.field() {
                return Err(corrupt(
                    kind,
                    format!("the witness plan computes over {}, not {}", f, data.r1cs.field()),
                ));
            }
        }
        let computed = data.precompute.stage_sizes().sum::<usize>();
        let needed = data
            .r1cs
            .vars()
            .iter()
            .filter(|v| v.ty() != VarType::Chall)
            .count();
        if computed != needed {
            return Err(corrupt(
                kind,
                format!("the witness plan computes {} values for {} variables", computed, needed),
            ));
        }
        Ok(data)
    }

    /// Write a bundle to `path`
    pub fn write(&self, path: impl AsRef<Path>) -> Result<()> {
        write_file(path, &self.to_bytes()?)
    }

    /// Read a bundle from `path`
    pub fn read(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_bytes(&read_file(path)?)
    }
}

impl VerifierData {
    /// Encode as a bundle
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        encode(BundleKind::Verifier, self)
    }

    /// Decode a bundle
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let kind = BundleKind::Verifier;
        let data: Self = decode(kind, bytes)?;
        check_plan(kind, &data.precompute)?;
        Ok(data)
    }

    /// Write a bundle to `path`
    pub fn write(&self, path: impl AsRef<Path>) -> Result<()> {
        write_file(path, &self.to_bytes()?)
    }

    /// Read a bundle from `path`
    pub fn read(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_bytes(&read_file(path)?)
    }
}

/// Write both bundles. Both are encoded before either file is created.
pub fn write_data(
    p_path: impl AsRef<Path>,
    v_path: impl AsRef<Path>,
    p_data: &ProverData,
    v_data: &VerifierData,
) -> Result<()> {
    let p_bytes = p_data.to_bytes()?;
    let v_bytes = v_data.to_bytes()?;
    write_file(p_path, &p_bytes)?;
    write_file(v_path, &v_bytes)
}

/// Read both bundles
pub fn read_data(
    p_path: impl AsRef<Path>,
    v_path: impl AsRef<Path>,
) -> Result<(ProverData, VerifierData)> {
    Ok((ProverData::read(p_path)?, VerifierData::read(v_path)?))
}
