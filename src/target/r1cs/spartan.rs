//! Export R1CS bundles to Spartan
use crate::error::{check_field, Error, Result};
use crate::target::r1cs::proof::ProofSystem;
use crate::target::r1cs::*;
use curve25519_dalek::scalar::Scalar;
use fxhash::FxHashMap as HashMap;
use gmp_mpfr_sys::gmp::limb_t;
use libspartan::{InputsAssignment, Instance, NIZKGens, VarsAssignment, NIZK};
use log::debug;
use merlin::Transcript;
use rug::Integer;
use serde::{Deserialize, Serialize};

const CONTEXT: &str = "spartan";

/// One matrix entry: (constraint, column, coefficient)
type Entry = (usize, usize, [u8; 32]);

/// The Spartan NIZK, over the Curve25519 scalar field
pub struct Spartan;

/// The shape of a constraint system, in Spartan's column layout: witness variables, then the
/// constant one, then the instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shape {
    num_cons: usize,
    num_vars: usize,
    num_inputs: usize,
    a: Vec<Entry>,
    b: Vec<Entry>,
    c: Vec<Entry>,
}

impl Shape {
    fn instance(&self) -> Result<Instance> {
        Instance::new(
            self.num_cons,
            self.num_vars,
            self.num_inputs,
            &self.a,
            &self.b,
            &self.c,
        )
        .map_err(|e| Error::unsupported(format!("instance shape: {:?}", e), CONTEXT))
    }

    fn gens(&self) -> NIZKGens {
        NIZKGens::new(self.num_cons, self.num_vars, self.num_inputs)
    }
}

/// A Spartan verifying key
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpartanVk {
    v_data: VerifierData,
    shape: Shape,
}

impl ProofSystem for Spartan {
    type VerifyingKey = SpartanVk;
    type ProvingKey = ProverData;
    type Proof = NIZK;

    fn modulus() -> FieldT {
        FieldT::Curve25519
    }

    fn setup(p_data: ProverData, v_data: VerifierData) -> Result<(ProverData, SpartanVk)> {
        check_field(&Self::modulus(), p_data.r1cs.field())?;
        let (shape, _) = r1cs_to_spartan(&p_data)?;
        Ok((p_data, SpartanVk { v_data, shape }))
    }

    fn prove(pk: &ProverData, witness: &HashMap<String, Value>) -> Result<NIZK> {
        check_field(&Self::modulus(), pk.r1cs.field())?;
        let (shape, ids) = r1cs_to_spartan(pk)?;
        let values = pk.extend_r1cs_witness(witness)?;
        pk.r1cs.check_all(&values)?;
        let mut wit = vec![[0u8; 32]; shape.num_vars];
        let mut inp = vec![[0u8; 32]; shape.num_inputs];
        for (var, id) in &ids {
            let v = int_to_scalar(&values[var].i()).to_bytes();
            match var.ty() {
                VarType::FinalWit => wit[*id] = v,
                _ => inp[*id - shape.num_vars - 1] = v,
            }
        }
        let bad = |e| Error::unsupported(format!("assignment: {:?}", e), CONTEXT);
        let assn_witness = VarsAssignment::new(&wit).map_err(bad)?;
        let assn_inputs = InputsAssignment::new(&inp).map_err(bad)?;
        let inst = shape.instance()?;
        debug!(
            "Proving with Spartan: {} constraints, {} witness variables, {} inputs",
            shape.num_cons, shape.num_vars, shape.num_inputs
        );
        let gens = shape.gens();
        let mut prover_transcript = Transcript::new(b"nizk_example");
        Ok(NIZK::prove(
            &inst,
            assn_witness,
            &assn_inputs,
            &gens,
            &mut prover_transcript,
        ))
    }

    fn verify(vk: &SpartanVk, inst: &HashMap<String, Value>, pf: &NIZK) -> Result<bool> {
        let values = vk.v_data.eval(inst)?;
        if let Some(v) = values.first() {
            check_field(&Self::modulus(), &v.ty())?;
        }
        let inp: Vec<[u8; 32]> = values
            .iter()
            .map(|v| int_to_scalar(&v.i()).to_bytes())
            .collect();
        let inputs = InputsAssignment::new(&inp)
            .map_err(|e| Error::unsupported(format!("assignment: {:?}", e), CONTEXT))?;
        let instance = vk.shape.instance()?;
        let gens = vk.shape.gens();
        let mut verifier_transcript = Transcript::new(b"nizk_example");
        Ok(pf
            .verify(&instance, &inputs, &mut verifier_transcript, &gens)
            .is_ok())
    }
}

/// Lay out `prover_data`'s constraint system for Spartan.
///
/// Returns the shape and each variable's Spartan column.
pub fn r1cs_to_spartan(prover_data: &ProverData) -> Result<(Shape, HashMap<Var, usize>)> {
    check_field(&Spartan::modulus(), prover_data.r1cs.field())?;
    let mut trans: HashMap<Var, usize> = HashMap::default();
    let vars = prover_data.r1cs.vars();
    if let Some(v) = vars
        .iter()
        .find(|v| !matches!(v.ty(), VarType::Inst | VarType::FinalWit))
    {
        return Err(Error::unsupported(format!("{} variables", v.ty()), CONTEXT));
    }
    for var in vars.iter().filter(|v| v.ty() == VarType::FinalWit) {
        let id = trans.len();
        trans.insert(*var, id);
    }
    let num_vars = trans.len();
    let const_id = num_vars;
    for var in vars.iter().filter(|v| v.ty() == VarType::Inst) {
        let id = trans.len() + 1;
        trans.insert(*var, id);
    }
    let num_inputs = trans.len() - num_vars;

    let constraints = prover_data.r1cs.constraints();
    if constraints.is_empty() {
        return Err(Error::unsupported("a system with no constraints", CONTEXT));
    }
    let mut a: Vec<Entry> = Vec::new();
    let mut b: Vec<Entry> = Vec::new();
    let mut c: Vec<Entry> = Vec::new();
    for (i, (lc_a, lc_b, lc_c)) in constraints.iter().enumerate() {
        a.extend(lc_to_v(lc_a, const_id, &trans).map(|(sid, value)| (i, sid, value)));
        b.extend(lc_to_v(lc_b, const_id, &trans).map(|(sid, value)| (i, sid, value)));
        c.extend(lc_to_v(lc_c, const_id, &trans).map(|(sid, value)| (i, sid, value)));
    }
    Ok((
        Shape {
            num_cons: constraints.len(),
            num_vars,
            num_inputs,
            a,
            b,
            c,
        },
        trans,
    ))
}

/// Convert a non-negative integer (below the Curve25519 scalar modulus) to a scalar.
pub fn int_to_scalar(i: &Integer) -> Scalar {
    let mut accumulator = Scalar::zero();
    let limb_bits = (std::mem::size_of::<limb_t>() as u64) << 3;
    assert_eq!(limb_bits, 64);

    let two: u64 = 2;
    let mut m = Scalar::from(two.pow(63));
    m *= Scalar::from(two);

    // as_ref yeilds a least-significant-first array.
    for digit in i.as_ref().iter().rev() {
        accumulator *= m;
        accumulator += Scalar::from(*digit);
    }
    accumulator
}

// Lc -> (column, coefficient) pairs, in variable order
fn lc_to_v<'a>(
    lc: &'a Lc,
    const_id: usize,
    trans: &'a HashMap<Var, usize>,
) -> impl Iterator<Item = (usize, [u8; 32])> + 'a {
    let constant = (!lc.constant().is_zero())
        .then(|| (const_id, int_to_scalar(&lc.constant().i()).to_bytes()));
    lc.sorted_monomials()
        .into_iter()
        .map(move |(k, m)| (trans[k], int_to_scalar(&m.i()).to_bytes()))
        .chain(constant)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ir::term::text::{parse_computation, parse_value_map_with_field};
    use crate::target::r1cs::trans::to_r1cs;

    #[test]
    fn scalars() {
        assert_eq!(int_to_scalar(&Integer::from(7)), Scalar::from(7u64));
        let big = Integer::from(1) << 70;
        assert_eq!(
            int_to_scalar(&big),
            Scalar::from(1u64 << 35) * Scalar::from(1u64 << 35)
        );
    }

    #[test]
    fn prove_product() {
        let cs = parse_computation(
            b"
            (computation
                (metadata (inputs
                    (x (mod 7237005577332262213973186563042994240857116359379907606001950938285454250989))
                    (y (mod 7237005577332262213973186563042994240857116359379907606001950938285454250989))
                    (return (mod 7237005577332262213973186563042994240857116359379907606001950938285454250989) public)))
                (precompute
                    ((x (mod 7237005577332262213973186563042994240857116359379907606001950938285454250989))
                     (y (mod 7237005577332262213973186563042994240857116359379907606001950938285454250989)))
                    ((return (mod 7237005577332262213973186563042994240857116359379907606001950938285454250989)))
                    (tuple (* x y)))
                (= return (* x y)))
            ",
        )
        .unwrap();
        let f = Spartan::modulus();
        let r1cs = crate::target::r1cs::opt::reduce_linearities(to_r1cs(&cs, f.clone()).unwrap(), 50);
        let (pd, vd) = r1cs.finalize(&cs);
        let (pk, vk) = Spartan::setup(pd, vd).unwrap();
        let w = parse_value_map_with_field(b"(let ((x #f3) (y #f4)) true)", &f).unwrap();
        let pf = Spartan::prove(&pk, &w).unwrap();
        let good = parse_value_map_with_field(b"(let ((return #f12)) true)", &f).unwrap();
        let bad = parse_value_map_with_field(b"(let ((return #f13)) true)", &f).unwrap();
        assert!(Spartan::verify(&vk, &good, &pf).unwrap());
        assert!(!Spartan::verify(&vk, &bad, &pf).unwrap());
    }

    #[test]
    fn other_fields_are_rejected() {
        let cs = parse_computation(
            b"
            (computation
                (metadata (inputs (x (mod 101)) (y (mod 101) public)))
                (= y (* x x)))
            ",
        )
        .unwrap();
        let (pd, vd) = to_r1cs(&cs, FieldT::from(Integer::from(101)))
            .unwrap()
            .finalize(&cs);
        assert!(matches!(
            Spartan::setup(pd, vd),
            Err(Error::FieldMismatch { .. })
        ));
    }
}
