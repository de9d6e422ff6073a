use circ_fields::FieldT;
use circ_r1cs::ir::term::text::{parse_computation, parse_value_map_with_field};
use circ_r1cs::pipeline::{Pipeline, PipelineCfg};
use circ_r1cs::target::r1cs::bundle::{read_data, write_data, MAGIC, VERSION};
use circ_r1cs::target::r1cs::{ProverData, VerifierData};
use circ_r1cs::Error;
use rug::Integer;
use std::path::PathBuf;

fn field() -> FieldT {
    FieldT::from(Integer::from(1_000_003))
}

/// A computation mixing booleans, bit-vectors, and field elements
fn bundles() -> (ProverData, VerifierData) {
    let cs = parse_computation(
        b"
        (computation
            (metadata (inputs
                (a (bv 8))
                (b (bv 8))
                (f (mod 1000003))
                (lt bool public)
                (s (bv 8) public)))
            (precompute
                ((a (bv 8)) (b (bv 8)))
                ((lt bool) (s (bv 8)))
                (tuple (bvult a b) (bvadd a b)))
            (and (= lt (bvult a b))
                 (= s (bvadd a b))
                 (not (= f #f0m1000003))))
        ",
    )
    .unwrap();
    Pipeline::new(PipelineCfg::default())
        .compile(cs, field())
        .unwrap()
}

fn scratch(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("circ_r1cs_{}_{}", name, std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

#[test]
fn files_round_trip() {
    let dir = scratch("bundles");
    let (pd, vd) = bundles();
    write_data(dir.join("P"), dir.join("V"), &pd, &vd).unwrap();
    let (pd2, vd2) = read_data(dir.join("P"), dir.join("V")).unwrap();
    assert_eq!(pd, pd2);
    assert_eq!(vd, vd2);
    assert_eq!(pd.r1cs.field(), pd2.r1cs.field());
    assert_eq!(pd.r1cs.vars(), pd2.r1cs.vars());
    assert_eq!(pd.precompute.num_steps(), pd2.precompute.num_steps());

    let inputs = parse_value_map_with_field(b"(let ((a #x05) (b #xfe) (f #f9)) true)", &field())
        .unwrap();
    pd2.check_all(&inputs).unwrap();
    assert_eq!(
        pd.witness_values(&inputs).unwrap(),
        pd2.witness_values(&inputs).unwrap()
    );
    let instance =
        parse_value_map_with_field(b"(let ((lt true) (s #x03)) true)", &field()).unwrap();
    let expected: Vec<Integer> = vec![1.into(), 3.into()];
    assert_eq!(
        vd2.eval(&instance)
            .unwrap()
            .into_iter()
            .map(|v| v.i())
            .collect::<Vec<_>>(),
        expected
    );
    std::fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn headers() {
    let (pd, vd) = bundles();
    let p = pd.to_bytes().unwrap();
    let v = vd.to_bytes().unwrap();
    assert_eq!(&p[..8], MAGIC);
    assert_eq!(&v[..8], MAGIC);
    assert_eq!((p[8], v[8]), (0, 1));
    assert_eq!(u16::from_le_bytes([p[9], p[10]]), VERSION);
}

#[test]
fn corrupt_bundles() {
    let (pd, vd) = bundles();
    let p = pd.to_bytes().unwrap();
    let v = vd.to_bytes().unwrap();
    let fails = |r: Result<ProverData, Error>| {
        assert!(matches!(r, Err(Error::DeserializationFailed { .. })))
    };
    fails(ProverData::from_bytes(&v));
    fails(ProverData::from_bytes(&p[..p.len() / 2]));
    fails(ProverData::from_bytes(&[]));
    let mut future = p.clone();
    future[9..11].copy_from_slice(&(VERSION + 1).to_le_bytes());
    match ProverData::from_bytes(&future) {
        Err(Error::DeserializationFailed { reason }) => {
            assert!(reason.contains(&format!("version {}", VERSION + 1)))
        }
        other => panic!("expected a version error, got {:?}", other.map(|_| ())),
    }
    let mut long = v.clone();
    long.extend_from_slice(b"junk");
    assert!(matches!(
        VerifierData::from_bytes(&long),
        Err(Error::DeserializationFailed { .. })
    ));
    assert!(matches!(
        VerifierData::from_bytes(&p),
        Err(Error::DeserializationFailed { .. })
    ));
}

#[test]
fn missing_file() {
    assert!(matches!(
        ProverData::read(scratch("missing").join("nope")),
        Err(Error::Io(_))
    ));
}
