//! Drive the `circ` binary in separate processes, reloading bundles from disk between them.

use circ_fields::FieldT;
use circ_r1cs::ir::term::text::parse_value_map_with_field;
use circ_r1cs::target::r1cs::ProverData;
use rug::Integer;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

const PRODUCT: &str = "
    (computation
        (metadata (inputs (x (mod 1000003)) (y (mod 1000003)) (return (mod 1000003) public)))
        (precompute ((x (mod 1000003)) (y (mod 1000003))) ((return (mod 1000003))) (tuple (* x y)))
        (= return (* x y)))
";

fn scratch(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("circ_cli_{}_{}", name, std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("product.ir"), PRODUCT).unwrap();
    std::fs::write(dir.join("prover.in"), "(let ((x #f3) (y #f4)) true)").unwrap();
    std::fs::write(dir.join("verifier.in"), "(let ((return #f12)) true)").unwrap();
    dir
}

fn circ(dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_circ"))
        .current_dir(dir)
        .args(args)
        .output()
        .unwrap()
}

fn setup(dir: &Path, modulus: &str) -> Output {
    circ(
        dir,
        &[
            "product.ir",
            "--field-custom-modulus",
            modulus,
            "r1cs",
            "--action",
            "setup",
            "--prover-data",
            "P",
            "--verifier-data",
            "V",
        ],
    )
}

fn stdout(o: &Output) -> String {
    String::from_utf8(o.stdout.clone()).unwrap()
}

#[test]
fn reload_in_another_process() {
    let dir = scratch("reload");
    let out = setup(&dir, "1000003");
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    assert!(stdout(&out).contains("Constraints: 1"));

    let out = circ(&dir, &["witness", "--prover-data", "P", "--inputs", "prover.in"]);
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    let printed = stdout(&out);
    assert!(printed.lines().any(|l| l == "return = 12"));

    let pd = ProverData::read(dir.join("P")).unwrap();
    let field = FieldT::from(Integer::from(1_000_003));
    let inputs =
        parse_value_map_with_field(&std::fs::read(dir.join("prover.in")).unwrap(), &field)
            .unwrap();
    let expected: String = pd
        .witness_values(&inputs)
        .unwrap()
        .into_iter()
        .map(|(n, v)| format!("{} = {}\n", n, v.i()))
        .collect();
    assert_eq!(printed, expected);

    let out = circ(
        &dir,
        &[
            "--field-custom-modulus",
            "1000003",
            "instance",
            "--verifier-data",
            "V",
            "--inputs",
            "verifier.in",
        ],
    );
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    assert_eq!(stdout(&out), "12\n");
    std::fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn count_writes_nothing() {
    let dir = scratch("count");
    let out = circ(
        &dir,
        &["product.ir", "--field-custom-modulus", "1000003", "r1cs"],
    );
    assert!(out.status.success());
    assert!(stdout(&out).contains("Constraints: 1"));
    assert!(!dir.join("P").exists());
    assert!(!dir.join("V").exists());
    std::fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn failures_leave_no_bundles() {
    let dir = scratch("mismatch");
    let out = setup(&dir, "101");
    assert_eq!(out.status.code(), Some(1));
    let err = String::from_utf8(out.stderr).unwrap();
    assert!(err.starts_with("error:"), "{}", err);
    assert!(!dir.join("P").exists());
    assert!(!dir.join("V").exists());

    let out = circ(&dir, &["witness", "--prover-data", "P", "--inputs", "prover.in"]);
    assert_eq!(out.status.code(), Some(1));
    std::fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn corrupt_bundle_is_reported() {
    let dir = scratch("corrupt");
    std::fs::write(dir.join("P"), b"CIRCR1CS\x00\x09\x00").unwrap();
    let out = circ(&dir, &["witness", "--prover-data", "P", "--inputs", "prover.in"]);
    assert_eq!(out.status.code(), Some(1));
    let err = String::from_utf8(out.stderr).unwrap();
    assert!(err.starts_with("error:"));
    assert!(err.contains("version 9"), "{}", err);
    std::fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn spartan_setup_failure_leaves_nothing() {
    let dir = scratch("spartan");
    std::fs::write(dir.join("small.ir"), PRODUCT.replace("1000003", "101")).unwrap();
    // compiles over mod 101, then fails: Spartan needs Curve25519 (or is not built in)
    let out = circ(
        &dir,
        &[
            "small.ir",
            "--field-custom-modulus",
            "101",
            "r1cs",
            "--action",
            "spartan-setup",
        ],
    );
    assert_eq!(out.status.code(), Some(1));
    assert!(stdout(&out).contains("Constraints: 1"));
    for f in ["P", "V", "pk", "vk"] {
        assert!(!dir.join(f).exists(), "{} was written", f);
    }
    std::fs::remove_dir_all(&dir).unwrap();
}
