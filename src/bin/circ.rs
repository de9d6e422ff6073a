use circ_r1cs::cfg::{
    clap::{self, Parser, Subcommand, ValueEnum},
    CircCfg, CircOpt,
};
use circ_r1cs::ir::opt::flatten_value_map;
use circ_r1cs::ir::term::text::{parse_computation, parse_value_map_with_field};
use circ_r1cs::pipeline::Pipeline;
use circ_r1cs::target::r1cs::bundle::write_data;
use circ_r1cs::target::r1cs::{ProverData, VerifierData};
use circ_r1cs::Result;

#[cfg(feature = "spartan")]
use circ_r1cs::target::r1cs::{proof::ProofSystem, spartan::Spartan};

use log::info;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "circ",
    about = "Compile IR computations to R1CS bundles",
    subcommand_precedence_over_arg = true
)]
struct Options {
    /// The computation to compile (textual IR)
    path: Option<PathBuf>,

    #[command(flatten)]
    circ: CircOpt,

    #[command(subcommand)]
    mode: Mode,
}

#[derive(Debug, Subcommand)]
enum Mode {
    /// Compile the computation at PATH
    R1cs {
        #[arg(long, value_enum, default_value = "count")]
        action: ProofAction,
        #[arg(long, default_value = "P")]
        prover_data: PathBuf,
        #[arg(long, default_value = "V")]
        verifier_data: PathBuf,
        /// Spartan proving key (spartan-setup)
        #[arg(long, default_value = "pk")]
        prover_key: PathBuf,
        /// Spartan verifying key (spartan-setup)
        #[arg(long, default_value = "vk")]
        verifier_key: PathBuf,
    },
    /// Print the full witness, one `name = value` line per variable
    Witness {
        #[arg(long, default_value = "P")]
        prover_data: PathBuf,
        #[arg(long)]
        inputs: PathBuf,
    },
    /// Print the instance, one value per line
    Instance {
        #[arg(long, default_value = "V")]
        verifier_data: PathBuf,
        #[arg(long)]
        inputs: PathBuf,
    },
    /// Prove with Spartan
    #[cfg(feature = "spartan")]
    Prove {
        #[arg(long, default_value = "pk")]
        prover_key: PathBuf,
        #[arg(long)]
        inputs: PathBuf,
        #[arg(long, default_value = "pi")]
        proof: PathBuf,
    },
    /// Verify with Spartan
    #[cfg(feature = "spartan")]
    Verify {
        #[arg(long, default_value = "vk")]
        verifier_key: PathBuf,
        #[arg(long)]
        inputs: PathBuf,
        #[arg(long, default_value = "pi")]
        proof: PathBuf,
    },
}

#[derive(PartialEq, Eq, Debug, Clone, Copy, ValueEnum)]
/// `Count` only reports sizes; `Setup` writes the bundles; `SpartanSetup` also writes Spartan
/// keys
enum ProofAction {
    Count,
    Setup,
    SpartanSetup,
}

fn compile(path: Option<PathBuf>, cfg: &CircCfg) -> Result<(ProverData, VerifierData)> {
    let path = path.ok_or_else(|| {
        circ_r1cs::Error::BadInput {
            name: "PATH".into(),
            reason: "the r1cs mode needs a computation to compile".into(),
        }
    })?;
    let cs = parse_computation(&std::fs::read(&path)?)?;
    info!("Compiling {}", path.display());
    let (pd, vd) = Pipeline::new(cfg.pipeline()).compile(cs, cfg.field().clone())?;
    println!("Constraints: {}", pd.r1cs.constraints().len());
    println!("Variables: {}", pd.r1cs.vars().len());
    println!("Witness steps: {}", pd.precompute.num_steps());
    Ok((pd, vd))
}

fn run(opts: Options) -> Result<()> {
    let cfg = CircCfg::try_from(opts.circ)?;
    match opts.mode {
        Mode::R1cs {
            action,
            prover_data,
            verifier_data,
            prover_key,
            verifier_key,
        } => {
            let (pd, vd) = compile(opts.path, &cfg)?;
            match action {
                ProofAction::Count => {}
                ProofAction::Setup => {
                    write_data(&prover_data, &verifier_data, &pd, &vd)?;
                    info!(
                        "Wrote {} and {}",
                        prover_data.display(),
                        verifier_data.display()
                    );
                }
                #[cfg(feature = "spartan")]
                ProofAction::SpartanSetup => {
                    let (pk, vk) = Spartan::setup(pd.clone(), vd.clone())?;
                    write_data(&prover_data, &verifier_data, &pd, &vd)?;
                    Spartan::write_keys(&pk, &vk, &prover_key, &verifier_key)?;
                    info!(
                        "Wrote {}, {}, {}, and {}",
                        prover_data.display(),
                        verifier_data.display(),
                        prover_key.display(),
                        verifier_key.display()
                    );
                }
                #[cfg(not(feature = "spartan"))]
                ProofAction::SpartanSetup => {
                    let _ = (prover_key, verifier_key);
                    return Err(circ_r1cs::Error::unsupported(
                        "spartan-setup",
                        "this build (enable the `spartan` feature)",
                    ));
                }
            }
        }
        Mode::Witness {
            prover_data,
            inputs,
        } => {
            let pd = ProverData::read(prover_data)?;
            let values = parse_value_map_with_field(&std::fs::read(inputs)?, pd.r1cs.field())?;
            for (name, value) in pd.witness_values(&flatten_value_map(&values))? {
                println!("{} = {}", name, value.i());
            }
        }
        Mode::Instance {
            verifier_data,
            inputs,
        } => {
            let vd = VerifierData::read(verifier_data)?;
            let values = parse_value_map_with_field(&std::fs::read(inputs)?, cfg.field())?;
            for value in vd.eval(&flatten_value_map(&values))? {
                println!("{}", value.i());
            }
        }
        #[cfg(feature = "spartan")]
        Mode::Prove {
            prover_key,
            inputs,
            proof,
        } => {
            Spartan::prove_fs(prover_key, inputs, proof)?;
            println!("Proved");
        }
        #[cfg(feature = "spartan")]
        Mode::Verify {
            verifier_key,
            inputs,
            proof,
        } => {
            if Spartan::verify_fs(verifier_key, inputs, proof)? {
                println!("Verified");
            } else {
                return Err(circ_r1cs::Error::Unsatisfied("the proof does not verify".into()));
            }
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    env_logger::Builder::from_default_env()
        .format_level(false)
        .format_timestamp(None)
        .init();
    let opts = Options::parse();
    match run(opts) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::from(1)
        }
    }
}
