// Inspect and pretty-print a prover bundle
use circ_r1cs::cfg::clap::{self, Parser};
use circ_r1cs::target::r1cs::{inspect, ProverData};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(name = "r1cs_inspect", about = "Print the constraints of a prover bundle")]
struct Options {
    /// The prover bundle
    prover_data: PathBuf,
}

fn main() -> ExitCode {
    env_logger::Builder::from_default_env()
        .format_level(false)
        .format_timestamp(None)
        .init();
    let opts = Options::parse();
    println!("Loading ProverData from: {}", opts.prover_data.display());
    match ProverData::read(&opts.prover_data) {
        Ok(pd) => {
            print!("{}", inspect::report(&pd));
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::from(1)
        }
    }
}
