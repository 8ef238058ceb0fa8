//! qmc CLI - adaptive quasi-Monte Carlo cubature
//!
//! Integrates a YAML experiment and prints the solution as JSON.

use std::process::ExitCode;

use qmc_cubature::cli::{run_cli, Args};

fn main() -> ExitCode {
    run_cli(Args::parse())
}
