//! CLI output formatting.

use crate::engine::Solution;
use crate::error::{CubError, CubResult};

/// Print version information.
pub fn print_version() {
    println!("qmc {}", env!("QMC_VERSION"));
    if let Some(hash) = option_env!("GIT_HASH") {
        if !hash.is_empty() {
            println!("commit {hash}");
        }
    }
}

/// Print help message.
pub fn print_help() {
    println!(
        r"qmc - adaptive quasi-Monte Carlo cubature

USAGE:
    qmc <COMMAND> [OPTIONS]

COMMANDS:
    run <experiment.yaml>       Integrate an experiment, print the solution as JSON
        --seed <N>              Override the run seed
        -v, --verbose           Print every doubling to stderr

    validate <experiment.yaml>  Check an experiment file without sampling

    help                        Show this help message
    version                     Show version information

EXIT CODES:
    0   tolerance met
    2   sample budget exhausted (best estimate still printed)
    1   any other error

EXAMPLE EXPERIMENT:
    run:
      dimension: 3
      seed: 7
      backend: sobol
      abs_tol: 1.0e-3
    problem:
      integrand: keister
      measure:
        kind: gaussian
        variance: [0.5]
"
    );
}

/// Render a solution as pretty JSON.
///
/// # Errors
///
/// Returns `Serialization` if encoding fails.
pub fn solution_json(solution: &Solution) -> CubResult<String> {
    serde_json::to_string_pretty(solution).map_err(|e| CubError::serialization(e.to_string()))
}

/// Print the doubling history, one line per certificate.
pub fn print_history(solution: &Solution) {
    eprintln!("{:>12}  {:>20}  {:>12}  {:>12}", "n", "estimate", "bound", "tolerance");
    for cert in &solution.history {
        eprintln!(
            "{:>12}  {:>20.12}  {:>12.3e}  {:>12.3e}{}",
            cert.n,
            cert.estimate,
            cert.bound,
            cert.tolerance,
            if cert.decay_warning { "  (slow decay)" } else { "" }
        );
    }
}
