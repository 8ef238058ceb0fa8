//! CLI command handlers.

use std::path::Path;
use std::process::ExitCode;

use crate::config::ExperimentConfig;
use crate::engine::{Integrator, Solution};
use crate::error::{CubError, CubResult};
use crate::integrand::BuiltIn;

use super::output::{print_help, print_history, print_version, solution_json};
use super::{Args, Command};

/// Exit code for a run that stopped on the sample budget.
pub const EXIT_BUDGET_EXHAUSTED: u8 = 2;

/// Main CLI entry point.
///
/// Dispatches to the appropriate command handler based on parsed arguments.
#[must_use]
pub fn run_cli(args: Args) -> ExitCode {
    match args.command {
        Command::Run {
            experiment_path,
            seed_override,
            verbose,
        } => run_experiment(&experiment_path, seed_override, verbose),
        Command::Validate { experiment_path } => validate_experiment(&experiment_path),
        Command::Help => {
            print_help();
            ExitCode::SUCCESS
        }
        Command::Version => {
            print_version();
            ExitCode::SUCCESS
        }
    }
}

/// Load, configure and integrate an experiment.
///
/// # Errors
///
/// Whatever loading, configuration or integration returns. A
/// `ToleranceNotAchieved` error still carries the best solution.
pub fn integrate_experiment(path: &Path, seed_override: Option<u64>) -> CubResult<Solution> {
    let mut experiment = ExperimentConfig::load(path)?;
    if let Some(seed) = seed_override {
        experiment.run.seed = Some(seed);
    }

    let dimension = experiment.run.dimension;
    let measure = experiment.problem.measure.build(dimension)?;
    let integrand = BuiltIn::new(experiment.problem.integrand, dimension);

    Integrator::new(&experiment.run)?.integrate(&integrand, measure.as_ref())
}

fn emit(solution: &Solution, verbose: bool) -> bool {
    if verbose {
        print_history(solution);
    }
    match solution_json(solution) {
        Ok(json) => {
            println!("{json}");
            true
        }
        Err(e) => {
            eprintln!("Error: {e}");
            false
        }
    }
}

/// Run an experiment and print its solution as JSON.
///
/// Exit code 0 when the tolerance is met, 2 when the budget ran out (the
/// best solution is still printed), 1 otherwise.
#[must_use]
pub fn run_experiment(path: &Path, seed_override: Option<u64>, verbose: bool) -> ExitCode {
    match integrate_experiment(path, seed_override) {
        Ok(solution) => {
            if emit(&solution, verbose) {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(1)
            }
        }
        Err(CubError::ToleranceNotAchieved {
            n_max,
            tolerance,
            bound,
            solution,
        }) => {
            eprintln!(
                "Warning: tolerance {tolerance:.3e} not met within n_max = {n_max} (bound {bound:.3e})"
            );
            if emit(&solution, verbose) {
                ExitCode::from(EXIT_BUDGET_EXHAUSTED)
            } else {
                ExitCode::from(1)
            }
        }
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::from(1)
        }
    }
}

/// Check an experiment file: schema, semantics and the derived criterion.
#[must_use]
pub fn validate_experiment(path: &Path) -> ExitCode {
    let checked = ExperimentConfig::load(path).and_then(|experiment| {
        experiment.problem.measure.build(experiment.run.dimension)?;
        experiment.run.criterion()
    });

    match checked {
        Ok(criterion) => {
            println!("✓ {} is valid", path.display());
            println!(
                "  rule {}, n_init {}, n_max {}",
                criterion.rule, criterion.n_init, criterion.n_max
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("✗ {}: {e}", path.display());
            ExitCode::from(1)
        }
    }
}
