//! CLI module for qmc.
//!
//! All CLI logic lives here rather than in main.rs so it can be tested. The
//! entry point `run_cli` is called from main.rs with parsed arguments.

mod args;
mod commands;
mod output;

pub use args::{Args, Command};
pub use commands::{
    integrate_experiment, run_cli, run_experiment, validate_experiment, EXIT_BUDGET_EXHAUSTED,
};
pub use output::{print_help, print_history, print_version, solution_json};
