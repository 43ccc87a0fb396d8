//! Replay and check commands.

use std::path::Path;

use tracing::error;

use crate::cli::{EXIT_FAILURE, EXIT_SUCCESS, OutputFormat};
use crate::commands::print_report;
use crate::terminal;

/// Handle the `replay` command.
pub fn cmd_replay(input: &Path, config: &pcs::ReplayConfig, format: OutputFormat) -> i32 {
    match pcs::replay_file(input, config) {
        Ok(report) => {
            print_report(format, &report);
            EXIT_SUCCESS
        }
        Err(e) => {
            error!(error = %e, path = %input.display(), "replay failed");
            EXIT_FAILURE
        }
    }
}

/// Handle the `check` command.
pub fn cmd_check(input: &Path, config: &pcs::ReplayConfig) -> i32 {
    match pcs::replay_file(input, config) {
        Ok(report) => {
            terminal::success(&format!(
                "{}: {} records, {} call stacks, protocol ok",
                input.display(),
                report.records,
                report.starts
            ));
            EXIT_SUCCESS
        }
        Err(e) => {
            terminal::error(&format!("{}: {e}", input.display()));
            EXIT_FAILURE
        }
    }
}
