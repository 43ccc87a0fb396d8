//! Command implementations.

mod replay;

use pcs::{ReplayReport, StackSummary};

use crate::cli::{Cli, Commands, OutputFormat};
use crate::terminal::{Alignment, Table};

/// Dispatch CLI command to the appropriate handler.
pub fn run_command(cli: &Cli) -> i32 {
    match &cli.command {
        Commands::Replay {
            input,
            replay,
            format,
        } => replay::cmd_replay(input, &replay.config(), *format),
        Commands::Check { input, replay } => replay::cmd_check(input, &replay.config()),
    }
}

// ============================================================================
// Output formatting helpers
// ============================================================================

/// Print a replay report.
pub fn print_report(format: OutputFormat, report: &ReplayReport) {
    match format {
        OutputFormat::Text => {
            let mut table = Table::new(vec![
                "Tag", "TID", "Start PC", "CPUs", "Pauses", "Migrations", "Accesses", "Writes",
                "Duration", "Ended",
            ])
            .with_alignments(vec![
                Alignment::Left,
                Alignment::Right,
                Alignment::Left,
                Alignment::Left,
                Alignment::Right,
                Alignment::Right,
                Alignment::Right,
                Alignment::Right,
                Alignment::Right,
                Alignment::Left,
            ]);
            for stack in &report.stacks {
                table.add_row(vec![
                    format!("{:#x}", stack.tag),
                    stack.tid.to_string(),
                    format!("{:#x}", stack.start_pc),
                    format_cpus(&stack.cpus),
                    stack.pauses.to_string(),
                    stack.migrations.to_string(),
                    stack.accesses.to_string(),
                    stack.writes.to_string(),
                    stack.duration.to_string(),
                    stack.ended.to_string(),
                ]);
            }
            table.print();
            println!();
            println!("Records: {}", report.records);
            println!(
                "Transitions: {} start, {} pause, {} resume, {} done",
                report.starts, report.pauses, report.resumes, report.dones
            );
            println!(
                "Accesses: {} ({} unattributed)",
                report.accesses, report.unattributed_accesses
            );
            println!("Max live call stacks: {}", report.max_live);
            if report.live > 0 {
                println!("Still live: {}", report.live);
            }
        }
        OutputFormat::Raw => {
            println!("records: {}", report.records);
            println!("starts: {}", report.starts);
            println!("pauses: {}", report.pauses);
            println!("resumes: {}", report.resumes);
            println!("dones: {}", report.dones);
            println!("accesses: {}", report.accesses);
            println!("unattributed: {}", report.unattributed_accesses);
            println!("max_live: {}", report.max_live);
            println!("live: {}", report.live);
        }
        OutputFormat::Json => {
            let stacks: Vec<String> = report.stacks.iter().map(stack_json).collect();
            println!(
                r#"{{"records":{},"starts":{},"pauses":{},"resumes":{},"dones":{},"accesses":{},"unattributed":{},"max_live":{},"live":{},"stacks":[{}]}}"#,
                report.records,
                report.starts,
                report.pauses,
                report.resumes,
                report.dones,
                report.accesses,
                report.unattributed_accesses,
                report.max_live,
                report.live,
                stacks.join(",")
            );
        }
    }
}

fn format_cpus(cpus: &[usize]) -> String {
    cpus.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

fn stack_json(stack: &StackSummary) -> String {
    format!(
        r#"{{"tag":{},"tid":{},"start_pc":{},"start_ts":{},"duration":{},"cpus":[{}],"pauses":{},"migrations":{},"accesses":{},"writes":{},"ended":"{}"}}"#,
        stack.tag,
        stack.tid,
        stack.start_pc,
        stack.start_ts,
        stack.duration,
        format_cpus(&stack.cpus),
        stack.pauses,
        stack.migrations,
        stack.accesses,
        stack.writes,
        stack.ended
    )
}
