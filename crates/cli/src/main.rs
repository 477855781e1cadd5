// GridVine CLI - headless dependency tracing
//
// Takes the (file, sheet, cell) triple plus a display mode, runs one trace,
// and prints the tree report and/or the flattened node list.

mod exit_codes;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};

use exit_codes::{EXIT_SUCCESS, EXIT_TRACE_ERROR};
use gridvine_core::report::markers;
use gridvine_core::{CellIdentity, DisplayMode};
use gridvine_engine::run_trace;

#[derive(Parser)]
#[command(name = "gridvine")]
#[command(about = "Trace the dependency chain of a spreadsheet cell across sheets and workbooks")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Trace one cell's full dependency chain
    #[command(after_help = "\
Examples:
  gridvine trace --file book.xlsx --sheet Sheet1 --cell C1
  gridvine trace -f book.xlsx -s Sheet1 -c C1 --mode detail
  gridvine trace -f book.xlsx -s Sheet1 -c C1 --flat
  gridvine trace -f book.xlsx -s Sheet1 -c C1 --json | jq '.nodes'")]
    Trace {
        /// Workbook file containing the cell
        #[arg(long, short = 'f')]
        file: PathBuf,

        /// Sheet name (case-insensitive)
        #[arg(long, short = 's')]
        sheet: String,

        /// Cell address, e.g. C1
        #[arg(long, short = 'c')]
        cell: String,

        /// Header rendering mode
        #[arg(long, value_enum, default_value = "simple")]
        mode: Mode,

        /// Insert a blank line between report lines
        #[arg(long)]
        spaced: bool,

        /// Append the flattened node list after the tree
        #[arg(long)]
        flat: bool,

        /// Emit the whole report as JSON instead of text
        #[arg(long)]
        json: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Mode {
    Simple,
    Detail,
    Fullpath,
}

impl From<Mode> for DisplayMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Simple => DisplayMode::Simple,
            Mode::Detail => DisplayMode::Detail,
            Mode::Fullpath => DisplayMode::FullPath,
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match cli.command {
        Commands::Trace {
            file,
            sheet,
            cell,
            mode,
            spaced,
            flat,
            json,
        } => ExitCode::from(trace_command(file, sheet, cell, mode.into(), spaced, flat, json)),
    }
}

fn trace_command(
    file: PathBuf,
    sheet: String,
    cell: String,
    mode: DisplayMode,
    spaced: bool,
    flat: bool,
    json: bool,
) -> u8 {
    // The working directory for external references is the workbook's own
    // directory, so a relative input path must be anchored first.
    let file = if file.is_relative() {
        std::env::current_dir()
            .map(|cwd| cwd.join(&file))
            .unwrap_or(file)
    } else {
        file
    };

    let task = CellIdentity::new(file, sheet, cell);
    let report = run_trace(&task, mode);

    // A single error-leaf line means the root itself failed to load.
    let root_failed =
        report.text.lines().count() == 1 && report.text.contains(markers::ERROR);

    if json {
        match serde_json::to_string_pretty(&report) {
            Ok(out) => println!("{out}"),
            Err(e) => {
                eprintln!("error: could not serialize report: {e}");
                return EXIT_TRACE_ERROR;
            }
        }
    } else {
        let dir = task
            .file
            .parent()
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        println!("File Path: {dir}");
        println!("Location: [{}]'{}'!{}", task.file_name(), task.sheet, task.cell);
        println!();

        if spaced {
            println!("{}", report.spaced_text());
        } else {
            print!("{}", report.text);
        }

        if flat {
            println!();
            println!("Nodes ({}):", report.nodes.len());
            for node in &report.nodes {
                println!("  {}", node.qualified_label());
            }
        }
    }

    if root_failed {
        EXIT_TRACE_ERROR
    } else {
        EXIT_SUCCESS
    }
}
