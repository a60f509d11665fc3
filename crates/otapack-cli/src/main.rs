use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use tracing_subscriber::EnvFilter;

mod commands;
mod render;

use commands::{run_check, run_functions, run_inspect};
use render::current_output_style;

#[derive(Parser, Debug)]
#[command(name = "otapack")]
#[command(about = "Offline tooling for update packages and their scripts", long_about = None)]
struct Cli {
    /// Show library diagnostics on stderr.
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Parse an update script against the stock function registry.
    Check { script: PathBuf },
    /// Summarize an update package.
    Inspect {
        package: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// List every function scripts can call, with its namespace.
    Functions,
    /// Print a shell completion script.
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn init_diagnostics(verbose: bool) {
    let level = if verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(level))
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .try_init()
        .ok();
}

fn write_completions<W: Write>(shell: Shell, writer: &mut W) -> Result<()> {
    let mut command = Cli::command();
    let mut generated = Vec::new();
    clap_complete::generate(shell, &mut command, "otapack", &mut generated);
    writer
        .write_all(&generated)
        .with_context(|| "failed writing generated completion script")
}

fn run_cli(cli: Cli) -> Result<()> {
    init_diagnostics(cli.verbose);
    let style = current_output_style();

    match cli.command {
        Commands::Check { script } => run_check(&script, style)?,
        Commands::Inspect { package, json } => run_inspect(&package, json, style)?,
        Commands::Functions => run_functions(),
        Commands::Completions { shell } => {
            let stdout = std::io::stdout();
            write_completions(shell, &mut stdout.lock())?;
        }
    }

    Ok(())
}

fn main() -> Result<()> {
    run_cli(Cli::parse())
}

#[cfg(test)]
mod tests;
