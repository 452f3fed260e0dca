use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;

/// Search regional and routing registry dumps, plus ARIN, for network
/// blocks owned by organizations matching the given keywords.
#[derive(Parser, Debug)]
#[command(name = "cidr-recon", version, about)]
struct Cli {
  /// Keywords to search for, comma separated, or a file with one per line.
  keywords: String,

  /// Match keywords against whole name tokens only.
  #[arg(short, long)]
  strict: bool,

  /// Clear the dump cache before running.
  #[arg(short = 'n', long = "no-cache", alias = "no_cache")]
  no_cache: bool,

  /// Write results to this file as JSON (should end with .json).
  #[arg(short, long)]
  output: Option<PathBuf>,

  /// Use this config file instead of the default location.
  #[arg(long)]
  config: Option<PathBuf>,

  /// Log debug detail.
  #[arg(short, long)]
  verbose: bool,
}

fn main() -> anyhow::Result<()> {
  let cli = Cli::parse();

  let invocation = recon_core::Invocation {
    keywords: cli.keywords,
    strict: cli.strict,
    no_cache: cli.no_cache,
    output: cli.output,
    config: cli.config,
    verbose: cli.verbose,
  };

  let report = recon_core::run_cli(&invocation)
    .inspect_err(|e| tracing::error!(error = %format!("{e:#}"), "run failed"))
    .context("cidr-recon run")?;
  tracing::debug!(results = report.results.len(), sources = report.searches.len(), "run complete");
  Ok(())
}
