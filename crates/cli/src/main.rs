mod cmd;
mod output;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use cmd::CommandContext;
use output::OutputFormat;

/// pinbuild - fetch, build and test a native extension against a pinned source release
#[derive(Parser)]
#[command(name = "pinbuild")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Project directory
  #[arg(short = 'C', long, global = true, default_value = ".")]
  project_dir: PathBuf,

  /// Configuration file (default: <project-dir>/pinbuild.toml)
  #[arg(long, global = true)]
  config: Option<PathBuf>,

  /// Enable debug logging (RUST_LOG takes precedence)
  #[arg(short, long, global = true)]
  verbose: bool,

  /// Output format
  #[arg(short, long, global = true, value_enum, default_value_t)]
  output: OutputFormat,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Download and extract the pinned source archive
  Fetch,

  /// Build the extension in place, fetching the source first if needed
  Build {
    /// Compile even if the build is up to date
    #[arg(short, long)]
    force: bool,
  },

  /// Run the test suite, building first if needed
  Test {
    /// Fail instead of building when nothing is built
    #[arg(long)]
    no_build: bool,
  },

  /// Remove build artifacts, markers and the staged source tree
  Clean,

  /// Show the pipeline state without changing anything
  Status,
}

fn init_tracing(verbose: bool) {
  let default_level = if verbose { "debug" } else { "warn" };
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .without_time()
    .init();
}

fn main() -> Result<()> {
  let cli = Cli::parse();
  init_tracing(cli.verbose);

  let ctx = CommandContext {
    project_dir: cli.project_dir,
    config: cli.config,
    output: cli.output,
  };

  match cli.command {
    Commands::Fetch => cmd::cmd_fetch(&ctx),
    Commands::Build { force } => cmd::cmd_build(&ctx, force),
    Commands::Test { no_build } => cmd::cmd_test(&ctx, no_build),
    Commands::Clean => cmd::cmd_clean(&ctx),
    Commands::Status => cmd::cmd_status(&ctx),
  }
}
