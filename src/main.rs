use anyhow::Result;
use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;

mod commands;

use commands::Selection;
use commands::run::RunOptions;

#[derive(Parser)]
#[command(name = "casegraph")]
#[command(about = "Dependency-aware orchestration of regression test cases", version)]
struct Cli {
    /// Suite file describing the system, the tests and their dependencies
    #[arg(short, long, global = true, default_value = "casegraph.toml")]
    suite: PathBuf,

    /// Only run on this partition (repeatable)
    #[arg(short = 'P', long = "partition", global = true)]
    partitions: Vec<String>,

    /// Only use programming environments fully matching this regex (repeatable)
    #[arg(short = 'p', long = "prgenv", global = true)]
    prgenvs: Vec<String>,

    /// Select a test by name (repeatable); its dependencies are pulled in
    #[arg(short = 'n', long = "name", global = true)]
    names: Vec<String>,

    /// Exclude a test by name (repeatable)
    #[arg(short = 'x', long = "exclude", global = true)]
    exclude: Vec<String>,

    /// Select tests with a tag fully matching this regex (repeatable, all must match)
    #[arg(short = 't', long = "tag", global = true)]
    tags: Vec<String>,

    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the selected test cases and what each one depends on
    List,

    /// Validate the dependency graph without running anything
    Check,

    /// Print the order in which cases would be released
    Order {
        /// Group cases into waves of mutually independent cases
        #[arg(long)]
        waves: bool,
    },

    /// Run the selected test cases
    Run {
        /// Go through the motions without executing any command
        #[arg(long)]
        dry_run: bool,

        /// Never remove stage directories
        #[arg(long)]
        keep_stage_files: bool,

        /// Maximum number of cases running at once
        #[arg(long)]
        max_concurrency: Option<usize>,

        /// Abort the remaining cases after this many failures
        #[arg(long)]
        max_failures: Option<usize>,

        /// Root of the stage directories
        #[arg(long)]
        stage_dir: Option<PathBuf>,

        /// Write the run report to this file
        #[arg(long)]
        report: Option<PathBuf>,
    },
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default))
        .format_timestamp(None)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let selection = Selection {
        partitions: cli.partitions,
        prgenvs: cli.prgenvs,
        names: cli.names,
        exclude: cli.exclude,
        tags: cli.tags,
    };
    let suite = commands::load_suite(&cli.suite, &selection)?;

    match cli.command {
        Commands::List => commands::list::run(&suite, cli.json),
        Commands::Check => commands::check::run(&suite, cli.json),
        Commands::Order { waves } => commands::order::run(&suite, waves, cli.json),
        Commands::Run {
            dry_run,
            keep_stage_files,
            max_concurrency,
            max_failures,
            stage_dir,
            report,
        } => {
            let opts = RunOptions {
                dry_run,
                keep_stage_files,
                max_concurrency,
                max_failures,
                stage_dir,
                report,
            };
            commands::run::run(&suite, &opts, cli.json)
        }
    }
}
