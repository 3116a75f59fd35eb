use clap::{Parser, Subcommand};
use miette::{miette, Result};
use std::path::PathBuf;

use opflow::cli;
use opflow::cli::build::{BuildArgs, OutputFormat};
use opflow::BuildOptions;

#[derive(Parser)]
#[command(name = "opflow")]
#[command(about = "Control flow graphs for structured operation trees")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build control flow graphs and print them
    Build {
        /// Input JSON file: one body, or a list of named bodies
        input: PathBuf,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,

        /// Output file (defaults to stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Only build the body with this name
        #[arg(long)]
        function: Option<String>,

        /// Do not report unreachable code
        #[arg(long)]
        no_unreachable_warnings: bool,
    },

    /// Build control flow graphs and only report diagnostics
    Check {
        /// Input JSON file: one body, or a list of named bodies
        input: PathBuf,
    },
}

fn main() -> Result<()> {
    // Initialize logging
    env_logger::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Build {
            input,
            format,
            output,
            function,
            no_unreachable_warnings,
        } => {
            let options = if no_unreachable_warnings {
                BuildOptions::without_unreachable_warnings()
            } else {
                BuildOptions::default()
            };
            let args = BuildArgs {
                input_path: input,
                output_path: output,
                format,
                function,
                options,
            };
            cli::build::build(&args).map_err(|e| miette!("{}", e))
        }
        Commands::Check { input } => {
            cli::check::check(&input, &BuildOptions::default()).map_err(|e| miette!("{}", e))
        }
    }
}
