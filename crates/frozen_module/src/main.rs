use std::path::PathBuf;

use anyhow::Result;
use clap::{ArgAction, Parser, Subcommand};
use frozen_module::{config::Config, orchestrator};
use log::debug;

/// Freeze compiled Python code into static C initializers
#[derive(Parser, Debug)]
#[command(name = "frozen_module", version, about, long_about = None)]
struct Cli {
    /// Configuration file layered over the user and project files
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Increase verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Freeze one script into a program that runs it as __main__
    Script {
        /// Source file or .pyc to freeze
        #[arg(short, long, value_name = "FILE")]
        input: PathBuf,

        /// C file to write
        #[arg(short, long, value_name = "FILE")]
        output: PathBuf,

        /// Target interpreter used to compile source input
        #[arg(long, value_name = "EXECUTABLE")]
        python: Option<PathBuf>,
    },
    /// Freeze the modules a target interpreter imports at startup
    Modules {
        /// Target interpreter to query
        #[arg(long, value_name = "EXECUTABLE")]
        python: Option<PathBuf>,

        /// C file to write
        #[arg(short, long, value_name = "FILE")]
        output: PathBuf,

        /// Extra module to freeze (repeatable)
        #[arg(short, long = "module", value_name = "NAME")]
        modules: Vec<String>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut config = Config::load(cli.config.as_deref())?;
    debug!("Effective configuration: {config:?}");

    match cli.command {
        Command::Script {
            input,
            output,
            python,
        } => {
            if let Some(python) = python {
                config.python = python;
            }
            orchestrator::freeze_script(&input, &output, &config)
        }
        Command::Modules {
            python,
            output,
            modules,
        } => {
            if let Some(python) = python {
                config.python = python;
            }
            orchestrator::freeze_modules(&output, &config, &modules)
        }
    }
}

/// `RUST_LOG` wins over `-v` when set
fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp(None)
        .init();
}
