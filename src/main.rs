//! Arbor command-line entry point.

mod cli;

use std::path::Path;

use arbor::{ArborError, lower_source, parse_and_validate};
use arbor_ir::print_method;
use clap::Parser;
use cli::{Cli, Command};
use tracing_subscriber::EnvFilter;

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(e) = run(cli.command) {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run(command: Command) -> Result<(), ArborError> {
    match command {
        Command::Lower { file, options } => {
            let source = read(&file)?;
            let output = lower_source(&source, &options.pipeline_options())?;
            println!("{}", output.text);
            if options.stats {
                let stats = output.stats;
                eprintln!("rebound equality calls: {}", stats.rebound_calls);
                eprintln!("equality fast paths:    {}", stats.equality_calls_lowered);
                eprintln!("array store guards:     {}", stats.array_store_checks_lowered);
                eprintln!("non-null stores kept:   {}", stats.skipped_non_null);
                eprintln!("vetoed steps:           {}", stats.vetoed);
            }
        }
        Command::Print { file } => {
            let ctx = parse_and_validate(&read(&file)?)?;
            println!("{}", print_method(&ctx));
        }
        Command::Validate { file } => {
            parse_and_validate(&read(&file)?)?;
            println!("{}: ok", file.display());
        }
    }
    Ok(())
}

fn read(path: &Path) -> Result<String, ArborError> {
    Ok(std::fs::read_to_string(path)?)
}
