//! Command-line interface for arbor.

use std::path::PathBuf;

use arbor::PipelineOptions;
use arbor_ir::ObjectModel;
use arbor_passes::LoweringConfig;
use clap::{ArgAction, Args, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "arbor")]
#[command(about = "Post-register-allocation tree lowering", long_about = None)]
pub struct Cli {
    /// Raise the log level (-v debug, -vv trace); RUST_LOG takes precedence
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Lower a method body and print the result
    Lower {
        /// Method body in arbor text format
        file: PathBuf,
        #[command(flatten)]
        options: LowerArgs,
    },
    /// Print a method body in canonical form
    Print { file: PathBuf },
    /// Check a method body for structural errors
    Validate { file: PathBuf },
}

#[derive(Args)]
pub struct LowerArgs {
    /// Only rebind equality calls; insert no fast path
    #[arg(long)]
    pub disable_equality_fastpath: bool,

    /// Stop after N transformation steps
    #[arg(long, value_name = "N")]
    pub last_transformation: Option<usize>,

    /// Lower as if value types were disabled
    #[arg(long)]
    pub no_value_types: bool,

    /// Class-flag bit marking value types (decimal or 0x-prefixed hex)
    #[arg(long, value_name = "BITS", value_parser = parse_flag)]
    pub value_type_flag: Option<u32>,

    /// Print lowering statistics to stderr
    #[arg(long)]
    pub stats: bool,
}

impl LowerArgs {
    pub fn pipeline_options(&self) -> PipelineOptions {
        let mut config = LoweringConfig::from_env();
        if self.disable_equality_fastpath {
            config = config.with_equality_fastpath(false);
        }
        let mut object_model = if self.no_value_types {
            ObjectModel::without_value_types()
        } else {
            config.object_model
        };
        if let Some(flag) = self.value_type_flag {
            object_model.value_type_class_flag = flag;
        }
        PipelineOptions {
            config: config.with_object_model(object_model),
            last_transformation: self.last_transformation,
        }
    }
}

fn parse_flag(text: &str) -> Result<u32, String> {
    let parsed = match text.strip_prefix("0x") {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => text.parse(),
    };
    match parsed {
        Ok(0) => Err("the flag must have at least one bit set".to_owned()),
        Ok(flag) => Ok(flag),
        Err(e) => Err(e.to_string()),
    }
}
