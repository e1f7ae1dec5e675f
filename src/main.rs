//! tycc - CLI

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tycc::middle::ir::pprint::format_program;
use tycc::util::config::CompilerOptions;
use tycc::util::logger;
use tycc::{compile_file, load_program, NAME, VERSION};

/// Compile typed-subset IR to CPython C extension modules
#[derive(Parser, Debug)]
#[command(name = "tycc")]
#[command(version = VERSION)]
#[command(about = NAME, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,

    /// Increase log verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Compiler options in RON format
    #[arg(long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate one C file per module
    Emit {
        /// Program IR (.json or .ron)
        #[arg(value_name = "IR")]
        ir: PathBuf,

        /// Output directory
        #[arg(short, long, value_name = "DIR", default_value = "build")]
        output: PathBuf,
    },

    /// Print the IR after the middle-end passes
    Dump {
        /// Program IR (.json or .ron)
        #[arg(value_name = "IR")]
        ir: PathBuf,
    },
}

fn load_options(path: Option<&Path>) -> Result<CompilerOptions> {
    match path {
        Some(path) => {
            CompilerOptions::load(path).with_context(|| format!("Failed to load config: {}", path.display()))
        }
        None => Ok(CompilerOptions::default()),
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    logger::init_cli(args.verbose);
    let options = load_options(args.config.as_deref())?;

    match args.command {
        Commands::Emit { ir, output } => {
            let files = compile_file(&ir, &output, &options)?;
            for file in &files {
                println!("{}", output.join(&file.name).display());
            }
        }
        Commands::Dump { ir } => {
            let mut program = load_program(&ir)?;
            tycc::middle::compile_program(&mut program, &options)
                .with_context(|| format!("Failed to compile: {}", ir.display()))?;
            print!("{}", format_program(&program));
        }
    }

    Ok(())
}
