//! tycc: typed-subset compiler middle/back-end
//!
//! Takes the register-based IR of a typed dynamic-language subset, runs the
//! dataflow analyses and transforms that make it safe to execute natively
//! (undefined-value guards, exception checks, reference counting, lowering),
//! and emits one CPython C extension source file per module.
//!
//! # Example
//!
//! ```no_run
//! use tycc::{compile_to_c, Result};
//! use tycc::middle::Program;
//! use tycc::util::config::CompilerOptions;
//!
//! fn main() -> Result<()> {
//!     let mut program: Program = serde_json::from_str(&std::fs::read_to_string("ir.json")?)?;
//!     for file in compile_to_c(&mut program, &CompilerOptions::default())? {
//!         println!("{}: {} bytes", file.name, file.contents.len());
//!     }
//!     Ok(())
//! }
//! ```

#![warn(rust_2018_idioms)]

// Public modules
pub mod backends;
pub mod middle;

// Utility modules
pub mod util;

// Re-exports
pub use anyhow::{Context, Result};
pub use thiserror::Error;

pub use backends::CFile;

use ::std::fs;
use ::std::path::Path;
use tracing::{debug, info};

use crate::middle::Program;
use crate::util::config::CompilerOptions;

/// Compiler version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Compiler name
pub const NAME: &str = "tycc";

/// Run the middle-end over `program` and generate C for every module
pub fn compile_to_c(
    program: &mut Program,
    options: &CompilerOptions,
) -> Result<Vec<CFile>> {
    let stats = middle::compile_program(program, options).context("middle-end failed")?;
    debug!(functions = stats.functions, "middle-end stats");
    let files = backends::generate_program(program, options).context("C generation failed")?;
    Ok(files)
}

/// Load a serialized program; `.ron` files are RON, everything else JSON
pub fn load_program(path: &Path) -> Result<Program> {
    let path_str = path.display().to_string();
    let content = fs::read_to_string(path).with_context(|| format!("Failed to read IR file: {}", path_str))?;
    let program: Program = match path.extension().and_then(|e| e.to_str()) {
        Some("ron") => ron::from_str(&content).with_context(|| format!("Invalid RON IR: {}", path_str))?,
        _ => serde_json::from_str(&content).with_context(|| format!("Invalid JSON IR: {}", path_str))?,
    };
    info!(
        path = %path_str,
        modules = program.modules.len(),
        functions = program.functions.len(),
        "loaded program"
    );
    Ok(program)
}

/// Compile an IR file and write the C files into `out_dir`
pub fn compile_file(
    path: &Path,
    out_dir: &Path,
    options: &CompilerOptions,
) -> Result<Vec<CFile>> {
    let mut program = load_program(path)?;
    let files = compile_to_c(&mut program, options)?;
    fs::create_dir_all(out_dir).with_context(|| format!("Failed to create {}", out_dir.display()))?;
    for file in &files {
        let target = out_dir.join(&file.name);
        fs::write(&target, &file.contents).with_context(|| format!("Failed to write {}", target.display()))?;
        debug!(file = %target.display(), "written");
    }
    Ok(files)
}
