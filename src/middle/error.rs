//! Compiler errors
//!
//! Only internal invariant violations end up here. Errors in the compiled
//! program are IR nodes that raise at run time.

use thiserror::Error;

use crate::middle::ir::verify::IrVerifyError;

#[derive(Debug, Error, Clone)]
pub enum CompileError {
    /// Verifier rejected a function; carries every problem and an IR dump
    #[error("malformed IR in {func} after {stage}: {}", format_errors(.errors))]
    MalformedIr {
        func: String,
        stage: &'static str,
        errors: Vec<IrVerifyError>,
        dump: String,
    },

    #[error("function {func}: block L{block} is missing a terminator")]
    MissingTerminator { func: String, block: u32 },

    #[error("class {class}: {message}")]
    InvalidClass { class: String, message: String },

    #[error("unknown primitive `{0}`")]
    UnknownPrimitive(String),

    #[error("module `{0}` not found in program")]
    UnknownModule(String),

    #[error("codegen: {0}")]
    Codegen(String),
}

fn format_errors(errors: &[IrVerifyError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

pub type CompileResult<T> = Result<T, CompileError>;
