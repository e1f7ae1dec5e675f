//! Compiler configuration
//!
//! Options are read from a RON file. Every field has a default, so a config
//! file only needs to name what it changes.
//!
//! # Usage
//!
//! ```rust
//! use tycc::util::config::{CompilerOptions, WrapperConvention};
//!
//! let options = CompilerOptions::from_ron_str("(parallel: true)").unwrap();
//! assert!(options.parallel);
//! assert_eq!(options.wrapper_convention, WrapperConvention::Fastcall);
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Calling convention of the generated Python-callable wrappers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WrapperConvention {
    /// Vectorcall: `(self, args, nargs, kwnames)`
    #[default]
    Fastcall,
    /// Tuple + dict: `(self, args, kw)`
    Legacy,
    /// Emit both; the method table uses the fast one
    Both,
}

impl WrapperConvention {
    pub fn emits_fastcall(self) -> bool {
        matches!(self, WrapperConvention::Fastcall | WrapperConvention::Both)
    }

    pub fn emits_legacy(self) -> bool {
        matches!(self, WrapperConvention::Legacy | WrapperConvention::Both)
    }
}

/// Options controlling the middle-end and code generation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompilerOptions {
    /// Treat a register assigned an error value as undefined in refcount analysis
    #[serde(default = "default_true")]
    pub strict_errors: bool,
    /// Run the IR verifier after every pass
    #[serde(default = "default_true")]
    pub verify_ir: bool,
    /// Transform functions in parallel
    #[serde(default)]
    pub parallel: bool,
    #[serde(default)]
    pub wrapper_convention: WrapperConvention,
    /// Emit `#line` directives pointing at the source
    #[serde(default)]
    pub emit_line_directives: bool,
    /// Prefix of the generated C symbols that must be unique across a build
    #[serde(default)]
    pub module_prefix: String,
}

fn default_true() -> bool {
    true
}

impl Default for CompilerOptions {
    fn default() -> Self {
        Self {
            strict_errors: true,
            verify_ir: true,
            parallel: false,
            wrapper_convention: WrapperConvention::default(),
            emit_line_directives: false,
            module_prefix: String::new(),
        }
    }
}

impl CompilerOptions {
    pub fn from_ron_str(content: &str) -> Result<Self, ConfigError> {
        Ok(ron::from_str(content)?)
    }

    /// Load options from a RON file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::from_ron_str(&content)
    }

    pub fn to_ron_string(&self) -> Result<String, ConfigError> {
        Ok(ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())?)
    }
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Config parse error: {0}")]
    ParseError(#[from] ron::error::SpannedError),

    #[error("Config serialize error: {0}")]
    SerializeError(#[from] ron::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_for_missing_fields() {
        let options = CompilerOptions::from_ron_str("()").unwrap();
        assert_eq!(options, CompilerOptions::default());
        assert!(options.strict_errors);
        assert!(options.verify_ir);
    }

    #[test]
    fn test_partial_override() {
        let options =
            CompilerOptions::from_ron_str("(wrapper_convention: both, module_prefix: \"pkg_\")").unwrap();
        assert_eq!(options.wrapper_convention, WrapperConvention::Both);
        assert!(options.wrapper_convention.emits_legacy());
        assert!(options.wrapper_convention.emits_fastcall());
        assert_eq!(options.module_prefix, "pkg_");
        assert!(!options.parallel);
    }

    #[test]
    fn test_round_trip_through_file() {
        let options = CompilerOptions {
            parallel: true,
            wrapper_convention: WrapperConvention::Legacy,
            ..CompilerOptions::default()
        };
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(options.to_ron_string().unwrap().as_bytes()).unwrap();
        assert_eq!(CompilerOptions::load(file.path()).unwrap(), options);
    }

    #[test]
    fn test_parse_error() {
        let err = CompilerOptions::from_ron_str("(parallel: maybe)").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }
}
