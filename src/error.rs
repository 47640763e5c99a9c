//! Error types for the azcollection harness.
//!
//! Module execution has its own error type ([`ModuleError`]); this enum wraps it
//! together with the failures that happen around a module run, such as an unknown
//! module name or an unreadable arguments file.

use crate::modules::ModuleError;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for harness operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for azcollection.
#[derive(Error, Debug)]
pub enum Error {
    /// Module not found.
    #[error("Module '{0}' not found")]
    ModuleNotFound(String),

    /// Arguments could not be parsed into a parameter map.
    #[error("Invalid arguments for module '{module}': {message}")]
    ModuleArgs {
        /// Module name
        module: String,
        /// Error message
        message: String,
    },

    /// Arguments file could not be read or parsed.
    #[error("Failed to load arguments from '{path}': {message}")]
    ArgsFile {
        /// Path to the arguments file
        path: PathBuf,
        /// Error message
        message: String,
    },

    /// The module itself failed.
    #[error(transparent)]
    Module(#[from] ModuleError),

    /// Configuration could not be loaded.
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML serialization error.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl Error {
    /// Creates a new module args error.
    pub fn module_args(module: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ModuleArgs {
            module: module.into(),
            message: message.into(),
        }
    }

    /// Creates a new args file error.
    pub fn args_file(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::ArgsFile {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Returns the exit status for the CLI.
    ///
    /// A module failure exits 1, like an Ansible module does. Problems with the
    /// invocation itself exit 2.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Module(_) => 1,
            Error::ModuleNotFound(_) | Error::ModuleArgs { .. } | Error::ArgsFile { .. } => 2,
            _ => 1,
        }
    }
}
