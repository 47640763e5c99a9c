//! Subcommands module for azcollection CLI
//!
//! This module contains all the subcommand implementations.

pub mod list;
pub mod run;

use crate::cli::output::OutputFormatter;
use azcollection::config::Config;
use azcollection::modules::ModuleRegistry;
use std::sync::Arc;

/// Common context shared between commands
pub struct CommandContext {
    /// Configuration
    pub config: Arc<Config>,
    /// Output formatter
    pub output: OutputFormatter,
    /// Built-in modules
    pub registry: ModuleRegistry,
    /// Verbosity level
    pub verbosity: u8,
}

impl CommandContext {
    /// Create a new command context from CLI arguments
    pub fn new(cli: &crate::cli::Cli, config: Config) -> Self {
        Self {
            config: Arc::new(config),
            output: OutputFormatter::new(!cli.no_color, cli.output),
            registry: ModuleRegistry::with_builtins(),
            verbosity: cli.verbosity(),
        }
    }
}
