//! CLI module for azcollection
//!
//! This module provides the command-line interface: argument parsing and the
//! subcommands that run modules, list them and print their argument specs.

pub mod commands;
pub mod diff;
pub mod output;

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// azcollection - Azure Resource Manager modules
///
/// Runs one module against Azure and reports the result the way an Ansible
/// module does.
#[derive(Parser, Debug, Clone)]
#[command(name = "azcollection")]
#[command(author = "azcollection Contributors")]
#[command(version)]
#[command(about = "Idempotent Azure Resource Manager modules", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short = 'v', long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Output format
    #[arg(short = 'o', long, global = true, default_value = "human")]
    pub output: OutputFormat,

    /// Path to configuration file
    #[arg(short = 'c', long, global = true, env = "AZCOLLECTION_CONFIG")]
    pub config: Option<PathBuf>,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,
}

/// Output format for CLI
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Default)]
pub enum OutputFormat {
    /// Human-readable output with colors
    #[default]
    Human,
    /// The module result as JSON
    Json,
    /// The module result as YAML
    Yaml,
}

/// Available subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Run a module with arguments from the command line or a file
    Run(commands::run::RunArgs),

    /// Run a module the way an Ansible controller does (JSON args file in, JSON out)
    Exec(commands::run::ExecArgs),

    /// List available modules
    List(commands::list::ListArgs),

    /// Show a module's parameters
    Doc(commands::list::DocArgs),
}

impl Cli {
    /// Parse command-line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }

    /// Get the effective verbosity level (0-3)
    pub fn verbosity(&self) -> u8 {
        self.verbose.min(3)
    }
}
