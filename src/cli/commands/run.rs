//! Run and exec commands - Execute one module
//!
//! `run` takes `key=value` arguments (and optionally a YAML/JSON file) and prints
//! the result in the selected format. `exec` follows the Ansible module protocol:
//! it reads a JSON file holding `ANSIBLE_MODULE_ARGS` and always prints the
//! result object as JSON.

use super::CommandContext;
use crate::cli::OutputFormat;
use azcollection::error::{Error, Result};
use azcollection::modules::{ModuleContext, ModuleError, ModuleOutput, ModuleParams, ParamExt};
use clap::Parser;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Arguments for the run command
#[derive(Parser, Debug, Clone)]
pub struct RunArgs {
    /// Module to run (see `azcollection list`)
    pub module: String,

    /// Module argument as key=value; values are parsed as YAML (repeatable)
    #[arg(short = 'a', long = "arg", action = clap::ArgAction::Append)]
    pub args: Vec<String>,

    /// YAML or JSON file with module arguments; `-a` values override it
    #[arg(long)]
    pub args_file: Option<PathBuf>,

    /// Report what would change without changing anything
    #[arg(long)]
    pub check: bool,

    /// Show the state before and after
    #[arg(long)]
    pub diff: bool,
}

/// Arguments for the exec command
#[derive(Parser, Debug, Clone)]
pub struct ExecArgs {
    /// Module to run
    pub module: String,

    /// JSON file with `{"ANSIBLE_MODULE_ARGS": {...}}`
    pub args_file: PathBuf,
}

impl RunArgs {
    /// Execute the run command
    pub async fn execute(&self, ctx: &CommandContext) -> i32 {
        let params = match self.collect_params() {
            Ok(params) => params,
            Err(e) => return report_error(ctx, &self.module, &e, ctx.output.format()),
        };

        let check = self.check || params.get_bool_or("_ansible_check_mode", false);
        let diff = self.diff || params.get_bool_or("_ansible_diff", false);
        invoke(ctx, &self.module, params, check, diff, ctx.output.format()).await
    }

    fn collect_params(&self) -> Result<ModuleParams> {
        let mut params = match &self.args_file {
            Some(path) => load_args_file(path)?,
            None => ModuleParams::new(),
        };
        for arg in &self.args {
            let (key, value) = parse_key_value(&self.module, arg)?;
            params.insert(key, value);
        }
        Ok(params)
    }
}

impl ExecArgs {
    /// Execute the exec command
    pub async fn execute(&self, ctx: &CommandContext) -> i32 {
        let params = match load_args_file(&self.args_file) {
            Ok(params) => params,
            Err(e) => return report_error(ctx, &self.module, &e, OutputFormat::Json),
        };
        let check = params.get_bool_or("_ansible_check_mode", false);
        let diff = params.get_bool_or("_ansible_diff", false);
        invoke(ctx, &self.module, params, check, diff, OutputFormat::Json).await
    }
}

/// Run a module and print its result; returns the process exit status.
async fn invoke(
    ctx: &CommandContext,
    module: &str,
    params: ModuleParams,
    check: bool,
    diff: bool,
    format: OutputFormat,
) -> i32 {
    let context = ModuleContext::new()
        .with_check_mode(check)
        .with_diff_mode(diff)
        .with_config(ctx.config.clone());
    debug!(module, check, diff, "Invoking module");

    match ctx.registry.execute(module, &params, &context).await {
        Ok(output) => {
            print_output(ctx, module, &output, format);
            0
        }
        Err(ModuleError::NotFound(name)) => {
            report_error(ctx, module, &Error::ModuleNotFound(name), format)
        }
        Err(e) => report_error(ctx, module, &Error::Module(e), format),
    }
}

fn print_output(ctx: &CommandContext, module: &str, output: &ModuleOutput, format: OutputFormat) {
    if format == OutputFormat::Json && ctx.output.format() != OutputFormat::Json {
        // exec: one compact line, as a controller expects
        println!("{}", output.to_result_json());
    } else {
        ctx.output.module_result(module, output);
    }
}

fn report_error(ctx: &CommandContext, module: &str, err: &Error, format: OutputFormat) -> i32 {
    debug!(module, "Module failed: {}", err);
    print_output(ctx, module, &ModuleOutput::failed(err.to_string()), format);
    err.exit_code()
}

/// Parse `key=value`; the value is read as YAML so numbers, booleans, lists and
/// maps keep their types.
pub fn parse_key_value(module: &str, arg: &str) -> Result<(String, Value)> {
    let (key, raw) = arg
        .split_once('=')
        .ok_or_else(|| Error::module_args(module, format!("expected key=value, got '{}'", arg)))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(Error::module_args(module, format!("empty key in '{}'", arg)));
    }
    let value = if raw.is_empty() {
        Value::String(String::new())
    } else {
        serde_yaml::from_str::<serde_yaml::Value>(raw)
            .ok()
            .and_then(|v| serde_json::to_value(v).ok())
            .unwrap_or_else(|| Value::String(raw.to_string()))
    };
    Ok((key.to_string(), value))
}

/// Read module arguments from a YAML or JSON file.
///
/// A top-level `ANSIBLE_MODULE_ARGS` object is unwrapped.
pub fn load_args_file(path: &Path) -> Result<ModuleParams> {
    let content =
        std::fs::read_to_string(path).map_err(|e| Error::args_file(path, e.to_string()))?;
    let parsed: serde_yaml::Value =
        serde_yaml::from_str(&content).map_err(|e| Error::args_file(path, e.to_string()))?;
    let mut value = serde_json::to_value(parsed).map_err(|e| Error::args_file(path, e.to_string()))?;

    if let Some(inner) = value.get_mut("ANSIBLE_MODULE_ARGS") {
        value = inner.take();
    }
    match value {
        Value::Object(map) => Ok(map.into_iter().collect()),
        Value::Null => Ok(ModuleParams::new()),
        _ => Err(Error::args_file(path, "arguments must be a mapping")),
    }
}
