//! List and doc commands

use super::CommandContext;
use azcollection::error::Error;
use clap::Parser;
use serde_json::json;

/// Arguments for the list command
#[derive(Parser, Debug, Clone)]
pub struct ListArgs {}

/// Arguments for the doc command
#[derive(Parser, Debug, Clone)]
pub struct DocArgs {
    /// Module to describe
    pub module: String,
}

impl ListArgs {
    pub fn execute(&self, ctx: &CommandContext) -> i32 {
        let modules: Vec<(&str, &str)> = ctx
            .registry
            .names()
            .into_iter()
            .filter_map(|name| ctx.registry.get(name).map(|m| (name, m.description())))
            .collect();
        ctx.output.module_list(&modules);
        0
    }
}

impl DocArgs {
    pub fn execute(&self, ctx: &CommandContext) -> i32 {
        let Some(module) = ctx.registry.get(&self.module) else {
            let err = Error::ModuleNotFound(self.module.clone());
            eprintln!("{}", err);
            return err.exit_code();
        };
        let doc = json!({
            "module": module.name(),
            "description": module.description(),
            "options": module.argument_spec(),
        });
        ctx.output.value(&doc);
        0
    }
}
