//! Output formatting module for azcollection
//!
//! Module results go to stdout: a colored summary line for humans, or the exact
//! result object as JSON or YAML for scripts. Logs never go to stdout.

use super::diff::DiffRenderer;
use super::OutputFormat;
use azcollection::modules::{ModuleOutput, ModuleStatus};
use colored::Colorize;
use serde_json::Value;

/// Output formatter for different output modes
pub struct OutputFormatter {
    use_color: bool,
    format: OutputFormat,
}

impl OutputFormatter {
    /// Create a new output formatter
    pub fn new(use_color: bool, format: OutputFormat) -> Self {
        // Respect NO_COLOR environment variable
        let use_color = use_color && std::env::var("NO_COLOR").is_err();
        Self { use_color, format }
    }

    pub fn format(&self) -> OutputFormat {
        self.format
    }

    fn status_label(&self, status: ModuleStatus) -> String {
        let label = match status {
            ModuleStatus::Ok => "ok",
            ModuleStatus::Changed => "changed",
            ModuleStatus::Failed => "failed",
        };
        if !self.use_color {
            return label.to_string();
        }
        match status {
            ModuleStatus::Ok => label.green().to_string(),
            ModuleStatus::Changed => label.yellow().to_string(),
            ModuleStatus::Failed => label.red().bold().to_string(),
        }
    }

    /// Render a module result in the selected format.
    pub fn render_result(&self, module: &str, output: &ModuleOutput) -> String {
        let result = output.to_result_json();
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(&result).unwrap_or_default(),
            OutputFormat::Yaml => serde_yaml::to_string(&result).unwrap_or_default(),
            OutputFormat::Human => self.render_human(module, output, &result),
        }
    }

    fn render_human(&self, module: &str, output: &ModuleOutput, result: &Value) -> String {
        let name = if self.use_color {
            module.bright_white().bold().to_string()
        } else {
            module.to_string()
        };
        let mut text = format!("{}: [{}]", self.status_label(output.status), name);
        if !output.msg.is_empty() {
            text.push_str(&format!(" => {}", output.msg));
        }
        text.push('\n');

        if let Some(diff) = &output.diff {
            let rendered = DiffRenderer::new(self.use_color).diff(&diff.before, &diff.after, "before", "after");
            text.push_str(&rendered);
        }

        // Result payload without the parts already shown above
        if let Value::Object(map) = result {
            let payload: serde_json::Map<String, Value> = map
                .iter()
                .filter(|(k, _)| !matches!(k.as_str(), "changed" | "failed" | "msg" | "diff" | "invocation"))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            if !payload.is_empty() {
                let pretty = serde_json::to_string_pretty(&Value::Object(payload)).unwrap_or_default();
                text.push_str(&pretty);
                text.push('\n');
            }
        }
        text
    }

    /// Print a module result
    pub fn module_result(&self, module: &str, output: &ModuleOutput) {
        let rendered = self.render_result(module, output);
        if rendered.ends_with('\n') {
            print!("{}", rendered);
        } else {
            println!("{}", rendered);
        }
    }

    /// Print any serializable value in the selected format (human falls back to YAML).
    pub fn value(&self, value: &Value) {
        let rendered = match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(value).unwrap_or_default(),
            OutputFormat::Yaml | OutputFormat::Human => serde_yaml::to_string(value).unwrap_or_default(),
        };
        println!("{}", rendered.trim_end());
    }

    /// Print the module list
    pub fn module_list(&self, modules: &[(&str, &str)]) {
        if self.format != OutputFormat::Human {
            let listing: serde_json::Map<String, Value> = modules
                .iter()
                .map(|(name, description)| (name.to_string(), Value::from(*description)))
                .collect();
            self.value(&Value::Object(listing));
            return;
        }
        let width = modules.iter().map(|(n, _)| n.len()).max().unwrap_or(0);
        for (name, description) in modules {
            let padded = format!("{:width$}", name, width = width);
            if self.use_color {
                println!("{}  {}", padded.cyan(), description);
            } else {
                println!("{}  {}", padded, description);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use azcollection::modules::Diff;
    use serde_json::json;

    #[test]
    fn test_human_result() {
        let formatter = OutputFormatter::new(false, OutputFormat::Human);
        let output = ModuleOutput::changed("Created resource group 'foo'")
            .with_data("state", json!({"name": "foo"}));
        let text = formatter.render_result("azure_rm_resourcegroup", &output);
        assert!(text.starts_with("changed: [azure_rm_resourcegroup] => Created resource group 'foo'\n"));
        assert!(text.contains("\"name\": \"foo\""));
        assert!(!text.contains("\"changed\""));
    }

    #[test]
    fn test_human_result_with_diff() {
        let formatter = OutputFormatter::new(false, OutputFormat::Human);
        let output = ModuleOutput::changed("Updated")
            .with_diff(Diff::new("{\"quota\": 100}\n", "{\"quota\": 200}\n"));
        let text = formatter.render_result("azure_rm_storageshare", &output);
        assert!(text.contains("-{\"quota\": 100}"));
        assert!(text.contains("+{\"quota\": 200}"));
    }

    #[test]
    fn test_json_result_is_result_object() {
        let formatter = OutputFormatter::new(false, OutputFormat::Json);
        let output = ModuleOutput::failed("boom");
        let parsed: Value =
            serde_json::from_str(&formatter.render_result("azure_rm_resource", &output)).unwrap();
        assert_eq!(parsed, json!({"changed": false, "failed": true, "msg": "boom"}));
    }
}
