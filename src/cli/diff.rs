//! Diff rendering for `--diff` in human output
//!
//! Provides a colorized unified diff of a resource's state before and after a run,
//! using the similar crate.

use colored::Colorize;
use similar::{ChangeTag, TextDiff};
use std::fmt::Write;

/// Renders unified diffs for the terminal.
#[derive(Debug, Clone)]
pub struct DiffRenderer {
    use_color: bool,
    context_lines: usize,
}

impl Default for DiffRenderer {
    fn default() -> Self {
        Self {
            use_color: false,
            context_lines: 3,
        }
    }
}

impl DiffRenderer {
    pub fn new(use_color: bool) -> Self {
        Self {
            use_color,
            ..Self::default()
        }
    }

    pub fn with_context_lines(mut self, lines: usize) -> Self {
        self.context_lines = lines;
        self
    }

    /// Unified diff of `old` against `new`; empty when they are equal.
    pub fn diff(&self, old: &str, new: &str, old_name: &str, new_name: &str) -> String {
        let diff = TextDiff::from_lines(old, new);
        let mut output = String::new();

        let mut unified = diff.unified_diff();
        unified.context_radius(self.context_lines);
        let mut hunks = unified.iter_hunks().peekable();
        if hunks.peek().is_none() {
            return output;
        }

        let _ = writeln!(output, "{}", self.paint(&format!("--- {}", old_name), Paint::Removed));
        let _ = writeln!(output, "{}", self.paint(&format!("+++ {}", new_name), Paint::Added));

        for hunk in hunks {
            let _ = writeln!(output, "{}", self.paint(&hunk.header().to_string(), Paint::Header));
            for change in hunk.iter_changes() {
                let line = change.value().trim_end_matches('\n');
                let (marker, paint) = match change.tag() {
                    ChangeTag::Delete => ('-', Paint::Removed),
                    ChangeTag::Insert => ('+', Paint::Added),
                    ChangeTag::Equal => (' ', Paint::Context),
                };
                let _ = writeln!(output, "{}", self.paint(&format!("{}{}", marker, line), paint));
            }
        }
        output
    }

    fn paint(&self, text: &str, paint: Paint) -> String {
        if !self.use_color {
            return text.to_string();
        }
        match paint {
            Paint::Added => text.green().to_string(),
            Paint::Removed => text.red().to_string(),
            Paint::Header => text.cyan().to_string(),
            Paint::Context => text.dimmed().to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Paint {
    Added,
    Removed,
    Header,
    Context,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unified_diff() {
        let old = "{\n  \"quota\": 100\n}\n";
        let new = "{\n  \"quota\": 200\n}\n";
        let output = DiffRenderer::new(false).diff(old, new, "before", "after");
        assert!(output.starts_with("--- before\n+++ after\n"));
        assert!(output.contains("-  \"quota\": 100"));
        assert!(output.contains("+  \"quota\": 200"));
        assert!(output.contains("@@"));
    }

    #[test]
    fn test_no_changes() {
        let output = DiffRenderer::new(false).diff("a\n", "a\n", "before", "after");
        assert!(output.is_empty());
    }

    #[test]
    fn test_deleted_resource() {
        let output = DiffRenderer::new(false)
            .with_context_lines(0)
            .diff("{\"name\": \"x\"}\n", "", "before", "after");
        assert!(output.contains("-{\"name\": \"x\"}"));
    }
}
