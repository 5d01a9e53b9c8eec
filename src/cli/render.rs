// src/cli/render.rs

//! Help and result rendering.
//!
//! The dispatcher only ever calls the [`Renderer`] trait. [`TextRenderer`] is
//! the default implementation: a click-style help page, optionally colored,
//! printed to stdout.

use crate::models::{GroupNode, NodeRef, ParameterSpec, Value};
use colored::Colorize;

/// Formats help text and command results on behalf of the dispatcher.
pub trait Renderer {
    /// Builds the help page of `node`. `ancestors` are the groups above it, root first.
    fn render_help(&self, node: NodeRef<'_>, ancestors: &[&GroupNode]) -> String;

    /// Called once with the leaf command's return value.
    fn render_result(&self, value: &Value);

    /// Displays a help page built by [`Self::render_help`].
    fn show_help(&self, text: &str) {
        println!("{}", text);
    }
}

/// Where rendered output goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Output {
    #[default]
    Stdout,
    /// Output is produced but discarded; callers read it from the outcome.
    Silent,
}

#[derive(Debug, Clone, Default)]
pub struct TextRenderer {
    prog_name: Option<String>,
    styled: bool,
    show_defaults: bool,
    output: Output,
}

impl TextRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Name printed in place of the root group's name in usage lines.
    pub fn prog_name(mut self, name: &str) -> Self {
        self.prog_name = Some(name.to_string());
        self
    }

    /// Colors headings, flags and command names when the terminal supports it.
    pub fn styled(mut self, styled: bool) -> Self {
        self.styled = styled && colored::control::SHOULD_COLORIZE.should_colorize();
        self
    }

    /// Shows `[default: ...]` for every option that has one.
    pub fn show_defaults(mut self, show: bool) -> Self {
        self.show_defaults = show;
        self
    }

    pub fn silent() -> Self {
        Self {
            output: Output::Silent,
            ..Self::default()
        }
    }

    fn heading(&self, text: &str) -> String {
        if self.styled {
            text.yellow().bold().to_string()
        } else {
            text.to_string()
        }
    }

    fn literal(&self, text: &str) -> String {
        if self.styled {
            text.cyan().to_string()
        } else {
            text.to_string()
        }
    }

    fn command_name(&self, text: &str) -> String {
        if self.styled {
            text.green().bold().to_string()
        } else {
            text.to_string()
        }
    }

    fn usage_line(&self, node: NodeRef<'_>, ancestors: &[&GroupNode]) -> String {
        let mut path: Vec<&str> = ancestors
            .iter()
            .map(|g| g.name.as_str())
            .chain(std::iter::once(node.name()))
            .collect();
        if let (Some(prog), Some(first)) = (self.prog_name.as_deref(), path.first_mut()) {
            *first = prog;
        }

        let mut parts = vec![path.join(" "), "[OPTIONS]".to_string()];
        parts.extend(
            node.params()
                .iter()
                .filter(|p| p.is_argument())
                .map(argument_usage),
        );
        if node.is_group() {
            parts.push("COMMAND [ARGS]...".to_string());
        }
        format!("{} {}", self.heading("Usage:"), parts.join(" "))
    }

    fn option_rows(&self, params: &[ParameterSpec]) -> Vec<(String, String)> {
        params
            .iter()
            .filter(|p| p.is_option())
            .map(|spec| {
                let mut left = spec.flags.join(", ");
                if !spec.flag_only {
                    left.push(' ');
                    left.push_str(&spec.metavar());
                }
                let mut right = spec.help.clone();
                if let Some(default) = self.visible_default(spec) {
                    if !right.is_empty() {
                        right.push_str("  ");
                    }
                    right.push_str(&format!("[default: {}]", default));
                }
                (left, right)
            })
            .collect()
    }

    fn visible_default(&self, spec: &ParameterSpec) -> Option<String> {
        if spec.flag_only || spec.eager || !(spec.show_default || self.show_defaults) {
            return None;
        }
        spec.default
            .as_ref()
            .filter(|v| !v.is_null())
            .map(ToString::to_string)
    }

    fn command_rows(&self, group: &GroupNode) -> Vec<(String, String)> {
        group
            .children
            .values()
            .map(|child| {
                let child = child.as_ref();
                let mut left = child.name().to_string();
                if !child.aliases().is_empty() {
                    let aliases: Vec<&str> = child.aliases().iter().map(String::as_str).collect();
                    left.push_str(&format!(" ({})", aliases.join(", ")));
                }
                let summary = child.help().lines().next().unwrap_or_default().to_string();
                (left, summary)
            })
            .collect()
    }

    fn section(&self, out: &mut Vec<String>, title: &str, rows: &[(String, String)], literal: bool) {
        if rows.is_empty() {
            return;
        }
        let width = rows.iter().map(|(left, _)| left.len()).max().unwrap_or(0);
        out.push(String::new());
        out.push(self.heading(title));
        for (left, right) in rows {
            let padding = " ".repeat(width - left.len());
            let left = if literal {
                self.literal(left)
            } else {
                self.command_name(left)
            };
            let line = if right.is_empty() {
                format!("  {}", left)
            } else {
                format!("  {}{}  {}", left, padding, right)
            };
            out.push(line);
        }
    }
}

impl Renderer for TextRenderer {
    fn render_help(&self, node: NodeRef<'_>, ancestors: &[&GroupNode]) -> String {
        let mut out = vec![self.usage_line(node, ancestors)];

        if !node.help().is_empty() {
            out.push(String::new());
            out.extend(node.help().lines().map(|line| format!("  {}", line)));
        }

        self.section(&mut out, "Options:", &self.option_rows(node.params()), true);
        if let Some(group) = node.as_group() {
            self.section(&mut out, "Commands:", &self.command_rows(group), false);
        }
        out.join("\n")
    }

    fn render_result(&self, value: &Value) {
        if self.output == Output::Silent {
            return;
        }
        if let Some(text) = format_result(value) {
            println!("{}", text);
        }
    }

    fn show_help(&self, text: &str) {
        if self.output == Output::Stdout {
            println!("{}", text);
        }
    }
}

/// The printed form of a command's return value; `None` prints nothing.
///
/// Lists print one item per line. Maps print `key: value` lines, with list
/// values joined by `", "`.
pub fn format_result(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::List(items) => Some(
            items
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("\n"),
        ),
        Value::Map(entries) => Some(
            entries
                .iter()
                .map(|(key, value)| format!("{}: {}", key, value))
                .collect::<Vec<_>>()
                .join("\n"),
        ),
        other => Some(other.to_string()),
    }
}

/// `NAME`, `[NAME]`, `NAME...` or `[NAME]...`.
fn argument_usage(spec: &ParameterSpec) -> String {
    let metavar = spec.metavar();
    let base = if spec.required {
        metavar
    } else {
        format!("[{}]", metavar)
    };
    match spec.arity {
        crate::models::Arity::Many => format!("{}...", base),
        crate::models::Arity::One => base,
    }
}
