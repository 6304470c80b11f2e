//! Console echo of model traffic, actions and memory.
//!
//! This is product output on stdout, separate from `tracing` diagnostics.

use serde_json::{Map, Value};

use crate::core::types::{Action, RunOptions};

/// Prefix every line of `text` with `prefix`. Empty text still prints one line.
pub fn render_prefixed(prefix: &str, text: &str) -> String {
    let mut lines: Vec<&str> = text.lines().collect();
    if lines.is_empty() {
        lines.push("");
    }
    lines
        .into_iter()
        .map(|line| format!("{prefix} {line}\n"))
        .collect()
}

/// Echo helpers gated by [`RunOptions`].
#[derive(Debug, Clone, Copy, Default)]
pub struct Console {
    options: RunOptions,
}

impl Console {
    pub fn new(options: RunOptions) -> Self {
        Self { options }
    }

    pub fn sent(&self, body: &Value) {
        if self.options.show_messages {
            print!("{}", render_prefixed(">>", &body.to_string()));
        }
    }

    pub fn received(&self, body: &str) {
        if self.options.show_messages {
            print!("{}", render_prefixed("<<", body));
        }
    }

    pub fn memory(&self, memory: &Map<String, Value>) {
        if !self.options.show_memory {
            return;
        }
        let pretty = serde_json::to_string_pretty(memory).unwrap_or_else(|_| format!("{memory:?}"));
        print!("{}", render_prefixed("MEM", &pretty));
    }

    /// Always printed: one line per action the model asked for.
    pub fn action(&self, action: &Action) {
        println!("{}", describe_action(action));
    }
}

pub fn describe_action(action: &Action) -> String {
    let id = action
        .id
        .as_ref()
        .map(ToString::to_string)
        .unwrap_or_default();
    format!("-- {}:{}: {}", id, action.kind, action.description)
}
