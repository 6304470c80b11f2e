//! Execution of one turn's batch of actions.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde_json::{Map, Value};
use tracing::{info, instrument, warn};

use crate::core::budget::Budget;
use crate::core::types::{Action, ActionKind, RunContext};
use crate::io::console::Console;
use crate::io::file_tree::read_base64;
use crate::io::sandbox::Sandbox;

/// What happened to a `finalizar` action's content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinalizeOutcome {
    /// Content written to this path.
    Saved(PathBuf),
    /// Content present but no path to save it to.
    Discarded,
    /// The action carried no content.
    NoContent,
}

/// Result of executing a batch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TurnReport {
    /// Raw actions that were executed, in order.
    pub executed: Vec<Value>,
    pub attachments: Map<String, Value>,
    /// Set when a `finalizar` ran; the run ends here.
    pub finalized: Option<FinalizeOutcome>,
}

/// Execute `batch` in order, counting each executed action in `budget`.
///
/// Stops at the first `finalizar`. Unknown or malformed actions are skipped.
#[instrument(skip_all, fields(batch = batch.len()))]
pub fn execute_batch(
    ctx: &RunContext,
    sandbox: &Sandbox,
    console: &Console,
    batch: &[Value],
    budget: &mut Budget,
) -> Result<TurnReport> {
    let mut report = TurnReport::default();
    for raw in batch {
        let action: Action = match serde_json::from_value(raw.clone()) {
            Ok(action) => action,
            Err(err) => {
                warn!(error = %err, "skipping malformed action");
                continue;
            }
        };
        console.action(&action);

        match action.action_kind() {
            ActionKind::ReadFile => {
                let Some(path) = action.string_param("path").or(action.path.as_deref()) else {
                    warn!(id = ?action.id, "skipping leia_arquivo without parameters.path");
                    continue;
                };
                budget.record_step();
                info!(step = budget.total_steps(), path, "executing leia_arquivo");
                let content = read_attachment(sandbox, path);
                report.attachments.insert(path.to_string(), content);
                report.executed.push(raw.clone());
            }
            ActionKind::Finalize => {
                budget.record_step();
                info!(step = budget.total_steps(), "executing finalizar");
                let outcome = finalize(ctx, &action)?;
                report.executed.push(raw.clone());
                report.finalized = Some(outcome);
                return Ok(report);
            }
            ActionKind::Unknown(kind) => {
                warn!(kind = %kind, "unrecognized action type; skipping");
            }
        }
    }
    Ok(report)
}

fn read_attachment(sandbox: &Sandbox, requested: &str) -> Value {
    let Some(resolved) = sandbox.resolve(requested) else {
        return Value::Null;
    };
    match read_base64(&resolved) {
        Ok(encoded) => {
            info!(path = %resolved.display(), "read requested file");
            Value::String(encoded)
        }
        Err(err) => {
            warn!(path = %resolved.display(), error = %format!("{err:#}"), "failed to read requested file");
            Value::Null
        }
    }
}

/// Report content, first non-empty of `content`, `html`, `html_content`.
pub fn finalize_content(action: &Action) -> Option<&str> {
    ["content", "html", "html_content"]
        .into_iter()
        .find_map(|key| action.string_param(key))
}

/// Save path: the action's `path`, else the configured report path.
pub fn finalize_path(ctx: &RunContext, action: &Action) -> Option<PathBuf> {
    if let Some(path) = action.string_param("path") {
        return Some(join_config_dir(&ctx.config_dir, path));
    }
    ctx.report_path.clone()
}

fn join_config_dir(config_dir: &Path, path: &str) -> PathBuf {
    let path = Path::new(path);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        config_dir.join(path)
    }
}

fn finalize(ctx: &RunContext, action: &Action) -> Result<FinalizeOutcome> {
    let Some(content) = finalize_content(action) else {
        warn!("finalizar carried no content in parameters.content/html/html_content");
        return Ok(FinalizeOutcome::NoContent);
    };
    let Some(path) = finalize_path(ctx, action) else {
        warn!(
            bytes = content.len(),
            "final report received but no path to save it; content discarded"
        );
        return Ok(FinalizeOutcome::Discarded);
    };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create report dir {}", parent.display()))?;
    }
    fs::write(&path, content).with_context(|| format!("write report {}", path.display()))?;
    info!(path = %path.display(), "final report saved");
    Ok(FinalizeOutcome::Saved(path))
}
