//! Payloads sent to the model.
//!
//! The model is stateless between calls, so every turn re-sends the shared
//! context (instructions, config, prompt, file tree, request) next to the
//! turn-specific fields. Payloads are built in a vendor-neutral shape; the
//! gateway applies any vendor wrapping.

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::core::types::{FileEntry, RunContext};

/// Marker for the follow-up sent after executing actions.
pub const ACTION_EXECUTED: &str = "action_executed";
/// Marker for the request sent when a reply carried no action.
pub const NEXT_STEPS: &str = "next_steps";

/// Context re-sent on every turn.
#[derive(Debug, Clone, Serialize)]
pub struct SharedContext<'a> {
    pub orchestrator: &'a str,
    pub config: &'a Value,
    pub prompt: &'a str,
    pub file_tree: &'a [FileEntry],
}

impl<'a> SharedContext<'a> {
    pub fn from_run(ctx: &'a RunContext) -> Self {
        Self {
            orchestrator: &ctx.instructions,
            config: &ctx.config,
            prompt: &ctx.prompt,
            file_tree: &ctx.file_tree,
        }
    }
}

/// First payload of a run.
#[derive(Debug, Clone, Serialize)]
pub struct InitialPayload<'a> {
    #[serde(flatten)]
    pub context: SharedContext<'a>,
    pub request: &'a str,
}

/// Follow-up reporting the actions executed this turn.
#[derive(Debug, Clone, Serialize)]
pub struct ActionUpdatePayload<'a> {
    pub update: &'static str,
    /// Last action executed this turn.
    pub executed_action: &'a Value,
    pub executed_actions: &'a [Value],
    /// Requested path -> base64 content, or `null` when missing or denied.
    pub attachments: &'a Map<String, Value>,
    pub memory: &'a Map<String, Value>,
    #[serde(rename = "totalSteps")]
    pub total_steps: u32,
    pub plan: &'a [Value],
    pub request: &'a str,
    #[serde(flatten)]
    pub context: SharedContext<'a>,
}

/// Prompt for more work when the last reply carried no action.
#[derive(Debug, Clone, Serialize)]
pub struct NextStepsPayload<'a> {
    pub request: &'static str,
    pub memory: &'a Map<String, Value>,
    pub max_steps: u32,
    pub plan: &'a [Value],
    /// Original request string; `request` is taken by the `next_steps` marker.
    pub initial_request: &'a str,
    #[serde(flatten)]
    pub context: SharedContext<'a>,
}

pub fn initial_payload(ctx: &RunContext) -> Result<Value> {
    to_value("initial", &InitialPayload {
        context: SharedContext::from_run(ctx),
        request: &ctx.request,
    })
}

/// Inputs for [`action_update_payload`].
pub struct ActionUpdate<'a> {
    pub executed: &'a [Value],
    pub attachments: &'a Map<String, Value>,
    pub memory: &'a Map<String, Value>,
    pub total_steps: u32,
    pub plan: &'a [Value],
}

pub fn action_update_payload(ctx: &RunContext, update: &ActionUpdate<'_>) -> Result<Value> {
    to_value(ACTION_EXECUTED, &ActionUpdatePayload {
        update: ACTION_EXECUTED,
        executed_action: update.executed.last().unwrap_or(&Value::Null),
        executed_actions: update.executed,
        attachments: update.attachments,
        memory: update.memory,
        total_steps: update.total_steps,
        plan: update.plan,
        request: &ctx.request,
        context: SharedContext::from_run(ctx),
    })
}

pub fn next_steps_payload(
    ctx: &RunContext,
    memory: &Map<String, Value>,
    plan: &[Value],
    remaining_requests: u32,
) -> Result<Value> {
    to_value(NEXT_STEPS, &NextStepsPayload {
        request: NEXT_STEPS,
        memory,
        max_steps: remaining_requests,
        plan,
        initial_request: &ctx.request,
        context: SharedContext::from_run(ctx),
    })
}

fn to_value<T: Serialize>(kind: &str, payload: &T) -> Result<Value> {
    serde_json::to_value(payload).with_context(|| format!("serialize {kind} payload"))
}
