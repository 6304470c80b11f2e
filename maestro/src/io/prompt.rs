//! Orchestrator instructions sent with every payload.

use anyhow::{Context, Result};
use minijinja::{Environment, context};

use crate::core::types::ActionKind;

const ORCHESTRATOR_TEMPLATE: &str = include_str!("prompts/orchestrator.md");

/// Request string of the first payload, re-sent on every turn.
pub const INITIAL_REQUEST: &str = "Please reply with a structured JSON object containing: \
status (\"ok\"/\"error\"), plan: [...], action: {id, type, description, parameters} \
or actions: [...], memory: {}";

/// Values interpolated into the instructions.
#[derive(Debug, Clone)]
pub struct InstructionInputs<'a> {
    pub max_requests: u32,
    pub max_actions: u32,
    pub report: Option<&'a str>,
}

/// Render the orchestrator instructions.
pub fn render_instructions(inputs: &InstructionInputs<'_>) -> Result<String> {
    let mut env = Environment::new();
    env.add_template("orchestrator", ORCHESTRATOR_TEMPLATE)
        .context("load orchestrator template")?;
    let template = env.get_template("orchestrator")?;
    let rendered = template
        .render(context! {
            max_requests => inputs.max_requests,
            max_actions => inputs.max_actions,
            report => inputs.report,
            read_file => ActionKind::READ_FILE,
            finalize => ActionKind::FINALIZE,
        })
        .context("render orchestrator template")?;
    Ok(rendered)
}
