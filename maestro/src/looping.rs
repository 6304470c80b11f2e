//! The orchestration loop: call the model, execute its actions, feed results back.
//!
//! ```text
//! AwaitingFirstResponse -> Dispatching -> (RequestingNextSteps <-> Dispatching) -> Done
//! ```
//!
//! Only the first model call is fatal on failure. Later failures become a
//! synthetic `status: "error"` response carrying the last memory, and every
//! attempted call counts toward the request budget.

use std::path::PathBuf;

use anyhow::Result;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::core::budget::{Budget, STEP_CEILING};
use crate::core::normalize::normalize;
use crate::core::payload::{ActionUpdate, action_update_payload, initial_payload, next_steps_payload};
use crate::core::types::{RunContext, StructuredResponse};
use crate::io::console::Console;
use crate::io::gateway::{GatewayError, ModelGateway};
use crate::io::sandbox::Sandbox;
use crate::io::transport::Transport;
use crate::step::{FinalizeOutcome, execute_batch};

/// Reason why [`run_loop`] stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopStop {
    /// A `finalizar` action ran; `report` is where the content was saved.
    Finalized { report: Option<PathBuf> },
    /// More work was pending but no model calls were left.
    RequestBudgetExhausted,
    /// The model replied with `status: "done"`.
    ModelDone,
    /// More than [`STEP_CEILING`] actions executed.
    StepCeiling,
}

/// Summary of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct LoopOutcome {
    pub requests_made: u32,
    pub total_steps: u32,
    pub stop: LoopStop,
    /// Memory of the last response.
    pub memory: Map<String, Value>,
}

/// The first model call failed; nothing was executed.
#[derive(Debug, Error)]
#[error("first model call failed: {source}")]
pub struct FirstCallFailed {
    #[source]
    pub source: CallError,
}

/// A model call that produced no usable response.
#[derive(Debug, Error)]
pub enum CallError {
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error("model reply could not be normalized: {0}")]
    Normalize(#[from] crate::core::normalize::NormalizeError),
}

enum LoopState {
    AwaitingFirstResponse,
    Dispatching(StructuredResponse),
    RequestingNextSteps(StructuredResponse),
    Done(LoopStop),
}

/// Drive the model until it finalizes, says it is done or runs out of budget.
#[instrument(skip_all, fields(max_requests = ctx.max_requests, max_actions = ctx.max_actions_per_turn))]
pub fn run_loop<T: Transport>(
    ctx: &RunContext,
    gateway: &ModelGateway<T>,
    console: &Console,
) -> Result<LoopOutcome> {
    let sandbox = Sandbox::new(&ctx.allowed_root, ctx.allowed_root_absolute, &ctx.config_dir);
    let mut budget = Budget::new(ctx.max_requests);
    let mut memory = Map::new();
    let mut state = LoopState::AwaitingFirstResponse;

    loop {
        state = match state {
            LoopState::AwaitingFirstResponse => {
                budget.record_request();
                let payload = initial_payload(ctx)?;
                let response = call_model(gateway, console, &payload)
                    .map_err(|source| FirstCallFailed { source })?;
                LoopState::Dispatching(response)
            }
            LoopState::Dispatching(response) => {
                memory.clone_from(&response.memory);
                let (batch, dropped) = response.pending_actions(ctx.max_actions_per_turn);
                if dropped > 0 {
                    warn!(
                        dropped,
                        limit = ctx.max_actions_per_turn,
                        "reply carried more actions than the per-turn limit; extra actions ignored"
                    );
                }

                if batch.is_empty() {
                    if response.is_done() {
                        LoopState::Done(LoopStop::ModelDone)
                    } else {
                        LoopState::RequestingNextSteps(response)
                    }
                } else {
                    let report = execute_batch(ctx, &sandbox, console, &batch, &mut budget)?;
                    if let Some(outcome) = report.finalized {
                        let report = match outcome {
                            FinalizeOutcome::Saved(path) => Some(path),
                            FinalizeOutcome::Discarded | FinalizeOutcome::NoContent => None,
                        };
                        LoopState::Done(LoopStop::Finalized { report })
                    } else if budget.steps_exceeded() {
                        warn!(total_steps = budget.total_steps(), ceiling = STEP_CEILING, "step ceiling exceeded");
                        LoopState::Done(LoopStop::StepCeiling)
                    } else if response.is_done() {
                        LoopState::Done(LoopStop::ModelDone)
                    } else if !budget.can_request() {
                        LoopState::Done(LoopStop::RequestBudgetExhausted)
                    } else {
                        let payload = action_update_payload(
                            ctx,
                            &ActionUpdate {
                                executed: &report.executed,
                                attachments: &report.attachments,
                                memory: &response.memory,
                                total_steps: budget.total_steps(),
                                plan: &response.plan,
                            },
                        )?;
                        budget.record_request();
                        LoopState::Dispatching(call_or_error(gateway, console, &payload, &response.memory))
                    }
                }
            }
            LoopState::RequestingNextSteps(response) => {
                if !budget.can_request() {
                    LoopState::Done(LoopStop::RequestBudgetExhausted)
                } else {
                    let payload = next_steps_payload(
                        ctx,
                        &response.memory,
                        &response.plan,
                        budget.remaining_requests(),
                    )?;
                    budget.record_request();
                    LoopState::Dispatching(call_or_error(gateway, console, &payload, &response.memory))
                }
            }
            LoopState::Done(stop) => {
                info!(
                    requests_made = budget.requests_made(),
                    total_steps = budget.total_steps(),
                    stop = ?stop,
                    "orchestration finished"
                );
                return Ok(LoopOutcome {
                    requests_made: budget.requests_made(),
                    total_steps: budget.total_steps(),
                    stop,
                    memory,
                });
            }
        };
    }
}

fn call_model<T: Transport>(
    gateway: &ModelGateway<T>,
    console: &Console,
    payload: &Value,
) -> Result<StructuredResponse, CallError> {
    let raw = gateway.invoke_with_retries(payload)?;
    let response = normalize(raw)?;
    console.memory(&response.memory);
    Ok(response)
}

fn call_or_error<T: Transport>(
    gateway: &ModelGateway<T>,
    console: &Console,
    payload: &Value,
    memory: &Map<String, Value>,
) -> StructuredResponse {
    match call_model(gateway, console, payload) {
        Ok(response) => response,
        Err(err) => {
            warn!(error = %err, "model call failed; continuing with an error response");
            StructuredResponse::error(memory.clone())
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::core::types::Platform;
    use crate::io::gateway::RetryPolicy;
    use crate::test_support::{ScriptedTransport, TestWorkspace, connection};
    use serde_json::json;

    fn gateway(replies: Vec<Value>) -> ModelGateway<ScriptedTransport> {
        ModelGateway::new(
            ScriptedTransport::new(replies.into_iter().map(|r| Ok(r.to_string())).collect()),
            connection(Platform::GoogleGemini, "https://proxy.local/run"),
            RetryPolicy {
                max_attempts: 1,
                backoff_unit: Duration::ZERO,
            },
            Console::default(),
        )
    }

    #[test]
    fn next_steps_is_requested_when_the_reply_has_no_action() {
        let ws = TestWorkspace::new();
        let mut ctx = ws.context();
        ctx.max_requests = 2;
        let gw = gateway(vec![
            json!({"status": "ok", "plan": ["think"], "action": null, "memory": {"n": 1}}),
            json!({"status": "done", "plan": [], "action": null, "memory": {"n": 2}}),
        ]);

        let outcome = run_loop(&ctx, &gw, &Console::default()).expect("loop");
        assert_eq!(outcome.stop, LoopStop::ModelDone);
        assert_eq!(outcome.requests_made, 2);
        assert_eq!(outcome.memory, json!({"n": 2}).as_object().cloned().expect("map"));

        let requests = gw.transport().requests();
        assert_eq!(requests[1].body["request"], json!("next_steps"));
        assert_eq!(requests[1].body["max_steps"], json!(1));
        assert_eq!(requests[1].body["memory"], json!({"n": 1}));
        assert_eq!(requests[1].body["plan"], json!(["think"]));
    }

    #[test]
    fn budget_of_one_stops_before_a_second_call() {
        let ws = TestWorkspace::new();
        let gw = gateway(vec![json!({"status": "ok", "plan": [], "action": null, "memory": {}})]);
        let outcome = run_loop(&ws.context(), &gw, &Console::default()).expect("loop");
        assert_eq!(outcome.stop, LoopStop::RequestBudgetExhausted);
        assert_eq!(gw.transport().requests().len(), 1);
    }

    #[test]
    fn first_call_failure_is_fatal() {
        let ws = TestWorkspace::new();
        let gw = gateway(Vec::new());
        let err = run_loop(&ws.context(), &gw, &Console::default()).unwrap_err();
        assert!(err.downcast_ref::<FirstCallFailed>().is_some());
    }

    #[test]
    fn later_failure_becomes_error_response_with_last_memory() {
        let ws = TestWorkspace::new();
        let mut ctx = ws.context();
        ctx.max_requests = 3;
        // Second call has no scripted reply and fails; the loop keeps going.
        let gw = gateway(vec![json!({"status": "ok", "plan": ["p"], "action": null, "memory": {"kept": true}})]);

        let outcome = run_loop(&ctx, &gw, &Console::default()).expect("loop");
        assert_eq!(outcome.stop, LoopStop::RequestBudgetExhausted);
        assert_eq!(outcome.requests_made, 3);
        let requests = gw.transport().requests();
        assert_eq!(requests.len(), 3);
        assert_eq!(requests[2].body["memory"], json!({"kept": true}));
        assert_eq!(requests[2].body["plan"], json!([]));
    }

    #[test]
    fn step_ceiling_stops_the_run_even_with_budget_left() {
        let ws = TestWorkspace::new();
        let mut ctx = ws.context();
        ctx.max_requests = 5;
        ctx.max_actions_per_turn = 1001;
        let actions: Vec<Value> = (1..=1001)
            .map(|id| json!({"id": id, "type": "leia_arquivo", "parameters": {"path": "data/missing.txt"}}))
            .collect();
        let gw = gateway(vec![json!({"status": "ok", "plan": [], "actions": actions, "memory": {}})]);

        let outcome = run_loop(&ctx, &gw, &Console::default()).expect("loop");
        assert_eq!(outcome.stop, LoopStop::StepCeiling);
        assert_eq!(outcome.total_steps, 1001);
        assert_eq!(outcome.requests_made, 1);
        assert_eq!(gw.transport().requests().len(), 1);
    }

    #[test]
    fn done_reply_with_actions_executes_them_then_stops() {
        let ws = TestWorkspace::new();
        ws.write_file("data/a.txt", "a");
        let mut ctx = ws.context();
        ctx.max_requests = 5;
        let gw = gateway(vec![json!({
            "status": "done",
            "plan": [],
            "action": {"id": 1, "type": "leia_arquivo", "parameters": {"path": "data/a.txt"}},
            "memory": {}
        })]);

        let outcome = run_loop(&ctx, &gw, &Console::default()).expect("loop");
        assert_eq!(outcome.stop, LoopStop::ModelDone);
        assert_eq!(outcome.total_steps, 1);
        assert_eq!(gw.transport().requests().len(), 1);
    }
}
