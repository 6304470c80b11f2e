//! Run bootstrap: everything that happens before the first model call.
//!
//! Loads and validates the config, reads the request file, resolves the
//! sandbox root, renders the orchestrator instructions and takes the
//! file-tree snapshot. Every failure here is a configuration error.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, info, instrument, warn};

use crate::core::types::{Connection, RunContext};
use crate::io::config::{ConfigError, load_config};
use crate::io::console::Console;
use crate::io::file_tree::snapshot;
use crate::io::gateway::{ModelGateway, RetryPolicy};
use crate::io::prompt::{INITIAL_REQUEST, InstructionInputs, render_instructions};
use crate::io::transport::Transport;

/// Delay unit between retries; attempt `n` waits `n` units.
pub const RETRY_BACKOFF_UNIT: Duration = Duration::from_secs(2);

/// Build the immutable run context from the config file at `config_path`.
#[instrument(skip_all, fields(config = %config_path.display()))]
pub fn prepare_run(config_path: &Path) -> Result<RunContext> {
    let loaded = load_config(config_path)?;
    let config_file = fs::canonicalize(config_path)
        .with_context(|| format!("resolve {}", config_path.display()))?;
    let config_dir = config_file
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_default();
    let config = &loaded.typed;

    let request_file = config
        .request_file
        .as_deref()
        .filter(|value| !value.trim().is_empty())
        .ok_or(ConfigError::MissingRequestFile)?;
    let request_path = config_dir.join(request_file);
    if !request_path.is_file() {
        return Err(ConfigError::RequestFileNotFound(request_path).into());
    }
    let prompt = fs::read_to_string(&request_path)
        .with_context(|| format!("read request file {}", request_path.display()))?;

    let settings = config.validate_connection()?;
    let credential = lookup_credential(settings.credential_var.as_deref());
    // A zero budget would forbid the first call, which always happens.
    let max_requests = settings.max_requests.max(1);
    let max_actions = settings.max_actions_per_turn.max(1);

    let (allowed_root, allowed_root_absolute) = match config.allowed_path() {
        Some(path) if Path::new(path).is_absolute() => (PathBuf::from(path), true),
        Some(path) => (config_dir.join(path), false),
        None => (config_dir.clone(), false),
    };
    let report_path = config
        .report
        .as_deref()
        .filter(|value| !value.trim().is_empty())
        .map(|report| config_dir.join(report));

    let instructions = render_instructions(&InstructionInputs {
        max_requests,
        max_actions,
        report: config.report.as_deref(),
    })?;
    let file_tree = snapshot(&allowed_root)?;

    info!(
        platform = settings.platform.as_str(),
        endpoint = %settings.endpoint,
        root = %allowed_root.display(),
        files = file_tree.len(),
        max_requests,
        max_actions,
        "run prepared"
    );

    Ok(RunContext {
        allowed_root,
        allowed_root_absolute,
        config_dir,
        prompt,
        instructions,
        request: INITIAL_REQUEST.to_string(),
        file_tree,
        config: loaded.raw.clone(),
        report_path,
        connection: Connection {
            endpoint: settings.endpoint,
            model: settings.model,
            auth: settings.auth,
            auth_header: settings.auth_header,
            credential,
            platform: settings.platform,
            timeout: settings.timeout,
        },
        max_requests,
        max_actions_per_turn: usize::try_from(max_actions).unwrap_or(usize::MAX),
        retry_attempts: settings.retry_attempts,
    })
}

fn lookup_credential(var: Option<&str>) -> Option<String> {
    let var = var.map(str::trim).filter(|var| !var.is_empty())?;
    match env::var(var) {
        Ok(value) if !value.is_empty() => {
            debug!(var, "credential loaded from environment");
            Some(value)
        }
        _ => {
            warn!(var, "credential environment variable is not set; calling without credential");
            None
        }
    }
}

/// Gateway for `ctx` over `transport`.
pub fn build_gateway<T: Transport>(
    ctx: &RunContext,
    transport: T,
    console: Console,
) -> ModelGateway<T> {
    ModelGateway::new(
        transport,
        ctx.connection.clone(),
        RetryPolicy {
            max_attempts: ctx.retry_attempts,
            backoff_unit: RETRY_BACKOFF_UNIT,
        },
        console,
    )
}
