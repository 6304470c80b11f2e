//! Test-only fakes and fixtures: a scripted transport and throwaway workspaces.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Result, anyhow};
use serde_json::json;
use tempfile::TempDir;

use crate::core::types::{AuthMode, Connection, Platform, RunContext};
use crate::io::gateway::DEFAULT_API_KEY_HEADER;
use crate::io::prompt::INITIAL_REQUEST;
use crate::io::sandbox::Sandbox;
use crate::io::transport::{HttpRequest, Transport};

/// Transport that replays queued bodies and records every request.
///
/// Returns an error once the queue is empty.
pub struct ScriptedTransport {
    replies: RefCell<VecDeque<Result<String>>>,
    requests: RefCell<Vec<HttpRequest>>,
}

impl ScriptedTransport {
    pub fn new(replies: Vec<Result<String>>) -> Self {
        Self {
            replies: RefCell::new(replies.into()),
            requests: RefCell::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.borrow().clone()
    }
}

impl Transport for ScriptedTransport {
    fn post(&self, request: &HttpRequest) -> Result<String> {
        self.requests.borrow_mut().push(request.clone());
        self.replies
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| Err(anyhow!("scripted transport has no replies left")))
    }
}

/// API-key connection without a credential.
pub fn connection(platform: Platform, endpoint: &str) -> Connection {
    Connection {
        endpoint: endpoint.to_string(),
        model: None,
        auth: AuthMode::ApiKey,
        auth_header: DEFAULT_API_KEY_HEADER.to_string(),
        credential: None,
        platform,
        timeout: Duration::from_secs(60),
    }
}

/// Context with fake paths, for tests that never touch the filesystem.
pub fn run_context() -> RunContext {
    RunContext {
        allowed_root: PathBuf::from("/tmp/maestro-test/data"),
        allowed_root_absolute: true,
        config_dir: PathBuf::from("/tmp/maestro-test"),
        prompt: "Summarize the customer files".to_string(),
        instructions: "orchestrate".to_string(),
        request: INITIAL_REQUEST.to_string(),
        file_tree: Vec::new(),
        config: json!({"solicitação": "request.txt"}),
        report_path: Some(PathBuf::from("/tmp/maestro-test/out/report.html")),
        connection: connection(Platform::GoogleGemini, "https://proxy.local/run"),
        max_requests: 1,
        max_actions_per_turn: 1,
        retry_attempts: 1,
    }
}

/// Temporary config directory with a `data/` allowed root and an `out/` report path.
pub struct TestWorkspace {
    temp: TempDir,
}

impl TestWorkspace {
    /// Panics if the temporary directory cannot be created.
    pub fn new() -> Self {
        let temp = tempfile::tempdir().expect("create temp workspace");
        fs::create_dir_all(temp.path().join("data")).expect("create data dir");
        Self { temp }
    }

    pub fn config_dir(&self) -> &Path {
        self.temp.path()
    }

    pub fn allowed_root(&self) -> PathBuf {
        self.config_dir().join("data")
    }

    pub fn report_path(&self) -> PathBuf {
        self.config_dir().join("out/report.html")
    }

    /// Write `contents` to `relative` under the config dir, creating parents.
    pub fn write_file(&self, relative: &str, contents: &str) -> PathBuf {
        let path = self.config_dir().join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create parent dir");
        }
        fs::write(&path, contents).expect("write file");
        path
    }

    /// Context rooted in this workspace; `caminho_permitido` is the relative `data`.
    pub fn context(&self) -> RunContext {
        RunContext {
            allowed_root: self.allowed_root(),
            allowed_root_absolute: false,
            config_dir: self.config_dir().to_path_buf(),
            report_path: Some(self.report_path()),
            ..run_context()
        }
    }

    pub fn sandbox(&self) -> Sandbox {
        Sandbox::new(self.allowed_root(), false, self.config_dir())
    }
}

impl Default for TestWorkspace {
    fn default() -> Self {
        Self::new()
    }
}
