//! Shared types for the orchestration loop.
//!
//! These types define the contracts between the normalizer, the gateway and
//! the step loop. They carry no I/O and are cheap to construct in tests.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

/// Reply status declared by the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ResponseStatus {
    Ok,
    Error,
    /// The model considers the task complete.
    Done,
    /// Any other value, kept verbatim.
    Other(String),
}

impl From<String> for ResponseStatus {
    fn from(value: String) -> Self {
        match value.as_str() {
            "ok" => Self::Ok,
            "error" => Self::Error,
            "done" => Self::Done,
            _ => Self::Other(value),
        }
    }
}

impl From<ResponseStatus> for String {
    fn from(value: ResponseStatus) -> Self {
        match value {
            ResponseStatus::Ok => "ok".to_string(),
            ResponseStatus::Error => "error".to_string(),
            ResponseStatus::Done => "done".to_string(),
            ResponseStatus::Other(other) => other,
        }
    }
}

/// Canonical form of a model reply.
///
/// Both protocol variants are carried: the single nullable `action` and the
/// `actions` array. Fields the loop does not interpret are kept in `extra` so
/// a well-formed reply serializes back to the same object.
#[derive(Debug, Clone, PartialEq)]
pub struct StructuredResponse {
    pub status: ResponseStatus,
    pub plan: Vec<Value>,
    /// `Some(Value::Null)` when the reply explicitly sent `"action": null`.
    pub action: Option<Value>,
    pub actions: Option<Vec<Value>>,
    pub memory: Map<String, Value>,
    pub extra: Map<String, Value>,
}

impl StructuredResponse {
    /// Reply with no plan and no action, carrying `memory`.
    pub fn empty(status: ResponseStatus, memory: Map<String, Value>) -> Self {
        Self {
            status,
            plan: Vec::new(),
            action: Some(Value::Null),
            actions: None,
            memory,
            extra: Map::new(),
        }
    }

    /// Synthetic reply used when a turn's model call failed.
    pub fn error(memory: Map<String, Value>) -> Self {
        Self::empty(ResponseStatus::Error, memory)
    }

    /// Fallback for text that could not be parsed: the text lands in `memory.raw_text`.
    pub fn raw_text(text: &str) -> Self {
        let mut memory = Map::new();
        memory.insert("raw_text".to_string(), Value::String(text.to_string()));
        Self::empty(ResponseStatus::Ok, memory)
    }

    pub fn is_done(&self) -> bool {
        self.status == ResponseStatus::Done
    }

    /// Actions to execute this turn, in order.
    ///
    /// A non-empty `actions` array wins; otherwise the single `action`
    /// contributes at most one entry. Returns the batch and the number of
    /// entries dropped by `limit`.
    pub fn pending_actions(&self, limit: usize) -> (Vec<Value>, usize) {
        if let Some(actions) = self.actions.as_ref().filter(|actions| !actions.is_empty()) {
            let dropped = actions.len().saturating_sub(limit);
            let batch = actions.iter().take(limit).cloned().collect();
            return (batch, dropped);
        }
        match &self.action {
            Some(action) if !action.is_null() && limit > 0 => (vec![action.clone()], 0),
            Some(action) if !action.is_null() => (Vec::new(), 1),
            _ => (Vec::new(), 0),
        }
    }
}

impl Serialize for StructuredResponse {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut object = self.extra.clone();
        object.insert(
            "status".to_string(),
            Value::String(self.status.clone().into()),
        );
        object.insert("plan".to_string(), Value::Array(self.plan.clone()));
        if let Some(action) = &self.action {
            object.insert("action".to_string(), action.clone());
        }
        if let Some(actions) = &self.actions {
            object.insert("actions".to_string(), Value::Array(actions.clone()));
        }
        object.insert("memory".to_string(), Value::Object(self.memory.clone()));
        object.serialize(serializer)
    }
}

/// Action identifier: the protocol allows either a string or an integer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ActionId {
    Number(i64),
    Text(String),
}

impl std::fmt::Display for ActionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

/// One action requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    #[serde(default)]
    pub id: Option<ActionId>,
    #[serde(rename = "type", default, deserialize_with = "null_as_default")]
    pub kind: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub description: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub parameters: Map<String, Value>,
    /// Legacy location of the read-file path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl Action {
    pub fn action_kind(&self) -> ActionKind {
        ActionKind::from(self.kind.as_str())
    }

    /// String parameter, treating empty strings as absent.
    pub fn string_param(&self, key: &str) -> Option<&str> {
        self.parameters
            .get(key)
            .and_then(Value::as_str)
            .filter(|value| !value.is_empty())
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Action types the orchestrator knows how to execute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionKind {
    /// `leia_arquivo`: return one file's content as a base64 attachment.
    ReadFile,
    /// `finalizar`: persist the final report and end the run.
    Finalize,
    Unknown(String),
}

impl ActionKind {
    pub const READ_FILE: &'static str = "leia_arquivo";
    pub const FINALIZE: &'static str = "finalizar";
}

impl From<&str> for ActionKind {
    fn from(value: &str) -> Self {
        match value {
            Self::READ_FILE => Self::ReadFile,
            Self::FINALIZE => Self::Finalize,
            other => Self::Unknown(other.to_string()),
        }
    }
}

/// One entry of the sandbox file-tree snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    /// Path relative to the allowed root, `/`-separated.
    pub path: String,
    pub length: Option<u64>,
    #[serde(rename = "lastWrite")]
    pub last_write: Option<String>,
}

/// Model platform declared in the connection config.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    GoogleGemini,
    AzureOpenAi,
}

impl Platform {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "Google Gemini" => Some(Self::GoogleGemini),
            "Azure OpenAI" => Some(Self::AzureOpenAi),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::GoogleGemini => "Google Gemini",
            Self::AzureOpenAi => "Azure OpenAI",
        }
    }
}

/// How the credential is attached to requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    /// Credential goes in the configured header.
    ApiKey,
    /// Credential goes in `Authorization: Bearer ...`.
    Bearer,
}

/// Connection descriptor for the model endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connection {
    pub endpoint: String,
    pub model: Option<String>,
    pub auth: AuthMode,
    pub auth_header: String,
    pub credential: Option<String>,
    pub platform: Platform,
    pub timeout: Duration,
}

/// Display switches for the console echo.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunOptions {
    /// Echo sent (`>>`) and received (`<<`) bodies.
    pub show_messages: bool,
    /// Echo each turn's memory (`MEM`).
    pub show_memory: bool,
}

/// Immutable inputs for one run.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub allowed_root: PathBuf,
    /// Whether `caminho_permitido` was declared as an absolute path.
    pub allowed_root_absolute: bool,
    pub config_dir: PathBuf,
    pub prompt: String,
    pub instructions: String,
    /// Request string sent with the first payload and re-sent on every turn.
    pub request: String,
    pub file_tree: Vec<FileEntry>,
    /// Full config as loaded, re-sent on every turn.
    pub config: Value,
    pub report_path: Option<PathBuf>,
    pub connection: Connection,
    pub max_requests: u32,
    pub max_actions_per_turn: usize,
    /// Attempts per model call before it counts as failed.
    pub retry_attempts: u32,
}
