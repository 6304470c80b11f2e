//! Orchestrator configuration.
//!
//! The config file is written by humans and uses Portuguese key names
//! (`solicitação`, `conexão`, `ferramentas`, ...). It is
//! accepted as TOML, YAML or JSON and is kept both as a raw JSON value (sent
//! to the model on every turn) and as a typed view.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::core::types::{AuthMode, Platform};

/// Fatal configuration problems, all detected before any model call.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    NotFound(PathBuf),
    #[error("config root must be a mapping")]
    NotAMapping,
    #[error("missing 'solicitação' (request file) in config")]
    MissingRequestFile,
    #[error("request file referenced by 'solicitação' not found: {0}")]
    RequestFileNotFound(PathBuf),
    #[error("missing 'conexão' in config; 'conexão.autenticação' is required")]
    MissingConnection,
    #[error("missing 'conexão.autenticação': must be a string naming the auth header")]
    MissingAuthHeader,
    #[error("missing 'conexão.plataforma': use 'Google Gemini' or 'Azure OpenAI'")]
    MissingPlatform,
    #[error("invalid 'conexão.plataforma' {0:?}: expected 'Google Gemini' or 'Azure OpenAI'")]
    UnsupportedPlatform(String),
    #[error("invalid 'conexão.tipo_autenticação' {0:?}: expected 'api_key' or 'bearer'")]
    UnsupportedAuthType(String),
    #[error("missing 'conexão.endereço' (endpoint) and no default can be derived")]
    MissingEndpoint,
}

/// Typed view of the config file.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct OrchestratorConfig {
    /// Markdown file holding the user's request.
    #[serde(rename = "solicitação", alias = "solicitacao", default)]
    pub request_file: Option<String>,
    /// Where `finalizar` saves the report when the action names no path.
    #[serde(rename = "relatório", alias = "relatorio", default)]
    pub report: Option<String>,
    #[serde(rename = "conexão", alias = "conexao", default)]
    pub connection: Option<ConnectionSection>,
    /// Entries that are not mappings, or whose `arquivos` is malformed, are skipped.
    #[serde(rename = "ferramentas", default, deserialize_with = "lenient_tools")]
    pub tools: Vec<ToolSection>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ConnectionSection {
    #[serde(rename = "endereço", alias = "endereco", alias = "endpoint", default)]
    pub endpoint: Option<String>,
    #[serde(rename = "modelo", alias = "model", default)]
    pub model: Option<String>,
    /// Name of the environment variable holding the credential.
    #[serde(rename = "chave", alias = "api_key", default)]
    pub credential_var: Option<String>,
    /// Auth header name.
    #[serde(rename = "autenticação", alias = "autenticacao", default)]
    pub auth_header: Option<String>,
    #[serde(rename = "tipo_autenticação", alias = "tipo_autenticacao", default)]
    pub auth_type: Option<String>,
    #[serde(rename = "plataforma", default)]
    pub platform: Option<String>,
    /// Request budget. Integers and numeric strings are accepted.
    #[serde(rename = "limite_passos", default, deserialize_with = "lenient_u32")]
    pub max_requests: Option<u32>,
    /// Per-turn action limit; defaults to the request budget.
    #[serde(rename = "limite_acoes", alias = "limite_ações", default, deserialize_with = "lenient_u32")]
    pub max_actions_per_turn: Option<u32>,
    #[serde(rename = "tentativas", default, deserialize_with = "lenient_u32")]
    pub retry_attempts: Option<u32>,
    #[serde(rename = "tempo_limite_segundos", default, deserialize_with = "lenient_u32")]
    pub timeout_secs: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ToolSection {
    #[serde(rename = "arquivos", default)]
    pub files: Option<FilesSection>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FilesSection {
    #[serde(rename = "caminho_permitido", default)]
    pub allowed_path: Option<String>,
}

/// Values that fail to parse fall back to `None` (and so to the default).
/// Whole floats such as `3.0` count as integers.
fn lenient_u32<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u32>, D::Error> {
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Number(n)) => match n.as_u64() {
            Some(n) => u32::try_from(n).ok(),
            None => n
                .as_f64()
                .filter(|f| f.fract() == 0.0 && *f >= 0.0 && *f <= f64::from(u32::MAX))
                .map(|f| f as u32),
        },
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}

/// `ferramentas` as a list of tool sections; null or a non-list is empty.
fn lenient_tools<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<ToolSection>, D::Error> {
    let value = Option::<Value>::deserialize(deserializer)?;
    let Some(Value::Array(entries)) = value else {
        return Ok(Vec::new());
    };
    Ok(entries
        .into_iter()
        .filter(Value::is_object)
        .filter_map(|entry| match serde_json::from_value::<ToolSection>(entry) {
            Ok(tool) => Some(tool),
            Err(err) => {
                debug!(error = %err, "skipping malformed 'ferramentas' entry");
                None
            }
        })
        .collect())
}

pub const DEFAULT_MAX_REQUESTS: u32 = 1;
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 5;
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Validated connection settings (credential not yet looked up).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSettings {
    pub endpoint: String,
    pub model: Option<String>,
    pub credential_var: Option<String>,
    pub auth_header: String,
    pub auth: AuthMode,
    pub platform: Platform,
    pub max_requests: u32,
    pub max_actions_per_turn: u32,
    pub retry_attempts: u32,
    pub timeout: Duration,
}

impl OrchestratorConfig {
    pub fn validate_connection(&self) -> std::result::Result<ConnectionSettings, ConfigError> {
        let section = self
            .connection
            .as_ref()
            .ok_or(ConfigError::MissingConnection)?;
        let auth_header = section
            .auth_header
            .clone()
            .ok_or(ConfigError::MissingAuthHeader)?;
        let platform_name = section
            .platform
            .as_deref()
            .ok_or(ConfigError::MissingPlatform)?;
        let platform = Platform::parse(platform_name)
            .ok_or_else(|| ConfigError::UnsupportedPlatform(platform_name.to_string()))?;
        let auth = match section.auth_type.as_deref().map(str::trim) {
            None | Some("") | Some("api_key") => AuthMode::ApiKey,
            Some("bearer") => AuthMode::Bearer,
            Some(other) => return Err(ConfigError::UnsupportedAuthType(other.to_string())),
        };

        let endpoint = match (&section.endpoint, &section.model, platform) {
            (Some(endpoint), _, _) if !endpoint.trim().is_empty() => endpoint.clone(),
            (_, Some(model), Platform::GoogleGemini) => format!(
                "https://generativelanguage.googleapis.com/v1beta/models/{model}:generateContent"
            ),
            _ => return Err(ConfigError::MissingEndpoint),
        };

        let max_requests = section.max_requests.unwrap_or(DEFAULT_MAX_REQUESTS);
        Ok(ConnectionSettings {
            endpoint,
            model: section.model.clone(),
            credential_var: section.credential_var.clone(),
            auth_header,
            auth,
            platform,
            max_requests,
            max_actions_per_turn: section.max_actions_per_turn.unwrap_or(max_requests),
            retry_attempts: section.retry_attempts.unwrap_or(DEFAULT_RETRY_ATTEMPTS),
            timeout: section
                .timeout_secs
                .map(u64::from)
                .map(Duration::from_secs)
                .unwrap_or(Duration::from_secs(DEFAULT_TIMEOUT_SECS)),
        })
    }

    /// First `ferramentas[*].arquivos.caminho_permitido` entry.
    pub fn allowed_path(&self) -> Option<&str> {
        self.tools
            .iter()
            .filter_map(|tool| tool.files.as_ref())
            .find_map(|files| files.allowed_path.as_deref())
    }
}

/// Config as loaded: the raw value and its typed view.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub raw: Value,
    pub typed: OrchestratorConfig,
}

/// Load a config file, choosing the parser by extension.
///
/// `.toml`, `.yaml`/`.yml` and `.json` use their own parser; anything else is
/// tried as JSON, then YAML.
pub fn load_config(path: &Path) -> Result<LoadedConfig> {
    if !path.exists() {
        return Err(ConfigError::NotFound(path.to_path_buf()).into());
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase);
    let raw: Value = match extension.as_deref() {
        Some("toml") => {
            toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?
        }
        Some("yaml" | "yml") => {
            serde_yaml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?
        }
        Some("json") => {
            serde_json::from_str(&contents).with_context(|| format!("parse {}", path.display()))?
        }
        _ => match serde_json::from_str(&contents) {
            Ok(value) => value,
            Err(_) => serde_yaml::from_str(&contents)
                .with_context(|| format!("parse {}", path.display()))?,
        },
    };
    parse_config_value(raw)
}

/// Build the typed view of an already-parsed config value.
pub fn parse_config_value(raw: Value) -> Result<LoadedConfig> {
    if !raw.is_object() {
        return Err(ConfigError::NotAMapping.into());
    }
    let typed: OrchestratorConfig =
        serde_json::from_value(raw.clone()).context("interpret config fields")?;
    debug!(
        has_connection = typed.connection.is_some(),
        tools = typed.tools.len(),
        "config loaded"
    );
    Ok(LoadedConfig { raw, typed })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn typed(raw: Value) -> OrchestratorConfig {
        parse_config_value(raw).expect("parse").typed
    }

    fn minimal() -> Value {
        json!({
            "solicitação": "pedido.md",
            "conexão": {
                "endereço": "https://example.test/v1/models/m:generateContent",
                "autenticação": "x-goog-api-key",
                "plataforma": "Google Gemini"
            }
        })
    }

    #[test]
    fn parses_portuguese_keys_and_defaults() {
        let settings = typed(minimal()).validate_connection().expect("valid");
        assert_eq!(settings.platform, Platform::GoogleGemini);
        assert_eq!(settings.auth, AuthMode::ApiKey);
        assert_eq!(settings.max_requests, 1);
        assert_eq!(settings.max_actions_per_turn, 1);
        assert_eq!(settings.retry_attempts, 5);
        assert_eq!(settings.timeout, Duration::from_secs(60));
    }

    #[test]
    fn step_limit_accepts_numeric_strings_and_falls_back_on_garbage() {
        let mut raw = minimal();
        raw["conexão"]["limite_passos"] = json!("7");
        assert_eq!(typed(raw.clone()).validate_connection().expect("valid").max_requests, 7);
        raw["conexão"]["limite_passos"] = json!("many");
        assert_eq!(typed(raw).validate_connection().expect("valid").max_requests, 1);
    }

    #[test]
    fn step_limit_accepts_whole_floats() {
        let mut raw = minimal();
        raw["conexão"]["limite_passos"] = json!(3.0);
        assert_eq!(typed(raw.clone()).validate_connection().expect("valid").max_requests, 3);
        raw["conexão"]["limite_passos"] = json!(2.5);
        assert_eq!(typed(raw).validate_connection().expect("valid").max_requests, 1);
    }

    #[test]
    fn null_tools_list_is_empty() {
        let mut raw = minimal();
        raw["ferramentas"] = Value::Null;
        let cfg = typed(raw);
        assert!(cfg.tools.is_empty());
        assert_eq!(cfg.allowed_path(), None);
    }

    #[test]
    fn non_mapping_tool_entries_are_skipped() {
        let mut raw = minimal();
        raw["ferramentas"] = json!([
            "web",
            {"arquivos": "not a mapping"},
            {"arquivos": {"caminho_permitido": "data"}}
        ]);
        let cfg = typed(raw);
        assert_eq!(cfg.tools.len(), 1);
        assert_eq!(cfg.allowed_path(), Some("data"));
    }

    #[test]
    fn null_tools_in_yaml_file_still_loads() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.yaml");
        fs::write(&path, "solicitação: p.md\nferramentas:\n").expect("write");
        let loaded = load_config(&path).expect("load");
        assert!(loaded.typed.tools.is_empty());
    }

    #[test]
    fn action_limit_defaults_to_step_limit() {
        let mut raw = minimal();
        raw["conexão"]["limite_passos"] = json!(4);
        assert_eq!(typed(raw.clone()).validate_connection().expect("valid").max_actions_per_turn, 4);
        raw["conexão"]["limite_acoes"] = json!(2);
        assert_eq!(typed(raw).validate_connection().expect("valid").max_actions_per_turn, 2);
    }

    #[test]
    fn missing_required_connection_fields_are_config_errors() {
        let cfg = typed(json!({"solicitação": "p.md"}));
        assert_eq!(cfg.validate_connection(), Err(ConfigError::MissingConnection));

        let mut raw = minimal();
        raw["conexão"].as_object_mut().expect("obj").remove("autenticação");
        assert_eq!(typed(raw).validate_connection(), Err(ConfigError::MissingAuthHeader));

        let mut raw = minimal();
        raw["conexão"].as_object_mut().expect("obj").remove("plataforma");
        assert_eq!(typed(raw).validate_connection(), Err(ConfigError::MissingPlatform));

        let mut raw = minimal();
        raw["conexão"]["plataforma"] = json!("Other Cloud");
        assert_eq!(
            typed(raw).validate_connection(),
            Err(ConfigError::UnsupportedPlatform("Other Cloud".to_string()))
        );
    }

    #[test]
    fn non_string_auth_header_is_rejected() {
        let mut raw = minimal();
        raw["conexão"]["autenticação"] = json!(42);
        assert!(parse_config_value(raw).is_err());
    }

    #[test]
    fn gemini_endpoint_is_derived_from_model() {
        let mut raw = minimal();
        raw["conexão"].as_object_mut().expect("obj").remove("endereço");
        raw["conexão"]["modelo"] = json!("gemini-1.5-flash");
        let settings = typed(raw).validate_connection().expect("valid");
        assert_eq!(
            settings.endpoint,
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-1.5-flash:generateContent"
        );
    }

    #[test]
    fn azure_without_endpoint_is_an_error() {
        let raw = json!({
            "conexão": {"autenticação": "api-key", "plataforma": "Azure OpenAI", "modelo": "gpt-4o"}
        });
        assert_eq!(typed(raw).validate_connection(), Err(ConfigError::MissingEndpoint));
    }

    #[test]
    fn first_allowed_path_wins() {
        let cfg = typed(json!({
            "ferramentas": [
                {"nome": "web"},
                {"arquivos": {"caminho_permitido": "dados"}},
                {"arquivos": {"caminho_permitido": "outros"}}
            ]
        }));
        assert_eq!(cfg.allowed_path(), Some("dados"));
    }

    #[test]
    fn loads_toml_yaml_and_json_files() {
        let temp = tempfile::tempdir().expect("tempdir");
        let toml_path = temp.path().join("config.toml");
        fs::write(
            &toml_path,
            "\"solicitação\" = \"p.md\"\n[\"conexão\"]\n\"autenticação\" = \"h\"\nplataforma = \"Azure OpenAI\"\n",
        )
        .expect("write");
        let yaml_path = temp.path().join("config.yaml");
        fs::write(&yaml_path, "solicitação: p.md\nconexão:\n  autenticação: h\n").expect("write");
        let json_path = temp.path().join("config.cfg");
        fs::write(&json_path, r#"{"solicitação": "p.md"}"#).expect("write");

        for path in [&toml_path, &yaml_path, &json_path] {
            let loaded = load_config(path).expect("load");
            assert_eq!(loaded.typed.request_file.as_deref(), Some("p.md"));
        }
        let toml_cfg = load_config(&toml_path).expect("load").typed;
        assert_eq!(
            toml_cfg.connection.and_then(|c| c.platform).as_deref(),
            Some("Azure OpenAI")
        );
    }

    #[test]
    fn missing_file_and_non_mapping_root_are_errors() {
        let temp = tempfile::tempdir().expect("tempdir");
        let err = load_config(&temp.path().join("none.yaml")).unwrap_err();
        assert!(matches!(err.downcast_ref::<ConfigError>(), Some(ConfigError::NotFound(_))));

        let list = temp.path().join("list.json");
        fs::write(&list, "[1, 2]").expect("write");
        let err = load_config(&list).unwrap_err();
        assert_eq!(err.downcast_ref::<ConfigError>(), Some(&ConfigError::NotAMapping));
    }
}
