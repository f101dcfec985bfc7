//! TOML configuration for Conduit.
//!
//! Reads `~/.conduit/config.toml` and resolves each setting with precedence:
//! CLI flags > env vars > config file > defaults

use conduit_mcp::McpSettings;
use conduit_types::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The default model to use.
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// The default number of model rounds per chat turn.
pub const DEFAULT_MAX_TOOL_ROUNDS: usize = 10;

/// Name of the settings file inside the config directory.
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Resolved configuration for a Conduit session.
#[derive(Debug, Clone)]
pub struct ConduitConfig {
    /// `None` until a chat actually needs it; see [`ConduitConfig::require_api_key`].
    pub api_key: Option<String>,
    pub model: String,
    pub base_url: String,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub max_tool_rounds: usize,
    pub config_dir: PathBuf,
    pub mcp: McpSettings,
}

/// Settings that can be read from a TOML config file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SettingsFile {
    #[serde(default)]
    pub chat: ChatSettings,
    #[serde(default)]
    pub mcp: McpSettings,
}

/// `[chat]` section of the config file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatSettings {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub max_tool_rounds: Option<usize>,
}

/// CLI overrides that take highest precedence.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub max_tool_rounds: Option<usize>,
    pub config_dir: Option<PathBuf>,
}

impl ConduitConfig {
    /// Load configuration from all sources, reading the process environment.
    pub fn load(overrides: CliOverrides) -> Result<Self, ConfigError> {
        Self::load_with_env(overrides, |key| std::env::var(key).ok())
    }

    /// Like [`ConduitConfig::load`], with environment lookups supplied by `env`.
    pub fn load_with_env(
        overrides: CliOverrides,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let config_dir = overrides
            .config_dir
            .clone()
            .unwrap_or_else(|| config_dir_from(&env));
        let settings = load_settings_file(&config_dir.join(CONFIG_FILE_NAME));
        Self::resolve(overrides, settings, config_dir, &env)
    }

    fn resolve(
        overrides: CliOverrides,
        settings: SettingsFile,
        config_dir: PathBuf,
        env: &impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let chat = settings.chat;

        let api_key = overrides
            .api_key
            .or_else(|| env("CONDUIT_API_KEY"))
            .or_else(|| env("OPENAI_API_KEY"))
            .or(chat.api_key)
            .filter(|k| !k.trim().is_empty());

        let model = overrides
            .model
            .or_else(|| env("CONDUIT_MODEL"))
            .or(chat.model)
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());

        let base_url = env("CONDUIT_BASE_URL")
            .or(chat.base_url)
            .unwrap_or_else(|| conduit_api::DEFAULT_BASE_URL.to_string());

        let max_tool_rounds = overrides
            .max_tool_rounds
            .or(chat.max_tool_rounds)
            .unwrap_or(DEFAULT_MAX_TOOL_ROUNDS);
        if max_tool_rounds == 0 {
            return Err(ConfigError::InvalidValue {
                key: "max_tool_rounds".into(),
                message: "must be at least 1".into(),
            });
        }

        check_range("temperature", chat.temperature, 0.0, 2.0)?;
        check_range("top_p", chat.top_p, 0.0, 1.0)?;
        settings
            .mcp
            .validate()
            .map_err(|e| ConfigError::InvalidValue {
                key: "mcp.servers".into(),
                message: e.to_string(),
            })?;

        Ok(ConduitConfig {
            api_key,
            model,
            base_url,
            temperature: chat.temperature,
            top_p: chat.top_p,
            max_tool_rounds,
            config_dir,
            mcp: settings.mcp,
        })
    }

    /// The API key, or a `MissingKey` error naming where to set one.
    pub fn require_api_key(&self) -> Result<&str, ConfigError> {
        self.api_key
            .as_deref()
            .ok_or_else(|| ConfigError::MissingKey {
                key: format!(
                    "api_key (set CONDUIT_API_KEY or add [chat] api_key to {})",
                    self.settings_path().display()
                ),
            })
    }

    pub fn settings_path(&self) -> PathBuf {
        self.config_dir.join(CONFIG_FILE_NAME)
    }
}

fn check_range(key: &str, value: Option<f32>, min: f32, max: f32) -> Result<(), ConfigError> {
    match value {
        Some(v) if !(min..=max).contains(&v) => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("{v} is outside {min}..={max}"),
        }),
        _ => Ok(()),
    }
}

/// Get the Conduit config directory path (~/.conduit/).
pub fn config_dir() -> PathBuf {
    config_dir_from(&|key: &str| std::env::var(key).ok())
}

fn config_dir_from(env: &impl Fn(&str) -> Option<String>) -> PathBuf {
    if let Some(dir) = env("CONDUIT_CONFIG_DIR") {
        return PathBuf::from(dir);
    }
    dirs_next::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".conduit")
}

/// Parse settings text; `path` is only used in the error.
pub fn parse_settings(path: &Path, content: &str) -> Result<SettingsFile, ConfigError> {
    toml::from_str(content).map_err(|e| ConfigError::Parse {
        path: path.display().to_string(),
        message: e.to_string(),
    })
}

/// Load and parse a TOML settings file, returning defaults on any error.
fn load_settings_file(path: &Path) -> SettingsFile {
    match std::fs::read_to_string(path) {
        Ok(content) => parse_settings(path, &content).unwrap_or_else(|e| {
            tracing::warn!("{e}; using defaults");
            SettingsFile::default()
        }),
        Err(e) => {
            tracing::debug!("No settings at {}: {e}", path.display());
            SettingsFile::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    fn resolve(
        overrides: CliOverrides,
        settings: SettingsFile,
        env: &[(&str, &str)],
    ) -> Result<ConduitConfig, ConfigError> {
        ConduitConfig::resolve(overrides, settings, PathBuf::from("/cfg"), &env_of(env))
    }

    fn temp_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("conduit-config-{tag}-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn defaults_when_nothing_set() {
        let cfg = resolve(CliOverrides::default(), SettingsFile::default(), &[]).unwrap();
        assert!(cfg.api_key.is_none());
        assert_eq!(cfg.model, DEFAULT_MODEL);
        assert_eq!(cfg.base_url, "https://api.openai.com/v1");
        assert_eq!(cfg.max_tool_rounds, 10);
        assert!(!cfg.mcp.enabled);
    }

    #[test]
    fn settings_toml_parse() {
        let toml_str = r#"
[chat]
model = "gpt-4.1"
base_url = "http://localhost:11434/v1"
temperature = 0.3
max_tool_rounds = 4

[mcp]
enabled = true
selected = ["fs"]

[[mcp.servers]]
id = "fs"
name = "Filesystem"
type = "stdio"
command = "mcp-fs"
args = ["/tmp"]

[[mcp.servers]]
id = "web"
name = "Web"
type = "http"
url = "http://localhost:3000/mcp"
enabled = false
"#;
        let settings = parse_settings(Path::new("config.toml"), toml_str).unwrap();
        assert_eq!(settings.chat.model.as_deref(), Some("gpt-4.1"));
        assert_eq!(settings.chat.max_tool_rounds, Some(4));
        assert!(settings.mcp.enabled);
        assert_eq!(settings.mcp.selected, vec!["fs"]);
        assert_eq!(settings.mcp.servers.len(), 2);
        assert_eq!(settings.mcp.servers[0].transport.kind(), "stdio");
        assert!(!settings.mcp.servers[1].enabled);
        assert_eq!(settings.mcp.servers[1].timeout_ms, 30_000);
    }

    #[test]
    fn parse_error_names_the_file() {
        let err = parse_settings(Path::new("/x/config.toml"), "[chat\nmodel=").unwrap_err();
        match err {
            ConfigError::Parse { path, .. } => assert_eq!(path, "/x/config.toml"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn cli_beats_env_beats_file() {
        let settings = SettingsFile {
            chat: ChatSettings {
                api_key: Some("file-key".into()),
                model: Some("file-model".into()),
                max_tool_rounds: Some(3),
                ..ChatSettings::default()
            },
            ..SettingsFile::default()
        };
        let env = [("CONDUIT_MODEL", "env-model"), ("OPENAI_API_KEY", "openai-key")];

        let from_env = resolve(CliOverrides::default(), settings.clone(), &env).unwrap();
        assert_eq!(from_env.model, "env-model");
        assert_eq!(from_env.api_key.as_deref(), Some("openai-key"));
        assert_eq!(from_env.max_tool_rounds, 3);

        let overrides = CliOverrides {
            model: Some("cli-model".into()),
            max_tool_rounds: Some(7),
            ..CliOverrides::default()
        };
        let from_cli = resolve(overrides, settings, &env).unwrap();
        assert_eq!(from_cli.model, "cli-model");
        assert_eq!(from_cli.max_tool_rounds, 7);
    }

    #[test]
    fn conduit_key_preferred_over_openai_key() {
        let env = [("CONDUIT_API_KEY", "c"), ("OPENAI_API_KEY", "o")];
        let cfg = resolve(CliOverrides::default(), SettingsFile::default(), &env).unwrap();
        assert_eq!(cfg.api_key.as_deref(), Some("c"));
    }

    #[test]
    fn blank_api_key_is_missing() {
        let env = [("CONDUIT_API_KEY", "  ")];
        let cfg = resolve(CliOverrides::default(), SettingsFile::default(), &env).unwrap();
        let err = cfg.require_api_key().unwrap_err();
        assert!(matches!(err, ConfigError::MissingKey { .. }));
        assert!(err.to_string().contains("/cfg/config.toml"));
    }

    #[test]
    fn base_url_from_env() {
        let env = [("CONDUIT_BASE_URL", "http://127.0.0.1:8080/v1")];
        let cfg = resolve(CliOverrides::default(), SettingsFile::default(), &env).unwrap();
        assert_eq!(cfg.base_url, "http://127.0.0.1:8080/v1");
    }

    #[test]
    fn out_of_range_values_rejected() {
        let hot = SettingsFile {
            chat: ChatSettings {
                temperature: Some(3.5),
                ..ChatSettings::default()
            },
            ..SettingsFile::default()
        };
        assert!(matches!(
            resolve(CliOverrides::default(), hot, &[]),
            Err(ConfigError::InvalidValue { key, .. }) if key == "temperature"
        ));

        let zero_rounds = CliOverrides {
            max_tool_rounds: Some(0),
            ..CliOverrides::default()
        };
        assert!(matches!(
            resolve(zero_rounds, SettingsFile::default(), &[]),
            Err(ConfigError::InvalidValue { key, .. }) if key == "max_tool_rounds"
        ));
    }

    #[test]
    fn server_id_with_separator_rejected() {
        let settings: SettingsFile = toml::from_str(
            r#"
[[mcp.servers]]
id = "my__srv"
name = "Split"
type = "http"
url = "http://localhost:8080/mcp"
"#,
        )
        .unwrap();
        let err = resolve(CliOverrides::default(), settings, &[]).unwrap_err();
        match err {
            ConfigError::InvalidValue { key, message } => {
                assert_eq!(key, "mcp.servers");
                assert!(message.contains("my__srv"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn load_reads_file_from_config_dir() {
        let dir = temp_dir("load");
        std::fs::write(
            dir.join(CONFIG_FILE_NAME),
            "[chat]\nmodel = \"from-file\"\n[mcp]\nenabled = true\n",
        )
        .unwrap();

        let overrides = CliOverrides {
            config_dir: Some(dir.clone()),
            ..CliOverrides::default()
        };
        let cfg = ConduitConfig::load_with_env(overrides, env_of(&[])).unwrap();
        assert_eq!(cfg.model, "from-file");
        assert!(cfg.mcp.enabled);
        assert_eq!(cfg.settings_path(), dir.join("config.toml"));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn malformed_file_falls_back_to_defaults() {
        let dir = temp_dir("malformed");
        std::fs::write(dir.join(CONFIG_FILE_NAME), "this is = = not toml").unwrap();

        let env = [("CONDUIT_CONFIG_DIR", dir.to_str().unwrap())];
        let cfg = ConduitConfig::load_with_env(CliOverrides::default(), env_of(&env)).unwrap();
        assert_eq!(cfg.config_dir, dir);
        assert_eq!(cfg.model, DEFAULT_MODEL);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn missing_file_is_not_an_error() {
        let dir = temp_dir("missing");
        let overrides = CliOverrides {
            config_dir: Some(dir.join("nope")),
            ..CliOverrides::default()
        };
        assert!(ConduitConfig::load_with_env(overrides, env_of(&[])).is_ok());
        let _ = std::fs::remove_dir_all(&dir);
    }
}
