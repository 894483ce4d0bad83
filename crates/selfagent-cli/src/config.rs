use anyhow::{Context, Result};
use selfagent_core::providers::{DEFAULT_FALLBACK_MODELS, ProviderConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SelfAgentConfig {
    #[serde(default)]
    pub model: ProviderConfig,
    #[serde(default)]
    pub agent: AgentConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_fallback_models")]
    pub fallback_models: Vec<String>,
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            fallback_models: default_fallback_models(),
            tool_timeout_secs: default_tool_timeout_secs(),
        }
    }
}

fn default_fallback_models() -> Vec<String> {
    DEFAULT_FALLBACK_MODELS.iter().map(|m| m.to_string()).collect()
}

fn default_tool_timeout_secs() -> u64 {
    selfagent_core::TOOL_TIMEOUT.as_secs()
}

/// Key fields of `[model]` that should reference the environment
const KEY_FIELDS: &[&str] = &[
    "api_key",
    "openai_key",
    "anthropic_key",
    "google_key",
    "openrouter_key",
];

pub fn config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".selfagent")
}

impl SelfAgentConfig {
    pub fn load(custom_path: &Option<PathBuf>) -> Result<Self> {
        let path = custom_path
            .clone()
            .unwrap_or_else(|| config_dir().join("config.toml"));
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        // Refuse to start if group or other can read
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Ok(metadata) = std::fs::metadata(path) {
                let mode = metadata.permissions().mode();
                if mode & 0o077 != 0 {
                    return Err(anyhow::anyhow!(
                        "Config file {:?} has overly permissive permissions ({:o}). \
                         It may contain secrets. Fix with: chmod 600 {:?}",
                        path,
                        mode & 0o777,
                        path
                    ));
                }
            }
        }

        let content = std::fs::read_to_string(path).with_context(|| {
            format!(
                "Failed to read config at {}. Run `selfagent init` first.",
                path.display()
            )
        })?;

        warn_hardcoded_keys(&content);

        // Expand environment variables before parsing
        let expanded = expand_env_vars(&content);

        let config: Self = toml::from_str(&expanded)
            .with_context(|| format!("Failed to parse config at {}", path.display()))?;

        Ok(config)
    }
}

/// Warn about literal API keys, judged on the file as written
fn warn_hardcoded_keys(raw: &str) {
    let Ok(value) = raw.parse::<toml::Table>() else {
        return;
    };
    let Some(model) = value.get("model").and_then(|m| m.as_table()) else {
        return;
    };
    for field in KEY_FIELDS {
        if let Some(key) = model.get(*field).and_then(|v| v.as_str())
            && !key.is_empty()
            && !key.contains("${")
        {
            warn!(
                "model.{} is hardcoded in config file. For security, use environment variables: {} = \"${{OPENAI_API_KEY}}\"",
                field, field
            );
        }
    }
}

/// Allowlist of environment variable names that may be expanded in config files.
/// This prevents an attacker who can modify the config from reading arbitrary env vars.
const ALLOWED_ENV_VARS: &[&str] = &[
    "OPENAI_API_KEY",
    "ANTHROPIC_API_KEY",
    "GOOGLE_API_KEY",
    "GEMINI_API_KEY",
    "OPENROUTER_API_KEY",
    "OLLAMA_HOST",
    "HOME",
    "USER",
];

fn expand_env_vars(s: &str) -> String {
    let mut result = s.to_string();
    let mut pos = 0;
    while pos < result.len() {
        let Some(start) = result[pos..].find("${") else {
            break;
        };
        let abs_start = pos + start;
        let Some(end) = result[abs_start..].find('}') else {
            break;
        };
        let var_name = result[abs_start + 2..abs_start + end].to_string();

        if !ALLOWED_ENV_VARS.contains(&var_name.as_str()) {
            warn!(
                "Skipping expansion of unrecognized env var '{}' in config (not in allowlist)",
                var_name
            );
            // Leave the ${VAR} unexpanded so it's obvious
            pos = abs_start + end + 1;
            continue;
        }

        let value = std::env::var(&var_name).unwrap_or_default();
        result = format!(
            "{}{}{}",
            &result[..abs_start],
            value,
            &result[abs_start + end + 1..]
        );
        pos = abs_start + value.len();
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_config(dir: &TempDir, content: &str) -> PathBuf {
        let path = dir.path().join("config.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600)).unwrap();
        }
        path
    }

    #[test]
    fn test_default_config_parses() {
        let config: SelfAgentConfig =
            toml::from_str(include_str!("../../../config/default.toml")).unwrap();
        assert_eq!(config.model.provider, "openai");
        assert_eq!(config.model.max_tokens, 4096);
        assert_eq!(config.agent.fallback_models.len(), 5);
        assert_eq!(config.agent.tool_timeout_secs, 60);
    }

    #[test]
    fn test_load_minimal_config_fills_defaults() {
        let dir = TempDir::new().unwrap();
        let path = write_config(
            &dir,
            r#"
[model]
provider = "anthropic"
model_name = "claude-sonnet-4-5"
"#,
        );
        let config = SelfAgentConfig::load_from(&path).unwrap();
        assert_eq!(config.model.provider, "anthropic");
        assert_eq!(config.model.model, "claude-sonnet-4-5");
        assert_eq!(config.model.ollama_base_url, "http://localhost:11434");
        assert!((config.model.temperature - 0.7).abs() < f32::EPSILON);
        assert_eq!(config.agent.fallback_models, default_fallback_models());
    }

    #[test]
    fn test_missing_file_suggests_init() {
        let dir = TempDir::new().unwrap();
        let err = SelfAgentConfig::load_from(&dir.path().join("nope.toml")).unwrap_err();
        assert!(err.to_string().contains("selfagent init"));
    }

    #[cfg(unix)]
    #[test]
    fn test_refuses_world_readable_config() {
        use std::os::unix::fs::PermissionsExt;
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, "[model]\n");
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).unwrap();

        let err = SelfAgentConfig::load_from(&path).unwrap_err();
        assert!(err.to_string().contains("chmod 600"));
    }

    #[test]
    fn test_expand_env_vars_allowlist() {
        // SAFETY: test-only env mutation of a variable no other test reads
        unsafe { std::env::set_var("OPENROUTER_API_KEY", "or-test-key") };
        let expanded = expand_env_vars("key = \"${OPENROUTER_API_KEY}\"\nother = \"${SECRET_THING}\"");
        assert!(expanded.contains("key = \"or-test-key\""));
        assert!(expanded.contains("${SECRET_THING}"));
    }

    #[test]
    fn test_expand_env_vars_unterminated() {
        assert_eq!(expand_env_vars("value = \"${HOME\""), "value = \"${HOME\"");
    }

    #[test]
    fn test_debug_masks_keys() {
        let config = SelfAgentConfig {
            model: ProviderConfig {
                openai_key: "sk-proj-abcdefghijkl".to_string(),
                ..Default::default()
            },
            ..Default::default()
        };
        let debug = format!("{:?}", config);
        assert!(!debug.contains("sk-proj-abcdefghijkl"));
    }
}
