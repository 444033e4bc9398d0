//! Config file discovery and layered merging.
//!
//! Resolution order (later overrides earlier):
//! 1. `~/.config/concierge/config.toml` (user config, or `$CONCIERGE_CONFIG_DIR`)
//! 2. `./concierge.toml` (project-local)
//! 3. An explicit `--config` path

use std::path::{Path, PathBuf};

use crate::{ConciergeConfig, ConfigError, Result};

/// Default config filename for project-local config.
const PROJECT_CONFIG_FILE: &str = "concierge.toml";

/// Default config filename within the user config directory.
const USER_CONFIG_FILE: &str = "config.toml";

/// Application name for XDG directory resolution.
const APP_NAME: &str = "concierge";

/// Environment variable to override the user config directory.
const CONFIG_DIR_ENV: &str = "CONCIERGE_CONFIG_DIR";

/// Tracks where each config layer was loaded from.
#[derive(Debug, Clone)]
pub struct ConfigSource {
    /// Path to the config file.
    pub path: PathBuf,
    /// Whether the file was found and loaded.
    pub loaded: bool,
}

/// Result of config discovery and loading.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    /// The merged configuration.
    pub config: ConciergeConfig,
    /// Sources that were checked, in order of precedence (lowest first).
    pub sources: Vec<ConfigSource>,
    /// Warnings generated during loading (e.g., plaintext API keys).
    pub warnings: Vec<String>,
}

impl LoadedConfig {
    /// Get paths of sources that were actually loaded.
    pub fn loaded_from(&self) -> Vec<&Path> {
        self.sources
            .iter()
            .filter(|s| s.loaded)
            .map(|s| s.path.as_path())
            .collect()
    }
}

/// Load configuration by discovering and merging the user and project layers.
pub fn load_config(project_dir: Option<&Path>) -> Result<LoadedConfig> {
    load_config_with_options(project_dir, None, None)
}

/// Load configuration with explicit control over every layer.
///
/// `config_dir` overrides both `CONCIERGE_CONFIG_DIR` and the platform
/// default. `explicit` is applied last; unlike discovered layers it must
/// exist and parse.
pub fn load_config_with_options(
    project_dir: Option<&Path>,
    config_dir: Option<&Path>,
    explicit: Option<&Path>,
) -> Result<LoadedConfig> {
    let mut config = ConciergeConfig::new();
    let mut sources = Vec::new();
    let mut warnings = Vec::new();

    // 1. User config
    let user_path = match config_dir {
        Some(dir) => Some(dir.join(USER_CONFIG_FILE)),
        None => user_config_path(),
    };
    if let Some(path) = user_path {
        sources.push(load_layer(&mut config, &path, &mut warnings));
    }

    // 2. Project-local config
    let project_path = project_dir
        .map(|d| d.join(PROJECT_CONFIG_FILE))
        .unwrap_or_else(|| PathBuf::from(PROJECT_CONFIG_FILE));
    sources.push(load_layer(&mut config, &project_path, &mut warnings));

    // 3. Explicit file
    if let Some(path) = explicit {
        config.merge(load_config_file(path)?);
        sources.push(ConfigSource {
            path: path.to_path_buf(),
            loaded: true,
        });
    }

    check_plaintext_keys(&config, &mut warnings);

    Ok(LoadedConfig {
        config,
        sources,
        warnings,
    })
}

/// Load config from a specific file path (no discovery).
pub fn load_config_file(path: &Path) -> Result<ConciergeConfig> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.display().to_string(),
        source: e,
    })?;
    ConciergeConfig::from_toml(&contents)
}

/// Save configuration to a file.
///
/// Creates parent directories if they don't exist.
pub fn save_config(config: &ConciergeConfig, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| ConfigError::WriteFile {
            path: parent.display().to_string(),
            source: e,
        })?;
    }

    let contents = config.to_toml()?;
    std::fs::write(path, contents).map_err(|e| ConfigError::WriteFile {
        path: path.display().to_string(),
        source: e,
    })?;

    Ok(())
}

/// Path of the user config file.
pub fn user_config_path() -> Option<PathBuf> {
    user_config_dir().map(|d| d.join(USER_CONFIG_FILE))
}

/// User config directory: `CONCIERGE_CONFIG_DIR` if set, else the platform
/// default (`~/.config/concierge` on Linux).
pub fn user_config_dir() -> Option<PathBuf> {
    if let Ok(dir) = std::env::var(CONFIG_DIR_ENV)
        && !dir.is_empty()
    {
        return Some(PathBuf::from(dir));
    }
    dirs::config_dir().map(|d| d.join(APP_NAME))
}

/// Try to load a config file and merge it into the existing config.
///
/// Missing files are skipped; malformed files are skipped with a warning.
fn load_layer(
    config: &mut ConciergeConfig,
    path: &Path,
    warnings: &mut Vec<String>,
) -> ConfigSource {
    if !path.is_file() {
        return ConfigSource {
            path: path.to_path_buf(),
            loaded: false,
        };
    }

    match load_config_file(path) {
        Ok(layer) => {
            config.merge(layer);
            ConfigSource {
                path: path.to_path_buf(),
                loaded: true,
            }
        }
        Err(e) => {
            warnings.push(format!("Failed to load {}: {}", path.display(), e));
            ConfigSource {
                path: path.to_path_buf(),
                loaded: false,
            }
        }
    }
}

/// Check for plaintext API keys in the config and emit warnings.
fn check_plaintext_keys(config: &ConciergeConfig, warnings: &mut Vec<String>) {
    if let Some(ref llm) = config.llm
        && llm.has_plaintext_api_key()
    {
        warnings.push(format!(
            "[llm] contains a plaintext API key. Consider setting {} instead.",
            llm.provider.env_var()
        ));
    }

    if let Some(ref embedding) = config.embedding
        && embedding.api_key.is_some()
    {
        warnings.push(format!(
            "[embedding] contains a plaintext API key. Consider setting {} instead.",
            embedding.provider.env_var()
        ));
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    use crate::Provider;

    fn load_isolated(project: &Path) -> LoadedConfig {
        let empty = TempDir::new().unwrap();
        load_config_with_options(Some(project), Some(empty.path()), None).unwrap()
    }

    #[test]
    fn test_load_config_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            r#"
[llm]
provider = "groq"
model = "test-model"
"#,
        )
        .unwrap();

        let config = load_config_file(&path).unwrap();
        assert_eq!(config.llm.as_ref().unwrap().provider, Provider::Groq);
    }

    #[test]
    fn test_load_config_file_not_found() {
        let err = load_config_file(Path::new("/nonexistent/config.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::ReadFile { .. }));
    }

    #[test]
    fn test_load_config_invalid_toml() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "this is not valid toml {{{{").unwrap();

        let err = load_config_file(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_load_config_no_files() {
        let dir = TempDir::new().unwrap();
        let loaded = load_isolated(dir.path());
        assert!(loaded.config.llm.is_none());
        assert!(loaded.loaded_from().is_empty());
    }

    #[test]
    fn test_layers_override_in_order() {
        let user_dir = TempDir::new().unwrap();
        let project_dir = TempDir::new().unwrap();
        let explicit_dir = TempDir::new().unwrap();

        fs::write(
            user_dir.path().join("config.toml"),
            r#"
[llm]
provider = "groq"

[retrieval]
limit = 7

[session]
history_window = 6
"#,
        )
        .unwrap();
        fs::write(
            project_dir.path().join("concierge.toml"),
            r#"
[llm]
provider = "deepseek"

[session]
history_window = 8
"#,
        )
        .unwrap();
        let explicit = explicit_dir.path().join("override.toml");
        fs::write(&explicit, "[session]\nhistory_window = 12\n").unwrap();

        let loaded = load_config_with_options(
            Some(project_dir.path()),
            Some(user_dir.path()),
            Some(&explicit),
        )
        .unwrap();

        let config = &loaded.config;
        assert_eq!(config.llm_config().provider, Provider::Deepseek);
        assert_eq!(config.retrieval_config().limit, 7);
        assert_eq!(config.session_config().history_window, 12);
        assert_eq!(loaded.loaded_from().len(), 3);
    }

    #[test]
    fn test_explicit_file_must_exist() {
        let dir = TempDir::new().unwrap();
        let empty = TempDir::new().unwrap();
        let result = load_config_with_options(
            Some(dir.path()),
            Some(empty.path()),
            Some(&dir.path().join("missing.toml")),
        );
        assert!(matches!(result, Err(ConfigError::ReadFile { .. })));
    }

    #[test]
    fn test_plaintext_key_warning() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("concierge.toml"),
            r#"
[llm]
provider = "deepseek"
api_key = "sk-secret"

[embedding]
provider = "openai"
api_key = "sk-other"
"#,
        )
        .unwrap();

        let loaded = load_isolated(dir.path());
        assert_eq!(loaded.warnings.len(), 2);
        assert!(loaded.warnings[0].contains("DEEPSEEK_API_KEY"));
        assert!(loaded.warnings[1].contains("[embedding]"));
    }

    #[test]
    fn test_malformed_config_warns_but_continues() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("concierge.toml"), "not valid toml {{{{").unwrap();

        let loaded = load_isolated(dir.path());
        assert!(!loaded.warnings.is_empty());
        assert!(loaded.warnings[0].contains("Failed to load"));
    }

    #[test]
    fn test_save_and_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = ConciergeConfig::new();
        config.retrieval = Some(crate::RetrievalConfig {
            limit: 9,
            ..Default::default()
        });
        save_config(&config, &path).unwrap();

        let reloaded = load_config_file(&path).unwrap();
        assert_eq!(reloaded.retrieval_config().limit, 9);
    }

    #[test]
    #[serial_test::serial]
    fn test_config_dir_env_override() {
        let dir = TempDir::new().unwrap();
        unsafe { std::env::set_var(CONFIG_DIR_ENV, dir.path()) };
        let path = user_config_path();
        unsafe { std::env::remove_var(CONFIG_DIR_ENV) };

        assert_eq!(path, Some(dir.path().join("config.toml")));
    }
}
