// ABOUTME: Application configuration with defaults and file loading
// Supports TOML configuration files and environment variables

use super::settings::RequestSettings;
use crate::utils::error::{ChatMeterError, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub api_base_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub request_timeout_secs: u64,
    pub database_path: Option<PathBuf>,
    pub conversations_dir: Option<PathBuf>,
    pub export_dir: Option<PathBuf>,
    pub pricing_path: Option<PathBuf>,
    pub system_prompt: Option<String>,
    pub naming_model: Option<String>,
    pub request: RequestSettings,
    #[serde(skip)]
    pub config_path: Option<PathBuf>,
    #[serde(skip)]
    pub debug: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_base_url: "https://api.openai.com/v1".to_string(),
            api_key: None,
            request_timeout_secs: 120,
            database_path: None,
            conversations_dir: None,
            export_dir: None,
            pricing_path: None,
            system_prompt: None,
            naming_model: None,
            request: RequestSettings::default(),
            config_path: None,
            debug: false,
        }
    }
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("com", "chat-meter", "chat-meter")
}

impl AppConfig {
    /// Load from the platform config directory, falling back to defaults
    pub fn load() -> Result<Self> {
        let mut config = match project_dirs() {
            Some(dirs) => {
                let config_path = dirs.config_dir().join("config.toml");
                if config_path.exists() {
                    Self::from_file(&config_path)?
                } else {
                    Self::default()
                }
            }
            None => Self::default(),
        };

        config.apply_env();
        config.request.validate()?;
        Ok(config)
    }

    /// Load from an explicit file; a missing file is an error
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut config = Self::from_file(path)?;
        config.apply_env();
        config.request.validate()?;
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            ChatMeterError::Config(format!("Cannot read {}: {}", path.display(), e))
        })?;
        let mut config: Self = toml::from_str(&contents)?;
        config.config_path = Some(path.to_path_buf());
        tracing::debug!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    fn apply_env(&mut self) {
        // Override with environment variables
        if let Ok(key) = std::env::var("OPENAI_API_KEY") {
            if !key.trim().is_empty() {
                self.api_key = Some(key);
            }
        }

        if let Ok(url) = std::env::var("CHAT_METER_API_BASE_URL") {
            self.api_base_url = url;
        }

        if let Ok(model) = std::env::var("CHAT_METER_MODEL") {
            self.request = self.request.clone().with_model(model);
        }

        if let Ok(path) = std::env::var("CHAT_METER_DATABASE") {
            self.database_path = Some(PathBuf::from(path));
        }

        if let Ok(dir) = std::env::var("CHAT_METER_CONVERSATIONS_DIR") {
            self.conversations_dir = Some(PathBuf::from(dir));
        }
    }

    fn data_dir() -> PathBuf {
        project_dirs()
            .map(|dirs| dirs.data_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."))
    }

    pub fn database_path(&self) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(|| Self::data_dir().join("accounts.sqlite3"))
    }

    pub fn conversations_dir(&self) -> PathBuf {
        self.conversations_dir
            .clone()
            .unwrap_or_else(|| Self::data_dir().join("conversations"))
    }

    pub fn export_dir(&self) -> PathBuf {
        self.export_dir.clone().unwrap_or_else(|| PathBuf::from("."))
    }

    /// Model used to summarize a conversation into its display name
    pub fn naming_model(&self) -> &str {
        self.naming_model
            .as_deref()
            .unwrap_or(crate::utils::cost_calculator::DEFAULT_MODEL)
    }

    pub fn api_key(&self) -> Result<&str> {
        self.api_key.as_deref().ok_or_else(|| {
            ChatMeterError::Config(
                "No API key configured. Set OPENAI_API_KEY or api_key in config.toml".to_string(),
            )
        })
    }

    fn file_path(&self) -> Result<PathBuf> {
        match &self.config_path {
            Some(path) => Ok(path.clone()),
            None => project_dirs()
                .map(|dirs| dirs.config_dir().join("config.toml"))
                .ok_or_else(|| ChatMeterError::Config("No config directory available".to_string())),
        }
    }

    /// Store `request` as the default `[request]` table.
    ///
    /// The rest of the file is rewritten as it was read, so environment and
    /// command-line overrides held by `self` never reach the disk.
    pub fn save_request_defaults(&self, request: &RequestSettings) -> Result<PathBuf> {
        let config_path = self.file_path()?;
        let mut on_disk = if config_path.exists() {
            Self::from_file(&config_path)?
        } else {
            Self::default()
        };
        on_disk.request = request.clone();

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = toml::to_string_pretty(&on_disk)
            .map_err(|e| ChatMeterError::Config(format!("Cannot serialize config: {}", e)))?;
        std::fs::write(&config_path, contents)?;
        tracing::info!(path = %config_path.display(), "saved request defaults");
        Ok(config_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_config_file_with_request_table() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
api_base_url = "http://localhost:8080/v1"
system_prompt = "You are a helpful assistant!"

[request]
model = "gpt-4"
max_tokens = 500
temperature = 0.7
"#,
        )
        .unwrap();

        let config = AppConfig::from_file(&path).unwrap();
        assert_eq!(config.api_base_url, "http://localhost:8080/v1");
        assert_eq!(config.request.model, "gpt-4");
        assert_eq!(config.request.max_tokens, 500);
        assert_eq!(config.request.top_p, 1.0);
        assert_eq!(config.config_path.as_deref(), Some(path.as_path()));
    }

    #[test]
    fn test_unknown_request_key_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[request]\nlogit_bias = 3\n").unwrap();

        assert!(matches!(
            AppConfig::from_file(&path),
            Err(ChatMeterError::ConfigParse(_))
        ));
    }

    #[test]
    fn test_out_of_range_request_value_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[request]\ntemperature = 5.0\n").unwrap();

        assert!(AppConfig::load_from(&path).is_err());
    }

    #[test]
    fn test_save_request_defaults_creates_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let config = AppConfig {
            config_path: Some(path.clone()),
            ..AppConfig::default()
        };
        let request = RequestSettings::default().with_model("gpt-4");

        assert_eq!(config.save_request_defaults(&request).unwrap(), path);
        let loaded = AppConfig::from_file(&path).unwrap();
        assert_eq!(loaded.request.model, "gpt-4");
        assert_eq!(loaded.api_key, None);
    }

    #[test]
    fn test_save_request_defaults_keeps_overrides_off_disk() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "api_base_url = \"http://localhost:8080/v1\"\nexport_dir = \"/tmp/exports\"\n",
        )
        .unwrap();

        std::env::set_var("OPENAI_API_KEY", "sk-from-environment");
        let mut config = AppConfig::load_from(&path).unwrap();
        assert_eq!(config.api_key.as_deref(), Some("sk-from-environment"));
        config.database_path = Some(PathBuf::from("/tmp/override.sqlite3"));

        let request = RequestSettings {
            temperature: 0.3,
            ..RequestSettings::default()
        };
        config.save_request_defaults(&request).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(!contents.contains("sk-from-environment"));
        assert!(!contents.contains("override.sqlite3"));

        let saved = AppConfig::from_file(&path).unwrap();
        assert_eq!(saved.api_base_url, "http://localhost:8080/v1");
        assert_eq!(saved.export_dir, Some(PathBuf::from("/tmp/exports")));
        assert_eq!(saved.request.temperature, 0.3);
    }

    #[test]
    fn test_missing_api_key() {
        let config = AppConfig::default();
        assert!(config.api_key().is_err());
    }
}
