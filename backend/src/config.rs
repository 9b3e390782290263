use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;

const DEFAULT_CONFIG_PATH: &str = "config/server.yaml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Invalid config file: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("Invalid value for {key}: {value:?}")]
    InvalidValue { key: &'static str, value: String },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub model_path: PathBuf,
    pub upload_dir: PathBuf,
    pub allowed_origin: String,
    pub max_upload_bytes: usize,
    /// Set when the exported model returns logits instead of probabilities.
    pub apply_softmax: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
            model_path: PathBuf::from("model.pt"),
            upload_dir: PathBuf::from("uploads"),
            allowed_origin: "http://localhost:5173".to_string(),
            max_upload_bytes: 5 * 1024 * 1024,
            apply_softmax: false,
        }
    }
}

impl ServerConfig {
    /// Builds the effective configuration: defaults, then the YAML file named
    /// by `SERVER_CONFIG` (or `config/server.yaml` when present), then
    /// environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match config_file_path() {
            Some(path) => Self::from_yaml_file(&path)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_yaml_file(path: &Path) -> Result<Self, ConfigError> {
        let config_str = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&config_str)
    }

    pub fn from_yaml_str(config_str: &str) -> Result<Self, ConfigError> {
        if config_str.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: ServerConfig = serde_yaml::from_str(config_str)?;
        Ok(config)
    }

    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("HOST") {
            self.host = host;
        }
        if let Some(port) = lookup("PORT") {
            self.port = parse_value("PORT", port)?;
        }
        if let Some(model_path) = lookup("MODEL_PATH") {
            self.model_path = PathBuf::from(model_path);
        }
        if let Some(upload_dir) = lookup("UPLOAD_DIR") {
            self.upload_dir = PathBuf::from(upload_dir);
        }
        if let Some(origin) = lookup("ALLOWED_ORIGIN") {
            self.allowed_origin = origin;
        }
        if let Some(max_bytes) = lookup("MAX_UPLOAD_BYTES") {
            self.max_upload_bytes = parse_value("MAX_UPLOAD_BYTES", max_bytes)?;
        }
        if let Some(flag) = lookup("APPLY_SOFTMAX") {
            self.apply_softmax = parse_flag("APPLY_SOFTMAX", flag)?;
        }
        Ok(())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn config_file_path() -> Option<PathBuf> {
    if let Ok(path) = env::var("SERVER_CONFIG") {
        return Some(PathBuf::from(path));
    }
    let default_path = Path::new(DEFAULT_CONFIG_PATH);
    default_path.exists().then(|| default_path.to_path_buf())
}

fn parse_value<T: FromStr>(key: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidValue { key, value })
}

fn parse_flag(key: &'static str, value: String) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue { key, value }),
    }
}
