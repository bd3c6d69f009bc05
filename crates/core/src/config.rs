//! Configuration loading with CLI > file > env > defaults precedence.
//!
//! Layout mirrors the layered-config pattern used elsewhere in this stack
//! (try a specific source, fall through to the next), adapted to YAML and to
//! this system's four-level precedence instead of a two-level project/user one.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// CLI overrides, applied last (highest precedence). All fields optional:
/// absence means "don't override this field".
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
  pub port: Option<u16>,
  pub directories: Option<Vec<String>>,
  pub reload_interval: Option<u64>,
  pub index_name: Option<String>,
  pub config_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
  pub base_url: String,
  pub api_key: String,
  pub embedding_model: String,
  pub llm_model: String,
}

impl Default for ApiConfig {
  fn default() -> Self {
    Self {
      base_url: String::new(),
      api_key: String::new(),
      embedding_model: "text-embedding-3-small".to_string(),
      llm_model: "qwen-flash".to_string(),
    }
  }
}

/// Directories can be given in the YAML file as a list or as a single
/// comma-separated string; both normalize to `Vec<String>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum DirectoriesField {
  List(Vec<String>),
  Csv(String),
}

impl DirectoriesField {
  fn into_vec(self) -> Vec<String> {
    match self {
      DirectoriesField::List(list) => list,
      DirectoriesField::Csv(csv) => csv.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect(),
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
  pub port: u16,
  pub directories: Vec<String>,
  pub reload_interval: u64,
  pub index_name: String,
}

impl Default for ServerConfig {
  fn default() -> Self {
    Self {
      port: 8765,
      directories: Vec::new(),
      reload_interval: 300,
      index_name: "default".to_string(),
    }
  }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
  pub api: ApiConfig,
  pub server: ServerConfig,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
  #[error("failed to read config file {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
  #[error("failed to parse config file {path}: {source}")]
  Parse {
    path: PathBuf,
    #[source]
    source: serde_yaml::Error,
  },
  #[error("missing required config field: {0}")]
  MissingField(&'static str),
  #[error("invalid port: {0} (must be 1..=65535)")]
  InvalidPort(u32),
}

/// A raw, on-disk shape that tolerates the `directories` csv-or-list union
/// before it gets folded into the canonical [`Config`].
#[derive(Debug, Deserialize)]
struct RawFile {
  #[serde(default)]
  api: RawApi,
  #[serde(default)]
  server: RawServer,
}

#[derive(Debug, Default, Deserialize)]
struct RawApi {
  base_url: Option<String>,
  api_key: Option<String>,
  embedding_model: Option<String>,
  llm_model: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawServer {
  port: Option<u16>,
  directories: Option<DirectoriesField>,
  reload_interval: Option<u64>,
  index_name: Option<String>,
}

impl Config {
  /// Default path: `~/.md-qa/config.yaml`.
  pub fn default_path() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")).join(".md-qa").join("config.yaml")
  }

  /// Load, applying CLI > file > env > defaults precedence.
  pub fn load(cli: &CliOverrides) -> Result<Self, ConfigError> {
    let mut config = Config::default();

    let file_path = cli.config_path.clone().unwrap_or_else(Self::default_path);
    if file_path.exists() {
      config.apply_file(&file_path)?;
    }

    config.apply_env();
    config.apply_cli(cli);
    config.validate()?;
    Ok(config)
  }

  fn apply_file(&mut self, path: &Path) -> Result<(), ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
      path: path.to_path_buf(),
      source,
    })?;
    let raw: RawFile = serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
      path: path.to_path_buf(),
      source,
    })?;

    if let Some(v) = raw.api.base_url {
      self.api.base_url = v;
    }
    if let Some(v) = raw.api.api_key {
      self.api.api_key = v;
    }
    if let Some(v) = raw.api.embedding_model {
      self.api.embedding_model = v;
    }
    if let Some(v) = raw.api.llm_model {
      self.api.llm_model = v;
    }
    if let Some(v) = raw.server.port {
      self.server.port = v;
    }
    if let Some(v) = raw.server.directories {
      self.server.directories = v.into_vec();
    }
    if let Some(v) = raw.server.reload_interval {
      self.server.reload_interval = v;
    }
    if let Some(v) = raw.server.index_name {
      self.server.index_name = v;
    }
    Ok(())
  }

  fn apply_env(&mut self) {
    if let Ok(v) = std::env::var("MARKDOWN_QA_API_BASE_URL") {
      self.api.base_url = v;
    }
    if let Ok(v) = std::env::var("MARKDOWN_QA_API_KEY") {
      self.api.api_key = v;
    }
    if let Ok(v) = std::env::var("MARKDOWN_QA_EMBEDDING_MODEL") {
      self.api.embedding_model = v;
    }
    if let Ok(v) = std::env::var("MARKDOWN_QA_LLM_MODEL") {
      self.api.llm_model = v;
    }
  }

  fn apply_cli(&mut self, cli: &CliOverrides) {
    if let Some(port) = cli.port {
      self.server.port = port;
    }
    if let Some(ref directories) = cli.directories {
      self.server.directories = directories.clone();
    }
    if let Some(reload_interval) = cli.reload_interval {
      self.server.reload_interval = reload_interval;
    }
    if let Some(ref index_name) = cli.index_name {
      self.server.index_name = index_name.clone();
    }
  }

  fn validate(&self) -> Result<(), ConfigError> {
    if self.api.base_url.is_empty() {
      return Err(ConfigError::MissingField("api.base_url"));
    }
    if self.api.api_key.is_empty() {
      return Err(ConfigError::MissingField("api.api_key"));
    }
    if self.server.port == 0 {
      return Err(ConfigError::InvalidPort(0));
    }
    Ok(())
  }

  /// Cache directory: `~/.md-qa/cache/`.
  pub fn cache_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")).join(".md-qa").join("cache")
  }
}

impl std::fmt::Display for Config {
  /// Redacts `api_key` so logging `Config` never leaks secrets.
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(
      f,
      "Config {{ api: {{ base_url: {:?}, api_key: \"***\", embedding_model: {:?}, llm_model: {:?} }}, server: {:?} }}",
      self.api.base_url, self.api.embedding_model, self.api.llm_model, self.server
    )
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::TempDir;

  fn write_config(dir: &TempDir, content: &str) -> PathBuf {
    let path = dir.path().join("config.yaml");
    std::fs::write(&path, content).unwrap();
    path
  }

  #[test]
  fn defaults_fail_validation_without_api_fields() {
    let cli = CliOverrides {
      config_path: Some(PathBuf::from("/nonexistent/config.yaml")),
      ..Default::default()
    };
    let err = Config::load(&cli).unwrap_err();
    assert!(matches!(err, ConfigError::MissingField("api.base_url")));
  }

  #[test]
  fn file_values_are_applied() {
    let dir = TempDir::new().unwrap();
    let path = write_config(
      &dir,
      r#"
api:
  base_url: "https://api.example.com/v1"
  api_key: "sk-test"
server:
  port: 9001
  directories: "docs, notes"
  reload_interval: 60
"#,
    );
    let cli = CliOverrides {
      config_path: Some(path),
      ..Default::default()
    };
    let config = Config::load(&cli).unwrap();
    assert_eq!(config.api.base_url, "https://api.example.com/v1");
    assert_eq!(config.server.port, 9001);
    assert_eq!(config.server.directories, vec!["docs".to_string(), "notes".to_string()]);
    assert_eq!(config.server.reload_interval, 60);
    assert_eq!(config.server.index_name, "default");
  }

  #[test]
  fn cli_overrides_file() {
    let dir = TempDir::new().unwrap();
    let path = write_config(
      &dir,
      r#"
api:
  base_url: "https://api.example.com/v1"
  api_key: "sk-test"
server:
  port: 9001
"#,
    );
    let cli = CliOverrides {
      config_path: Some(path),
      port: Some(7000),
      ..Default::default()
    };
    let config = Config::load(&cli).unwrap();
    assert_eq!(config.server.port, 7000);
  }

  #[test]
  fn env_overrides_file_but_not_cli() {
    let dir = TempDir::new().unwrap();
    let path = write_config(
      &dir,
      r#"
api:
  base_url: "https://file.example.com/v1"
  api_key: "sk-file"
"#,
    );
    // SAFETY: test runs single-threaded w.r.t. this env var within this process.
    unsafe {
      std::env::set_var("MARKDOWN_QA_API_BASE_URL", "https://env.example.com/v1");
    }
    let cli = CliOverrides {
      config_path: Some(path),
      ..Default::default()
    };
    let config = Config::load(&cli).unwrap();
    unsafe {
      std::env::remove_var("MARKDOWN_QA_API_BASE_URL");
    }
    assert_eq!(config.api.base_url, "https://env.example.com/v1");
  }

  #[test]
  fn invalid_port_zero_is_rejected() {
    let dir = TempDir::new().unwrap();
    let path = write_config(
      &dir,
      r#"
api:
  base_url: "https://api.example.com/v1"
  api_key: "sk-test"
server:
  port: 0
"#,
    );
    let cli = CliOverrides {
      config_path: Some(path),
      ..Default::default()
    };
    let err = Config::load(&cli).unwrap_err();
    assert!(matches!(err, ConfigError::InvalidPort(0)));
  }

  #[test]
  fn display_redacts_api_key() {
    let config = Config {
      api: ApiConfig {
        api_key: "sk-super-secret".to_string(),
        ..Default::default()
      },
      ..Default::default()
    };
    let rendered = format!("{config}");
    assert!(!rendered.contains("sk-super-secret"));
    assert!(rendered.contains("***"));
  }
}
