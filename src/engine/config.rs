//! DuoDB Configuration Module
//! Handles loading and validating duodb.config.json

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::engine::query::QueryLimits;
use crate::engine::relational::SqlDialect;

pub const CONFIG_FILE: &str = "duodb.config.json";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),
    #[error("Failed to read config: {0}")]
    ReadError(#[from] std::io::Error),
    #[error("Invalid config format: {0}")]
    ParseError(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub version: String,
    pub project: ProjectConfig,
    #[serde(default)]
    pub relational: RelationalConfig,
    #[serde(default)]
    pub graph: GraphConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub query: QueryConfig,
    #[serde(default)]
    pub import: ImportConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationalConfig {
    /// Relative to the project directory; `:memory:` keeps everything in RAM
    #[serde(default = "default_relational_path")]
    pub path: PathBuf,
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
    #[serde(default)]
    pub dialect: SqlDialect,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphConfig {
    /// JSON snapshot of the embedded graph; none keeps it in memory only
    #[serde(default)]
    pub snapshot: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_host")]
    pub host: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryConfig {
    #[serde(default = "default_max_hop_bound")]
    pub max_hop_bound: u32,
    #[serde(default = "default_page_size")]
    pub default_page_size: i64,
    #[serde(default = "default_max_page_size")]
    pub max_page_size: i64,
    /// Reject filters whose operator the field does not support instead of ignoring them
    #[serde(default = "default_true")]
    pub strict_operators: bool,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportConfig {
    #[serde(default = "default_entity_batch")]
    pub article_batch: usize,
    #[serde(default = "default_entity_batch")]
    pub user_batch: usize,
    #[serde(default = "default_entity_batch")]
    pub follow_batch: usize,
    #[serde(default = "default_order_batch")]
    pub order_batch: usize,
}

fn default_relational_path() -> PathBuf {
    PathBuf::from("./data/duodb.db")
}

fn default_pool_size() -> u32 {
    8
}

fn default_port() -> u16 {
    54330
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_max_hop_bound() -> u32 {
    6
}

fn default_page_size() -> i64 {
    20
}

fn default_max_page_size() -> i64 {
    500
}

fn default_true() -> bool {
    true
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_entity_batch() -> usize {
    1000
}

fn default_order_batch() -> usize {
    500
}

impl Default for RelationalConfig {
    fn default() -> Self {
        Self {
            path: default_relational_path(),
            pool_size: default_pool_size(),
            dialect: SqlDialect::Sqlite,
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
        }
    }
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            max_hop_bound: default_max_hop_bound(),
            default_page_size: default_page_size(),
            max_page_size: default_max_page_size(),
            strict_operators: true,
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            article_batch: default_entity_batch(),
            user_batch: default_entity_batch(),
            follow_batch: default_entity_batch(),
            order_batch: default_order_batch(),
        }
    }
}

impl QueryConfig {
    pub fn limits(&self) -> QueryLimits {
        QueryLimits {
            max_hop_bound: self.max_hop_bound.max(1),
            default_page_size: self.default_page_size.max(1),
            max_page_size: self.max_page_size.max(1),
            strict_operators: self.strict_operators,
        }
    }
}

impl Config {
    pub fn load(project_dir: &Path) -> Result<Self, ConfigError> {
        let config_path = project_dir.join(CONFIG_FILE);
        if !config_path.exists() {
            return Err(ConfigError::NotFound(config_path));
        }
        let content = std::fs::read_to_string(&config_path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Load the project config, or the defaults when the project has none
    pub fn load_or_default(project_dir: &Path) -> Result<Self, ConfigError> {
        match Self::load(project_dir) {
            Err(ConfigError::NotFound(_)) => {
                let name = project_dir
                    .file_name()
                    .and_then(|n| n.to_str())
                    .unwrap_or("duodb");
                Ok(Self::default_for_project(name))
            }
            other => other,
        }
    }

    pub fn save(&self, project_dir: &Path) -> Result<(), ConfigError> {
        let config_path = project_dir.join(CONFIG_FILE);
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(&config_path, content)?;
        Ok(())
    }

    pub fn default_for_project(name: &str) -> Self {
        Self {
            version: "0.1.0".to_string(),
            project: ProjectConfig {
                name: name.to_string(),
            },
            relational: RelationalConfig::default(),
            graph: GraphConfig {
                snapshot: Some(PathBuf::from("./data/graph.json")),
            },
            api: ApiConfig::default(),
            query: QueryConfig::default(),
            import: ImportConfig::default(),
        }
    }

    /// In-memory stores, nothing written to disk
    pub fn ephemeral(name: &str) -> Self {
        let mut config = Self::default_for_project(name);
        config.relational.path = PathBuf::from(":memory:");
        config.graph.snapshot = None;
        config
    }
}
