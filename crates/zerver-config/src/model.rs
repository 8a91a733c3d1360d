use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use zerver_common::Dialect;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub log_level: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            log_level: Some("info".to_string()),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite database file. Relative paths resolve against the config directory.
    #[serde(default)]
    pub path: Option<PathBuf>,

    /// Dialect used when rendering SQL without a database.
    #[serde(default)]
    pub dialect: Dialect,
}
