use std::path::{Path, PathBuf};

use tracing::info;
use zerver_common::{Error, Result};

use crate::model::AppConfig;

const DEFAULT_DATABASE_FILE: &str = "zerver.db";

pub struct ConfigLoader {
    config_dir: PathBuf,
}

impl ConfigLoader {
    pub fn new() -> Result<Self> {
        let config_dir = Self::default_config_dir();
        Ok(Self { config_dir })
    }

    pub fn default_config_dir() -> PathBuf {
        let home_config = dirs::home_dir().map(|h| h.join(".zerver"));
        let xdg_config = dirs::config_dir().map(|c| c.join("zerver"));

        match (xdg_config, home_config) {
            (Some(xdg), Some(home)) => {
                // Legacy ~/.zerver is only used when XDG is absent.
                if xdg.exists() || !home.exists() {
                    xdg
                } else {
                    home
                }
            }
            (Some(xdg), None) => xdg,
            (None, Some(home)) => home,
            (None, None) => PathBuf::from(".zerver"),
        }
    }

    pub fn with_dir(config_dir: impl Into<PathBuf>) -> Self {
        Self {
            config_dir: config_dir.into(),
        }
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    /// Returns true if a config file (YAML or TOML) exists on disk.
    pub fn config_file_exists(&self) -> bool {
        self.config_dir.join("config.yml").exists() || self.config_dir.join("config.toml").exists()
    }

    pub fn load(&self) -> Result<AppConfig> {
        let yaml_path = self.config_dir.join("config.yml");
        let toml_path = self.config_dir.join("config.toml");

        if yaml_path.exists() {
            info!("loading config from {}", yaml_path.display());
            let contents = std::fs::read_to_string(&yaml_path)?;
            serde_yaml::from_str(&contents)
                .map_err(|e| Error::Config(format!("failed to parse YAML config: {e}")))
        } else if toml_path.exists() {
            info!("loading config from {}", toml_path.display());
            let contents = std::fs::read_to_string(&toml_path)?;
            toml::from_str(&contents)
                .map_err(|e| Error::Config(format!("failed to parse TOML config: {e}")))
        } else {
            info!("no config file found, using defaults");
            Ok(AppConfig::default())
        }
    }

    /// Resolve the SQLite database file for `config`.
    pub fn database_path(&self, config: &AppConfig) -> PathBuf {
        match &config.database.path {
            Some(path) if path.is_absolute() => path.clone(),
            Some(path) => self.config_dir.join(path),
            None => self.config_dir.join("data").join(DEFAULT_DATABASE_FILE),
        }
    }

    pub fn ensure_dirs(&self) -> Result<()> {
        let dirs = [self.config_dir.clone(), self.config_dir.join("data")];

        for dir in &dirs {
            if !dir.exists() {
                std::fs::create_dir_all(dir)?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::ConfigLoader;
    use std::fs;
    use std::path::PathBuf;
    use std::time::{SystemTime, UNIX_EPOCH};
    use zerver_common::Dialect;

    fn temp_dir(label: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock should be after unix epoch")
            .as_nanos();
        std::env::temp_dir().join(format!(
            "zerver-config-test-{}-{}-{}",
            label,
            std::process::id(),
            nanos
        ))
    }

    #[test]
    fn load_returns_default_when_no_config_exists() {
        let dir = temp_dir("default");
        fs::create_dir_all(&dir).expect("failed to create temp dir");

        let loader = ConfigLoader::with_dir(&dir);
        let config = loader.load().expect("load should succeed");

        assert!(config.database.path.is_none());
        assert_eq!(config.database.dialect, Dialect::Sqlite);
        assert_eq!(config.log_level.as_deref(), Some("info"));
        assert!(!loader.config_file_exists());

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn load_prefers_yaml_over_toml_when_both_exist() {
        let dir = temp_dir("yaml-precedence");
        fs::create_dir_all(&dir).expect("failed to create temp dir");

        fs::write(
            dir.join("config.yml"),
            "database:\n  path: \"from-yaml.db\"\n  dialect: postgres\n",
        )
        .expect("failed to write yaml config");
        fs::write(
            dir.join("config.toml"),
            "[database]\npath = \"from-toml.db\"\n",
        )
        .expect("failed to write toml config");

        let loader = ConfigLoader::with_dir(&dir);
        let config = loader.load().expect("load should succeed");

        assert_eq!(config.database.path, Some(PathBuf::from("from-yaml.db")));
        assert_eq!(config.database.dialect, Dialect::Postgres);

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn load_reads_toml_when_yaml_missing() {
        let dir = temp_dir("toml");
        fs::create_dir_all(&dir).expect("failed to create temp dir");

        fs::write(
            dir.join("config.toml"),
            "log_level = \"debug\"\n\n[database]\npath = \"/var/lib/zerver/zerver.db\"\n",
        )
        .expect("failed to write toml config");

        let loader = ConfigLoader::with_dir(&dir);
        let config = loader.load().expect("load should succeed");

        assert_eq!(config.log_level.as_deref(), Some("debug"));
        assert_eq!(
            loader.database_path(&config),
            PathBuf::from("/var/lib/zerver/zerver.db")
        );

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn load_rejects_malformed_yaml() {
        let dir = temp_dir("bad-yaml");
        fs::create_dir_all(&dir).expect("failed to create temp dir");
        fs::write(dir.join("config.yml"), "database: [unclosed\n")
            .expect("failed to write yaml config");

        let loader = ConfigLoader::with_dir(&dir);
        let err = loader.load().expect_err("malformed yaml should fail");
        assert!(err.to_string().contains("failed to parse YAML config"));

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn database_path_defaults_to_data_dir_and_resolves_relative_paths() {
        let dir = temp_dir("db-path");
        let loader = ConfigLoader::with_dir(&dir);

        let mut config = crate::model::AppConfig::default();
        assert_eq!(
            loader.database_path(&config),
            dir.join("data").join("zerver.db")
        );

        config.database.path = Some(PathBuf::from("custom.db"));
        assert_eq!(loader.database_path(&config), dir.join("custom.db"));
    }

    #[test]
    fn ensure_dirs_creates_expected_subdirectories() {
        let dir = temp_dir("ensure-dirs");
        let loader = ConfigLoader::with_dir(&dir);

        loader.ensure_dirs().expect("ensure_dirs should succeed");

        assert!(dir.exists());
        assert!(dir.join("data").exists());

        let _ = fs::remove_dir_all(dir);
    }
}
