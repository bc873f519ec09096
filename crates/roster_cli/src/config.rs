//! Configuration file support for roster.
//!
//! Configuration is loaded with the following precedence (highest to lowest):
//! 1. CLI flags
//! 2. Environment variables (prefixed with `ROSTER_`, sections split by `__`,
//!    e.g., `ROSTER_DATABASE__URL`)
//! 3. Config file (~/.config/roster/config.toml or ./roster.toml)
//! 4. Built-in defaults
//!
//! The database URL defaults to `sqlite://~/.local/state/roster/roster.db` on Linux
//! (using the XDG state directory) if not explicitly configured.
//!
//! Example config file:
//! ```toml
//! [database]
//! url = "sqlite://~/.local/state/roster/roster.db"  # optional, this is the default
//!
//! [api]
//! base_url = "https://api.example.com/method"
//! version = "5.131"
//! requests_per_second = 3
//! timeout_secs = 30
//!
//! [sync]
//! chunk_size = 10000
//! max_workers = 8
//! write_batch_size = 2000
//! requeue_delay_ms = 2000
//! enrich = false
//!
//! [sync.thresholds]
//! members = 0.95
//! likes = 0.9
//!
//! [[projects]]
//! name = "acme"
//! community_id = 123456
//! tokens = ["...", "..."]
//! dialog_peers = [2000000001]
//! ```

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use directories::ProjectDirs;
use serde::Deserialize;

use roster::api::CredentialPool;
use roster::entity::collection_kind::CollectionKind;
use roster::sync::{LossThresholds, Project, SyncOptions};

/// Top-level configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Database configuration.
    pub database: DatabaseConfig,
    /// Remote API configuration.
    pub api: ApiConfig,
    /// Default sync options.
    pub sync: SyncConfig,
    /// Configured projects.
    pub projects: Vec<ProjectConfig>,
}

/// Database configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Database connection URL.
    /// Supports sqlite:// and postgres:// schemes.
    /// Defaults to `sqlite://~/.local/state/roster/roster.db` if not specified.
    pub url: Option<String>,
}

/// Remote API configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Method endpoint root; calls go to `{base_url}/{method}`.
    pub base_url: String,
    /// API version sent with every call.
    pub version: Option<String>,
    /// Per-credential request budget.
    pub requests_per_second: u32,
    pub timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.vk.com/method".to_string(),
            version: None,
            requests_per_second: 3,
            timeout_secs: 30,
        }
    }
}

/// Default sync options.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Items per member-list chunk.
    pub chunk_size: u64,
    /// Hard cap on concurrent workers.
    pub max_workers: usize,
    /// Rows per write session.
    pub write_batch_size: usize,
    /// Pause before each sequential retry of a failed chunk.
    pub requeue_delay_ms: u64,
    /// Completeness every kind requires unless `thresholds` says otherwise.
    pub min_complete_ratio: Option<f64>,
    /// Per-kind completeness, keyed by kind name.
    pub thresholds: BTreeMap<String, f64>,
    /// Re-fetch full profiles after each accepted run.
    pub enrich: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        let defaults = SyncOptions::default();
        Self {
            chunk_size: defaults.chunk_size,
            max_workers: defaults.max_workers,
            write_batch_size: defaults.write_batch_size,
            requeue_delay_ms: defaults.requeue_delay.as_millis() as u64,
            min_complete_ratio: None,
            thresholds: BTreeMap::new(),
            enrich: false,
        }
    }
}

/// One configured project: a community and the credentials that reach it.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProjectConfig {
    pub name: String,
    pub community_id: i64,
    pub tokens: Vec<String>,
    /// Dialogs whose participants are mirrored.
    pub dialog_peers: Vec<i64>,
}

impl Config {
    /// Load configuration using the config crate's layered approach.
    ///
    /// Sources are loaded in order (later sources override earlier):
    /// 1. Built-in defaults
    /// 2. XDG config file (~/.config/roster/config.toml)
    /// 3. Local config file (./roster.toml)
    /// 4. Environment variables with ROSTER_ prefix
    pub fn load() -> Self {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = Self::default_config_path()
            && path.exists()
        {
            tracing::debug!("Loading config from {:?}", path);
            builder = builder.add_source(File::from(path).format(FileFormat::Toml).required(false));
        }

        // Local config file (higher priority than XDG)
        let local_config = PathBuf::from("roster.toml");
        if local_config.exists() {
            tracing::debug!("Loading config from ./roster.toml");
            builder = builder.add_source(
                File::from(local_config)
                    .format(FileFormat::Toml)
                    .required(false),
            );
        }

        // e.g., ROSTER_DATABASE__URL -> database.url
        builder = builder.add_source(
            Environment::with_prefix("ROSTER")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        match builder.build() {
            Ok(settings) => match settings.try_deserialize::<Config>() {
                Ok(config) => config,
                Err(e) => {
                    tracing::warn!("Failed to deserialize config: {}", e);
                    Config::default()
                }
            },
            Err(e) => {
                tracing::warn!("Failed to build config: {}", e);
                Config::default()
            }
        }
    }

    /// Get the database URL, falling back to the default state directory path.
    ///
    /// The `mode=rwc` parameter creates the SQLite file if it doesn't exist.
    pub fn database_url(&self) -> Option<String> {
        self.database.url.clone().or_else(|| {
            Self::default_state_dir().map(|state_dir| {
                let db_path = state_dir.join("roster.db");
                format!("sqlite://{}?mode=rwc", db_path.display())
            })
        })
    }

    pub fn api_timeout(&self) -> Duration {
        Duration::from_secs(self.api.timeout_secs.max(1))
    }

    /// Library options built from the `[sync]` section.
    pub fn sync_options(&self) -> Result<SyncOptions, String> {
        let mut thresholds = match self.sync.min_complete_ratio {
            Some(ratio) => LossThresholds::uniform(ratio),
            None => LossThresholds::default(),
        };
        for (name, ratio) in &self.sync.thresholds {
            let kind: CollectionKind = name.parse().map_err(|e| format!("[sync.thresholds]: {e}"))?;
            thresholds = thresholds.with(kind, *ratio);
        }

        Ok(SyncOptions {
            chunk_size: self.sync.chunk_size.max(1),
            max_workers: self.sync.max_workers.max(1),
            write_batch_size: self.sync.write_batch_size.max(1),
            requeue_delay: Duration::from_millis(self.sync.requeue_delay_ms),
            thresholds,
            enrich: self.sync.enrich,
            ..SyncOptions::default()
        })
    }

    /// Look up a configured project by name.
    pub fn project(&self, name: &str) -> Result<Project, String> {
        let project = self
            .projects
            .iter()
            .find(|p| p.name == name)
            .ok_or_else(|| {
                let known: Vec<&str> = self.projects.iter().map(|p| p.name.as_str()).collect();
                if known.is_empty() {
                    format!("Project '{name}' not found. No [[projects]] are configured.")
                } else {
                    format!(
                        "Project '{name}' not found. Configured projects: {}",
                        known.join(", ")
                    )
                }
            })?;

        let pool =
            CredentialPool::from_secrets(project.tokens.as_slice(), self.api.requests_per_second);
        Ok(Project::new(project.name.as_str(), project.community_id, pool)
            .with_dialog_peers(project.dialog_peers.iter().copied()))
    }

    /// Get the default config file path.
    pub fn default_config_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "roster").map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Get the default state directory path.
    ///
    /// On Linux, this is `$XDG_STATE_HOME/roster` or `~/.local/state/roster`.
    /// On macOS/Windows, falls back to the data directory.
    pub fn default_state_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "", "roster").map(|dirs| {
            // state_dir() returns None on macOS/Windows
            dirs.state_dir()
                .map(|p| p.to_path_buf())
                .unwrap_or_else(|| dirs.data_dir().to_path_buf())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml: &str) -> Config {
        ConfigBuilder::builder()
            .add_source(config::File::from_str(toml, FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.database.url.is_none());
        assert_eq!(config.api.requests_per_second, 3);
        assert_eq!(config.sync.chunk_size, SyncOptions::default().chunk_size);
        assert!(config.sync.thresholds.is_empty());
        assert!(config.projects.is_empty());
    }

    #[test]
    fn test_full_config_parsing() {
        let config = parse(
            r#"
            [database]
            url = "sqlite:///tmp/test.db"

            [api]
            base_url = "http://localhost:8080/method"
            version = "5.131"
            requests_per_second = 20

            [sync]
            chunk_size = 600
            max_workers = 4

            [sync.thresholds]
            members = 0.99
            likes = 0.5

            [[projects]]
            name = "acme"
            community_id = 42
            tokens = ["a", "b", "c"]
            dialog_peers = [2000000001]
        "#,
        );

        assert_eq!(config.database.url.as_deref(), Some("sqlite:///tmp/test.db"));
        assert_eq!(config.api.version.as_deref(), Some("5.131"));
        assert_eq!(config.api.requests_per_second, 20);
        // Unset values keep their defaults
        assert_eq!(config.api.timeout_secs, 30);

        let options = config.sync_options().unwrap();
        assert_eq!(options.chunk_size, 600);
        assert_eq!(options.max_workers, 4);
        assert_eq!(options.thresholds.for_kind(CollectionKind::Members), 0.99);
        assert_eq!(options.thresholds.for_kind(CollectionKind::Likes), 0.5);
        assert_eq!(options.thresholds.for_kind(CollectionKind::Comments), 0.9);

        let project = config.project("acme").unwrap();
        assert_eq!(project.community_id, 42);
        assert_eq!(project.pool.len(), 3);
        assert_eq!(project.dialog_peers, vec![2_000_000_001]);
    }

    #[test]
    fn test_uniform_ratio_with_override() {
        let config = parse(
            r#"
            [sync]
            min_complete_ratio = 0.8

            [sync.thresholds]
            authors = 0.7
        "#,
        );
        let options = config.sync_options().unwrap();
        assert_eq!(options.thresholds.for_kind(CollectionKind::Members), 0.8);
        assert_eq!(options.thresholds.for_kind(CollectionKind::Authors), 0.7);
    }

    #[test]
    fn test_unknown_threshold_kind_is_rejected() {
        let config = parse(
            r#"
            [sync.thresholds]
            followers = 0.9
        "#,
        );
        let err = config.sync_options().unwrap_err();
        assert!(err.contains("followers"));
    }

    #[test]
    fn test_unknown_project_lists_configured_ones() {
        let config = parse(
            r#"
            [[projects]]
            name = "acme"
            community_id = 1
        "#,
        );
        let err = config.project("other").unwrap_err();
        assert!(err.contains("acme"));

        let empty = Config::default().project("acme").unwrap_err();
        assert!(empty.contains("No [[projects]]"));
    }

    #[test]
    fn test_database_url_defaults_to_state_dir() {
        let url = Config::default().database_url().unwrap();
        assert!(url.starts_with("sqlite://"));
        assert!(url.contains("roster.db"));
        assert!(url.ends_with("?mode=rwc"));
    }

    #[test]
    fn test_database_url_respects_configured_value() {
        let config = parse(
            r#"
            [database]
            url = "postgres://localhost/roster"
        "#,
        );
        assert_eq!(
            config.database_url(),
            Some("postgres://localhost/roster".to_string())
        );
    }

    #[test]
    fn test_config_merging_order() {
        let settings = ConfigBuilder::builder()
            .add_source(config::File::from_str(
                "[sync]\nchunk_size = 100\nmax_workers = 2",
                FileFormat::Toml,
            ))
            .add_source(config::File::from_str(
                "[sync]\nchunk_size = 300",
                FileFormat::Toml,
            ))
            .build()
            .unwrap();
        let config: Config = settings.try_deserialize().unwrap();

        assert_eq!(config.sync.chunk_size, 300);
        assert_eq!(config.sync.max_workers, 2);
    }

    #[test]
    fn test_config_invalid_toml() {
        let result = ConfigBuilder::builder()
            .add_source(config::File::from_str("[sync\nchunk_size = 1", FileFormat::Toml))
            .build();
        assert!(result.is_err());
    }
}
