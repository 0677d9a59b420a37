//! Configuration Loader (Figment-based)
//!
//! Loads and merges configuration from multiple sources using Figment:
//! 1. Built-in defaults (Serialized)
//! 2. Global config (~/.config/newsgist/config.toml)
//! 3. Project config (.newsgist/config.toml)
//! 4. Environment variables (NEWSGIST_* prefix)

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use super::types::Config;
use crate::types::{GistError, Result};

/// Tables nested one level below a top-level section
const NESTED_TABLES: &[&str] = &["retry", "breaker"];

/// Map a lowercased env key (prefix stripped) to a dotted config path.
///
/// Only underscores that separate tables become dots, so field names keep
/// their own underscores.
fn env_key_path(key: &str) -> String {
    let Some((section, rest)) = key.split_once('_') else {
        return key.to_string();
    };
    for table in NESTED_TABLES {
        if let Some(field) = rest
            .strip_prefix(table)
            .and_then(|tail| tail.strip_prefix('_'))
        {
            return format!("{section}.{table}.{field}");
        }
    }
    format!("{section}.{rest}")
}

/// Configuration loader
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with full resolution chain using Figment:
    /// defaults → global → project → env vars
    pub fn load() -> Result<Config> {
        Self::load_with_project(&Self::project_config_path())
    }

    /// Same resolution chain with an explicit project config file
    pub fn load_with_project(project_path: &Path) -> Result<Config> {
        let mut figment = Figment::new().merge(Serialized::defaults(Config::default()));

        if let Some(global_path) = Self::global_config_path()
            && global_path.exists()
        {
            debug!("Loading global config from: {}", global_path.display());
            figment = figment.merge(Toml::file(&global_path));
        }

        if project_path.exists() {
            debug!("Loading project config from: {}", project_path.display());
            figment = figment.merge(Toml::file(project_path));
        }

        // NEWSGIST_SUMMARIZER_BATCH_SIZE -> summarizer.batch_size
        // NEWSGIST_PREMIUM_RETRY_MAX_ATTEMPTS -> premium.retry.max_attempts
        figment =
            figment.merge(Env::prefixed("NEWSGIST_").map(|key| env_key_path(key.as_str()).into()));

        let config: Config = figment
            .extract()
            .map_err(|e| GistError::Config(format!("Configuration error: {}", e)))?;

        config.validate()?;

        Ok(config)
    }

    /// Load configuration from a specific file only
    pub fn load_from_file(path: &Path) -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(path))
            .extract()
            .map_err(|e| GistError::Config(format!("Configuration error: {}", e)))?;

        config.validate()?;

        Ok(config)
    }

    // =========================================================================
    // Path Management
    // =========================================================================

    /// Get path to global config directory (~/.config/newsgist/)
    pub fn global_dir() -> Option<PathBuf> {
        env::var("XDG_CONFIG_HOME")
            .ok()
            .map(PathBuf::from)
            .or_else(|| {
                env::var("HOME")
                    .ok()
                    .map(|home| PathBuf::from(home).join(".config"))
            })
            .map(|p| p.join("newsgist"))
    }

    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_dir().map(|dir| dir.join("config.toml"))
    }

    pub fn project_config_path() -> PathBuf {
        Self::project_dir().join("config.toml")
    }

    pub fn project_dir() -> PathBuf {
        PathBuf::from(".newsgist")
    }

    // =========================================================================
    // Config Commands
    // =========================================================================

    /// Show config file paths alongside the resolved storage locations
    pub fn show_path(config: &Config) {
        println!("Configuration paths:");
        println!();

        if let Some(global) = Self::global_config_path() {
            let exists = if global.exists() { "✓" } else { "✗" };
            println!("  Global:   {} {}", exists, global.display());
        } else {
            println!("  Global:   (not available)");
        }

        let project = Self::project_config_path();
        let exists = if project.exists() { "✓" } else { "✗" };
        println!("  Project:  {} {}", exists, project.display());

        let cache = &config.storage.cache_dir;
        let exists = if cache.exists() { "✓" } else { "✗" };
        println!("  Cache:    {} {}", exists, cache.display());

        let db = &config.storage.database_path;
        let exists = if db.exists() { "✓" } else { "✗" };
        println!("  Database: {} {}", exists, db.display());
    }

    /// Show current effective configuration (API keys are never printed)
    pub fn show_config(config: &Config, as_json: bool) -> Result<()> {
        if as_json {
            println!("{}", serde_json::to_string_pretty(config)?);
        } else {
            println!(
                "{}",
                toml::to_string_pretty(config).map_err(|e| GistError::Config(e.to_string()))?
            );
        }

        Ok(())
    }

    // =========================================================================
    // Initialization
    // =========================================================================

    /// Initialize global configuration
    pub fn init_global(force: bool) -> Result<PathBuf> {
        let global_dir = Self::global_dir().ok_or_else(|| {
            GistError::Config("Cannot determine global config directory".to_string())
        })?;

        fs::create_dir_all(&global_dir)?;

        let config_path = global_dir.join("config.toml");
        Self::write_template(&config_path, Self::default_global_config(), force)?;

        Ok(config_path)
    }

    /// Initialize project configuration under `.newsgist/`
    pub fn init_project(force: bool) -> Result<PathBuf> {
        Self::init_project_in(&Self::project_dir(), force)
    }

    fn init_project_in(project_dir: &Path, force: bool) -> Result<PathBuf> {
        fs::create_dir_all(project_dir)?;
        fs::create_dir_all(project_dir.join("cache"))?;

        let config_path = project_dir.join("config.toml");
        Self::write_template(&config_path, Self::default_project_config(), force)?;

        Ok(config_path)
    }

    fn write_template(path: &Path, content: &str, force: bool) -> Result<()> {
        if !path.exists() || force {
            fs::write(path, content)?;
            info!("Created config: {}", path.display());
        } else {
            info!("Config exists: {}", path.display());
        }
        Ok(())
    }

    // =========================================================================
    // Internal
    // =========================================================================

    fn default_global_config() -> &'static str {
        r#"# newsgist global configuration
# User-wide defaults. Project settings in .newsgist/config.toml override these.
# API keys may also come from OPENAI_API_KEY and HF_TOKEN.

[summarizer]
mode = "local"
batch_size = 5

[premium]
model = "gpt-3.5-turbo"
usd_per_1k_tokens = 0.002

[quota]
max_tokens_per_run = 100000
max_requests_per_run = 50
max_usd_per_run = 0.0
"#
    }

    fn default_project_config() -> &'static str {
        r#"# newsgist project configuration
# Project-specific settings that override global defaults.

[summarizer]
mode = "local"
batch_size = 5
cache_ttl_secs = 86400

[quota]
backend = "sqlite"

[storage]
cache_backend = "file"
cache_dir = ".newsgist/cache"
database_path = ".newsgist/newsgist.db"
"#
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CacheBackend, QuotaBackend, RetryConfig, SummaryMode};
    use tempfile::TempDir;

    #[test]
    fn test_load_from_file_overrides_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        fs::write(
            &path,
            r#"
[summarizer]
mode = "premium"
batch_size = 8

[secondary.breaker]
error_threshold_pct = 75
"#,
        )
        .unwrap();

        let config = ConfigLoader::load_from_file(&path).unwrap();
        assert_eq!(config.summarizer.mode, SummaryMode::Premium);
        assert_eq!(config.summarizer.batch_size, 8);
        assert_eq!(config.secondary.breaker.error_threshold_pct, 75);
        assert_eq!(config.secondary.breaker.volume_threshold, 5);
        assert_eq!(config.premium.max_output_tokens, 200);
    }

    #[test]
    fn test_load_from_file_rejects_invalid() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        fs::write(&path, "[summarizer]\nbatch_size = 0\n").unwrap();

        assert!(ConfigLoader::load_from_file(&path).is_err());
    }

    #[test]
    fn test_init_project_writes_loadable_template() {
        let temp_dir = TempDir::new().unwrap();
        let project_dir = temp_dir.path().join(".newsgist");

        let path = ConfigLoader::init_project_in(&project_dir, false).unwrap();
        assert!(path.exists());
        assert!(project_dir.join("cache").exists());

        let config = ConfigLoader::load_from_file(&path).unwrap();
        assert_eq!(config.quota.backend, QuotaBackend::Sqlite);
        assert_eq!(config.storage.cache_backend, CacheBackend::File);
    }

    #[test]
    fn test_init_project_respects_force() {
        let temp_dir = TempDir::new().unwrap();
        let project_dir = temp_dir.path().join(".newsgist");
        let path = ConfigLoader::init_project_in(&project_dir, false).unwrap();

        fs::write(&path, "# edited\n").unwrap();
        ConfigLoader::init_project_in(&project_dir, false).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "# edited\n");

        ConfigLoader::init_project_in(&project_dir, true).unwrap();
        assert!(fs::read_to_string(&path).unwrap().contains("[summarizer]"));
    }

    #[test]
    fn test_env_override() {
        let temp_dir = TempDir::new().unwrap();
        // SAFETY: This test runs in isolation
        unsafe {
            std::env::set_var("NEWSGIST_SUMMARIZER_MODE", "secondary");
            std::env::set_var("NEWSGIST_SUMMARIZER_BATCH_SIZE", "7");
        }
        let config = ConfigLoader::load_with_project(&temp_dir.path().join("missing.toml"));
        unsafe {
            std::env::remove_var("NEWSGIST_SUMMARIZER_MODE");
            std::env::remove_var("NEWSGIST_SUMMARIZER_BATCH_SIZE");
        }
        let config = config.unwrap();
        assert_eq!(config.summarizer.mode, SummaryMode::Secondary);
        assert_eq!(config.summarizer.batch_size, 7);
    }

    #[test]
    fn test_env_key_path() {
        assert_eq!(env_key_path("summarizer_batch_size"), "summarizer.batch_size");
        assert_eq!(
            env_key_path("premium_retry_max_attempts"),
            "premium.retry.max_attempts"
        );
        assert_eq!(
            env_key_path("secondary_breaker_reset_timeout_secs"),
            "secondary.breaker.reset_timeout_secs"
        );
        // Field names that merely start with a table name stay flat
        assert_eq!(env_key_path("premium_retryable"), "premium.retryable");
        assert_eq!(env_key_path("storage"), "storage");
    }

    #[test]
    fn test_env_override_nested_tables() {
        let temp_dir = TempDir::new().unwrap();
        // SAFETY: This test runs in isolation
        unsafe {
            std::env::set_var("NEWSGIST_PREMIUM_RETRY_MAX_ATTEMPTS", "4");
            std::env::set_var("NEWSGIST_SECONDARY_BREAKER_VOLUME_THRESHOLD", "9");
        }
        let config = ConfigLoader::load_with_project(&temp_dir.path().join("missing.toml"));
        unsafe {
            std::env::remove_var("NEWSGIST_PREMIUM_RETRY_MAX_ATTEMPTS");
            std::env::remove_var("NEWSGIST_SECONDARY_BREAKER_VOLUME_THRESHOLD");
        }
        let config = config.unwrap();
        assert_eq!(config.premium.retry.max_attempts, 4);
        assert_eq!(config.secondary.breaker.volume_threshold, 9);
        assert_eq!(config.premium.retry.base_delay_ms, RetryConfig::default().base_delay_ms);
    }
}
