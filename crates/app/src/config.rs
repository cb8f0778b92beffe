use std::path::{Path, PathBuf};

use thiserror::Error;

pub const DEFAULT_DB_URL: &str = "sqlite:mastermore.sqlite3";
pub const DEFAULT_LOG_FILTER: &str = "info";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid database url: {raw:?}")]
    InvalidDbUrl { raw: String },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Process configuration: `.env`, then `MASTERMORE_*` variables, then flags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub db_url: String,
    pub log_filter: String,
}

impl AppConfig {
    /// Load `.env` if present and read `MASTERMORE_DB_URL` / `MASTERMORE_LOG`.
    #[must_use]
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let db_url = lookup("MASTERMORE_DB_URL")
            .filter(|v| !v.trim().is_empty())
            .map_or_else(|| normalize_sqlite_url(DEFAULT_DB_URL), |v| normalize_sqlite_url(&v));
        let log_filter = lookup("MASTERMORE_LOG")
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_LOG_FILTER.into());
        Self { db_url, log_filter }
    }

    /// Apply a `--db` flag.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidDbUrl` for a blank value.
    pub fn with_db_override(mut self, db: Option<String>) -> Result<Self, ConfigError> {
        if let Some(raw) = db {
            if raw.trim().is_empty() {
                return Err(ConfigError::InvalidDbUrl { raw });
            }
            self.db_url = normalize_sqlite_url(&raw);
        }
        Ok(self)
    }
}

/// Turn `sqlite:relative.db` or a bare path into an absolute `sqlite://` URL.
#[must_use]
pub fn normalize_sqlite_url(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed == "sqlite::memory:" || trimmed.starts_with("sqlite://") {
        return trimmed.to_owned();
    }

    let path_str = trimmed.strip_prefix("sqlite:").unwrap_or(trimmed);
    let path = Path::new(path_str);
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(path)
    };
    format!("sqlite://{}", absolute.display())
}

/// Create the database file and its directory so `SQLite` can open it.
///
/// # Errors
///
/// Returns `ConfigError` for a malformed URL or a filesystem failure.
pub fn prepare_sqlite_file(db_url: &str) -> Result<(), ConfigError> {
    if db_url == "sqlite::memory:" {
        return Ok(());
    }

    let invalid = || ConfigError::InvalidDbUrl {
        raw: db_url.to_owned(),
    };
    let path = db_url.strip_prefix("sqlite://").ok_or_else(invalid)?;
    let path = path.split('?').next().unwrap_or(path);
    if path.is_empty() {
        return Err(invalid());
    }

    let path = Path::new(path);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    if !path.exists() {
        std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(path)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_when_unset() {
        let config = AppConfig::from_lookup(|_| None);
        assert!(config.db_url.starts_with("sqlite://"));
        assert!(config.db_url.ends_with("mastermore.sqlite3"));
        assert_eq!(config.log_filter, "info");
    }

    #[test]
    fn env_values_and_flags_layer() {
        let config = AppConfig::from_lookup(|key| match key {
            "MASTERMORE_DB_URL" => Some("sqlite:///tmp/mm.db".into()),
            "MASTERMORE_LOG" => Some("services=debug".into()),
            _ => None,
        });
        assert_eq!(config.db_url, "sqlite:///tmp/mm.db");
        assert_eq!(config.log_filter, "services=debug");

        let overridden = config
            .clone()
            .with_db_override(Some("sqlite::memory:".into()))
            .unwrap();
        assert_eq!(overridden.db_url, "sqlite::memory:");
        assert!(config.with_db_override(Some("  ".into())).is_err());
    }

    #[test]
    fn relative_paths_become_absolute() {
        let url = normalize_sqlite_url("sqlite:data/dev.db");
        let path = url.strip_prefix("sqlite://").unwrap();
        assert!(Path::new(path).is_absolute());
        assert!(path.ends_with("data/dev.db"));
    }

    #[test]
    fn memory_url_needs_no_file() {
        assert!(prepare_sqlite_file("sqlite::memory:").is_ok());
        assert!(matches!(
            prepare_sqlite_file("postgres://x"),
            Err(ConfigError::InvalidDbUrl { .. })
        ));
    }
}
