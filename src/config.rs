//! Application configuration module
//!
//! Handles loading and validating configuration from environment variables.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

/// Sandbox naming configuration
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    /// Fixed prefix of every ephemeral database name
    pub prefix: String,
    /// Number of random lowercase letters appended to the prefix
    pub suffix_len: usize,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            prefix: "schemahq_".to_string(),
            suffix_len: 10,
        }
    }
}

/// Complete application settings
#[derive(Debug, Clone)]
pub struct Settings {
    /// Database used for CREATE/DROP DATABASE administrative commands
    pub admin_database: String,
    pub sandbox: SandboxConfig,
    /// Default tracing filter when RUST_LOG is unset
    pub log_filter: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            admin_database: "postgres".to_string(),
            sandbox: SandboxConfig::default(),
            log_filter: "info".to_string(),
        }
    }
}

impl Settings {
    /// Load settings from environment variables
    pub fn load() -> Result<Self, ConfigError> {
        // Load .env file if it exists (ignore errors if file not found)
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Settings::default();

        let admin_database = lookup("SCHEMAHQ_ADMIN_DATABASE")
            .map(|s| s.trim().to_string())
            .unwrap_or(defaults.admin_database);
        if admin_database.is_empty() {
            return Err(ConfigError::InvalidValue(
                "SCHEMAHQ_ADMIN_DATABASE must not be empty".to_string(),
            ));
        }

        let prefix = lookup("SCHEMAHQ_SANDBOX_PREFIX").unwrap_or(defaults.sandbox.prefix);
        if prefix.is_empty() || !prefix.chars().all(|c| c.is_ascii_lowercase() || c == '_') {
            return Err(ConfigError::InvalidValue(format!(
                "SCHEMAHQ_SANDBOX_PREFIX must be lowercase letters or underscores, got {:?}",
                prefix
            )));
        }

        let log_filter = lookup("SCHEMAHQ_LOG").unwrap_or(defaults.log_filter);

        Ok(Self {
            admin_database,
            sandbox: SandboxConfig {
                prefix,
                suffix_len: defaults.sandbox.suffix_len,
            },
            log_filter,
        })
    }
}
