//! Error handling module
//!
//! Provides the error taxonomy for a reconciliation run and maps every
//! fatal condition onto a process exit code.

use std::path::PathBuf;
use thiserror::Error;

/// Exit codes, following `sysexits.h`
pub mod exit {
    pub const OK: i32 = 0;
    pub const USAGE: i32 = 64;
    pub const DATA_ERR: i32 = 65;
    pub const NO_HOST: i32 = 68;
    pub const SOFTWARE: i32 = 70;
    pub const OS_FILE: i32 = 72;
}

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Could not find file \"{}\"", .0.display())]
    FileNotFound(PathBuf),

    #[error("File \"{}\" already exists.", .0.display())]
    FileExists(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database \"{0}\" does not exist.")]
    TargetMissing(String),

    /// The declared schema failed to execute inside the sandbox
    #[error("{message}")]
    Syntax { message: String },

    /// A generated statement failed against the real target
    #[error("Statement failed: {statement}\n{message}")]
    ApplyFailed { statement: String, message: String },

    /// Unsafe statements reached a migration whose safety is still on
    #[error("Unsafe statements generated.")]
    UnsafeRefused,

    #[error("Database error: {0}")]
    Database(#[from] tokio_postgres::Error),

    #[error("Sandbox error: {0}")]
    Sandbox(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl AppError {
    /// Exit code reported to the shell for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            AppError::FileNotFound(_) | AppError::FileExists(_) => exit::OS_FILE,
            AppError::TargetMissing(_) => exit::NO_HOST,
            AppError::Syntax { .. } | AppError::ApplyFailed { .. } => exit::DATA_ERR,
            AppError::Io(_) => exit::OS_FILE,
            AppError::UnsafeRefused => exit::USAGE,
            AppError::Database(_) | AppError::Sandbox(_) | AppError::Config(_) => exit::SOFTWARE,
        }
    }

    /// Wrap a driver error raised while running the declared schema
    pub fn syntax(err: impl std::fmt::Display) -> Self {
        AppError::Syntax {
            message: err.to_string(),
        }
    }

    /// The underlying message without the category prefix
    pub fn detail(&self) -> String {
        match self {
            AppError::Database(e) => match e.as_db_error() {
                Some(db) => format!("{}: {}", db.severity(), db.message()),
                None => e.to_string(),
            },
            AppError::Syntax { message } => message.clone(),
            AppError::Sandbox(message) | AppError::Config(message) => message.clone(),
            other => other.to_string(),
        }
    }
}

/// Result type alias used throughout the crate
pub type AppResult<T> = Result<T, AppError>;

/// Helper function to create a configuration error
pub fn config_error(msg: impl Into<String>) -> AppError {
    AppError::Config(msg.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(AppError::FileNotFound("schema.sql".into()).exit_code(), 72);
        assert_eq!(AppError::FileExists("schema.sql".into()).exit_code(), 72);
        assert_eq!(AppError::TargetMissing("app".into()).exit_code(), 68);
        assert_eq!(AppError::syntax("syntax error at or near \"TABEL\"").exit_code(), 65);
        assert_eq!(
            AppError::ApplyFailed {
                statement: "drop table x".into(),
                message: "boom".into()
            }
            .exit_code(),
            65
        );
        assert_eq!(config_error("bad").exit_code(), 70);
    }

    #[test]
    fn test_messages() {
        let err = AppError::TargetMissing("shop".into());
        assert_eq!(err.to_string(), "Database \"shop\" does not exist.");

        let err = AppError::FileNotFound("missing.sql".into());
        assert_eq!(err.to_string(), "Could not find file \"missing.sql\"");
    }

    #[test]
    fn test_detail_strips_category() {
        assert_eq!(AppError::Sandbox("no room".into()).detail(), "no room");
        assert_eq!(AppError::syntax("bad token").detail(), "bad token");
        assert_eq!(
            AppError::TargetMissing("shop".into()).detail(),
            "Database \"shop\" does not exist."
        );
    }
}
