//! Error types for Gitward
//!
//! This module provides error types with the following design goals:
//! - Human-readable error messages for administrators
//! - No leakage of repository layout to the untrusted remote caller
//! - Clear categorization for programmatic handling

use crate::serve::Denial;
use thiserror::Error;

/// Result type alias using Gitward's Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Gitward error types.
#[derive(Error, Debug)]
pub enum Error {
    /// The configuration file could not be parsed.
    #[error("config parse error at line {line}: {message}")]
    ConfigParse { message: String, line: usize },

    /// A configuration value is malformed (e.g. not a boolean).
    #[error("config value error: {0}")]
    ConfigValue(String),

    /// I/O error from filesystem operations.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// `git init` failed while creating a repository.
    #[error("git init failed: {0}")]
    GitInit(String),

    /// The command gate refused a request.
    ///
    /// Only the denial kind is carried; the message is safe to show to the
    /// remote caller.
    #[error(transparent)]
    Denied(#[from] Denial),
}

impl Error {
    /// Create a config parse error at a 1-based line number.
    pub fn parse_at(message: impl Into<String>, line: usize) -> Self {
        Self::ConfigParse {
            message: message.into(),
            line,
        }
    }
}
