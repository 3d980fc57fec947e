//! Error Types
//!
//! Errors returned by operations that fail as a whole. Problems found while
//! validating a workflow document are not errors in this sense: they are
//! collected as [`Diagnostic`](crate::workflow::diagnostics::Diagnostic)s so
//! that every issue can be reported at once.

use thiserror::Error;

use crate::execution::registry::RegistryError;

/// Top-level error type for the library.
#[derive(Debug, Error)]
pub enum FlowError {
    /// Reading or writing a workflow file failed
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// YAML (de)serialization failed
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON (de)serialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The workflow did not pass validation
    #[error("workflow validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),

    /// Step registry lookup or registration failed
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

impl FlowError {
    /// Wraps an I/O error together with the path that caused it.
    pub fn io(path: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Result type for library operations.
pub type Result<T> = std::result::Result<T, FlowError>;
