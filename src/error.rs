// src/error.rs

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PersistError {

    #[error("Configuration error: {message}")]
    Config {
        message: String,
    },

    #[error("Format error at line {line}: {message}")]
    Format {
        line: usize,
        message: String,
    },

    #[error("Infrastructure error: {message}")]
    Infrastructure {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Storage error at '{path}': {message}")]
    Storage {
        path: PathBuf,
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },
}

pub type Result<T> = std::result::Result<T, PersistError>;

// Convenience constructors
impl PersistError {

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn format(line: usize, message: impl Into<String>) -> Self {
        Self::Format {
            line,
            message: message.into(),
        }
    }

    pub fn infrastructure(message: impl Into<String>) -> Self {
        Self::Infrastructure {
            message: message.into(),
            source: None,
        }
    }

    pub fn infrastructure_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Infrastructure {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn storage(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Storage {
            path: path.into(),
            message: message.into(),
            source: None,
        }
    }

    pub fn storage_with_source(
        path: impl Into<PathBuf>,
        message: impl Into<String>,
        source: std::io::Error,
    ) -> Self {
        Self::Storage {
            path: path.into(),
            message: message.into(),
            source: Some(source),
        }
    }

    /// Whether this error came from the header parser.
    pub fn is_format(&self) -> bool {
        matches!(self, Self::Format { .. })
    }

    /// Whether this error is a configuration error.
    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PersistError::config("no variables selected");
        assert_eq!(
            err.to_string(),
            "Configuration error: no variables selected"
        );

        let err = PersistError::format(12, "expected 3 tokens, found 2");
        assert_eq!(
            err.to_string(),
            "Format error at line 12: expected 3 tokens, found 2"
        );
    }

    #[test]
    fn test_error_kind_predicates() {
        assert!(PersistError::config("x").is_config());
        assert!(!PersistError::config("x").is_format());
        assert!(PersistError::format(1, "x").is_format());
    }

    #[test]
    fn test_storage_error_keeps_source() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err = PersistError::storage_with_source("/tmp/x", "failed to open file", io);
        match err {
            PersistError::Storage { path, source, .. } => {
                assert_eq!(path, PathBuf::from("/tmp/x"));
                assert!(source.is_some());
            }
            _ => panic!("expected storage error"),
        }
    }
}
