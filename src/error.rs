//! Error types for the registration driver.
//!
//! Every failure in the pipeline maps onto one of four categories (see
//! [`ErrorKind`]); spawn failures are kept as their own variant so callers
//! can tell "the tool never ran" apart from "the tool ran and failed".

use std::path::PathBuf;
use thiserror::Error;

use crate::supervisor::RunFailure;
use crate::validation::ValidationReport;

/// Main error type for registration operations.
#[derive(Error, Debug)]
pub enum RegistrationError {
    /// Malformed matrix text, binary stream length or data-type code.
    #[error("Format error: {0}")]
    Format(String),

    /// Missing file or unreadable path.
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// NIfTI header or volume could not be read or written.
    #[error("NIfTI error on {}: {message}", path.display())]
    Nifti { path: PathBuf, message: String },

    /// Reference image geometry is not available.
    #[error("Missing geometry: {0}")]
    MissingGeometry(String),

    /// Pre-run validation blocked the registration.
    #[error("{0}")]
    Validation(ValidationReport),

    /// The executable could not be launched at all.
    #[error("Failed to launch {}: {source}", program.display())]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The process completed but the run is classified as failed.
    #[error("Registration failed: {0}")]
    RunFailure(RunFailure),
}

/// Coarse error category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Format,
    Io,
    Validation,
    RunFailure,
}

/// Result type for registration operations.
pub type Result<T> = std::result::Result<T, RegistrationError>;

impl RegistrationError {
    /// Create a format error.
    pub fn format(msg: impl Into<String>) -> Self {
        Self::Format(msg.into())
    }

    /// Wrap an I/O error with the path it happened on.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Wrap a NIfTI library error with the path it happened on.
    pub fn nifti(path: impl Into<PathBuf>, err: impl std::fmt::Display) -> Self {
        Self::Nifti {
            path: path.into(),
            message: err.to_string(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Format(_) => ErrorKind::Format,
            Self::Io { .. } | Self::Nifti { .. } | Self::MissingGeometry(_) | Self::Spawn { .. } => {
                ErrorKind::Io
            }
            Self::Validation(_) => ErrorKind::Validation,
            Self::RunFailure(_) => ErrorKind::RunFailure,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(RegistrationError::format("bad").kind(), ErrorKind::Format);

        let io = RegistrationError::io(
            "/missing",
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        assert_eq!(io.kind(), ErrorKind::Io);
        assert!(io.to_string().contains("/missing"));

        let spawn = RegistrationError::Spawn {
            program: PathBuf::from("reg_aladin"),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
        };
        assert_eq!(spawn.kind(), ErrorKind::Io);
        assert!(spawn.to_string().starts_with("Failed to launch reg_aladin"));
    }
}
