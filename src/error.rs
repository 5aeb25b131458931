//! Typed errors for the packaging pipeline.
//!
//! Validation-class errors are raised before any external tool is spawned.
//! Everything else aborts the build at the stage that produced it.

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Result alias used throughout the library.
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("'{path}' is not a valid manifest file: {reason}")]
    ManifestInvalid { path: PathBuf, reason: String },

    #[error(
        "Package name '{descriptor_package}' in '{path}' differs from package name '{manifest_package}' in the apex manifest"
    )]
    PackageNameMismatch {
        path: PathBuf,
        descriptor_package: String,
        manifest_package: String,
    },

    #[error("Missing {what}: {hint}")]
    MissingRequiredInput { what: &'static str, hint: &'static str },

    #[error("Unable to use apex version '{0}' as filename suffix, valid characters are [a-zA-Z0-9_.-]")]
    UnsafeVersionString(String),

    #[error("Failed to find binary {tool} in path {searched}")]
    ToolNotFound { tool: String, searched: String },

    #[error("Failed to execute: {command} (exit code {code})\n{output}")]
    ExternalToolFailed {
        command: String,
        code: i32,
        output: String,
    },

    #[error("Failed to sign payload image '{image}': {reason}")]
    SigningFailed { image: PathBuf, reason: String },

    #[error("{0} already exists. Use --force to overwrite.")]
    OutputAlreadyExists(PathBuf),

    #[error("{0}")]
    InvalidInput(String),

    #[error("{context} '{path}': {source}")]
    Io {
        context: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("archive error in '{path}': {source}")]
    Zip {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },
}

impl Error {
    /// True for errors detected before any external process is spawned.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Error::ManifestInvalid { .. }
                | Error::PackageNameMismatch { .. }
                | Error::MissingRequiredInput { .. }
                | Error::UnsafeVersionString(_)
                | Error::ToolNotFound { .. }
                | Error::OutputAlreadyExists(_)
                | Error::InvalidInput(_)
        )
    }
}

/// Attach a path and an action to an I/O error.
pub(crate) trait IoContext<T> {
    fn io_context(self, context: &'static str, path: &Path) -> Result<T>;
}

impl<T> IoContext<T> for io::Result<T> {
    fn io_context(self, context: &'static str, path: &Path) -> Result<T> {
        self.map_err(|source| Error::Io {
            context,
            path: path.to_path_buf(),
            source,
        })
    }
}

pub(crate) trait ZipContext<T> {
    fn zip_context(self, path: &Path) -> Result<T>;
}

impl<T> ZipContext<T> for zip::result::ZipResult<T> {
    fn zip_context(self, path: &Path) -> Result<T> {
        self.map_err(|source| Error::Zip {
            path: path.to_path_buf(),
            source,
        })
    }
}
