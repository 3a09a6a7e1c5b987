//! Box builder error types.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while running commands or assembling boxes.
#[derive(Error, Debug)]
pub enum BoxError {
    #[error("command failed with exit code {code:?}: {program} {}", args.join(" "))]
    CommandFailed {
        program: String,
        args: Vec<String>,
        code: Option<i32>,
    },

    #[error("failed to execute '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("cleanup of {} failed: {source}", path.display())]
    ContextCleanupFailed {
        path: PathBuf,
        #[source]
        source: Box<BoxError>,
    },

    #[error("malformed dependency report line: {line:?}")]
    MalformedReport { line: String },

    #[error("unknown box: {0}")]
    UnknownBox(String),

    #[error("box '{0}' needs a version, e.g. '{0}-3'")]
    MissingVersion(String),

    #[error("box '{name}' does not support version {version}")]
    UnsupportedVersion { name: String, version: String },

    #[error("download failed: {0}")]
    Download(String),

    #[error("sha256 mismatch for {name}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        name: String,
        expected: String,
        actual: String,
    },

    #[error("malformed manifest line: {0:?}")]
    Manifest(String),

    #[error("archive error: {0}")]
    Archive(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T, E = BoxError> = std::result::Result<T, E>;
