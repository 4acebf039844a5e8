//! Crate-wide error types.

use serde::Serialize;
use thiserror::Error;

pub type HeatlineResult<T> = Result<T, HeatlineError>;

#[derive(Debug, Error)]
pub enum HeatlineError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

/// Why a profiling run did not produce a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfileErrorKind {
    NoActiveDocument,
    UnsupportedFileType,
    ProcessSpawnFailure,
    ProcessStderrOutput,
    EmptyOutput,
    MalformedOutput,
    Timeout,
    /// The run was stopped by the user; never surfaced.
    Cancelled,
}

impl ProfileErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NoActiveDocument => "no_active_document",
            Self::UnsupportedFileType => "unsupported_file_type",
            Self::ProcessSpawnFailure => "process_spawn_failure",
            Self::ProcessStderrOutput => "process_stderr_output",
            Self::EmptyOutput => "empty_output",
            Self::MalformedOutput => "malformed_output",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("{}: {message}", .kind.as_str())]
pub struct ProfileError {
    pub kind: ProfileErrorKind,
    pub message: String,
}

impl ProfileError {
    pub fn new(kind: ProfileErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::new(ProfileErrorKind::MalformedOutput, message)
    }
}
