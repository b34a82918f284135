use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::command::LaunchError;

#[derive(Debug, Error)]
pub enum LoopError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("{what} not found: {}", join_paths(.paths))]
    NotFound {
        what: &'static str,
        paths: Vec<PathBuf>,
    },
    #[error("{tool} failed with exit code {status_code}: {diagnostic}")]
    ExternalToolFailure {
        tool: String,
        status_code: i32,
        diagnostic: String,
    },
    #[error("could not launch {program}: {source}")]
    ToolUnavailable {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("generation failed at iteration {iteration} (exit code {status_code}): {diagnostic}")]
    GenerationFailure {
        iteration: u32,
        status_code: i32,
        diagnostic: String,
    },
    #[error("iteration {iteration} produced no output unit in {}", .dir.display())]
    MissingOutput { iteration: u32, dir: PathBuf },
    #[error("iteration {iteration} produced {} output units: {}", .candidates.len(), join_paths(.candidates))]
    AmbiguousOutput {
        iteration: u32,
        candidates: Vec<PathBuf>,
    },
    #[error("aggregation failed: {0}")]
    AggregationFailure(#[source] Box<LoopError>),
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },
}

/// Coarse error class exposed through run status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidArgument,
    NotFound,
    ExternalToolFailure,
    ToolUnavailable,
    GenerationFailure,
    MissingOutput,
    AmbiguousOutput,
    AggregationFailure,
    Io,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidArgument => "invalid_argument",
            Self::NotFound => "not_found",
            Self::ExternalToolFailure => "external_tool_failure",
            Self::ToolUnavailable => "tool_unavailable",
            Self::GenerationFailure => "generation_failure",
            Self::MissingOutput => "missing_output",
            Self::AmbiguousOutput => "ambiguous_output",
            Self::AggregationFailure => "aggregation_failure",
            Self::Io => "io",
        }
    }
}

impl LoopError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::ExternalToolFailure { .. } => ErrorKind::ExternalToolFailure,
            Self::ToolUnavailable { .. } => ErrorKind::ToolUnavailable,
            Self::GenerationFailure { .. } => ErrorKind::GenerationFailure,
            Self::MissingOutput { .. } => ErrorKind::MissingOutput,
            Self::AmbiguousOutput { .. } => ErrorKind::AmbiguousOutput,
            Self::AggregationFailure(_) => ErrorKind::AggregationFailure,
            Self::Io { .. } => ErrorKind::Io,
        }
    }

    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    pub(crate) fn not_found(what: &'static str, path: &Path) -> Self {
        Self::NotFound {
            what,
            paths: vec![path.to_path_buf()],
        }
    }

    pub(crate) fn io(context: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }
}

impl From<LaunchError> for LoopError {
    fn from(err: LaunchError) -> Self {
        Self::ToolUnavailable {
            program: err.program,
            source: err.source,
        }
    }
}

fn join_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|path| path.display().to_string())
        .collect::<Vec<String>>()
        .join(", ")
}
