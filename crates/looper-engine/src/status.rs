use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;

use crate::error::{ErrorKind, LoopError};

/// What an observer sees of the current (or last) run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RunStatus {
    #[default]
    Idle,
    Running { iteration: u32 },
    Paused { iteration: u32 },
    Completed { artifact: Option<PathBuf> },
    Failed { kind: ErrorKind, message: String },
}

impl RunStatus {
    pub fn failed(err: &LoopError) -> Self {
        Self::Failed {
            kind: err.kind(),
            message: err.to_string(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed { .. } | Self::Failed { .. })
    }

    pub fn label(&self) -> String {
        match self {
            Self::Idle => "idle".to_string(),
            Self::Running { iteration } => format!("running iteration {iteration}"),
            Self::Paused { iteration } => format!("paused before iteration {iteration}"),
            Self::Completed { artifact: Some(artifact) } => {
                format!("completed: {}", artifact.display())
            }
            Self::Completed { artifact: None } => "completed".to_string(),
            Self::Failed { kind, message } => format!("failed ({}): {message}", kind.as_str()),
        }
    }
}

/// Shared status slot. The worker writes, anyone holding a clone reads.
#[derive(Debug, Clone, Default)]
pub struct StatusCell {
    inner: Arc<Mutex<RunStatus>>,
}

impl StatusCell {
    pub fn get(&self) -> RunStatus {
        self.lock().clone()
    }

    pub fn set(&self, status: RunStatus) {
        *self.lock() = status;
    }

    fn lock(&self) -> MutexGuard<'_, RunStatus> {
        // A status value is always whole, so a poisoned lock is still readable.
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
