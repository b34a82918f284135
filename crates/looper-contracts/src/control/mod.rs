mod command_registry;
mod parser;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

pub use command_registry::CONTROL_HELP_COMMANDS;
pub use parser::{parse_control_line, ControlCommand};

/// A signal sent by an external controller into a running loop.
///
/// Signals are consumed in the order they were sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "signal", content = "value", rename_all = "snake_case")]
pub enum ControlSignal {
    Pause,
    Resume,
    SetPrompt(String),
    SetImage(PathBuf),
}

impl ControlSignal {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Pause => "pause",
            Self::Resume => "resume",
            Self::SetPrompt(_) => "set_prompt",
            Self::SetImage(_) => "set_image",
        }
    }
}
