//! Iterative generation loop: each iteration runs an external generator
//! conditioned on the previous iteration's last frame, with pause/resume and
//! live prompt or image updates from another thread, and an optional final
//! stitching pass.

pub mod command;
pub mod config;
pub mod control;
pub mod controller;
pub mod error;
pub mod extract;
pub mod generate;
pub mod host;
mod journal;
pub mod params;
mod paths;
pub mod session;
pub mod status;
pub mod stitch;

pub use command::{CommandOutput, CommandRunner, CommandSpec, LaunchError, SystemCommandRunner};
pub use config::ToolConfig;
pub use control::{control_channel, ControlInbox, ControlSender, RunState};
pub use controller::IterationController;
pub use error::{ErrorKind, LoopError};
pub use extract::FrameExtractor;
pub use host::{LoopHost, SystemHost};
pub use journal::{EVENTS_FILE, MANIFEST_FILE, SUMMARY_FILE};
pub use params::RunParams;
pub use session::{LoopSession, RunHandle, SessionError};
pub use status::{RunStatus, StatusCell};
pub use stitch::Stitcher;
