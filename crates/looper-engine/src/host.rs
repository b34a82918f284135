use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use crate::command::{CommandOutput, CommandRunner, CommandSpec, LaunchError, SystemCommandRunner};
use crate::config::ToolConfig;
use crate::error::LoopError;
use crate::extract::FrameExtractor;
use crate::stitch::Stitcher;

/// Every side effect the iteration loop performs, behind one seam so a run can
/// be replayed against a recording fake.
pub trait LoopHost: Send {
    fn run_command(&self, spec: &CommandSpec) -> Result<CommandOutput, LaunchError>;

    fn sleep(&self, duration: Duration);

    /// Entries of `dir`, in no particular order. A path that is missing or is
    /// not a directory reports `NotFound`.
    fn list_dir(&self, dir: &Path) -> io::Result<Vec<PathBuf>>;

    fn create_dir_all(&self, dir: &Path) -> io::Result<()>;

    fn extract_last_frame(&self, unit: &Path) -> Result<PathBuf, LoopError>;

    fn stitch(&self, units: &[PathBuf], out_dir: &Path, filename: &str) -> Result<PathBuf, LoopError>;
}

/// The real thing: subprocesses, the filesystem and the wall clock.
#[derive(Debug, Clone)]
pub struct SystemHost {
    runner: SystemCommandRunner,
    extractor: FrameExtractor<SystemCommandRunner>,
    stitcher: Stitcher<SystemCommandRunner>,
}

impl SystemHost {
    pub fn new(tools: &ToolConfig) -> Self {
        Self {
            runner: SystemCommandRunner,
            extractor: FrameExtractor::new(SystemCommandRunner, tools.ffmpeg.as_str()),
            stitcher: Stitcher::new(SystemCommandRunner, tools.ffmpeg.as_str()),
        }
    }
}

impl LoopHost for SystemHost {
    fn run_command(&self, spec: &CommandSpec) -> Result<CommandOutput, LaunchError> {
        self.runner.run(spec)
    }

    fn sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }

    fn list_dir(&self, dir: &Path) -> io::Result<Vec<PathBuf>> {
        if dir.exists() && !dir.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} is not a directory", dir.display()),
            ));
        }
        fs::read_dir(dir)?
            .map(|entry| entry.map(|entry| entry.path()))
            .collect()
    }

    fn create_dir_all(&self, dir: &Path) -> io::Result<()> {
        fs::create_dir_all(dir)
    }

    fn extract_last_frame(&self, unit: &Path) -> Result<PathBuf, LoopError> {
        self.extractor.extract_last_frame(unit)
    }

    fn stitch(&self, units: &[PathBuf], out_dir: &Path, filename: &str) -> Result<PathBuf, LoopError> {
        self.stitcher.stitch(units, out_dir, filename)
    }
}
