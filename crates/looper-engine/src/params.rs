use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::LoopError;
use crate::stitch::DEFAULT_STITCHED_FILENAME;

pub const DEFAULT_OUTPUT_DIR: &str = "outputs/looped_video_001";
pub const DEFAULT_ITERATIONS: u32 = 10;
pub const DEFAULT_SEED: i64 = 1337;
pub const DEFAULT_HEIGHT: u32 = 512;
pub const DEFAULT_WIDTH: u32 = 768;
pub const DEFAULT_NUM_FRAMES: u32 = 60;
pub const DEFAULT_PIPELINE_CONFIG: &str = "configs/ltxv-13b-0.9.7-distilled.yaml";
pub const DEFAULT_DELAY: Duration = Duration::from_secs(1);

/// Immutable inputs of one loop run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunParams {
    pub initial_prompt: String,
    pub seed: i64,
    /// Conditioning input for iteration 0.
    pub initial_image: Option<PathBuf>,
    pub output_dir: PathBuf,
    pub iterations: u32,
    pub height: u32,
    pub width: u32,
    pub pipeline_config: PathBuf,
    /// Frames per generated unit.
    pub num_frames: u32,
    pub delay: Duration,
    pub stitch: bool,
    pub stitched_filename: String,
}

impl RunParams {
    pub fn new(initial_prompt: impl Into<String>) -> Self {
        Self {
            initial_prompt: initial_prompt.into(),
            seed: DEFAULT_SEED,
            initial_image: None,
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            iterations: DEFAULT_ITERATIONS,
            height: DEFAULT_HEIGHT,
            width: DEFAULT_WIDTH,
            pipeline_config: PathBuf::from(DEFAULT_PIPELINE_CONFIG),
            num_frames: DEFAULT_NUM_FRAMES,
            delay: DEFAULT_DELAY,
            stitch: false,
            stitched_filename: DEFAULT_STITCHED_FILENAME.to_string(),
        }
    }

    /// Check every field without touching the filesystem beyond existence checks.
    pub fn validate(&self) -> Result<(), LoopError> {
        if self.initial_prompt.trim().is_empty() {
            return Err(LoopError::invalid("initial prompt must not be empty"));
        }
        if self.iterations == 0 {
            return Err(LoopError::invalid("iteration count must be at least 1"));
        }
        if self.height == 0 || self.width == 0 {
            return Err(LoopError::invalid(format!(
                "frame dimensions must be positive, got {}x{}",
                self.width, self.height
            )));
        }
        if self.num_frames == 0 {
            return Err(LoopError::invalid("frames per iteration must be positive"));
        }
        if is_blank(&self.output_dir) {
            return Err(LoopError::invalid("output directory must not be empty"));
        }
        if is_blank(&self.pipeline_config) {
            return Err(LoopError::invalid("pipeline config path must not be empty"));
        }
        if self
            .seed
            .checked_add(i64::from(self.iterations - 1))
            .is_none()
        {
            return Err(LoopError::invalid(format!(
                "seed {} overflows over {} iterations",
                self.seed, self.iterations
            )));
        }
        if self.stitch {
            let filename = self.stitched_filename.trim();
            if filename.is_empty() {
                return Err(LoopError::invalid("stitched output filename must not be empty"));
            }
            if filename.contains('/') || filename.contains('\\') {
                return Err(LoopError::invalid(format!(
                    "stitched output filename must be a bare file name, got {filename:?}"
                )));
            }
        }
        if let Some(image) = &self.initial_image {
            if is_blank(image) {
                return Err(LoopError::invalid("initial image path must not be empty"));
            }
            if !image.is_file() {
                return Err(LoopError::not_found("initial image", image));
            }
        }
        Ok(())
    }

    pub fn seed_for(&self, iteration: u32) -> i64 {
        self.seed + i64::from(iteration)
    }

    pub fn iteration_dir(&self, iteration: u32) -> PathBuf {
        iteration_dir(&self.output_dir, iteration)
    }
}

/// `base/frame_{i:03}`.
pub fn iteration_dir(base: &Path, iteration: u32) -> PathBuf {
    base.join(format!("frame_{iteration:03}"))
}

pub(crate) fn is_blank(path: &Path) -> bool {
    path.as_os_str().to_string_lossy().trim().is_empty()
}
