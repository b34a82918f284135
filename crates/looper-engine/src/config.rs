use std::env;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_PYTHON: &str = "python";
pub const DEFAULT_INFERENCE_SCRIPT: &str = "inference.py";
pub const DEFAULT_FFMPEG: &str = "ffmpeg";
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Where the external tools live and how often a paused run re-polls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolConfig {
    pub python: String,
    pub inference_script: PathBuf,
    pub ffmpeg: String,
    pub poll_interval: Duration,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            python: DEFAULT_PYTHON.to_string(),
            inference_script: PathBuf::from(DEFAULT_INFERENCE_SCRIPT),
            ffmpeg: DEFAULT_FFMPEG.to_string(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl ToolConfig {
    /// Defaults overridden by `LOOPER_PYTHON`, `LOOPER_INFERENCE_SCRIPT`,
    /// `LOOPER_FFMPEG` and `LOOPER_POLL_INTERVAL_MS`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let mut config = Self::default();
        if let Some(python) = non_empty("LOOPER_PYTHON") {
            config.python = python;
        }
        if let Some(script) = non_empty("LOOPER_INFERENCE_SCRIPT") {
            config.inference_script = PathBuf::from(script);
        }
        if let Some(ffmpeg) = non_empty("LOOPER_FFMPEG") {
            config.ffmpeg = ffmpeg;
        }
        if let Some(ms) = non_empty("LOOPER_POLL_INTERVAL_MS").and_then(|raw| raw.parse::<u64>().ok())
        {
            config.poll_interval = Duration::from_millis(ms.max(1));
        }
        config
    }
}
