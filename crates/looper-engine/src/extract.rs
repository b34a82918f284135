use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use tracing::{debug, error, info};

use crate::command::{CommandRunner, CommandSpec};
use crate::error::LoopError;
use crate::params::is_blank;
use crate::paths::absolutize;

pub const LAST_FRAME_SUFFIX: &str = "_last_frame";

/// `<dir>/<stem>_last_frame.png` next to the unit.
pub fn derived_frame_path(unit: &Path) -> PathBuf {
    let mut name = unit.file_stem().map(OsStr::to_os_string).unwrap_or_default();
    name.push(LAST_FRAME_SUFFIX);
    name.push(".png");
    unit.with_file_name(name)
}

/// Pulls the final still out of a generated unit so it can condition the next one.
#[derive(Debug, Clone)]
pub struct FrameExtractor<R> {
    runner: R,
    ffmpeg: String,
}

impl<R: CommandRunner> FrameExtractor<R> {
    pub fn new(runner: R, ffmpeg: impl Into<String>) -> Self {
        Self {
            runner,
            ffmpeg: ffmpeg.into(),
        }
    }

    pub fn build_command(&self, unit: &Path, frame: &Path) -> CommandSpec {
        CommandSpec::new(self.ffmpeg.as_str())
            .args(["-sseof", "-1", "-i"])
            .arg(unit)
            .args(["-frames:v", "1", "-update", "1", "-f", "image2", "-y"])
            .arg(frame)
    }

    pub fn extract_last_frame(&self, unit: &Path) -> Result<PathBuf, LoopError> {
        if is_blank(unit) {
            return Err(LoopError::invalid("video path cannot be empty"));
        }
        let unit = match unit.to_str() {
            Some(text) => PathBuf::from(text.trim()),
            None => unit.to_path_buf(),
        };
        let unit = absolutize(&unit)
            .map_err(|err| LoopError::io("resolving video path", err))?;
        if !unit.is_file() {
            return Err(LoopError::not_found("video file", &unit));
        }

        let frame = derived_frame_path(&unit);
        info!("Extracting last frame from: {}", unit.display());
        let spec = self.build_command(&unit, &frame);
        let output = self.runner.run(&spec)?;
        if !output.success() {
            error!(
                status_code = output.status_code,
                "ffmpeg failed to extract the last frame: {}",
                output.diagnostic()
            );
            return Err(LoopError::ExternalToolFailure {
                tool: self.ffmpeg.clone(),
                status_code: output.status_code,
                diagnostic: output.diagnostic(),
            });
        }
        debug!("ffmpeg output: {}", output.stdout.trim());
        Ok(frame)
    }
}

#[cfg(test)]
mod tests {
    use std::ffi::OsString;
    use std::io;
    use std::path::{Path, PathBuf};

    use super::{derived_frame_path, FrameExtractor};
    use crate::command::testing::FakeRunner;
    use crate::command::{CommandOutput, LaunchError};
    use crate::error::ErrorKind;

    #[test]
    fn derived_path_swaps_suffix_in_same_directory() {
        assert_eq!(
            derived_frame_path(Path::new("/path/to/video.mp4")),
            PathBuf::from("/path/to/video_last_frame.png")
        );
        assert_eq!(
            derived_frame_path(Path::new("/complex/path.with.dots/file.mp4")),
            PathBuf::from("/complex/path.with.dots/file_last_frame.png")
        );
    }

    #[cfg(unix)]
    #[test]
    fn derived_path_keeps_non_utf8_bytes() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let unit = Path::new(OsStr::from_bytes(b"/runs/f\xffox/frame_000/out.mp4"));
        assert_eq!(
            derived_frame_path(unit),
            Path::new(OsStr::from_bytes(b"/runs/f\xffox/frame_000/out_last_frame.png"))
        );
    }

    #[test]
    fn blank_path_is_invalid() {
        let extractor = FrameExtractor::new(FakeRunner::default(), "ffmpeg");
        for blank in ["", "   "] {
            let err = extractor
                .extract_last_frame(Path::new(blank))
                .expect_err("blank path should fail");
            assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        }
    }

    #[test]
    fn missing_file_is_not_found_and_runs_nothing() {
        let runner = FakeRunner::default();
        let extractor = FrameExtractor::new(runner.clone(), "ffmpeg");
        let err = extractor
            .extract_last_frame(Path::new("/nonexistent/path.mp4"))
            .expect_err("missing file should fail");
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(err.to_string().contains("/nonexistent/path.mp4"));
        assert!(runner.seen().is_empty());
    }

    #[test]
    fn builds_exact_ffmpeg_command() -> anyhow::Result<()> {
        let tmp = tempfile::tempdir()?;
        let video = tmp.path().join("video.mp4");
        std::fs::write(&video, b"dummy video content")?;
        let runner = FakeRunner::default();
        let extractor = FrameExtractor::new(runner.clone(), "ffmpeg");

        let frame = extractor.extract_last_frame(&video)?;
        let expected_png = tmp.path().join("video_last_frame.png");
        assert_eq!(frame, expected_png);

        let seen = runner.seen();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].program, "ffmpeg");
        let expected: Vec<OsString> = vec![
            "-sseof".into(),
            "-1".into(),
            "-i".into(),
            video.into_os_string(),
            "-frames:v".into(),
            "1".into(),
            "-update".into(),
            "1".into(),
            "-f".into(),
            "image2".into(),
            "-y".into(),
            expected_png.into_os_string(),
        ];
        assert_eq!(seen[0].args, expected);
        Ok(())
    }

    #[test]
    fn non_zero_exit_carries_diagnostic() -> anyhow::Result<()> {
        let tmp = tempfile::tempdir()?;
        let video = tmp.path().join("clip.mp4");
        std::fs::write(&video, b"x")?;
        let runner = FakeRunner::with_reply(Ok(CommandOutput {
            status_code: 1,
            stdout: String::new(),
            stderr: "moov atom not found".to_string(),
        }));
        let err = FrameExtractor::new(runner, "ffmpeg")
            .extract_last_frame(&video)
            .expect_err("non-zero exit should fail");
        assert_eq!(err.kind(), ErrorKind::ExternalToolFailure);
        assert!(err.to_string().contains("moov atom not found"));
        Ok(())
    }

    #[test]
    fn unlaunchable_tool_is_reported_distinctly() -> anyhow::Result<()> {
        let tmp = tempfile::tempdir()?;
        let video = tmp.path().join("clip.mp4");
        std::fs::write(&video, b"x")?;
        let runner = FakeRunner::with_reply(Err(LaunchError {
            program: "ffmpeg".to_string(),
            source: io::Error::new(io::ErrorKind::NotFound, "ffmpeg not found"),
        }));
        let err = FrameExtractor::new(runner, "ffmpeg")
            .extract_last_frame(&video)
            .expect_err("launch failure should fail");
        assert_eq!(err.kind(), ErrorKind::ToolUnavailable);
        Ok(())
    }
}
