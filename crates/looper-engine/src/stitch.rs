use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::command::{CommandRunner, CommandSpec};
use crate::error::LoopError;
use crate::params::is_blank;
use crate::paths::absolutize;

pub const CONCAT_MANIFEST_NAME: &str = "concat_list.txt";
pub const DEFAULT_STITCHED_FILENAME: &str = "final_stitched_video.mp4";

/// Concatenates generated units, in order, into one artifact without re-encoding.
#[derive(Debug, Clone)]
pub struct Stitcher<R> {
    runner: R,
    ffmpeg: String,
}

impl<R: CommandRunner> Stitcher<R> {
    pub fn new(runner: R, ffmpeg: impl Into<String>) -> Self {
        Self {
            runner,
            ffmpeg: ffmpeg.into(),
        }
    }

    pub fn build_command(&self, manifest: &Path, output: &Path) -> CommandSpec {
        CommandSpec::new(self.ffmpeg.as_str())
            .args(["-f", "concat", "-safe", "0", "-i"])
            .arg(manifest)
            .args(["-c", "copy", "-y"])
            .arg(output)
    }

    pub fn stitch(
        &self,
        units: &[PathBuf],
        out_dir: &Path,
        filename: &str,
    ) -> Result<PathBuf, LoopError> {
        if units.is_empty() {
            return Err(LoopError::invalid("no video paths provided for stitching"));
        }
        if is_blank(out_dir) {
            return Err(LoopError::invalid("output directory must not be empty"));
        }
        let filename = filename.trim();
        if filename.is_empty() {
            return Err(LoopError::invalid("output filename must not be empty"));
        }

        let missing = units
            .iter()
            .filter(|unit| !unit.is_file())
            .cloned()
            .collect::<Vec<PathBuf>>();
        if !missing.is_empty() {
            return Err(LoopError::NotFound {
                what: "video to stitch",
                paths: missing,
            });
        }
        let mut lines = Vec::with_capacity(units.len());
        for unit in units {
            let absolute = fs::canonicalize(unit).map_err(|err| {
                LoopError::io(format!("resolving {}", unit.display()), err)
            })?;
            lines.push(manifest_line(&absolute)?);
        }

        let out_dir = absolutize(out_dir).map_err(|err| LoopError::io("resolving output dir", err))?;
        fs::create_dir_all(&out_dir)
            .map_err(|err| LoopError::io(format!("creating {}", out_dir.display()), err))?;
        let output = out_dir.join(filename);

        let manifest = ManifestGuard::write(out_dir.join(CONCAT_MANIFEST_NAME), &lines)
            .map_err(|err| LoopError::io("writing concat manifest", err))?;
        info!(
            inputs = lines.len(),
            "Stitching videos into {}",
            output.display()
        );
        let spec = self.build_command(manifest.path(), &output);
        let result = self.runner.run(&spec)?;
        if !result.success() {
            return Err(LoopError::ExternalToolFailure {
                tool: self.ffmpeg.clone(),
                status_code: result.status_code,
                diagnostic: result.diagnostic(),
            });
        }
        debug!("ffmpeg output: {}", result.stdout.trim());
        Ok(output)
    }
}

/// `file '<path>'`, with embedded single quotes escaped for the concat demuxer.
///
/// The manifest is text, so a path that is not valid UTF-8 cannot be listed in it.
pub fn manifest_line(path: &Path) -> Result<String, LoopError> {
    let text = path.to_str().ok_or_else(|| {
        LoopError::invalid(format!(
            "cannot list non UTF-8 path in concat manifest: {}",
            path.display()
        ))
    })?;
    let escaped = text.replace('\'', "'\\''");
    Ok(format!("file '{escaped}'\n"))
}

/// Owns the temporary concat manifest and removes it when dropped.
struct ManifestGuard {
    path: PathBuf,
}

impl ManifestGuard {
    fn write(path: PathBuf, lines: &[String]) -> io::Result<Self> {
        let guard = Self { path };
        let mut file = fs::File::create(&guard.path)?;
        for line in lines {
            file.write_all(line.as_bytes())?;
        }
        file.flush()?;
        Ok(guard)
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ManifestGuard {
    fn drop(&mut self) {
        match fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => warn!(
                "could not remove concat manifest {}: {err}",
                self.path.display()
            ),
        }
    }
}
