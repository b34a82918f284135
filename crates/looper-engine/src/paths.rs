use std::io;
use std::path::{Path, PathBuf};

/// Join relative paths onto the working directory without touching the file.
pub(crate) fn absolutize(path: &Path) -> io::Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}
