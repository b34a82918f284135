use std::ffi::{OsStr, OsString};
use std::io;
use std::path::Path;
use std::process::Command;

use thiserror::Error;

/// An external program invocation, built up front so it can be logged and faked.
///
/// Arguments stay `OsString` so paths reach the process byte for byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<OsString>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    fn raw_flag_value(&self, flag: &str) -> Option<&OsStr> {
        self.args
            .windows(2)
            .find(|pair| pair[0] == flag)
            .map(|pair| pair[1].as_os_str())
    }

    /// Value following `flag`, if present and valid UTF-8.
    pub fn flag_value(&self, flag: &str) -> Option<&str> {
        self.raw_flag_value(flag).and_then(OsStr::to_str)
    }

    /// Value following `flag` as a path, whatever its encoding.
    pub fn flag_path(&self, flag: &str) -> Option<&Path> {
        self.raw_flag_value(flag).map(Path::new)
    }

    pub fn has_flag(&self, flag: &str) -> bool {
        self.args.iter().any(|arg| arg == flag)
    }

    /// Shell-quoted command line for logs.
    pub fn display(&self) -> String {
        shell_words::join(
            std::iter::once(self.program.clone())
                .chain(self.args.iter().map(|arg| arg.to_string_lossy().into_owned())),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub status_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status_code == 0
    }

    /// The tool's own explanation: stderr, or stdout when stderr is empty.
    pub fn diagnostic(&self) -> String {
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            self.stdout.trim().to_string()
        } else {
            stderr.to_string()
        }
    }
}

/// The program could not be started at all.
#[derive(Debug, Error)]
#[error("failed to launch {program}: {source}")]
pub struct LaunchError {
    pub program: String,
    #[source]
    pub source: io::Error,
}

pub trait CommandRunner: Send + Sync {
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, LaunchError>;
}

/// Runs commands synchronously with `std::process`, capturing both streams.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemCommandRunner;

impl CommandRunner for SystemCommandRunner {
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, LaunchError> {
        let mut command = Command::new(&spec.program);
        command.args(&spec.args);
        let output = command.output().map_err(|source| LaunchError {
            program: spec.program.clone(),
            source,
        })?;
        Ok(CommandOutput {
            // Killed by a signal.
            status_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}


#[cfg(test)]
mod tests {
    use super::{CommandOutput, CommandRunner, CommandSpec, SystemCommandRunner};

    #[test]
    fn display_quotes_arguments_with_spaces() {
        let spec = CommandSpec::new("python")
            .arg("inference.py")
            .args(["--prompt", "a red fox"]);
        assert_eq!(spec.display(), "python inference.py --prompt 'a red fox'");
        assert_eq!(spec.flag_value("--prompt"), Some("a red fox"));
        assert!(!spec.has_flag("--seed"));
    }

    #[cfg(unix)]
    #[test]
    fn non_utf8_path_arguments_pass_through_unchanged() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;
        use std::path::Path;

        let dir = Path::new(OsStr::from_bytes(b"/runs/f\xffox"));
        let spec = CommandSpec::new("python").arg("--output_path").arg(dir);
        assert_eq!(spec.flag_path("--output_path"), Some(dir));
        assert_eq!(spec.flag_value("--output_path"), None);
        assert_eq!(spec.args[1].as_bytes(), b"/runs/f\xffox");
    }

    #[test]
    fn diagnostic_prefers_stderr() {
        let output = CommandOutput {
            status_code: 1,
            stdout: "progress 100%\n".to_string(),
            stderr: "  CUDA out of memory\n".to_string(),
        };
        assert_eq!(output.diagnostic(), "CUDA out of memory");

        let quiet = CommandOutput {
            stderr: String::new(),
            ..output
        };
        assert_eq!(quiet.diagnostic(), "progress 100%");
    }

    #[test]
    fn missing_binary_is_a_launch_error() {
        let err = SystemCommandRunner
            .run(&CommandSpec::new("looper-test-binary-that-does-not-exist"))
            .expect_err("spawn should fail");
        assert_eq!(err.program, "looper-test-binary-that-does-not-exist");
        assert_eq!(err.source.kind(), std::io::ErrorKind::NotFound);
    }
}
