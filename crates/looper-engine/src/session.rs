use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};

use looper_contracts::control::ControlSignal;
use thiserror::Error;
use tracing::debug;

use crate::config::ToolConfig;
use crate::control::{control_channel, ControlSender};
use crate::controller::IterationController;
use crate::error::LoopError;
use crate::host::LoopHost;
use crate::params::{is_blank, RunParams};
use crate::status::{RunStatus, StatusCell};

const WORKER_THREAD_NAME: &str = "looper-run";

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("a run is already active")]
    Busy,
    #[error("no run is active")]
    NotRunning,
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("failed to spawn the run worker: {0}")]
    Spawn(#[source] io::Error),
    #[error("the run worker panicked")]
    WorkerPanicked,
    #[error(transparent)]
    Run(#[from] LoopError),
}

/// Caller-facing handle on the loop: starts at most one run at a time on a
/// worker thread and forwards control signals into it.
pub struct LoopSession<H> {
    host: H,
    tools: ToolConfig,
    journal: bool,
    status: StatusCell,
    active: Arc<AtomicBool>,
    sender: Arc<Mutex<Option<ControlSender>>>,
}

impl<H: LoopHost + Clone + 'static> LoopSession<H> {
    pub fn new(host: H, tools: ToolConfig) -> Self {
        Self {
            host,
            tools,
            journal: false,
            status: StatusCell::default(),
            active: Arc::new(AtomicBool::new(false)),
            sender: Arc::new(Mutex::new(None)),
        }
    }

    pub fn with_journal(mut self, enabled: bool) -> Self {
        self.journal = enabled;
        self
    }

    /// Start a run, or fail with [`SessionError::Busy`] if one is active.
    pub fn start(&self, params: RunParams) -> Result<RunHandle, SessionError> {
        if self
            .active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(SessionError::Busy);
        }

        let (sender, mut inbox) = control_channel();
        *lock_slot(&self.sender) = Some(sender);
        self.status.set(RunStatus::Running { iteration: 0 });

        let controller = IterationController::new(self.host.clone(), self.tools.clone())
            .with_status(self.status.clone())
            .with_journal(self.journal);
        let guard = ActiveRun {
            active: self.active.clone(),
            sender: self.sender.clone(),
        };
        let spawned = thread::Builder::new()
            .name(WORKER_THREAD_NAME.to_string())
            .spawn(move || {
                let _guard = guard;
                controller.run(&params, &mut inbox)
            });
        match spawned {
            Ok(handle) => {
                debug!("spawned {WORKER_THREAD_NAME} worker");
                Ok(RunHandle { handle })
            }
            Err(err) => {
                self.status.set(RunStatus::Idle);
                Err(SessionError::Spawn(err))
            }
        }
    }

    pub fn enqueue(&self, signal: ControlSignal) -> Result<(), SessionError> {
        match lock_slot(&self.sender).as_ref() {
            Some(sender) if sender.enqueue(signal) => Ok(()),
            _ => Err(SessionError::NotRunning),
        }
    }

    pub fn pause(&self) -> Result<(), SessionError> {
        self.enqueue(ControlSignal::Pause)
    }

    pub fn resume(&self) -> Result<(), SessionError> {
        self.enqueue(ControlSignal::Resume)
    }

    /// Blank text is rejected rather than queued.
    pub fn set_prompt(&self, prompt: impl Into<String>) -> Result<(), SessionError> {
        let prompt = prompt.into();
        if prompt.trim().is_empty() {
            return Err(SessionError::InvalidArgument("prompt must not be empty".to_string()));
        }
        self.enqueue(ControlSignal::SetPrompt(prompt))
    }

    pub fn set_image(&self, path: impl Into<PathBuf>) -> Result<(), SessionError> {
        let path = path.into();
        if is_blank(&path) {
            return Err(SessionError::InvalidArgument(
                "image path must not be empty".to_string(),
            ));
        }
        self.enqueue(ControlSignal::SetImage(path))
    }

    pub fn status(&self) -> RunStatus {
        self.status.get()
    }

    pub fn is_running(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

/// Join handle for one run.
pub struct RunHandle {
    handle: JoinHandle<Result<Option<PathBuf>, LoopError>>,
}

impl RunHandle {
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the run and return its stitched artifact, if any.
    pub fn join(self) -> Result<Option<PathBuf>, SessionError> {
        match self.handle.join() {
            Ok(result) => result.map_err(SessionError::Run),
            Err(_) => Err(SessionError::WorkerPanicked),
        }
    }
}

/// Marks the session idle again when the worker exits, panics included.
struct ActiveRun {
    active: Arc<AtomicBool>,
    sender: Arc<Mutex<Option<ControlSender>>>,
}

impl Drop for ActiveRun {
    fn drop(&mut self) {
        lock_slot(&self.sender).take();
        self.active.store(false, Ordering::SeqCst);
    }
}

fn lock_slot(slot: &Mutex<Option<ControlSender>>) -> MutexGuard<'_, Option<ControlSender>> {
    slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::mpsc;
    use std::sync::Mutex;
    use std::thread;
    use std::time::{Duration, Instant};

    use super::{LoopSession, SessionError};
    use crate::command::CommandOutput;
    use crate::config::ToolConfig;
    use crate::error::ErrorKind;
    use crate::host::testing::FakeHost;
    use crate::params::RunParams;
    use crate::status::RunStatus;

    fn tools() -> ToolConfig {
        ToolConfig {
            poll_interval: Duration::from_millis(5),
            ..ToolConfig::default()
        }
    }

    fn params(iterations: u32) -> RunParams {
        let mut params = RunParams::new("a red fox");
        params.output_dir = PathBuf::from("/runs/fox");
        params.iterations = iterations;
        params.delay = Duration::ZERO;
        params
    }

    fn wait_until(mut ready: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !ready() {
            assert!(Instant::now() < deadline, "timed out");
            thread::sleep(Duration::from_millis(2));
        }
    }

    #[test]
    fn signals_without_a_run_are_rejected() {
        let session = LoopSession::new(FakeHost::default(), tools());
        assert!(!session.is_running());
        assert_eq!(session.status(), RunStatus::Idle);
        assert!(matches!(session.pause(), Err(SessionError::NotRunning)));
        assert!(matches!(
            session.set_prompt("owl"),
            Err(SessionError::NotRunning)
        ));
    }

    #[test]
    fn blank_prompt_and_image_are_rejected_before_queueing() -> anyhow::Result<()> {
        let (release, gate) = mpsc::channel::<()>();
        let gate = Mutex::new(gate);
        let host = FakeHost::default().on_run(move |_| {
            if let Ok(gate) = gate.lock() {
                let _ = gate.recv();
            }
        });
        let session = LoopSession::new(host.clone(), tools());
        let handle = session.start(params(1))?;

        for blank in ["", "  \t"] {
            assert!(matches!(
                session.set_prompt(blank),
                Err(SessionError::InvalidArgument(_))
            ));
        }
        assert!(matches!(
            session.set_image(" "),
            Err(SessionError::InvalidArgument(_))
        ));
        drop(release);

        assert_eq!(handle.join()?, None);
        let prompts = host
            .commands()
            .iter()
            .map(|spec| spec.flag_value("--prompt").unwrap_or_default().to_string())
            .collect::<Vec<String>>();
        assert_eq!(prompts, vec!["a red fox"]);
        Ok(())
    }

    #[test]
    fn second_start_is_busy_and_signals_reach_the_run() -> anyhow::Result<()> {
        let (entered_tx, entered) = mpsc::channel::<()>();
        let (release, gate) = mpsc::channel::<()>();
        let hook_state = Mutex::new((entered_tx, gate));
        let host = FakeHost::default().on_run(move |_| {
            if let Ok(guard) = hook_state.lock() {
                let _ = guard.0.send(());
                let _ = guard.1.recv();
            }
        });
        let session = LoopSession::new(host.clone(), tools());

        let handle = session.start(params(3))?;
        entered.recv_timeout(Duration::from_secs(5))?;
        assert!(session.is_running());
        assert!(matches!(session.start(params(1)), Err(SessionError::Busy)));

        session.pause()?;
        session.set_prompt("a white owl")?;
        drop(release);
        wait_until(|| session.status() == RunStatus::Paused { iteration: 1 });
        session.resume()?;

        assert_eq!(handle.join()?, None);
        assert!(!session.is_running());
        assert_eq!(session.status(), RunStatus::Completed { artifact: None });
        let prompts = host
            .commands()
            .iter()
            .map(|spec| spec.flag_value("--prompt").unwrap_or_default().to_string())
            .collect::<Vec<String>>();
        assert_eq!(prompts, vec!["a red fox", "a white owl", "a white owl"]);
        assert!(matches!(session.resume(), Err(SessionError::NotRunning)));
        Ok(())
    }

    #[test]
    fn failed_run_reports_through_join_and_status() -> anyhow::Result<()> {
        let host = FakeHost::default().with_reply(Ok(CommandOutput {
            status_code: 1,
            stdout: String::new(),
            stderr: "boom".to_string(),
        }));
        let session = LoopSession::new(host, tools());

        let err = session
            .start(params(2))?
            .join()
            .expect_err("generation failure should surface");
        match err {
            SessionError::Run(err) => assert_eq!(err.kind(), ErrorKind::GenerationFailure),
            other => panic!("unexpected error: {other}"),
        }
        assert!(matches!(
            session.status(),
            RunStatus::Failed {
                kind: ErrorKind::GenerationFailure,
                ..
            }
        ));

        let artifact = session.start(params(1))?.join()?;
        assert_eq!(artifact, None);
        Ok(())
    }
}
