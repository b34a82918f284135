use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::time::Duration;

use looper_contracts::control::ControlSignal;
use tracing::{info, warn};

use crate::params::is_blank;

/// Run-scoped values that control signals may change between iterations.
///
/// Owned by the worker running the loop; other threads only reach it through
/// a [`ControlSender`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunState {
    prompt: Option<String>,
    image_override: Option<PathBuf>,
    paused: bool,
}

impl RunState {
    pub fn new(initial_prompt: impl Into<String>) -> Self {
        Self {
            prompt: Some(initial_prompt.into()),
            image_override: None,
            paused: false,
        }
    }

    /// Returns `false` for a blank prompt or image path, which leave the
    /// current value in place.
    pub fn apply(&mut self, signal: &ControlSignal) -> bool {
        match signal {
            ControlSignal::Pause => self.paused = true,
            ControlSignal::Resume => self.paused = false,
            ControlSignal::SetPrompt(prompt) if prompt.trim().is_empty() => {
                warn!("ignoring blank prompt update");
                return false;
            }
            ControlSignal::SetPrompt(prompt) => self.prompt = Some(prompt.clone()),
            ControlSignal::SetImage(path) if is_blank(path) => {
                warn!("ignoring blank image path");
                return false;
            }
            ControlSignal::SetImage(path) => self.image_override = Some(path.clone()),
        }
        true
    }

    pub fn prompt(&self) -> Option<&str> {
        self.prompt.as_deref()
    }

    pub fn image_override(&self) -> Option<&Path> {
        self.image_override.as_deref()
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Drop everything the run accumulated.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Creates a connected sender/inbox pair. The queue is unbounded.
pub fn control_channel() -> (ControlSender, ControlInbox) {
    let (tx, rx) = mpsc::channel();
    (ControlSender { tx }, ControlInbox { rx })
}

/// Producer half, cloneable and usable from any thread.
#[derive(Debug, Clone)]
pub struct ControlSender {
    tx: Sender<ControlSignal>,
}

impl ControlSender {
    /// Queue a signal without blocking. Returns `false` once the inbox is gone.
    pub fn enqueue(&self, signal: ControlSignal) -> bool {
        self.tx.send(signal).is_ok()
    }
}

/// Consumer half, held by the loop.
#[derive(Debug)]
pub struct ControlInbox {
    rx: Receiver<ControlSignal>,
}

impl ControlInbox {
    /// Apply every queued signal in FIFO order, returning what was applied.
    pub fn drain_nonblocking(&mut self, state: &mut RunState) -> Vec<ControlSignal> {
        let mut applied = Vec::new();
        while let Ok(signal) = self.rx.try_recv() {
            if state.apply(&signal) {
                applied.push(signal);
            }
        }
        applied
    }

    /// Wait in `poll` increments until a resume clears the paused flag.
    ///
    /// Prompt and image updates arriving meanwhile are applied as they come.
    /// When every sender has been dropped nobody can resume the run, so the
    /// pause is lifted.
    pub fn block_while_paused(&mut self, state: &mut RunState, poll: Duration) -> Vec<ControlSignal> {
        let mut applied = Vec::new();
        while state.is_paused() {
            match self.rx.recv_timeout(poll) {
                Ok(signal) => {
                    apply_logged(state, signal, &mut applied);
                    while let Ok(signal) = self.rx.try_recv() {
                        apply_logged(state, signal, &mut applied);
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    warn!("control channel closed while paused; resuming");
                    state.paused = false;
                }
            }
        }
        applied
    }
}

fn apply_logged(state: &mut RunState, signal: ControlSignal, applied: &mut Vec<ControlSignal>) {
    if !state.apply(&signal) {
        return;
    }
    match &signal {
        ControlSignal::SetPrompt(prompt) => info!("Prompt updated while paused: {prompt}"),
        ControlSignal::SetImage(path) => info!("Image updated while paused: {}", path.display()),
        ControlSignal::Pause | ControlSignal::Resume => {}
    }
    applied.push(signal);
}
