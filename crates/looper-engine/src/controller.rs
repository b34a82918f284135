use std::io;
use std::path::{Path, PathBuf};

use looper_contracts::control::ControlSignal;
use tracing::{debug, error, info, warn};

use crate::config::ToolConfig;
use crate::control::{ControlInbox, RunState};
use crate::error::LoopError;
use crate::generate::{build_generation_command, GenerationRequest};
use crate::host::LoopHost;
use crate::journal::RunJournal;
use crate::params::RunParams;
use crate::status::{RunStatus, StatusCell};

/// File extension of a generated unit, matched case-insensitively.
pub const OUTPUT_UNIT_EXTENSION: &str = "mp4";

pub fn is_output_unit(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.to_string_lossy().eq_ignore_ascii_case(OUTPUT_UNIT_EXTENSION))
}

/// Drives one run: validation, the sequential iteration loop with control
/// checkpoints, and the optional stitching pass.
pub struct IterationController<H> {
    host: H,
    tools: ToolConfig,
    status: StatusCell,
    journal_enabled: bool,
}

impl<H: LoopHost> IterationController<H> {
    pub fn new(host: H, tools: ToolConfig) -> Self {
        Self {
            host,
            tools,
            status: StatusCell::default(),
            journal_enabled: false,
        }
    }

    /// Publish progress into an existing cell instead of a private one.
    pub fn with_status(mut self, status: StatusCell) -> Self {
        self.status = status;
        self
    }

    /// Write `events.jsonl`, `loop.json` and `summary.json` under the output root.
    pub fn with_journal(mut self, enabled: bool) -> Self {
        self.journal_enabled = enabled;
        self
    }

    pub fn status(&self) -> StatusCell {
        self.status.clone()
    }

    /// Run to completion on the calling thread.
    ///
    /// Returns the stitched artifact when stitching was requested and had
    /// something to stitch.
    pub fn run(
        &self,
        params: &RunParams,
        inbox: &mut ControlInbox,
    ) -> Result<Option<PathBuf>, LoopError> {
        if let Err(err) = params.validate() {
            error!("Invalid run parameters: {err}");
            self.status.set(RunStatus::failed(&err));
            return Err(err);
        }

        let mut journal = if self.journal_enabled {
            RunJournal::open(params)
        } else {
            RunJournal::disabled()
        };
        let result = self.run_validated(params, inbox, &mut journal);
        journal.finish(&result);
        match &result {
            Ok(artifact) => {
                match artifact {
                    Some(artifact) => info!("Run completed: {}", artifact.display()),
                    None => info!("Run completed"),
                }
                self.status.set(RunStatus::Completed {
                    artifact: artifact.clone(),
                });
            }
            Err(err) => {
                error!(kind = err.kind().as_str(), "Run failed: {err}");
                self.status.set(RunStatus::failed(err));
            }
        }
        result
    }

    fn run_validated(
        &self,
        params: &RunParams,
        inbox: &mut ControlInbox,
        journal: &mut RunJournal,
    ) -> Result<Option<PathBuf>, LoopError> {
        self.host
            .create_dir_all(&params.output_dir)
            .map_err(|err| {
                LoopError::io(format!("creating {}", params.output_dir.display()), err)
            })?;
        journal.run_started(params);
        info!(
            iterations = params.iterations,
            seed = params.seed,
            "Starting loop in {}",
            params.output_dir.display()
        );

        let mut state = RunState::new(params.initial_prompt.as_str());
        let outcome = self.iterate(params, inbox, &mut state, journal);
        state.reset();
        outcome?;

        if !params.stitch {
            return Ok(None);
        }
        self.aggregate(params, journal)
    }

    fn iterate(
        &self,
        params: &RunParams,
        inbox: &mut ControlInbox,
        state: &mut RunState,
        journal: &mut RunJournal,
    ) -> Result<(), LoopError> {
        for index in 0..params.iterations {
            self.checkpoint(index, inbox, state, journal);
            self.status.set(RunStatus::Running { iteration: index });

            let conditioning = self.conditioning_for(params, index, state, journal)?;
            let request = GenerationRequest {
                prompt: state
                    .prompt()
                    .unwrap_or(params.initial_prompt.as_str())
                    .to_string(),
                conditioning,
                height: params.height,
                width: params.width,
                seed: params.seed_for(index),
                num_frames: params.num_frames,
                pipeline_config: params.pipeline_config.clone(),
                output_dir: params.iteration_dir(index),
            };
            let spec = build_generation_command(&self.tools, &request);
            info!(
                seed = request.seed,
                "Running iteration {}/{}",
                index + 1,
                params.iterations
            );
            info!("Command: {}", spec.display());
            journal.iteration_started(
                index,
                request.seed,
                &request.prompt,
                request.conditioning.as_deref(),
                &request.output_dir,
            );

            let output = match self.host.run_command(&spec) {
                Ok(output) => output,
                Err(err) => {
                    journal.iteration_finished(index, &request.output_dir, false);
                    return Err(err.into());
                }
            };
            if !output.success() {
                journal.iteration_finished(index, &request.output_dir, false);
                return Err(LoopError::GenerationFailure {
                    iteration: index,
                    status_code: output.status_code,
                    diagnostic: output.diagnostic(),
                });
            }
            debug!("generator output: {}", output.stdout.trim());
            journal.iteration_finished(index, &request.output_dir, true);

            if index > 0 {
                self.host.sleep(params.delay);
            }
        }
        Ok(())
    }

    /// Apply pending signals and hold here for as long as the run is paused.
    fn checkpoint(
        &self,
        index: u32,
        inbox: &mut ControlInbox,
        state: &mut RunState,
        journal: &mut RunJournal,
    ) {
        let applied = inbox.drain_nonblocking(state);
        log_signals(&applied);
        journal.signals_applied(&applied);
        if !state.is_paused() {
            return;
        }

        info!("Paused before iteration {}", index + 1);
        self.status.set(RunStatus::Paused { iteration: index });
        journal.paused(index);
        let applied = inbox.block_while_paused(state, self.tools.poll_interval);
        journal.signals_applied(&applied);
        info!("Resumed before iteration {}", index + 1);
        journal.resumed(index);
    }

    fn conditioning_for(
        &self,
        params: &RunParams,
        index: u32,
        state: &RunState,
        journal: &mut RunJournal,
    ) -> Result<Option<PathBuf>, LoopError> {
        let previous = match index.checked_sub(1) {
            Some(previous) => {
                let unit = self.locate_unit(params, previous)?;
                journal.output_unit(previous, &unit);
                Some(unit)
            }
            None => None,
        };

        if let Some(image) = state.image_override() {
            info!("Conditioning on image override: {}", image.display());
            return Ok(Some(image.to_path_buf()));
        }
        match previous {
            Some(unit) => self.host.extract_last_frame(&unit).map(Some),
            None => Ok(params.initial_image.clone()),
        }
    }

    /// The single output unit an iteration left in its directory.
    fn locate_unit(&self, params: &RunParams, index: u32) -> Result<PathBuf, LoopError> {
        let dir = params.iteration_dir(index);
        let entries = match self.host.list_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(LoopError::MissingOutput {
                    iteration: index,
                    dir,
                })
            }
            Err(err) => return Err(LoopError::io(format!("listing {}", dir.display()), err)),
        };
        let mut units = entries
            .into_iter()
            .filter(|entry| is_output_unit(entry))
            .collect::<Vec<PathBuf>>();
        units.sort();
        match units.len() {
            0 => Err(LoopError::MissingOutput {
                iteration: index,
                dir,
            }),
            1 => Ok(units.remove(0)),
            _ => Err(LoopError::AmbiguousOutput {
                iteration: index,
                candidates: units,
            }),
        }
    }

    fn aggregate(
        &self,
        params: &RunParams,
        journal: &mut RunJournal,
    ) -> Result<Option<PathBuf>, LoopError> {
        let mut units = Vec::new();
        for index in 0..params.iterations {
            match self.locate_unit(params, index) {
                Ok(unit) => {
                    journal.output_unit(index, &unit);
                    units.push(unit);
                }
                Err(err) => warn!("Skipping iteration {index} when stitching: {err}"),
            }
        }
        if units.is_empty() {
            warn!("Nothing to stitch");
            journal.aggregation_completed(None);
            return Ok(None);
        }

        info!(units = units.len(), "Stitching outputs");
        journal.aggregation_started(&units);
        let artifact = self
            .host
            .stitch(&units, &params.output_dir, params.stitched_filename.trim())
            .map_err(|err| LoopError::AggregationFailure(Box::new(err)))?;
        journal.aggregation_completed(Some(&artifact));
        Ok(Some(artifact))
    }
}

fn log_signals(applied: &[ControlSignal]) {
    for signal in applied {
        match signal {
            ControlSignal::SetPrompt(prompt) => info!("Prompt updated: {prompt}"),
            ControlSignal::SetImage(path) => info!("Image updated: {}", path.display()),
            ControlSignal::Pause | ControlSignal::Resume => debug!("applied {}", signal.label()),
        }
    }
}
