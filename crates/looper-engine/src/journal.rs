use std::path::{Path, PathBuf};

use looper_contracts::control::ControlSignal;
use looper_contracts::events::{EventWriter, LoopEvent};
use looper_contracts::runs::manifest::{IterationStatus, LoopManifest};
use looper_contracts::runs::summary::{now_utc_iso, write_summary, RunSummary};
use serde_json::{Map, Value};
use tracing::warn;

use crate::error::LoopError;
use crate::params::RunParams;

pub const EVENTS_FILE: &str = "events.jsonl";
pub const MANIFEST_FILE: &str = "loop.json";
pub const SUMMARY_FILE: &str = "summary.json";

/// Machine-readable record of one run under its output root.
///
/// Writes are best effort: a failure is logged and the run carries on.
pub(crate) struct RunJournal {
    inner: Option<Journal>,
}

struct Journal {
    events: EventWriter,
    manifest: LoopManifest,
    summary_path: PathBuf,
    started_at: String,
    iterations_planned: u32,
}

impl RunJournal {
    pub(crate) fn disabled() -> Self {
        Self { inner: None }
    }

    pub(crate) fn open(params: &RunParams) -> Self {
        let base = params.output_dir.as_path();
        let manifest = LoopManifest::new(base.join(MANIFEST_FILE), params.seed, params.iterations);
        let events = EventWriter::new(base.join(EVENTS_FILE), manifest.run_id.clone());
        Self {
            inner: Some(Journal {
                events,
                manifest,
                summary_path: base.join(SUMMARY_FILE),
                started_at: now_utc_iso(),
                iterations_planned: params.iterations,
            }),
        }
    }

    pub(crate) fn run_started(&mut self, params: &RunParams) {
        self.emit(LoopEvent::RunStarted {
            out_dir: display(&params.output_dir),
            iterations: params.iterations,
            base_seed: params.seed,
        });
        self.save_manifest();
    }

    pub(crate) fn paused(&mut self, before_iteration: u32) {
        self.emit(LoopEvent::Paused { before_iteration });
    }

    pub(crate) fn resumed(&mut self, before_iteration: u32) {
        self.emit(LoopEvent::Resumed { before_iteration });
    }

    pub(crate) fn signals_applied(&mut self, signals: &[ControlSignal]) {
        for signal in signals {
            match signal {
                ControlSignal::SetPrompt(prompt) => self.emit(LoopEvent::PromptUpdated {
                    prompt: prompt.clone(),
                }),
                ControlSignal::SetImage(path) => self.emit(LoopEvent::ImageUpdated {
                    path: display(path),
                }),
                ControlSignal::Pause | ControlSignal::Resume => {}
            }
        }
    }

    pub(crate) fn iteration_started(
        &mut self,
        index: u32,
        seed: i64,
        prompt: &str,
        conditioning: Option<&Path>,
        output_dir: &Path,
    ) {
        self.emit(LoopEvent::IterationStarted {
            index,
            seed,
            prompt: prompt.to_string(),
            conditioning: conditioning.map(display),
        });
        if let Some(journal) = self.inner.as_mut() {
            journal
                .manifest
                .begin_iteration(index, seed, prompt, conditioning, output_dir);
        }
        self.save_manifest();
    }

    pub(crate) fn iteration_finished(&mut self, index: u32, output_dir: &Path, ok: bool) {
        if ok {
            self.emit(LoopEvent::IterationCompleted {
                index,
                output_dir: display(output_dir),
            });
        }
        let status = if ok {
            IterationStatus::Completed
        } else {
            IterationStatus::Failed
        };
        if let Some(journal) = self.inner.as_mut() {
            journal.manifest.finish_iteration(index, status);
        }
        self.save_manifest();
    }

    pub(crate) fn output_unit(&mut self, index: u32, unit: &Path) {
        if let Some(journal) = self.inner.as_mut() {
            journal.manifest.set_output_unit(index, unit);
        }
        self.save_manifest();
    }

    pub(crate) fn aggregation_started(&mut self, inputs: &[PathBuf]) {
        self.emit(LoopEvent::AggregationStarted {
            inputs: inputs.iter().map(|path| display(path)).collect(),
        });
    }

    pub(crate) fn aggregation_completed(&mut self, artifact: Option<&Path>) {
        self.emit(LoopEvent::AggregationCompleted {
            artifact: artifact.map(display),
        });
        if let Some(journal) = self.inner.as_mut() {
            journal.manifest.set_aggregated_artifact(artifact);
        }
        self.save_manifest();
    }

    /// Terminal event plus `summary.json`.
    pub(crate) fn finish(&mut self, result: &Result<Option<PathBuf>, LoopError>) {
        match result {
            Ok(artifact) => self.emit(LoopEvent::RunFinished {
                artifact: artifact.as_deref().map(display),
            }),
            Err(err) => self.emit(LoopEvent::RunFailed {
                kind: err.kind().as_str().to_string(),
                message: err.to_string(),
            }),
        }
        let Some(journal) = self.inner.as_ref() else {
            return;
        };
        let summary = RunSummary {
            run_id: journal.manifest.run_id.clone(),
            started_at: journal.started_at.clone(),
            finished_at: now_utc_iso(),
            iterations_planned: journal.iterations_planned,
            iterations_completed: journal.manifest.completed_iterations(),
            aggregated_artifact: result
                .as_ref()
                .ok()
                .and_then(|artifact| artifact.as_deref())
                .map(display),
            outcome: if result.is_ok() { "completed" } else { "failed" }.to_string(),
            error: result.as_ref().err().map(ToString::to_string),
        };
        let mut extra = Map::new();
        if let Err(err) = result {
            extra.insert(
                "error_kind".to_string(),
                Value::String(err.kind().as_str().to_string()),
            );
        }
        if let Err(err) = write_summary(&journal.summary_path, &summary, Some(&extra)) {
            warn!("could not write run summary: {err:#}");
        }
    }

    fn emit(&self, event: LoopEvent) {
        if let Some(journal) = self.inner.as_ref() {
            if let Err(err) = journal.events.emit(&event) {
                warn!("could not record {} event: {err:#}", event.event_type());
            }
        }
    }

    fn save_manifest(&self) {
        if let Some(journal) = self.inner.as_ref() {
            if let Err(err) = journal.manifest.save() {
                warn!("could not save loop manifest: {err:#}");
            }
        }
    }
}

fn display(path: &Path) -> String {
    path.to_string_lossy().to_string()
}
