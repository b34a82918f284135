use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::runs::summary::now_utc_iso;

/// Lifecycle events of one loop run, one JSON object per line in `events.jsonl`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LoopEvent {
    RunStarted {
        out_dir: String,
        iterations: u32,
        base_seed: i64,
    },
    IterationStarted {
        index: u32,
        seed: i64,
        prompt: String,
        conditioning: Option<String>,
    },
    IterationCompleted {
        index: u32,
        output_dir: String,
    },
    Paused {
        before_iteration: u32,
    },
    Resumed {
        before_iteration: u32,
    },
    PromptUpdated {
        prompt: String,
    },
    ImageUpdated {
        path: String,
    },
    AggregationStarted {
        inputs: Vec<String>,
    },
    AggregationCompleted {
        artifact: Option<String>,
    },
    RunFailed {
        kind: String,
        message: String,
    },
    RunFinished {
        artifact: Option<String>,
    },
}

impl LoopEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::RunStarted { .. } => "run_started",
            Self::IterationStarted { .. } => "iteration_started",
            Self::IterationCompleted { .. } => "iteration_completed",
            Self::Paused { .. } => "paused",
            Self::Resumed { .. } => "resumed",
            Self::PromptUpdated { .. } => "prompt_updated",
            Self::ImageUpdated { .. } => "image_updated",
            Self::AggregationStarted { .. } => "aggregation_started",
            Self::AggregationCompleted { .. } => "aggregation_completed",
            Self::RunFailed { .. } => "run_failed",
            Self::RunFinished { .. } => "run_finished",
        }
    }
}

/// Append-only writer for `events.jsonl`.
///
/// Every line carries `type`, `run_id` and `ts`, followed by the event's own
/// fields. Clones share one lock so lines from different threads never interleave.
#[derive(Debug, Clone)]
pub struct EventWriter {
    inner: Arc<EventWriterInner>,
}

#[derive(Debug)]
struct EventWriterInner {
    path: PathBuf,
    run_id: String,
    lock: Mutex<()>,
}

impl EventWriter {
    pub fn new(path: impl Into<PathBuf>, run_id: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(EventWriterInner {
                path: path.into(),
                run_id: run_id.into(),
                lock: Mutex::new(()),
            }),
        }
    }

    pub fn emit(&self, event: &LoopEvent) -> anyhow::Result<Value> {
        let mut line_payload = Map::new();
        line_payload.insert(
            "type".to_string(),
            Value::String(event.event_type().to_string()),
        );
        line_payload.insert(
            "run_id".to_string(),
            Value::String(self.inner.run_id.clone()),
        );
        line_payload.insert("ts".to_string(), Value::String(now_utc_iso()));
        if let Value::Object(fields) = serde_json::to_value(event)? {
            for (key, value) in fields {
                if key != "type" {
                    line_payload.insert(key, value);
                }
            }
        }

        if let Some(parent) = self.inner.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let line = serde_json::to_string(&line_payload)?;
        let _guard = self
            .inner
            .lock
            .lock()
            .map_err(|_| anyhow::anyhow!("event writer lock poisoned"))?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.inner.path)?;
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;

        Ok(Value::Object(line_payload))
    }
}

/// Read back every well-formed event line, skipping anything unparsable.
pub fn read_events(path: &Path) -> anyhow::Result<Vec<LoopEvent>> {
    let raw = std::fs::read_to_string(path)?;
    Ok(raw
        .lines()
        .filter_map(|line| serde_json::from_str::<LoopEvent>(line).ok())
        .collect())
}
