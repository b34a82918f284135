use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use similar::TextDiff;
use uuid::Uuid;

use crate::runs::summary::now_utc_iso;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IterationStatus {
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationEntry {
    pub index: u32,
    pub seed: i64,
    pub prompt: String,
    pub prompt_diff: Option<Vec<String>>,
    pub conditioning: Option<String>,
    pub output_dir: String,
    pub output_unit: Option<String>,
    pub status: IterationStatus,
    pub started_at: String,
    pub finished_at: Option<String>,
}

/// `loop.json`: one entry per started iteration, rewritten after every change.
#[derive(Debug, Clone, PartialEq)]
pub struct LoopManifest {
    pub path: PathBuf,
    pub schema_version: u64,
    pub run_id: String,
    pub created_at: String,
    pub base_seed: i64,
    pub iterations_planned: u32,
    pub iterations: Vec<IterationEntry>,
    pub aggregated_artifact: Option<String>,
}

impl LoopManifest {
    pub fn new(path: impl Into<PathBuf>, base_seed: i64, iterations_planned: u32) -> Self {
        Self {
            path: path.into(),
            schema_version: 1,
            run_id: Uuid::new_v4().to_string(),
            created_at: now_utc_iso(),
            base_seed,
            iterations_planned,
            iterations: Vec::new(),
            aggregated_artifact: None,
        }
    }

    /// Load a manifest, falling back to an empty one for missing or malformed files.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut manifest = Self::new(path.clone(), 0, 0);
        let payload = read_json(&path).unwrap_or(Value::Object(Map::new()));
        let Some(obj) = payload.as_object() else {
            return manifest;
        };

        manifest.schema_version = obj
            .get("schema_version")
            .and_then(Value::as_u64)
            .unwrap_or(manifest.schema_version);
        manifest.run_id = obj
            .get("run_id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or(manifest.run_id);
        manifest.created_at = obj
            .get("created_at")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or(manifest.created_at);
        manifest.base_seed = obj
            .get("base_seed")
            .and_then(Value::as_i64)
            .unwrap_or_default();
        manifest.iterations_planned = obj
            .get("iterations_planned")
            .and_then(Value::as_u64)
            .and_then(|value| u32::try_from(value).ok())
            .unwrap_or_default();
        manifest.aggregated_artifact = obj
            .get("aggregated_artifact")
            .and_then(Value::as_str)
            .map(str::to_string);

        if let Some(iterations) = obj.get("iterations").and_then(Value::as_array) {
            for item in iterations {
                if let Ok(parsed) = serde_json::from_value::<IterationEntry>(item.clone()) {
                    manifest.iterations.push(parsed);
                }
            }
        }
        manifest
    }

    pub fn begin_iteration(
        &mut self,
        index: u32,
        seed: i64,
        prompt: &str,
        conditioning: Option<&Path>,
        output_dir: &Path,
    ) -> &IterationEntry {
        let prev_prompt = self.iterations.last().map(|entry| entry.prompt.as_str());
        let entry = IterationEntry {
            index,
            seed,
            prompt: prompt.to_string(),
            prompt_diff: prompt_diff(prev_prompt, prompt),
            conditioning: conditioning.map(|path| path.to_string_lossy().to_string()),
            output_dir: output_dir.to_string_lossy().to_string(),
            output_unit: None,
            status: IterationStatus::Running,
            started_at: now_utc_iso(),
            finished_at: None,
        };
        self.iterations.push(entry);
        &self.iterations[self.iterations.len() - 1]
    }

    pub fn finish_iteration(&mut self, index: u32, status: IterationStatus) {
        if let Some(entry) = self.get_iteration_mut(index) {
            entry.status = status;
            entry.finished_at = Some(now_utc_iso());
        }
    }

    /// Record the unit located in an iteration's directory once a later step finds it.
    pub fn set_output_unit(&mut self, index: u32, unit: &Path) {
        if let Some(entry) = self.get_iteration_mut(index) {
            entry.output_unit = Some(unit.to_string_lossy().to_string());
        }
    }

    pub fn set_aggregated_artifact(&mut self, artifact: Option<&Path>) {
        self.aggregated_artifact = artifact.map(|path| path.to_string_lossy().to_string());
    }

    pub fn completed_iterations(&self) -> u32 {
        self.iterations
            .iter()
            .filter(|entry| entry.status == IterationStatus::Completed)
            .count() as u32
    }

    pub fn get_iteration(&self, index: u32) -> Option<&IterationEntry> {
        self.iterations.iter().find(|entry| entry.index == index)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let mut payload = Map::new();
        payload.insert(
            "schema_version".to_string(),
            Value::Number(self.schema_version.into()),
        );
        payload.insert("run_id".to_string(), Value::String(self.run_id.clone()));
        payload.insert(
            "created_at".to_string(),
            Value::String(self.created_at.clone()),
        );
        payload.insert("base_seed".to_string(), Value::Number(self.base_seed.into()));
        payload.insert(
            "iterations_planned".to_string(),
            Value::Number(self.iterations_planned.into()),
        );
        payload.insert(
            "iterations".to_string(),
            Value::Array(
                self.iterations
                    .iter()
                    .map(|entry| serde_json::to_value(entry).unwrap_or(Value::Null))
                    .collect(),
            ),
        );
        payload.insert(
            "aggregated_artifact".to_string(),
            self.aggregated_artifact
                .clone()
                .map(Value::String)
                .unwrap_or(Value::Null),
        );

        write_json(&self.path, Value::Object(payload))
    }

    fn get_iteration_mut(&mut self, index: u32) -> Option<&mut IterationEntry> {
        self.iterations
            .iter_mut()
            .find(|entry| entry.index == index)
    }
}

fn prompt_diff(prev: Option<&str>, curr: &str) -> Option<Vec<String>> {
    let prev = prev?;
    if prev == curr {
        return None;
    }
    let diff = TextDiff::from_lines(prev, curr);
    let rendered = diff.unified_diff().header("prev", "curr").to_string();
    let lines = rendered
        .lines()
        .map(str::to_string)
        .collect::<Vec<String>>();
    Some(lines)
}

fn read_json(path: &Path) -> anyhow::Result<Value> {
    let raw = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

fn write_json(path: &Path, payload: Value) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(&payload)?)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::{IterationStatus, LoopManifest};

    #[test]
    fn manifest_iterations_roundtrip() -> anyhow::Result<()> {
        let tmp = tempfile::tempdir()?;
        let path = tmp.path().join("loop.json");
        let mut manifest = LoopManifest::new(&path, 42, 3);

        manifest.begin_iteration(0, 42, "harbor", None, &tmp.path().join("frame_000"));
        manifest.finish_iteration(0, IterationStatus::Completed);
        manifest.set_output_unit(0, Path::new("/out/frame_000/a.mp4"));
        manifest.begin_iteration(
            1,
            43,
            "harbor",
            Some(Path::new("/out/frame_000/a_last_frame.png")),
            &tmp.path().join("frame_001"),
        );
        manifest.finish_iteration(1, IterationStatus::Failed);
        manifest.save()?;

        let loaded = LoopManifest::load(&path);
        assert_eq!(loaded.run_id, manifest.run_id);
        assert_eq!(loaded.base_seed, 42);
        assert_eq!(loaded.iterations_planned, 3);
        assert_eq!(loaded.iterations.len(), 2);
        assert_eq!(loaded.completed_iterations(), 1);
        assert_eq!(
            loaded.iterations[0].output_unit.as_deref(),
            Some("/out/frame_000/a.mp4")
        );
        assert_eq!(
            loaded.iterations[1].conditioning.as_deref(),
            Some("/out/frame_000/a_last_frame.png")
        );
        assert_eq!(loaded.iterations[1].status, IterationStatus::Failed);
        assert!(loaded.iterations[1].finished_at.is_some());
        Ok(())
    }

    #[test]
    fn prompt_diff_only_recorded_when_prompt_changes() {
        let mut manifest = LoopManifest::new("/tmp/unused/loop.json", 0, 3);
        manifest.begin_iteration(0, 0, "calm sea", None, Path::new("/o/frame_000"));
        manifest.begin_iteration(1, 1, "calm sea", None, Path::new("/o/frame_001"));
        manifest.begin_iteration(2, 2, "stormy sea", None, Path::new("/o/frame_002"));

        assert!(manifest.iterations[0].prompt_diff.is_none());
        assert!(manifest.iterations[1].prompt_diff.is_none());
        let diff = manifest.iterations[2]
            .prompt_diff
            .clone()
            .unwrap_or_default();
        assert!(diff.iter().any(|line| line == "-calm sea"));
        assert!(diff.iter().any(|line| line == "+stormy sea"));
    }

    #[test]
    fn load_tolerates_missing_and_malformed_files() -> anyhow::Result<()> {
        let tmp = tempfile::tempdir()?;
        let missing = LoopManifest::load(tmp.path().join("nope.json"));
        assert!(missing.iterations.is_empty());

        let bad = tmp.path().join("bad.json");
        std::fs::write(&bad, "{not json")?;
        let loaded = LoopManifest::load(&bad);
        assert!(loaded.iterations.is_empty());
        assert!(loaded.aggregated_artifact.is_none());
        Ok(())
    }
}
