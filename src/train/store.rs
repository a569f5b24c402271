//! Persistence for training results.
//!
//! Strategy: one JSON document per result, named so a plain lexical sort
//! of filenames matches creation order:
//!
//! ```text
//! <results dir>/<workflow>__<created_utc, zero-padded>__<scope>.json
//! ```
//!
//! "Latest" is therefore resolvable by a filename scan, no database
//! needed. The store provides no locking: concurrent writers are resolved
//! last-write-wins, and a reader may see a result replaced by a newer one
//! on its next call. Malformed files are skipped during scans - only the
//! total absence of any readable result reports as "not found".

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};

use crate::types::ShiftTrainingResult;

/// Persistence contract for training results.
///
/// The engine treats implementations as append-only: results are saved
/// once and never mutated. `load_best` excludes cancelled results unless
/// the caller opts in; when everything is cancelled it returns `None`.
pub trait ResultStore {
    fn save(&self, result: &ShiftTrainingResult) -> Result<()>;

    /// Most recent result for a workflow by creation time, or `None`.
    fn load_latest(&self, workflow: &str) -> Result<Option<ShiftTrainingResult>>;

    /// Highest-`delta_improvement` result for a workflow (ties go to the
    /// newer result), or `None`.
    fn load_best(
        &self,
        workflow: &str,
        include_cancelled: bool,
    ) -> Result<Option<ShiftTrainingResult>>;
}

/// Pick the best result out of a candidate list (shared by both stores).
fn best_of(
    mut candidates: Vec<ShiftTrainingResult>,
    include_cancelled: bool,
) -> Option<ShiftTrainingResult> {
    candidates.retain(|r| include_cancelled || !r.is_cancelled);
    candidates.into_iter().max_by(|a, b| {
        a.delta_improvement
            .partial_cmp(&b.delta_improvement)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.created_utc.cmp(&b.created_utc))
    })
}

/// Replace anything that could upset a filename with '-'.
fn sanitize(s: &str) -> String {
    s.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect()
}

/// File-backed result store: one pretty-printed JSON file per result.
pub struct FsResultStore {
    root: PathBuf,
}

impl FsResultStore {
    /// Open the store, creating the results directory if needed.
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)
            .with_context(|| format!("failed to create results directory: {}", root.display()))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn file_name(result: &ShiftTrainingResult) -> String {
        format!(
            "{}__{:012}__{}.json",
            sanitize(&result.workflow_name),
            result.created_utc.max(0),
            sanitize(&result.scope_id)
        )
    }

    /// Candidate files for a workflow, sorted by filename ascending
    /// (which, by the naming scheme, is creation order).
    fn scan(&self, workflow: &str) -> Result<Vec<PathBuf>> {
        let prefix = format!("{}__", sanitize(workflow));
        let mut paths = Vec::new();

        for entry in fs::read_dir(&self.root)
            .with_context(|| format!("failed to read results directory: {}", self.root.display()))?
        {
            let entry = entry.context("failed to read results directory entry")?;
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if name.starts_with(&prefix) && name.ends_with(".json") {
                paths.push(path);
            }
        }

        paths.sort();
        Ok(paths)
    }

    fn read_result(path: &Path) -> Result<ShiftTrainingResult> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read result file: {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("failed to parse result file: {}", path.display()))
    }
}

impl ResultStore for FsResultStore {
    fn save(&self, result: &ShiftTrainingResult) -> Result<()> {
        let path = self.root.join(Self::file_name(result));
        let content = serde_json::to_string_pretty(result)
            .context("failed to serialize training result")?;
        fs::write(&path, content)
            .with_context(|| format!("failed to write result file: {}", path.display()))?;
        Ok(())
    }

    fn load_latest(&self, workflow: &str) -> Result<Option<ShiftTrainingResult>> {
        // Newest first; a malformed file is skipped and the scan continues
        // to the next older candidate.
        for path in self.scan(workflow)?.iter().rev() {
            match Self::read_result(path) {
                Ok(result) => return Ok(Some(result)),
                Err(e) => {
                    eprintln!("warning: skipping unreadable result {}: {}", path.display(), e);
                }
            }
        }
        Ok(None)
    }

    fn load_best(
        &self,
        workflow: &str,
        include_cancelled: bool,
    ) -> Result<Option<ShiftTrainingResult>> {
        let mut candidates = Vec::new();
        for path in self.scan(workflow)? {
            match Self::read_result(&path) {
                Ok(result) => candidates.push(result),
                Err(e) => {
                    eprintln!("warning: skipping unreadable result {}: {}", path.display(), e);
                }
            }
        }
        Ok(best_of(candidates, include_cancelled))
    }
}

/// In-memory result store, mirroring the file-backed contract for tests.
#[derive(Debug, Default)]
pub struct MemoryResultStore {
    results: Mutex<Vec<ShiftTrainingResult>>,
}

impl MemoryResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store with pre-built results.
    pub fn with_results(results: Vec<ShiftTrainingResult>) -> Self {
        Self {
            results: Mutex::new(results),
        }
    }
}

impl ResultStore for MemoryResultStore {
    fn save(&self, result: &ShiftTrainingResult) -> Result<()> {
        self.results
            .lock()
            .expect("result store poisoned")
            .push(result.clone());
        Ok(())
    }

    fn load_latest(&self, workflow: &str) -> Result<Option<ShiftTrainingResult>> {
        let results = self.results.lock().expect("result store poisoned");
        Ok(results
            .iter()
            .filter(|r| r.workflow_name == workflow)
            .max_by_key(|r| r.created_utc)
            .cloned())
    }

    fn load_best(
        &self,
        workflow: &str,
        include_cancelled: bool,
    ) -> Result<Option<ShiftTrainingResult>> {
        let results = self.results.lock().expect("result store poisoned");
        let candidates: Vec<ShiftTrainingResult> = results
            .iter()
            .filter(|r| r.workflow_name == workflow)
            .cloned()
            .collect();
        Ok(best_of(candidates, include_cancelled))
    }
}
