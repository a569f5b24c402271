//! Core types for rankshift - the embedding shift selection engine.
//!
//! Everything that crosses a subsystem boundary lives here: the stage tag
//! that orders shifts inside a pipeline, the labeled training rows, the
//! persisted training artifact, and the cooperative cancellation signal
//! threaded through batch loops.
//!
//! Design decisions:
//! - All persisted types derive serde and serialize as plain JSON
//! - `ShiftTrainingResult` is immutable after creation; repositories treat
//!   it as append-only
//! - Timestamps are Unix epoch seconds (i64), no timezone machinery

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Application stage of a shift within a pipeline.
///
/// `First` shifts model a coarse global prior; `Delta` shifts a finer
/// learned correction applied afterward. The derived ordering (`First`
/// before `Delta`) is load-bearing: pipelines sort by it at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Stage {
    /// Coarse global prior, applied first.
    First,
    /// Fine learned correction, applied after all First shifts.
    Delta,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::First => "first",
            Stage::Delta => "delta",
        }
    }
}

/// One labeled training row: a query and the document known to answer it.
///
/// Rows whose `relevant_doc_id` is `None`, or names a document absent from
/// the corpus, are excluded from training. In evaluation they still count
/// in metric denominators and contribute a score of zero.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingQuery {
    /// Stable identifier for the query (used in diagnostics and pair counts).
    pub id: String,
    /// Query text, embedded on demand by the provider.
    pub text: String,
    /// Id of the known-relevant document, if labeled.
    pub relevant_doc_id: Option<String>,
}

impl TrainingQuery {
    pub fn new(id: impl Into<String>, text: impl Into<String>, relevant: Option<&str>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            relevant_doc_id: relevant.map(|s| s.to_string()),
        }
    }
}

/// Summary statistics accumulated over the per-query direction vectors
/// during one training invocation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrainingStats {
    /// Number of usable (query, relevant-doc) cases trained on.
    pub case_count: usize,
    /// Number of distinct (query id, doc id) pairs seen.
    pub pair_count: usize,
    /// Mean L2 norm of individual direction vectors.
    pub avg_direction_norm: f32,
    /// Smallest individual direction norm.
    pub min_direction_norm: f32,
    /// Largest individual direction norm.
    pub max_direction_norm: f32,
    /// Directions that were exactly zero (query already at its answer).
    pub zero_direction_count: usize,
    /// Aggregate delta norm before clipping.
    pub pre_clip_norm: f32,
    /// Whether norm clipping rescaled the aggregate.
    pub clip_applied: bool,
    /// Heuristic flag: individual corrections were non-trivial but mostly
    /// cancelled each other in the aggregate.
    pub cancel_out_suspected: bool,
}

/// The persisted artifact of one training invocation.
///
/// Created once by the trainer, written by a `ResultStore`, and read back
/// by the adaptive generator. Never mutated after creation; the store is
/// append-only from the engine's perspective.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShiftTrainingResult {
    /// Workflow this result belongs to (store key, together with scope).
    pub workflow_name: String,
    /// Creation time, Unix epoch seconds.
    pub created_utc: i64,
    /// Directory the training run was rooted at (diagnostics only).
    pub base_directory: String,
    /// Number of queries evaluated in the baseline-vs-shift comparisons.
    pub comparison_runs: usize,
    /// map@1 delta of the First-stage prior alone vs. baseline.
    pub improvement_first: f64,
    /// map@1 delta of prior + learned delta vs. baseline.
    pub improvement_first_plus_delta: f64,
    /// Marginal contribution of the learned delta
    /// (`improvement_first_plus_delta - improvement_first`).
    pub delta_improvement: f64,
    /// The learned additive delta vector.
    pub delta_vector: Vec<f32>,
    /// Training mode label, e.g. "posneg" or "posneg+hardneg".
    pub training_mode: String,
    /// Epsilon the cancel-out gate compared the delta norm against.
    pub cancel_out_epsilon: f32,
    /// Hard cancel-out gate verdict. Cancelled results are unusable unless
    /// a consumer explicitly opts in.
    pub is_cancelled: bool,
    /// Human-readable reason when cancelled.
    pub cancel_reason: Option<String>,
    /// Final (post-clip) L2 norm of the delta vector.
    pub delta_norm: f32,
    /// Scope discriminator within a workflow (e.g. a dataset slice).
    pub scope_id: String,
    /// Direction-vector statistics from the training pass.
    pub stats: TrainingStats,
}

impl ShiftTrainingResult {
    /// Whether the adaptive generator may build a shift from this result.
    ///
    /// Cancelled results require the caller to opt in explicitly.
    pub fn is_usable(&self, include_cancelled: bool) -> bool {
        if self.delta_vector.is_empty() {
            return false;
        }
        include_cancelled || !self.is_cancelled
    }
}

/// Cooperative cancellation signal for batch loops.
///
/// Checked once per iteration by the trainer and evaluator; cancellation
/// aborts the current batch without producing a partial result. Cheap to
/// clone and share across call sites.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}
