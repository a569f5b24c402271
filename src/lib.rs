//! rankshift - embedding shift selection for retrieval ranking
//!
//! rankshift evaluates and selects **embedding shifts** - deterministic or
//! learned vector transforms applied to query embeddings before a
//! cosine-similarity ranking - and learns new shifts from labeled
//! positive/negative query-document pairs.
//!
//! # Architecture
//!
//! ```text
//! Embedding Provider → Shift Pipeline → Ranking Evaluator → Acceptance Gate
//!        ↓                  ↓                 ↓                  ↓
//!    hash-based        First/Delta       map@1, ndcg@3       pass/fail +
//!    simulation        ordered apply     cosine deltas       notes
//!
//! PosNeg Trainer → Result Store → Adaptive Generator → Selector
//!        ↓               ↓                ↓                ↓
//!    delta vector    JSON per run    identity +        best cosine,
//!    + cancel-out    last-write-wins learned shift     ties to fallback
//! ```
//!
//! # Determinism
//!
//! Reproducibility is a hard requirement, not a nicety: the embedding
//! provider is deterministic per configuration, stochastic shifts carry
//! their own seeded generator, and every ranking tie-break is stable.
//! Training and evaluation are synchronous single-threaded batch passes
//! with cooperative cancellation checked once per iteration.

pub mod adaptive;
pub mod config;
pub mod embed;
pub mod eval;
pub mod shift;
pub mod train;
pub mod types;

// Re-export core types
pub use types::{CancelToken, ShiftTrainingResult, Stage, TrainingQuery, TrainingStats};

// Re-export the shift surface
pub use shift::{
    AdditiveShift, KeywordBoostShift, MultiplicativeShift, NoShift, RandomNoiseShift, Shift,
    ShiftPipeline, WeightedStageShift,
};

// Re-export evaluation types
pub use eval::{AcceptanceGate, ComparisonReport, GateProfile, GateResult, RankingEvaluator};

// Re-export training and adaptive selection
pub use adaptive::{AdaptiveConfig, AdaptiveShiftGenerator, AdaptiveWorkflow, SelectedShift};
pub use train::{FsResultStore, MemoryResultStore, PosNegTrainer, ResultStore, TrainerConfig};
