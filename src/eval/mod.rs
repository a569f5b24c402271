//! Ranking-quality evaluation: metrics, comparisons, and the acceptance gate.

pub mod gate;
pub mod metrics;

pub use gate::{AcceptanceGate, GateProfile, GateResult};
pub use metrics::{
    ndcg_at_3, reciprocal_rank, ComparisonReport, EvalQuery, RankingEvaluator, RankingMetrics,
    Reference, METRIC_COSINE, METRIC_MAP, METRIC_NDCG, SUFFIX_BASELINE, SUFFIX_DELTA, SUFFIX_SHIFT,
};
