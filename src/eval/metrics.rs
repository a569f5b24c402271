//! Information retrieval metrics for shift evaluation.
//!
//! ## Metrics Overview
//!
//! | Metric  | What it measures                                | Range   |
//! |---------|--------------------------------------------------|---------|
//! | map@1   | Reciprocal rank of the single relevant document  | 0.0-1.0 |
//! | ndcg@3  | Top-3 ranking quality, binary relevance          | 0.0-1.0 |
//! | cosine  | Mean best-match similarity (geometry health)     | -1.0-1.0 |
//!
//! ## Ranking
//!
//! References are ranked by descending cosine similarity; ties break by
//! ascending document id so repeated runs produce identical orderings.
//!
//! ## Aggregation
//!
//! The aggregate of each metric is the arithmetic mean over ALL queries:
//! a query whose relevant document is unknown or missing contributes 0
//! but still counts in the denominator. Dropping it silently would
//! inflate scores on sparsely-labeled datasets.
//!
//! ## Metric keys
//!
//! Baseline-vs-shift comparisons expose metrics under stable string keys
//! (`"map@1"`, `"ndcg@3"`, `"cosine"`) with `.baseline` / `.shift` /
//! `.delta` suffixes so reporting code can discover them by prefix.

use std::collections::BTreeMap;

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

use crate::embed::vector::cosine_similarity;
use crate::shift::ShiftPipeline;
use crate::types::CancelToken;

/// Stable key for the reciprocal-rank metric.
pub const METRIC_MAP: &str = "map@1";
/// Stable key for the NDCG-at-3 metric.
pub const METRIC_NDCG: &str = "ndcg@3";
/// Stable key for the mean best-match cosine metric.
pub const METRIC_COSINE: &str = "cosine";

/// Suffix for the baseline (identity-shifted) run of a comparison.
pub const SUFFIX_BASELINE: &str = ".baseline";
/// Suffix for the shift-under-test run of a comparison.
pub const SUFFIX_SHIFT: &str = ".shift";
/// Suffix for shift-minus-baseline deltas.
pub const SUFFIX_DELTA: &str = ".delta";

/// A reference (document) vector the evaluator ranks against.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reference {
    pub id: String,
    pub embedding: Vec<f32>,
}

impl Reference {
    pub fn new(id: impl Into<String>, embedding: Vec<f32>) -> Self {
        Self { id: id.into(), embedding }
    }
}

/// One evaluation row: a pre-embedded query and its known answer, if any.
#[derive(Debug, Clone)]
pub struct EvalQuery {
    pub id: String,
    pub embedding: Vec<f32>,
    pub relevant_doc_id: Option<String>,
}

impl EvalQuery {
    pub fn new(id: impl Into<String>, embedding: Vec<f32>, relevant: Option<&str>) -> Self {
        Self {
            id: id.into(),
            embedding,
            relevant_doc_id: relevant.map(|s| s.to_string()),
        }
    }
}

/// Aggregated metrics over one query set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RankingMetrics {
    /// Mean reciprocal rank of the relevant document.
    pub map_at_1: f64,
    /// Mean NDCG@3, binary relevance.
    pub ndcg_at_3: f64,
    /// Mean cosine similarity against each query's best-matching reference.
    pub mean_best_cosine: f64,
    /// Number of queries aggregated over (the metric denominator).
    pub n_queries: usize,
}

/// Reciprocal-rank contribution for a 1-based rank.
pub fn reciprocal_rank(rank: usize) -> f64 {
    if rank == 0 {
        return 0.0;
    }
    1.0 / rank as f64
}

/// NDCG@3 contribution for a 1-based rank, binary relevance.
///
/// `DCG(r) = 1/log2(r+1)` for `r <= 3`, else 0; the ideal rank is 1 so
/// `IDCG = 1` and the contribution is already normalized.
pub fn ndcg_at_3(rank: usize) -> f64 {
    if rank == 0 || rank > 3 {
        return 0.0;
    }
    1.0 / (rank as f64 + 1.0).log2()
}

/// Cosine-similarity ranking evaluator.
///
/// Stateless; construct freely per run. Long loops check the cancellation
/// token once per query and abort without a partial aggregate.
#[derive(Debug, Clone, Default)]
pub struct RankingEvaluator;

impl RankingEvaluator {
    pub fn new() -> Self {
        Self
    }

    /// Rank references by descending cosine similarity to the query.
    ///
    /// Ties break by ascending reference id for deterministic output.
    /// Returns `(reference, similarity)` pairs, best first.
    pub fn rank<'a>(
        &self,
        query: &[f32],
        references: &'a [Reference],
    ) -> Result<Vec<(&'a Reference, f32)>> {
        let mut ranked = Vec::with_capacity(references.len());
        for reference in references {
            let sim = cosine_similarity(query, &reference.embedding)?;
            ranked.push((reference, sim));
        }
        ranked.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.id.cmp(&b.0.id))
        });
        Ok(ranked)
    }

    /// 1-based rank of the relevant document, if present in the ranking.
    fn rank_of(ranked: &[(&Reference, f32)], relevant_id: &str) -> Option<usize> {
        ranked
            .iter()
            .position(|(r, _)| r.id == relevant_id)
            .map(|idx| idx + 1)
    }

    /// Similarity of the best-matching reference, 0 with no references.
    fn best_similarity(ranked: &[(&Reference, f32)]) -> f64 {
        ranked.first().map(|(_, sim)| *sim as f64).unwrap_or(0.0)
    }

    /// Evaluate a query set after passing each query through `pipeline`.
    ///
    /// Every query counts in the denominator; queries without a resolvable
    /// relevant document contribute 0 to the ranking metrics.
    pub fn evaluate(
        &self,
        queries: &[EvalQuery],
        references: &[Reference],
        pipeline: &ShiftPipeline,
        cancel: &CancelToken,
    ) -> Result<RankingMetrics> {
        let mut map_sum = 0.0;
        let mut ndcg_sum = 0.0;
        let mut cosine_sum = 0.0;

        for query in queries {
            if cancel.is_cancelled() {
                bail!("evaluation cancelled at query '{}'", query.id);
            }

            let shifted = pipeline.apply_to(&query.embedding);
            let ranked = self.rank(&shifted, references)?;

            cosine_sum += Self::best_similarity(&ranked);

            if let Some(relevant) = query.relevant_doc_id.as_deref() {
                if let Some(rank) = Self::rank_of(&ranked, relevant) {
                    map_sum += reciprocal_rank(rank);
                    ndcg_sum += ndcg_at_3(rank);
                }
            }
        }

        let n = queries.len();
        let denom = n.max(1) as f64;
        Ok(RankingMetrics {
            map_at_1: map_sum / denom,
            ndcg_at_3: ndcg_sum / denom,
            mean_best_cosine: cosine_sum / denom,
            n_queries: n,
        })
    }

    /// Run the same query set through the baseline and the shift under
    /// test, reporting absolute metrics plus shift-minus-baseline deltas.
    pub fn compare(
        &self,
        queries: &[EvalQuery],
        references: &[Reference],
        baseline: &ShiftPipeline,
        candidate: &ShiftPipeline,
        cancel: &CancelToken,
    ) -> Result<ComparisonReport> {
        let base = self.evaluate(queries, references, baseline, cancel)?;
        let shift = self.evaluate(queries, references, candidate, cancel)?;
        Ok(ComparisonReport::from_runs(base, shift))
    }
}

/// Baseline-vs-shift comparison: absolute metrics and deltas keyed by the
/// stable metric-name conventions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComparisonReport {
    pub baseline: RankingMetrics,
    pub shift: RankingMetrics,
    /// Flat key/value view (`map@1.delta`, `ndcg@3.shift`, ...) for gates
    /// and external reporting.
    pub metrics: BTreeMap<String, f64>,
}

impl ComparisonReport {
    pub fn from_runs(baseline: RankingMetrics, shift: RankingMetrics) -> Self {
        let mut metrics = BTreeMap::new();

        let mut put = |key: &str, base: f64, shifted: f64| {
            metrics.insert(format!("{key}{SUFFIX_BASELINE}"), base);
            metrics.insert(format!("{key}{SUFFIX_SHIFT}"), shifted);
            metrics.insert(format!("{key}{SUFFIX_DELTA}"), shifted - base);
        };

        put(METRIC_MAP, baseline.map_at_1, shift.map_at_1);
        put(METRIC_NDCG, baseline.ndcg_at_3, shift.ndcg_at_3);
        put(
            METRIC_COSINE,
            baseline.mean_best_cosine,
            shift.mean_best_cosine,
        );

        Self { baseline, shift, metrics }
    }

    /// Delta (shift - baseline) for a metric key, if present.
    pub fn delta(&self, metric: &str) -> Option<f64> {
        self.metrics.get(&format!("{metric}{SUFFIX_DELTA}")).copied()
    }
}
