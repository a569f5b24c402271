//! Positive/negative delta-vector training.
//!
//! ## The Direction Principle
//!
//! Every labeled (query, relevant-document) pair defines a direction
//! vector `relevant_embedding - query_embedding`: the correction that, if
//! added to the query, moves it toward its known-correct answer. Summing
//! these corrections over a training set yields one global additive delta
//! that nudges every future query the way the labeled queries needed.
//!
//! ## Hard Negatives
//!
//! With `hardneg_topk > 0`, the top-K non-relevant documents by cosine
//! against the raw query are treated as hard negatives and their
//! directions are subtracted at `hardneg_weight / K` each - pushing the
//! delta away from near-miss distractors as well as toward answers.
//!
//! ## Cancel-Out
//!
//! Corrections can conflict: individually large direction vectors that
//! point in opposing directions sum to a near-zero aggregate. Such a
//! delta "trained successfully" but is useless. Two independent defenses:
//! - a heuristic flag (`cancel_out_suspected`) comparing the mean
//!   individual norm to the aggregate norm, and
//! - a hard gate marking the result cancelled when the final norm is at
//!   or below the configured epsilon. Cancelled results are first-class
//!   states, not errors; consumers must opt in to use them.
//!
//! Training is a full batch recomputation per invocation; there is no
//! incremental path. Zero usable queries is a hard error - an all-zero
//! "successful" result would poison downstream selection.

use std::collections::{HashMap, HashSet};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{bail, Context, Result};

use crate::embed::provider::EmbeddingProvider;
use crate::embed::vector::{add_scaled, cosine_similarity, difference, l2_norm, rescale_to_norm};
use crate::eval::metrics::{EvalQuery, RankingEvaluator, Reference};
use crate::shift::variants::WeightedStageShift;
use crate::shift::ShiftPipeline;
use crate::types::{CancelToken, ShiftTrainingResult, TrainingQuery, TrainingStats};

/// Multiplier on the cancel epsilon below which mean direction norms are
/// considered trivial for the cancel-out heuristic.
const SUSPECT_NORM_FACTOR: f32 = 10.0;

/// Aggregate-to-mean ratio under which cancellation is suspected.
const SUSPECT_RATIO: f32 = 0.1;

/// Configuration for one training invocation.
#[derive(Debug, Clone)]
pub struct TrainerConfig {
    /// Workflow the persisted result belongs to.
    pub workflow_name: String,
    /// Scope discriminator within the workflow.
    pub scope_id: String,
    /// Directory label recorded on the result (diagnostics only).
    pub base_directory: String,
    /// Whether to clip the aggregate delta norm.
    pub clip_enabled: bool,
    /// Maximum aggregate delta norm when clipping.
    pub max_delta_norm: f32,
    /// Cancel-out gate epsilon.
    pub cancel_epsilon: f32,
    /// Divide the aggregate by the case count instead of using the raw sum.
    pub normalize_directions: bool,
    /// Hard-negative sampling: top-K non-relevant docs per query (0 = off).
    pub hardneg_topk: usize,
    /// Weight of the averaged hard-negative direction.
    pub hardneg_weight: f32,
    /// Optional First-stage prior shift vector used in the comparison runs.
    pub prior: Option<Vec<f32>>,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            workflow_name: "default".into(),
            scope_id: "default".into(),
            base_directory: ".".into(),
            clip_enabled: true,
            max_delta_norm: crate::config::DEFAULT_MAX_DELTA_NORM,
            cancel_epsilon: crate::config::DEFAULT_CANCEL_EPSILON,
            normalize_directions: false,
            hardneg_topk: 0,
            hardneg_weight: 0.5,
            prior: None,
        }
    }
}

impl TrainerConfig {
    fn training_mode(&self) -> String {
        if self.hardneg_topk > 0 {
            "posneg+hardneg".into()
        } else {
            "posneg".into()
        }
    }
}

/// Learns one global additive delta vector from labeled query/document
/// pairs over an in-memory corpus.
pub struct PosNegTrainer<'a, P: EmbeddingProvider> {
    provider: &'a P,
    config: TrainerConfig,
}

impl<'a, P: EmbeddingProvider> PosNegTrainer<'a, P> {
    pub fn new(provider: &'a P, config: TrainerConfig) -> Self {
        Self { provider, config }
    }

    /// Run one full training pass.
    ///
    /// `corpus` maps document id to its embedding; `queries` are the
    /// labeled rows. Queries whose relevant document is unknown or absent
    /// from the corpus are excluded. Fails fast when nothing is usable,
    /// when a corpus embedding has the wrong dimension, or when the
    /// cancellation token fires mid-batch (no partial result).
    pub fn train(
        &self,
        corpus: &HashMap<String, Vec<f32>>,
        queries: &[TrainingQuery],
        cancel: &CancelToken,
    ) -> Result<ShiftTrainingResult> {
        let dim = self.provider.dim();

        for (doc_id, embedding) in corpus {
            if embedding.len() != dim {
                bail!(
                    "document '{}' has dimension {} but the provider dimension is {}",
                    doc_id,
                    embedding.len(),
                    dim
                );
            }
        }

        let usable: Vec<(&TrainingQuery, &str)> = queries
            .iter()
            .filter_map(|q| {
                let relevant = q.relevant_doc_id.as_deref()?;
                corpus.contains_key(relevant).then_some((q, relevant))
            })
            .collect();

        if usable.is_empty() {
            bail!(
                "no usable training data: none of the {} labeled queries resolve \
                 against the {}-document corpus",
                queries.len(),
                corpus.len()
            );
        }

        // Sorted view of the corpus for deterministic hard-negative ranking.
        let mut sorted_docs: Vec<(&str, &Vec<f32>)> =
            corpus.iter().map(|(id, emb)| (id.as_str(), emb)).collect();
        sorted_docs.sort_by(|a, b| a.0.cmp(b.0));

        let mut aggregate = vec![0.0f32; dim];
        let mut pairs: HashSet<(String, String)> = HashSet::new();
        let mut norm_sum = 0.0f32;
        let mut norm_min = f32::INFINITY;
        let mut norm_max = 0.0f32;
        let mut zero_count = 0usize;
        let mut eval_queries = Vec::with_capacity(usable.len());

        for &(query, relevant_id) in &usable {
            if cancel.is_cancelled() {
                bail!("training cancelled at query '{}'", query.id);
            }

            let query_embedding = self.provider.embed(&query.text);
            let relevant_embedding = &corpus[relevant_id];

            let mut direction = difference(relevant_embedding, &query_embedding)
                .with_context(|| format!("direction for query '{}'", query.id))?;

            if self.config.hardneg_topk > 0 {
                self.subtract_hard_negatives(
                    &mut direction,
                    &query_embedding,
                    relevant_id,
                    &sorted_docs,
                )?;
            }

            let norm = l2_norm(&direction);
            norm_sum += norm;
            norm_min = norm_min.min(norm);
            norm_max = norm_max.max(norm);
            if norm == 0.0 {
                zero_count += 1;
            }
            pairs.insert((query.id.clone(), relevant_id.to_string()));

            add_scaled(&mut aggregate, &direction, 1.0);
            eval_queries.push(EvalQuery::new(
                query.id.clone(),
                query_embedding,
                Some(relevant_id),
            ));
        }

        let case_count = usable.len();
        if self.config.normalize_directions {
            let scale = 1.0 / case_count as f32;
            for x in aggregate.iter_mut() {
                *x *= scale;
            }
        }

        let avg_norm = norm_sum / case_count as f32;
        let pre_clip_norm = l2_norm(&aggregate);

        let clip_applied =
            self.config.clip_enabled && pre_clip_norm > self.config.max_delta_norm;
        if clip_applied {
            rescale_to_norm(&mut aggregate, self.config.max_delta_norm);
        }
        let delta_norm = l2_norm(&aggregate);

        // Heuristic: corrections were individually non-trivial but mostly
        // cancelled each other in the sum.
        let cancel_out_suspected = avg_norm
            > SUSPECT_NORM_FACTOR * self.config.cancel_epsilon
            && pre_clip_norm < SUSPECT_RATIO * avg_norm;

        // Hard gate: a near-zero delta is unusable no matter how it arose.
        let is_cancelled = delta_norm <= self.config.cancel_epsilon;
        let cancel_reason = is_cancelled.then(|| {
            format!(
                "aggregate delta norm {:.6} is at or below cancel epsilon {:.6} \
                 (mean direction norm {:.6} over {} cases)",
                delta_norm, self.config.cancel_epsilon, avg_norm, case_count
            )
        });

        let (improvement_first, improvement_first_plus_delta) =
            self.comparison_improvements(&eval_queries, &sorted_docs, &aggregate, cancel)?;

        Ok(ShiftTrainingResult {
            workflow_name: self.config.workflow_name.clone(),
            created_utc: unix_now(),
            base_directory: self.config.base_directory.clone(),
            comparison_runs: case_count,
            improvement_first,
            improvement_first_plus_delta,
            delta_improvement: improvement_first_plus_delta - improvement_first,
            delta_vector: aggregate,
            training_mode: self.config.training_mode(),
            cancel_out_epsilon: self.config.cancel_epsilon,
            is_cancelled,
            cancel_reason,
            delta_norm,
            scope_id: self.config.scope_id.clone(),
            stats: TrainingStats {
                case_count,
                pair_count: pairs.len(),
                avg_direction_norm: avg_norm,
                min_direction_norm: norm_min,
                max_direction_norm: norm_max,
                zero_direction_count: zero_count,
                pre_clip_norm,
                clip_applied,
                cancel_out_suspected,
            },
        })
    }

    /// Subtract the weighted top-K hard-negative directions from one
    /// query's direction vector.
    fn subtract_hard_negatives(
        &self,
        direction: &mut [f32],
        query_embedding: &[f32],
        relevant_id: &str,
        sorted_docs: &[(&str, &Vec<f32>)],
    ) -> Result<()> {
        let mut scored: Vec<(&str, &Vec<f32>, f32)> = Vec::new();
        for &(doc_id, embedding) in sorted_docs {
            if doc_id == relevant_id {
                continue;
            }
            let sim = cosine_similarity(query_embedding, embedding)?;
            scored.push((doc_id, embedding, sim));
        }
        scored.sort_by(|a, b| {
            b.2.partial_cmp(&a.2)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(b.0))
        });

        let taken = scored.iter().take(self.config.hardneg_topk).count();
        if taken == 0 {
            return Ok(());
        }
        let scale = self.config.hardneg_weight / taken as f32;

        for (_, embedding, _) in scored.into_iter().take(self.config.hardneg_topk) {
            let negative_direction = difference(embedding, query_embedding)?;
            add_scaled(direction, &negative_direction, -scale);
        }
        Ok(())
    }

    /// Measure the prior shift and the prior + learned delta against
    /// baseline over the training queries, returning the two `map@1`
    /// improvements recorded on the result.
    fn comparison_improvements(
        &self,
        eval_queries: &[EvalQuery],
        sorted_docs: &[(&str, &Vec<f32>)],
        delta: &[f32],
        cancel: &CancelToken,
    ) -> Result<(f64, f64)> {
        let references: Vec<Reference> = sorted_docs
            .iter()
            .map(|(id, emb)| Reference::new(*id, (*emb).clone()))
            .collect();

        let evaluator = RankingEvaluator::new();
        let baseline = evaluator.evaluate(
            eval_queries,
            &references,
            &ShiftPipeline::identity(),
            cancel,
        )?;

        let first_pipeline = match &self.config.prior {
            Some(prior) => ShiftPipeline::new(vec![Box::new(WeightedStageShift::first(
                "prior",
                1.0,
                prior.clone(),
            ))]),
            None => ShiftPipeline::identity(),
        };
        let first = evaluator.evaluate(eval_queries, &references, &first_pipeline, cancel)?;

        let mut staged: Vec<Box<dyn crate::shift::Shift>> = Vec::new();
        if let Some(prior) = &self.config.prior {
            staged.push(Box::new(WeightedStageShift::first(
                "prior",
                1.0,
                prior.clone(),
            )));
        }
        staged.push(Box::new(WeightedStageShift::delta(
            "learned",
            1.0,
            delta.to_vec(),
        )));
        let full_pipeline = ShiftPipeline::new(staged);
        let full = evaluator.evaluate(eval_queries, &references, &full_pipeline, cancel)?;

        Ok((
            first.map_at_1 - baseline.map_at_1,
            full.map_at_1 - baseline.map_at_1,
        ))
    }
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embed::provider::HashEmbedder;

    /// Test double mapping fixed texts to fixed vectors.
    struct FixedProvider {
        dim: usize,
        map: HashMap<String, Vec<f32>>,
    }

    impl FixedProvider {
        fn new(dim: usize, entries: &[(&str, &[f32])]) -> Self {
            Self {
                dim,
                map: entries
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_vec()))
                    .collect(),
            }
        }
    }

    impl EmbeddingProvider for FixedProvider {
        fn dim(&self) -> usize {
            self.dim
        }

        fn embed(&self, text: &str) -> Vec<f32> {
            self.map
                .get(text)
                .cloned()
                .unwrap_or_else(|| vec![0.0; self.dim])
        }
    }

    fn corpus(entries: &[(&str, &[f32])]) -> HashMap<String, Vec<f32>> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_vec()))
            .collect()
    }

    #[test]
    fn test_no_usable_queries_fails_fast() {
        let provider = FixedProvider::new(2, &[]);
        let trainer = PosNegTrainer::new(&provider, TrainerConfig::default());
        let docs = corpus(&[("d1", &[1.0, 0.0])]);

        // Unlabeled query
        let queries = vec![TrainingQuery::new("q1", "text", None)];
        assert!(trainer.train(&docs, &queries, &CancelToken::new()).is_err());

        // Label points outside the corpus
        let queries = vec![TrainingQuery::new("q1", "text", Some("missing"))];
        assert!(trainer.train(&docs, &queries, &CancelToken::new()).is_err());
    }

    #[test]
    fn test_learns_positive_direction() {
        let provider = FixedProvider::new(2, &[("query one", &[1.0, 0.0])]);
        let config = TrainerConfig {
            clip_enabled: false,
            ..Default::default()
        };
        let trainer = PosNegTrainer::new(&provider, config);
        let docs = corpus(&[("d1", &[1.0, 2.0])]);

        let queries = vec![TrainingQuery::new("q1", "query one", Some("d1"))];
        let result = trainer.train(&docs, &queries, &CancelToken::new()).unwrap();

        // direction = d1 - query = [0, 2]
        assert_eq!(result.delta_vector, vec![0.0, 2.0]);
        assert!((result.delta_norm - 2.0).abs() < 1e-6);
        assert!(!result.is_cancelled);
        assert_eq!(result.stats.case_count, 1);
        assert_eq!(result.stats.pair_count, 1);
        assert_eq!(result.training_mode, "posneg");
    }

    #[test]
    fn test_clipping_rescales_to_max_norm() {
        let provider = FixedProvider::new(2, &[("q", &[0.0, 0.0])]);
        let config = TrainerConfig {
            clip_enabled: true,
            max_delta_norm: 1.5,
            ..Default::default()
        };
        let trainer = PosNegTrainer::new(&provider, config);
        let docs = corpus(&[("d1", &[3.0, 4.0])]); // direction norm 5

        let queries = vec![TrainingQuery::new("q1", "q", Some("d1"))];
        let result = trainer.train(&docs, &queries, &CancelToken::new()).unwrap();

        assert!(result.stats.clip_applied);
        assert!((result.stats.pre_clip_norm - 5.0).abs() < 1e-5);
        assert!((result.delta_norm - 1.5).abs() < 1e-5);
        // Direction preserved under rescale
        assert!((result.delta_vector[0] / result.delta_vector[1] - 0.75).abs() < 1e-5);
    }

    #[test]
    fn test_cancel_out_gate_and_heuristic() {
        // Two corrections of norm 1 pointing in opposite directions.
        let provider =
            FixedProvider::new(2, &[("left", &[1.0, 0.0]), ("right", &[3.0, 0.0])]);
        let trainer = PosNegTrainer::new(&provider, TrainerConfig::default());
        let docs = corpus(&[("d1", &[2.0, 0.0])]);

        let queries = vec![
            TrainingQuery::new("q1", "left", Some("d1")),
            TrainingQuery::new("q2", "right", Some("d1")),
        ];
        let result = trainer.train(&docs, &queries, &CancelToken::new()).unwrap();

        assert!(result.is_cancelled);
        assert!(result.cancel_reason.is_some());
        assert!(result.stats.cancel_out_suspected);
        assert!(result.delta_norm <= result.cancel_out_epsilon);
        assert_eq!(result.stats.zero_direction_count, 0);
    }

    #[test]
    fn test_cancel_gate_boundary() {
        let provider = FixedProvider::new(2, &[("q", &[1.0, 0.0])]);
        let docs = corpus(&[("d1", &[1.0005, 0.0])]); // direction norm 0.0005

        let cancelled = PosNegTrainer::new(
            &provider,
            TrainerConfig {
                cancel_epsilon: 0.001,
                ..Default::default()
            },
        )
        .train(&docs, &[TrainingQuery::new("q1", "q", Some("d1"))], &CancelToken::new())
        .unwrap();
        assert!(cancelled.is_cancelled);

        let kept = PosNegTrainer::new(
            &provider,
            TrainerConfig {
                cancel_epsilon: 0.0001,
                ..Default::default()
            },
        )
        .train(&docs, &[TrainingQuery::new("q1", "q", Some("d1"))], &CancelToken::new())
        .unwrap();
        assert!(!kept.is_cancelled);
    }

    #[test]
    fn test_cancellation_token_aborts() {
        let provider = FixedProvider::new(2, &[("q", &[1.0, 0.0])]);
        let trainer = PosNegTrainer::new(&provider, TrainerConfig::default());
        let docs = corpus(&[("d1", &[0.0, 1.0])]);
        let queries = vec![TrainingQuery::new("q1", "q", Some("d1"))];

        let cancel = CancelToken::new();
        cancel.cancel();
        assert!(trainer.train(&docs, &queries, &cancel).is_err());
    }

    #[test]
    fn test_dimension_mismatch_in_corpus_is_hard_error() {
        let provider = FixedProvider::new(2, &[("q", &[1.0, 0.0])]);
        let trainer = PosNegTrainer::new(&provider, TrainerConfig::default());
        let docs = corpus(&[("d1", &[1.0, 0.0, 0.0])]);
        let queries = vec![TrainingQuery::new("q1", "q", Some("d1"))];

        let err = trainer
            .train(&docs, &queries, &CancelToken::new())
            .unwrap_err();
        assert!(err.to_string().contains("dimension"));
    }

    #[test]
    fn test_hard_negatives_change_the_delta() {
        let provider = FixedProvider::new(2, &[("q", &[1.0, 0.0])]);
        let docs = corpus(&[("answer", &[1.0, 1.0]), ("distractor", &[2.0, 0.0])]);
        let queries = vec![TrainingQuery::new("q1", "q", Some("answer"))];

        let plain = PosNegTrainer::new(&provider, TrainerConfig::default())
            .train(&docs, &queries, &CancelToken::new())
            .unwrap();

        let with_negatives = PosNegTrainer::new(
            &provider,
            TrainerConfig {
                hardneg_topk: 1,
                hardneg_weight: 0.5,
                ..Default::default()
            },
        )
        .train(&docs, &queries, &CancelToken::new())
        .unwrap();

        assert_eq!(with_negatives.training_mode, "posneg+hardneg");
        // distractor direction = [1, 0]; subtracted at weight 0.5
        assert!((plain.delta_vector[0] - with_negatives.delta_vector[0] - 0.5).abs() < 1e-5);
        assert_eq!(plain.delta_vector[1], with_negatives.delta_vector[1]);
    }

    #[test]
    fn test_improvements_measured_against_baseline() {
        // Queries embed near the wrong document; the learned delta moves
        // them toward their answers, so map@1 must improve.
        let embedder = HashEmbedder::new(32, &["damage", "claims"]).unwrap();
        let docs = corpus(&[
            ("doc-damage", &embedder.embed("damage damage damage")[..]),
            ("doc-claims", &embedder.embed("claims claims claims")[..]),
        ]);
        let queries = vec![
            TrainingQuery::new("q1", "claims damage damage", Some("doc-damage")),
            TrainingQuery::new("q2", "damage claims claims", Some("doc-claims")),
        ];

        let trainer = PosNegTrainer::new(&embedder, TrainerConfig::default());
        let result = trainer.train(&docs, &queries, &CancelToken::new()).unwrap();

        assert_eq!(result.comparison_runs, 2);
        // No prior configured: the First run is the identity
        assert_eq!(result.improvement_first, 0.0);
        assert!(result.improvement_first_plus_delta >= 0.0);
        assert!(
            (result.delta_improvement
                - (result.improvement_first_plus_delta - result.improvement_first))
                .abs()
                < 1e-12
        );
    }
}
