//! Adaptive shift generation and selection.
//!
//! At query time the engine turns the persisted training artifact into a
//! candidate shift and lets the evaluator pick the best option for the
//! query at hand:
//!
//! ```text
//! result store ──▶ generator ──▶ [identity, learned-delta?] ──▶ selector
//!                                                                 │
//!                              best cosine vs references ◀────────┘
//! ```
//!
//! The identity fallback is always generated first, so it wins any tie -
//! a learned shift has to be strictly better to be selected. A
//! configuration switch forces baseline-only mode, which bypasses
//! generation entirely and is used to produce fair A/B baselines.

use anyhow::Result;

use crate::embed::vector::{cosine_similarity, fit_to_dim};
use crate::eval::metrics::Reference;
use crate::shift::variants::{AdditiveShift, NoShift};
use crate::shift::Shift;
use crate::train::store::ResultStore;

/// Name given to the shift built from a persisted training result.
pub const LEARNED_SHIFT_NAME: &str = "learned-delta";

/// Configuration for adaptive generation and selection.
#[derive(Debug, Clone)]
pub struct AdaptiveConfig {
    /// Workflow whose training results feed the generator.
    pub workflow_name: String,
    /// Engine embedding dimension; persisted deltas are fitted to it.
    pub dim: usize,
    /// Opt in to building shifts from cancelled training results.
    pub include_cancelled: bool,
    /// Bypass candidate generation and always select the identity shift.
    pub baseline_only: bool,
}

impl AdaptiveConfig {
    pub fn new(workflow_name: impl Into<String>, dim: usize) -> Self {
        Self {
            workflow_name: workflow_name.into(),
            dim,
            include_cancelled: false,
            baseline_only: false,
        }
    }
}

/// Builds the candidate shift list for a workflow.
pub struct AdaptiveShiftGenerator<'a, S: ResultStore> {
    store: &'a S,
    config: AdaptiveConfig,
}

impl<'a, S: ResultStore> AdaptiveShiftGenerator<'a, S> {
    pub fn new(store: &'a S, config: AdaptiveConfig) -> Self {
        Self { store, config }
    }

    /// Generate candidates, identity fallback always first.
    ///
    /// A learned candidate is added only when a usable result exists for
    /// the workflow: non-empty delta vector, and non-cancelled unless the
    /// config opts in. The persisted delta is fitted (truncate/zero-pad)
    /// to the engine dimension, the one sanctioned dimension adaptation.
    pub fn generate(&self) -> Result<Vec<Box<dyn Shift>>> {
        let mut candidates: Vec<Box<dyn Shift>> = vec![Box::new(NoShift::new())];

        let result = self
            .store
            .load_best(&self.config.workflow_name, self.config.include_cancelled)?;

        if let Some(result) = result {
            if result.is_usable(self.config.include_cancelled) {
                let bias = fit_to_dim(&result.delta_vector, self.config.dim);
                candidates.push(Box::new(AdditiveShift::new(LEARNED_SHIFT_NAME, bias)));
            }
        }

        Ok(candidates)
    }
}

/// The candidate the selector settled on for one query.
#[derive(Debug, Clone)]
pub struct SelectedShift {
    /// Name of the winning candidate ("identity" or "learned-delta").
    pub name: String,
    /// The query embedding after applying the winning shift.
    pub shifted_query: Vec<f32>,
    /// Best cosine similarity the shifted query achieved against the
    /// reference set.
    pub score: f32,
}

/// Evaluates generated candidates for a query and picks the best one.
pub struct AdaptiveWorkflow<'a, S: ResultStore> {
    generator: AdaptiveShiftGenerator<'a, S>,
    baseline_only: bool,
}

impl<'a, S: ResultStore> AdaptiveWorkflow<'a, S> {
    pub fn new(store: &'a S, config: AdaptiveConfig) -> Self {
        let baseline_only = config.baseline_only;
        Self {
            generator: AdaptiveShiftGenerator::new(store, config),
            baseline_only,
        }
    }

    /// Score one candidate: the best cosine its shifted query achieves
    /// against any reference (0 with an empty reference set).
    fn score(shifted: &[f32], references: &[Reference]) -> Result<f32> {
        let mut best = f32::NEG_INFINITY;
        for reference in references {
            let sim = cosine_similarity(shifted, &reference.embedding)?;
            if sim > best {
                best = sim;
            }
        }
        Ok(if best == f32::NEG_INFINITY { 0.0 } else { best })
    }

    /// Select the best candidate shift for a query against a reference set.
    ///
    /// Candidates are scored in generation order and a later candidate
    /// must score strictly higher to displace an earlier one, so ties go
    /// to the identity fallback. In baseline-only mode generation is
    /// bypassed and the identity shift is returned unconditionally.
    pub fn run(&self, query: &[f32], references: &[Reference]) -> Result<SelectedShift> {
        if self.baseline_only {
            let identity = NoShift::new();
            let shifted = identity.apply(query);
            let score = Self::score(&shifted, references)?;
            return Ok(SelectedShift {
                name: identity.name().to_string(),
                shifted_query: shifted,
                score,
            });
        }

        let candidates = self.generator.generate()?;

        let mut selected: Option<SelectedShift> = None;
        for candidate in &candidates {
            let shifted = candidate.apply(query);
            let score = Self::score(&shifted, references)?;

            let wins = match &selected {
                None => true,
                Some(current) => score > current.score,
            };
            if wins {
                selected = Some(SelectedShift {
                    name: candidate.name().to_string(),
                    shifted_query: shifted,
                    score,
                });
            }
        }

        // The identity fallback is always generated, so there is always a
        // winner.
        Ok(selected.expect("candidate generation yielded no shifts"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::train::store::MemoryResultStore;
    use crate::types::{ShiftTrainingResult, TrainingStats};

    fn make_result(workflow: &str, delta: Vec<f32>, cancelled: bool) -> ShiftTrainingResult {
        let delta_norm = crate::embed::vector::l2_norm(&delta);
        ShiftTrainingResult {
            workflow_name: workflow.into(),
            created_utc: 1_700_000_000,
            base_directory: ".".into(),
            comparison_runs: 4,
            improvement_first: 0.0,
            improvement_first_plus_delta: 0.2,
            delta_improvement: 0.2,
            delta_vector: delta,
            training_mode: "posneg".into(),
            cancel_out_epsilon: 0.001,
            is_cancelled: cancelled,
            cancel_reason: cancelled.then(|| "norm below epsilon".into()),
            delta_norm,
            scope_id: "default".into(),
            stats: TrainingStats::default(),
        }
    }

    fn config(workflow: &str, dim: usize) -> AdaptiveConfig {
        AdaptiveConfig::new(workflow, dim)
    }

    #[test]
    fn test_generator_always_yields_identity_first() {
        let store = MemoryResultStore::new();
        let generator = AdaptiveShiftGenerator::new(&store, config("claims", 4));

        let candidates = generator.generate().unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].name(), "identity");
    }

    #[test]
    fn test_generator_adds_learned_candidate() {
        let store =
            MemoryResultStore::with_results(vec![make_result("claims", vec![2.0, 0.0], false)]);
        let generator = AdaptiveShiftGenerator::new(&store, config("claims", 4));

        let candidates = generator.generate().unwrap();
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].name(), "identity");
        assert_eq!(candidates[1].name(), LEARNED_SHIFT_NAME);

        // Persisted 2-dim delta fitted (zero-padded) to the engine dim
        let shifted = candidates[1].apply(&[0.0, 0.0, 0.0, 0.0]);
        assert_eq!(shifted, vec![2.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_cancelled_result_excluded_by_default() {
        let store =
            MemoryResultStore::with_results(vec![make_result("claims", vec![2.0, 0.0], true)]);

        let generator = AdaptiveShiftGenerator::new(&store, config("claims", 4));
        assert_eq!(generator.generate().unwrap().len(), 1);

        let mut opted_in = config("claims", 4);
        opted_in.include_cancelled = true;
        let generator = AdaptiveShiftGenerator::new(&store, opted_in);
        assert_eq!(generator.generate().unwrap().len(), 2);
    }

    #[test]
    fn test_selector_picks_learned_shift_when_it_wins() {
        // Delta [2, 0, 0, 0] moves the query toward the reference axis:
        // the learned candidate scores strictly higher and the selected
        // shifted query's first dimension lands on 1 + 2 = 3.
        let store = MemoryResultStore::with_results(vec![make_result(
            "claims",
            vec![2.0, 0.0, 0.0, 0.0],
            false,
        )]);
        let workflow = AdaptiveWorkflow::new(&store, config("claims", 4));

        let query = [1.0, 1.0, 0.0, 0.0];
        let references = vec![Reference::new("r1", vec![1.0, 0.0, 0.0, 0.0])];

        let selected = workflow.run(&query, &references).unwrap();
        assert_eq!(selected.name, LEARNED_SHIFT_NAME);
        assert!((selected.shifted_query[0] - 3.0).abs() < 0.001);
    }

    #[test]
    fn test_selector_without_result_returns_identity_unmodified() {
        let store = MemoryResultStore::new();
        let workflow = AdaptiveWorkflow::new(&store, config("claims", 4));

        let query = [1.0, 0.5, 0.0, 0.0];
        let references = vec![Reference::new("r1", vec![1.0, 0.0, 0.0, 0.0])];

        let selected = workflow.run(&query, &references).unwrap();
        assert_eq!(selected.name, "identity");
        assert_eq!(selected.shifted_query, query.to_vec());
    }

    #[test]
    fn test_ties_go_to_the_fallback() {
        // Query already on the reference axis: adding the delta along the
        // same axis leaves the cosine identical, so the identity wins.
        let store = MemoryResultStore::with_results(vec![make_result(
            "claims",
            vec![2.0, 0.0, 0.0, 0.0],
            false,
        )]);
        let workflow = AdaptiveWorkflow::new(&store, config("claims", 4));

        let query = [1.0, 0.0, 0.0, 0.0];
        let references = vec![Reference::new("r1", vec![1.0, 0.0, 0.0, 0.0])];

        let selected = workflow.run(&query, &references).unwrap();
        assert_eq!(selected.name, "identity");
        assert!((selected.shifted_query[0] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_baseline_only_bypasses_generation() {
        let store = MemoryResultStore::with_results(vec![make_result(
            "claims",
            vec![2.0, 0.0, 0.0, 0.0],
            false,
        )]);
        let mut cfg = config("claims", 4);
        cfg.baseline_only = true;
        let workflow = AdaptiveWorkflow::new(&store, cfg);

        let query = [1.0, 1.0, 0.0, 0.0];
        let references = vec![Reference::new("r1", vec![1.0, 0.0, 0.0, 0.0])];

        let selected = workflow.run(&query, &references).unwrap();
        assert_eq!(selected.name, "identity");
        assert_eq!(selected.shifted_query, query.to_vec());
    }

    #[test]
    fn test_empty_reference_set_scores_zero() {
        let store = MemoryResultStore::new();
        let workflow = AdaptiveWorkflow::new(&store, config("claims", 2));

        let selected = workflow.run(&[1.0, 0.0], &[]).unwrap();
        assert_eq!(selected.score, 0.0);
        assert_eq!(selected.name, "identity");
    }
}
