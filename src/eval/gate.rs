//! Acceptance gate: blocks shifts that regress ranking quality.
//!
//! A gate compares the deltas of a baseline-vs-shift comparison against a
//! tolerance. Profiles select which metrics are checked:
//!
//! | Profile        | Checks                                      |
//! |----------------|---------------------------------------------|
//! | `rank`         | `map@1.delta`, `ndcg@3.delta`               |
//! | `rank+cosine`  | the above plus `cosine.delta`               |
//!
//! The cosine check exists for geometry-collapsing shifts (e.g. a zero
//! multiplicative shift) whose rankings happen to tie with baseline on a
//! tiny dataset while the underlying similarity structure has collapsed.
//!
//! A failing gate is a value, not an error; the CLI maps it to a distinct
//! non-zero exit code so automation can tell "ran but regressed" from
//! "failed to run".

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

use super::metrics::{ComparisonReport, METRIC_COSINE, METRIC_MAP, METRIC_NDCG};

/// Named metric-set selection for the acceptance gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GateProfile {
    /// Ranking-quality deltas only (default).
    Rank,
    /// Ranking-quality deltas plus the mean-cosine delta.
    RankCosine,
}

impl GateProfile {
    pub fn as_str(&self) -> &'static str {
        match self {
            GateProfile::Rank => "rank",
            GateProfile::RankCosine => "rank+cosine",
        }
    }

    /// Metric keys whose deltas this profile checks.
    fn checked_metrics(&self) -> &'static [&'static str] {
        match self {
            GateProfile::Rank => &[METRIC_MAP, METRIC_NDCG],
            GateProfile::RankCosine => &[METRIC_MAP, METRIC_NDCG, METRIC_COSINE],
        }
    }
}

impl std::str::FromStr for GateProfile {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "rank" => Ok(GateProfile::Rank),
            "rank+cosine" => Ok(GateProfile::RankCosine),
            other => bail!("unknown gate profile '{}' (expected 'rank' or 'rank+cosine')", other),
        }
    }
}

/// Outcome of one gate evaluation. Immutable after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateResult {
    pub passed: bool,
    pub epsilon: f64,
    /// One human-readable note per failing check.
    pub notes: Vec<String>,
}

/// Multi-metric acceptance gate.
///
/// Every checked delta must be `>= -epsilon`: the shift under test may
/// not make the metric measurably worse than baseline.
#[derive(Debug, Clone)]
pub struct AcceptanceGate {
    profile: GateProfile,
    epsilon: f64,
}

impl AcceptanceGate {
    pub fn new(profile: GateProfile, epsilon: f64) -> Self {
        Self { profile, epsilon }
    }

    /// Build a gate from a profile selector string, as passed on the CLI.
    pub fn from_profile(profile: &str, epsilon: f64) -> Result<Self> {
        Ok(Self::new(profile.parse()?, epsilon))
    }

    pub fn profile(&self) -> GateProfile {
        self.profile
    }

    /// Check every profiled metric delta against the tolerance.
    ///
    /// A metric key absent from the report is treated as a failing check
    /// with its own note - a silent pass would defeat the gate.
    pub fn evaluate(&self, report: &ComparisonReport) -> GateResult {
        let mut notes = Vec::new();

        for metric in self.profile.checked_metrics() {
            match report.delta(metric) {
                Some(delta) if delta >= -self.epsilon => {}
                Some(delta) => {
                    notes.push(format!(
                        "{} regressed: delta {:.6} is below tolerance -{:.6}",
                        metric, delta, self.epsilon
                    ));
                }
                None => {
                    notes.push(format!("{} missing from comparison metrics", metric));
                }
            }
        }

        GateResult {
            passed: notes.is_empty(),
            epsilon: self.epsilon,
            notes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::metrics::RankingMetrics;

    fn report(
        map_base: f64,
        map_shift: f64,
        ndcg_base: f64,
        ndcg_shift: f64,
        cos_base: f64,
        cos_shift: f64,
    ) -> ComparisonReport {
        ComparisonReport::from_runs(
            RankingMetrics {
                map_at_1: map_base,
                ndcg_at_3: ndcg_base,
                mean_best_cosine: cos_base,
                n_queries: 3,
            },
            RankingMetrics {
                map_at_1: map_shift,
                ndcg_at_3: ndcg_shift,
                mean_best_cosine: cos_shift,
                n_queries: 3,
            },
        )
    }

    #[test]
    fn test_profile_parsing() {
        assert_eq!("rank".parse::<GateProfile>().unwrap(), GateProfile::Rank);
        assert_eq!(
            "rank+cosine".parse::<GateProfile>().unwrap(),
            GateProfile::RankCosine
        );
        assert!("ranks".parse::<GateProfile>().is_err());
    }

    #[test]
    fn test_improvement_passes_rank_profile() {
        let gate = AcceptanceGate::from_profile("rank", 0.01).unwrap();
        let result = gate.evaluate(&report(0.9, 1.0, 0.9, 1.0, 0.8, 0.8));
        assert!(result.passed);
        assert!(result.notes.is_empty());
    }

    #[test]
    fn test_regression_fails_with_note() {
        let gate = AcceptanceGate::from_profile("rank", 0.01).unwrap();
        let result = gate.evaluate(&report(1.0, 0.5, 1.0, 1.0, 0.8, 0.8));
        assert!(!result.passed);
        assert_eq!(result.notes.len(), 1);
        assert!(result.notes[0].contains("map@1"));
    }

    #[test]
    fn test_small_regression_within_epsilon_passes() {
        let gate = AcceptanceGate::from_profile("rank", 0.01).unwrap();
        let result = gate.evaluate(&report(1.0, 0.995, 1.0, 0.995, 0.8, 0.8));
        assert!(result.passed);
    }

    #[test]
    fn test_cosine_collapse_caught_only_by_rank_cosine() {
        // Ranking ties with baseline, but the similarity structure collapsed.
        let collapsed = report(1.0, 1.0, 1.0, 1.0, 0.85, 0.0);

        let rank_gate = AcceptanceGate::from_profile("rank", 0.01).unwrap();
        assert!(rank_gate.evaluate(&collapsed).passed);

        let cosine_gate = AcceptanceGate::from_profile("rank+cosine", 0.01).unwrap();
        let result = cosine_gate.evaluate(&collapsed);
        assert!(!result.passed);
        assert!(result.notes[0].contains("cosine"));
    }

    #[test]
    fn test_epsilon_recorded_in_result() {
        let gate = AcceptanceGate::new(GateProfile::Rank, 0.02);
        let result = gate.evaluate(&report(1.0, 1.0, 1.0, 1.0, 0.8, 0.8));
        assert!((result.epsilon - 0.02).abs() < 1e-12);
    }
}
