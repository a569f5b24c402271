//! Concrete shift variants.
//!
//! | Variant             | Effect                                  | Stage    |
//! |---------------------|-----------------------------------------|----------|
//! | `NoShift`           | identity                                | First    |
//! | `AdditiveShift`     | `out[i] = in[i] + bias[i]`              | First    |
//! | `MultiplicativeShift` | `out[i] = in[i] * factor[i]`          | First    |
//! | `WeightedStageShift` | `out[i] = in[i] + w * shift[i]`        | tagged   |
//! | `RandomNoiseShift`  | `out[i] = in[i] + amp * rng(-1..1)`     | First    |
//! | `KeywordBoostShift` | additive boost on named keyword dims    | First    |
//!
//! Multiplicative factors support a clamp-and-guard mode that prevents
//! zero-collapse: factors are clamped to `[0.25, 4.0]` and near-zero
//! factors are replaced by the identity factor `1.0`.

use std::sync::Mutex;

use anyhow::{bail, Result};
use rand::prelude::*;

use super::Shift;
use crate::embed::provider::KeywordLayout;
use crate::types::Stage;

/// Lower clamp bound for multiplicative factors.
pub const FACTOR_CLAMP_MIN: f32 = 0.25;
/// Upper clamp bound for multiplicative factors.
pub const FACTOR_CLAMP_MAX: f32 = 4.0;
/// Default guard threshold: factors with `|f|` below this become `1.0`.
pub const DEFAULT_FACTOR_GUARD: f32 = 1e-6;

/// Identity shift. Also serves as the always-included fallback candidate
/// in adaptive selection, so `apply` must hand back storage the caller
/// can mutate without touching the input.
#[derive(Debug, Clone, Default)]
pub struct NoShift;

impl NoShift {
    pub fn new() -> Self {
        Self
    }
}

impl Shift for NoShift {
    fn name(&self) -> &str {
        "identity"
    }

    fn apply_in_place(&self, _vector: &mut [f32]) {}
}

/// Additive bias: `out[i] = in[i] + bias[i]`.
#[derive(Debug, Clone)]
pub struct AdditiveShift {
    name: String,
    bias: Vec<f32>,
}

impl AdditiveShift {
    pub fn new(name: impl Into<String>, bias: Vec<f32>) -> Self {
        Self { name: name.into(), bias }
    }

    pub fn bias(&self) -> &[f32] {
        &self.bias
    }
}

impl Shift for AdditiveShift {
    fn name(&self) -> &str {
        &self.name
    }

    /// # Panics
    ///
    /// Panics when the vector dimension differs from the bias dimension.
    fn apply_in_place(&self, vector: &mut [f32]) {
        assert_eq!(
            vector.len(),
            self.bias.len(),
            "additive shift '{}' dimension mismatch",
            self.name
        );
        for (v, b) in vector.iter_mut().zip(self.bias.iter()) {
            *v += b;
        }
    }
}

/// Per-dimension multiplicative scale: `out[i] = in[i] * factor[i]`.
///
/// In clamp-and-guard mode the effective factors are fixed at
/// construction time, so repeated application with identity factors is
/// exactly idempotent and no NaN/Inf can enter the vector.
#[derive(Debug, Clone)]
pub struct MultiplicativeShift {
    name: String,
    factors: Vec<f32>,
}

impl MultiplicativeShift {
    /// Raw mode: factors applied as given, no bounds.
    pub fn raw(name: impl Into<String>, factors: Vec<f32>) -> Self {
        Self { name: name.into(), factors }
    }

    /// Clamp-and-guard mode: each factor with `|f| < guard` becomes `1.0`
    /// (identity for that dimension), everything else is clamped to
    /// `[0.25, 4.0]`.
    pub fn clamped(name: impl Into<String>, factors: Vec<f32>, guard: f32) -> Self {
        let factors = factors
            .into_iter()
            .map(|f| {
                if f.abs() < guard || !f.is_finite() {
                    1.0
                } else {
                    f.clamp(FACTOR_CLAMP_MIN, FACTOR_CLAMP_MAX)
                }
            })
            .collect();
        Self { name: name.into(), factors }
    }

    pub fn factors(&self) -> &[f32] {
        &self.factors
    }
}

impl Shift for MultiplicativeShift {
    fn name(&self) -> &str {
        &self.name
    }

    /// # Panics
    ///
    /// Panics when the vector dimension differs from the factor dimension.
    fn apply_in_place(&self, vector: &mut [f32]) {
        assert_eq!(
            vector.len(),
            self.factors.len(),
            "multiplicative shift '{}' dimension mismatch",
            self.name
        );
        for (v, f) in vector.iter_mut().zip(self.factors.iter()) {
            *v *= f;
        }
    }
}

/// Stage-tagged weighted additive shift: `out[i] = in[i] + weight * shift[i]`.
///
/// Numerically identical to an additive shift; the stage tag is what
/// orders it inside a pipeline (First = coarse prior, Delta = learned
/// correction applied afterward).
#[derive(Debug, Clone)]
pub struct WeightedStageShift {
    name: String,
    stage: Stage,
    weight: f32,
    shift: Vec<f32>,
}

impl WeightedStageShift {
    pub fn first(name: impl Into<String>, weight: f32, shift: Vec<f32>) -> Self {
        Self { name: name.into(), stage: Stage::First, weight, shift }
    }

    pub fn delta(name: impl Into<String>, weight: f32, shift: Vec<f32>) -> Self {
        Self { name: name.into(), stage: Stage::Delta, weight, shift }
    }

    pub fn shift_vector(&self) -> &[f32] {
        &self.shift
    }
}

impl Shift for WeightedStageShift {
    fn name(&self) -> &str {
        &self.name
    }

    fn stage(&self) -> Stage {
        self.stage
    }

    fn weight(&self) -> f32 {
        self.weight
    }

    /// # Panics
    ///
    /// Panics when the vector dimension differs from the shift dimension.
    fn apply_in_place(&self, vector: &mut [f32]) {
        assert_eq!(
            vector.len(),
            self.shift.len(),
            "weighted shift '{}' dimension mismatch",
            self.name
        );
        for (v, s) in vector.iter_mut().zip(self.shift.iter()) {
            *v += self.weight * s;
        }
    }
}

/// Seeded stochastic additive noise: `out[i] = in[i] + amplitude * u`,
/// `u ~ uniform(-1, 1)`.
///
/// The generator is owned exclusively by this instance; sharing one
/// across concurrently-evaluated candidates would interleave draws and
/// break reproducibility. Amplitude zero is a strict no-op: no draws are
/// consumed, so the sequence position is unaffected.
pub struct RandomNoiseShift {
    name: String,
    amplitude: f32,
    rng: Mutex<StdRng>,
}

impl RandomNoiseShift {
    pub fn new(name: impl Into<String>, seed: u64, amplitude: f32) -> Self {
        Self {
            name: name.into(),
            amplitude,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl Shift for RandomNoiseShift {
    fn name(&self) -> &str {
        &self.name
    }

    fn apply_in_place(&self, vector: &mut [f32]) {
        if self.amplitude == 0.0 {
            return;
        }
        let mut rng = self.rng.lock().expect("noise rng poisoned");
        for v in vector.iter_mut() {
            *v += self.amplitude * rng.gen_range(-1.0f32..1.0f32);
        }
    }
}

/// Boosts named keyword dimensions of a [`KeywordLayout`].
///
/// Internally just an additive shift whose bias is zero everywhere except
/// the named dimensions - the numeric contract is identical.
#[derive(Debug, Clone)]
pub struct KeywordBoostShift {
    inner: AdditiveShift,
}

impl KeywordBoostShift {
    /// Build a boost over the named keywords.
    ///
    /// Errors when a keyword is not in the layout or a named dimension
    /// falls outside `dim` - boosting a dimension that does not exist is
    /// a configuration mistake, not something to paper over.
    pub fn new(
        name: impl Into<String>,
        layout: &KeywordLayout,
        boosts: &[(&str, f32)],
        dim: usize,
    ) -> Result<Self> {
        let mut bias = vec![0.0f32; dim];
        for (keyword, boost) in boosts {
            let Some(idx) = layout.index_of(keyword) else {
                bail!("keyword '{}' is not in the layout", keyword);
            };
            if idx >= dim {
                bail!(
                    "keyword '{}' maps to dimension {} outside dim {}",
                    keyword,
                    idx,
                    dim
                );
            }
            bias[idx] += boost;
        }
        Ok(Self {
            inner: AdditiveShift::new(name, bias),
        })
    }
}

impl Shift for KeywordBoostShift {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn apply_in_place(&self, vector: &mut [f32]) {
        self.inner.apply_in_place(vector);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_noshift_returns_independent_copy() {
        let shift = NoShift::new();
        let mut input = vec![1.0, 2.0, 3.0];
        let output = shift.apply(&input);

        assert_eq!(output, input);

        // Mutating the input must not change the previously-returned copy
        input[0] = 99.0;
        assert_eq!(output, vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_additive() {
        let shift = AdditiveShift::new("bias", vec![0.5, -1.0, 2.0]);
        let out = shift.apply(&[1.0, 1.0, 1.0]);
        assert_eq!(out, vec![1.5, 0.0, 3.0]);
    }

    #[test]
    #[should_panic(expected = "dimension mismatch")]
    fn test_additive_dimension_mismatch_panics() {
        let shift = AdditiveShift::new("bias", vec![0.5, -1.0]);
        let mut v = vec![1.0, 1.0, 1.0];
        shift.apply_in_place(&mut v);
    }

    #[test]
    fn test_multiplicative_raw() {
        let shift = MultiplicativeShift::raw("scale", vec![2.0, 0.0, -1.0]);
        let out = shift.apply(&[3.0, 5.0, 7.0]);
        assert_eq!(out, vec![6.0, 0.0, -7.0]);
    }

    #[test]
    fn test_multiplicative_clamp_and_guard() {
        // 100 clamps to 4, 0.01 clamps to 0.25, 0 is guarded to identity
        let shift =
            MultiplicativeShift::clamped("scale", vec![100.0, 0.01, 0.0], DEFAULT_FACTOR_GUARD);
        let out = shift.apply(&[1.0, 1.0, 1.0]);
        assert_eq!(out, vec![4.0, 0.25, 1.0]);
    }

    #[test]
    fn test_multiplicative_tiny_factors_stay_finite() {
        let shift = MultiplicativeShift::clamped(
            "scale",
            vec![1e-12, -1e-12, f32::NAN],
            DEFAULT_FACTOR_GUARD,
        );
        let out = shift.apply(&[1.0, 1.0, 1.0]);
        assert!(out.iter().all(|x| x.is_finite()));
        assert_eq!(out, vec![1.0, 1.0, 1.0]);
    }

    #[test]
    fn test_multiplicative_identity_idempotent() {
        let shift = MultiplicativeShift::clamped("scale", vec![1.0, 1.0], DEFAULT_FACTOR_GUARD);
        let mut v = vec![0.3, -0.7];
        shift.apply_in_place(&mut v);
        shift.apply_in_place(&mut v);
        shift.apply_in_place(&mut v);
        assert_eq!(v, vec![0.3, -0.7]);
    }

    #[test]
    fn test_weighted_stage_arithmetic() {
        let shift = WeightedStageShift::first("prior", 1.0, vec![10.0, 20.0, 30.0]);
        let out = shift.apply(&[1.0, 2.0, 3.0]);
        assert_eq!(out, vec![11.0, 22.0, 33.0]);

        let half = WeightedStageShift::delta("learned", 0.5, vec![10.0, 20.0, 30.0]);
        let out = half.apply(&[1.0, 2.0, 3.0]);
        assert_eq!(out, vec![6.0, 12.0, 18.0]);
    }

    #[test]
    fn test_weighted_stage_tags() {
        assert_eq!(
            WeightedStageShift::first("a", 1.0, vec![]).stage(),
            Stage::First
        );
        assert_eq!(
            WeightedStageShift::delta("a", 1.0, vec![]).stage(),
            Stage::Delta
        );
    }

    #[test]
    fn test_noise_zero_amplitude_is_noop() {
        let shift = RandomNoiseShift::new("noise", 7, 0.0);
        let input = vec![0.1, 0.2, 0.3];
        assert_eq!(shift.apply(&input), input);
        // Repeated application stays a no-op (no draws consumed)
        assert_eq!(shift.apply(&input), input);
    }

    #[test]
    fn test_noise_same_seed_reproduces() {
        let a = RandomNoiseShift::new("noise", 1234, 0.05);
        let b = RandomNoiseShift::new("noise", 1234, 0.05);

        let input = vec![0.0; 16];
        let out_a1 = a.apply(&input);
        let out_b1 = b.apply(&input);
        for (x, y) in out_a1.iter().zip(out_b1.iter()) {
            assert!((x - y).abs() < 1e-5);
        }

        // Second draws also match: the whole sequence is reproducible
        let out_a2 = a.apply(&input);
        let out_b2 = b.apply(&input);
        assert_eq!(out_a2, out_b2);
        assert_ne!(out_a1, out_a2);
    }

    #[test]
    fn test_noise_bounded_by_amplitude() {
        let shift = RandomNoiseShift::new("noise", 9, 0.1);
        let out = shift.apply(&[0.0; 64]);
        assert!(out.iter().all(|x| x.abs() <= 0.1));
    }

    #[test]
    fn test_keyword_boost() {
        let layout = KeywordLayout::new(&["damage", "claims", "flood"]);
        let shift =
            KeywordBoostShift::new("kw", &layout, &[("flood", 0.5), ("damage", 0.25)], 8).unwrap();

        let out = shift.apply(&[0.0; 8]);
        assert_eq!(out[0], 0.25); // damage
        assert_eq!(out[1], 0.0); // claims, unboosted
        assert_eq!(out[2], 0.5); // flood
        assert!(out[3..].iter().all(|&x| x == 0.0));
    }

    #[test]
    fn test_keyword_boost_unknown_keyword_errors() {
        let layout = KeywordLayout::new(&["damage"]);
        assert!(KeywordBoostShift::new("kw", &layout, &[("hail", 1.0)], 8).is_err());
    }
}
