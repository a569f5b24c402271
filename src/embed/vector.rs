//! Vector math for fixed-dimension embedding vectors.
//!
//! Contracts, applied uniformly across the engine:
//! - Comparing or combining two vectors of different dimensions is a hard
//!   failure, surfaced immediately. No silent truncation or padding.
//! - The one sanctioned exception is [`fit_to_dim`], an intentional,
//!   clearly-named truncate-or-zero-pad used when adapting a persisted
//!   delta vector to the engine dimension.
//! - Cosine similarity against a zero-norm vector is `0.0`, never a
//!   division by zero.

use anyhow::{bail, Result};

/// L2 norm of a vector.
pub fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Cosine similarity `dot / (‖a‖·‖b‖)`.
///
/// Returns `0.0` when either vector has zero norm. Errors on dimension
/// mismatch - callers compare like with like or not at all.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f32> {
    if a.len() != b.len() {
        bail!(
            "cosine similarity dimension mismatch: {} vs {}",
            a.len(),
            b.len()
        );
    }

    let norm_a = l2_norm(a);
    let norm_b = l2_norm(b);
    if norm_a == 0.0 || norm_b == 0.0 {
        return Ok(0.0);
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    Ok(dot / (norm_a * norm_b))
}

/// Element-wise difference `a - b`.
///
/// Errors on dimension mismatch (same contract as [`cosine_similarity`]).
pub fn difference(a: &[f32], b: &[f32]) -> Result<Vec<f32>> {
    if a.len() != b.len() {
        bail!("vector difference dimension mismatch: {} vs {}", a.len(), b.len());
    }
    Ok(a.iter().zip(b.iter()).map(|(x, y)| x - y).collect())
}

/// Accumulate `target += scale * other` in place.
///
/// # Panics
///
/// Panics on dimension mismatch; accumulation targets are always
/// engine-allocated, so a mismatch is a programming error.
pub fn add_scaled(target: &mut [f32], other: &[f32], scale: f32) {
    assert_eq!(
        target.len(),
        other.len(),
        "add_scaled dimension mismatch"
    );
    for (t, o) in target.iter_mut().zip(other.iter()) {
        *t += scale * o;
    }
}

/// Rescale a vector in place so its L2 norm equals `target_norm`.
///
/// A zero vector is left unchanged (there is no direction to preserve).
pub fn rescale_to_norm(v: &mut [f32], target_norm: f32) {
    let norm = l2_norm(v);
    if norm == 0.0 {
        return;
    }
    let scale = target_norm / norm;
    for x in v.iter_mut() {
        *x *= scale;
    }
}

/// Truncate or zero-pad a vector to `dim` elements.
///
/// This is the documented exception to the hard dimension-mismatch rule:
/// a caller-supplied delta vector (e.g. read from a persisted training
/// result produced at a different dimension) is explicitly adapted here
/// before entering the engine. Every other path errors on mismatch.
pub fn fit_to_dim(v: &[f32], dim: usize) -> Vec<f32> {
    let mut out = Vec::with_capacity(dim);
    out.extend(v.iter().take(dim).copied());
    out.resize(dim, 0.0);
    out
}
