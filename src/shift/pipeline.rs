//! Ordered composition of shifts.
//!
//! A pipeline takes an unordered collection of shifts and immediately
//! computes the canonical application order: ascending stage (`First`
//! before `Delta`), then ascending name (ordinal string compare). The
//! order is fixed at construction and reused on every apply - it is never
//! re-sorted per call.

use super::Shift;

/// A fixed-order composition of shifts applied to one vector.
///
/// Applying an empty pipeline leaves the vector bit-identical. Apply
/// mutates the caller's vector; callers needing the original must copy
/// beforehand.
pub struct ShiftPipeline {
    shifts: Vec<Box<dyn Shift>>,
}

impl ShiftPipeline {
    /// Build a pipeline, sorting the shifts into canonical order once.
    pub fn new(mut shifts: Vec<Box<dyn Shift>>) -> Self {
        shifts.sort_by(|a, b| {
            a.stage()
                .cmp(&b.stage())
                .then_with(|| a.name().cmp(b.name()))
        });
        Self { shifts }
    }

    /// An empty (identity) pipeline.
    pub fn identity() -> Self {
        Self { shifts: Vec::new() }
    }

    /// Apply every shift in canonical order, mutating `vector` in place.
    pub fn apply(&self, vector: &mut [f32]) {
        for shift in &self.shifts {
            shift.apply_in_place(vector);
        }
    }

    /// Pure application: returns a shifted copy, input untouched.
    pub fn apply_to(&self, vector: &[f32]) -> Vec<f32> {
        let mut out = vector.to_vec();
        self.apply(&mut out);
        out
    }

    pub fn len(&self) -> usize {
        self.shifts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shifts.is_empty()
    }

    /// Shift names in execution order (diagnostics).
    pub fn names(&self) -> Vec<&str> {
        self.shifts.iter().map(|s| s.name()).collect()
    }
}
