//! Deterministic embedding provider.
//!
//! The engine never depends on how a vector was produced, only that
//! repeated calls with identical text are identical within one provider
//! configuration. [`HashEmbedder`] satisfies that contract with a
//! keyword-count layout plus hashed token counts - a simulation that
//! stands in for a real embedding model.
//!
//! ## Vector layout
//!
//! ```text
//! [0 .. keywords.len())      keyword counts ("damage", "claims", ...)
//! [keywords.len() .. dim)    hashed token counts for all tokens
//! ```
//!
//! Keyword counts occupy reserved, *named* dimensions so that domain
//! experiments (the keyword boost shift) can address them directly. The
//! final vector is L2-normalized so cosine ranking is scale-free.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use anyhow::{bail, Result};

use super::vector::{l2_norm, rescale_to_norm};

/// Produces fixed-dimension embedding vectors from text.
pub trait EmbeddingProvider {
    /// The fixed dimension of every vector this provider produces.
    fn dim(&self) -> usize;

    /// Embed one text. Deterministic: identical text, identical vector.
    fn embed(&self, text: &str) -> Vec<f32>;
}

/// Mapping from keyword to its reserved dimension index.
///
/// The layout is fixed at construction; index `i` belongs to `keywords[i]`.
#[derive(Debug, Clone, Default)]
pub struct KeywordLayout {
    keywords: Vec<String>,
}

impl KeywordLayout {
    pub fn new(keywords: &[impl AsRef<str>]) -> Self {
        Self {
            keywords: keywords.iter().map(|k| k.as_ref().to_lowercase()).collect(),
        }
    }

    /// Reserved dimension index for a keyword, if it is in the layout.
    pub fn index_of(&self, keyword: &str) -> Option<usize> {
        let needle = keyword.to_lowercase();
        self.keywords.iter().position(|k| *k == needle)
    }

    pub fn len(&self) -> usize {
        self.keywords.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keywords.is_empty()
    }

    pub fn keywords(&self) -> &[String] {
        &self.keywords
    }
}

/// Deterministic hash-based embedder.
///
/// Tokenizes on non-alphanumeric boundaries, lowercases, counts keywords
/// into their reserved dimensions, and hashes every token into the
/// remaining dimensions. Same text in, same vector out.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dim: usize,
    layout: KeywordLayout,
}

impl HashEmbedder {
    /// Create an embedder with `dim` dimensions and the given keyword
    /// vocabulary reserved at the front of the vector.
    ///
    /// Errors when the keyword layout does not leave at least one hashed
    /// dimension.
    pub fn new(dim: usize, keywords: &[impl AsRef<str>]) -> Result<Self> {
        let layout = KeywordLayout::new(keywords);
        if layout.len() >= dim {
            bail!(
                "embedding dimension {} too small for {} reserved keyword dimensions",
                dim,
                layout.len()
            );
        }
        Ok(Self { dim, layout })
    }

    pub fn layout(&self) -> &KeywordLayout {
        &self.layout
    }

    fn hashed_index(&self, token: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        token.hash(&mut hasher);
        let span = self.dim - self.layout.len();
        self.layout.len() + (hasher.finish() as usize % span)
    }
}

impl EmbeddingProvider for HashEmbedder {
    fn dim(&self) -> usize {
        self.dim
    }

    fn embed(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dim];

        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let token = token.to_lowercase();
            if let Some(idx) = self.layout.index_of(&token) {
                vector[idx] += 1.0;
            }
            vector[self.hashed_index(&token)] += 1.0;
        }

        if l2_norm(&vector) > 0.0 {
            rescale_to_norm(&mut vector, 1.0);
        }
        vector
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn embedder() -> HashEmbedder {
        HashEmbedder::new(32, &["damage", "claims", "flood"]).unwrap()
    }

    #[test]
    fn test_fixed_dimension() {
        let e = embedder();
        assert_eq!(e.embed("").len(), 32);
        assert_eq!(e.embed("storm damage claim report").len(), 32);
    }

    #[test]
    fn test_deterministic() {
        let e = embedder();
        let a = e.embed("flood damage in the basement");
        let b = e.embed("flood damage in the basement");
        assert_eq!(a, b);
    }

    #[test]
    fn test_keyword_dimensions_count_occurrences() {
        let e = HashEmbedder::new(32, &["damage", "claims", "flood"]).unwrap();
        let v = e.embed("flood flood damage");

        // Normalized, so compare relative magnitude: flood appeared twice,
        // damage once, claims never.
        assert!(v[2] > v[0]);
        assert!(v[0] > 0.0);
        assert_eq!(v[1], 0.0);
    }

    #[test]
    fn test_normalized() {
        let e = embedder();
        let v = e.embed("some arbitrary query text");
        assert!((l2_norm(&v) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_empty_text_is_zero_vector() {
        let e = embedder();
        let v = e.embed("   ");
        assert!(v.iter().all(|&x| x == 0.0));
    }

    #[test]
    fn test_dim_too_small_for_keywords() {
        assert!(HashEmbedder::new(3, &["a", "b", "c"]).is_err());
        assert!(HashEmbedder::new(4, &["a", "b", "c"]).is_ok());
    }

    #[test]
    fn test_layout_index_lookup() {
        let layout = KeywordLayout::new(&["Damage", "claims"]);
        assert_eq!(layout.index_of("damage"), Some(0));
        assert_eq!(layout.index_of("CLAIMS"), Some(1));
        assert_eq!(layout.index_of("flood"), None);
    }
}
