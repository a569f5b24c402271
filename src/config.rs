//! Configuration loading from rankshift.toml.
//!
//! All engine knobs live in one explicit struct constructed at the
//! composition boundary (the CLI) and threaded by parameter into the
//! provider, shift, trainer, and gate constructors. Core algorithms never
//! read ambient process state.
//!
//! ## Example
//!
//! ```toml
//! dim = 1536
//! keywords = ["damage", "claims", "flood"]
//! noise-amplitude = 0.0
//! max-delta-norm = 1.5
//! cancel-epsilon = 0.001
//! gate-profile = "rank"
//! gate-epsilon = 0.01
//! ```

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Default embedding dimension. Matches the reference corpus.
pub const DEFAULT_DIM: usize = 1536;

/// Default maximum L2 norm for the learned delta vector.
pub const DEFAULT_MAX_DELTA_NORM: f32 = 1.5;

/// Default cancel-out gate epsilon.
pub const DEFAULT_CANCEL_EPSILON: f32 = 1e-3;

/// Default acceptance gate epsilon.
pub const DEFAULT_GATE_EPSILON: f64 = 0.01;

/// Engine configuration.
///
/// One instance per process; every subsystem receives the fields it needs
/// by parameter, never by reaching for this struct globally.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Source file for this config (for display).
    pub source: Option<PathBuf>,

    /// Embedding vector dimension, fixed for the whole engine.
    pub dim: usize,

    /// Keyword vocabulary for the hash embedder's reserved dimensions.
    pub keywords: Vec<String>,

    /// Amplitude for the stochastic noise shift. Zero disables it.
    pub noise_amplitude: f32,

    /// Seed for the noise shift's generator.
    pub noise_seed: u64,

    /// Whether to clip the aggregate learned delta.
    pub clip_enabled: bool,

    /// Maximum L2 norm for the learned delta vector.
    pub max_delta_norm: f32,

    /// Cancel-out gate epsilon: a delta norm at or below this cancels the result.
    pub cancel_epsilon: f32,

    /// Acceptance gate profile name ("rank" or "rank+cosine").
    pub gate_profile: String,

    /// Acceptance gate tolerance.
    pub gate_epsilon: f64,

    /// Force the adaptive selector to baseline-only (identity) mode.
    pub baseline_only: bool,

    /// Hard-negative sampling: top-K non-relevant docs per query (0 = off).
    pub hardneg_topk: usize,

    /// Weight applied to the averaged hard-negative direction.
    pub hardneg_weight: f32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            source: None,
            dim: DEFAULT_DIM,
            keywords: Vec::new(),
            noise_amplitude: 0.0,
            noise_seed: 42,
            clip_enabled: true,
            max_delta_norm: DEFAULT_MAX_DELTA_NORM,
            cancel_epsilon: DEFAULT_CANCEL_EPSILON,
            gate_profile: "rank".into(),
            gate_epsilon: DEFAULT_GATE_EPSILON,
            baseline_only: false,
            hardneg_topk: 0,
            hardneg_weight: 0.5,
        }
    }
}

/// Raw config as deserialized from TOML. Every field optional; missing
/// fields fall back to defaults.
#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
struct RawConfig {
    dim: Option<usize>,
    keywords: Option<Vec<String>>,
    noise_amplitude: Option<f32>,
    noise_seed: Option<u64>,
    clip_enabled: Option<bool>,
    max_delta_norm: Option<f32>,
    cancel_epsilon: Option<f32>,
    gate_profile: Option<String>,
    gate_epsilon: Option<f64>,
    baseline_only: Option<bool>,
    hardneg_topk: Option<usize>,
    hardneg_weight: Option<f32>,
}

impl EngineConfig {
    /// Load configuration from the given directory.
    ///
    /// Reads `rankshift.toml` if present; falls back to defaults otherwise.
    /// A present-but-unparsable file also falls back to defaults (the CLI
    /// reports the effective source via `display_summary`).
    pub fn load(directory: &Path) -> Self {
        let config_path = directory.join("rankshift.toml");
        if config_path.exists() {
            if let Some(config) = Self::load_toml(&config_path) {
                return config;
            }
        }
        Self::default()
    }

    fn load_toml(path: &Path) -> Option<Self> {
        let content = std::fs::read_to_string(path).ok()?;
        let raw: RawConfig = toml::from_str(&content).ok()?;
        Some(Self::from_raw(raw, path.to_path_buf()))
    }

    fn from_raw(raw: RawConfig, source: PathBuf) -> Self {
        let defaults = Self::default();
        Self {
            source: Some(source),
            dim: raw.dim.unwrap_or(defaults.dim),
            keywords: raw.keywords.unwrap_or(defaults.keywords),
            noise_amplitude: raw.noise_amplitude.unwrap_or(defaults.noise_amplitude),
            noise_seed: raw.noise_seed.unwrap_or(defaults.noise_seed),
            clip_enabled: raw.clip_enabled.unwrap_or(defaults.clip_enabled),
            max_delta_norm: raw.max_delta_norm.unwrap_or(defaults.max_delta_norm),
            cancel_epsilon: raw.cancel_epsilon.unwrap_or(defaults.cancel_epsilon),
            gate_profile: raw.gate_profile.unwrap_or(defaults.gate_profile),
            gate_epsilon: raw.gate_epsilon.unwrap_or(defaults.gate_epsilon),
            baseline_only: raw.baseline_only.unwrap_or(defaults.baseline_only),
            hardneg_topk: raw.hardneg_topk.unwrap_or(defaults.hardneg_topk),
            hardneg_weight: raw.hardneg_weight.unwrap_or(defaults.hardneg_weight),
        }
    }

    /// Format config for verbose display.
    pub fn display_summary(&self) -> String {
        let mut lines = Vec::new();

        if let Some(ref source) = self.source {
            lines.push(format!("   Config: {}", source.display()));
        } else {
            lines.push("   Config: (defaults)".to_string());
        }

        lines.push(format!("   Dim: {}", self.dim));
        if !self.keywords.is_empty() {
            lines.push(format!("   Keywords: {}", self.keywords.join(", ")));
        }
        lines.push(format!(
            "   Gate: {} (epsilon {})",
            self.gate_profile, self.gate_epsilon
        ));
        if self.hardneg_topk > 0 {
            lines.push(format!(
                "   Hard negatives: top-{} at weight {}",
                self.hardneg_topk, self.hardneg_weight
            ));
        }

        lines.join("\n")
    }
}
