//! Engine Configuration
//!
//! Every knob the retrieval pipeline recognizes, with per-field serde
//! defaults so a partial config file deserializes cleanly.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Configuration for the retrieval engine
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct AnchorConfig {
    /// Directory holding the embedded store. `None` resolves to the
    /// platform data dir via `directories`.
    pub data_dir: Option<PathBuf>,
    /// Root against which relative compound paths resolve
    pub notebook_root: PathBuf,
    /// Engine-managed mirror of ingested content; shadows the notebook root
    /// during inflation when present
    pub mirror_root: Option<PathBuf>,

    /// Default character budget per request
    pub max_chars_default: usize,
    /// Upper bound enforced on requested budgets
    pub max_chars_limit: usize,
    /// Multiplier for internal over-fetch in atom-position scans
    pub fts_window_size: usize,

    /// α in the Unified Field Equation
    pub walk_damping_alpha: f64,
    /// λ per hour in the Unified Field Equation
    pub walk_time_lambda: f64,
    /// Max anchor ids per walk query
    pub walk_anchor_cap: usize,
    /// Walk query deadline in milliseconds
    pub walk_timeout_ms: u64,

    /// Hamming distance below which results merge
    pub simhash_near_threshold: u32,

    /// Lower bound for the inflation radius, in bytes
    pub elastic_radius_min: u64,
    /// Upper bound for the inflation radius, in bytes
    pub elastic_radius_max: u64,

    /// Fraction of the char budget reserved for direct-term results
    pub budget_split_primary: f64,

    /// Omit four-digit year tags from returned results
    pub hide_years_in_tags: bool,

    /// Tokens that bypass POS filtering during query parsing
    pub pos_whitelist: Vec<String>,
    /// Bucket names the parser recognizes behind a `#` prefix
    pub known_buckets: Vec<String>,
}

impl Default for AnchorConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            notebook_root: PathBuf::from("."),
            mirror_root: None,
            max_chars_default: 20_000,
            max_chars_limit: 100_000,
            fts_window_size: 3,
            walk_damping_alpha: 0.85,
            walk_time_lambda: 1e-5,
            walk_anchor_cap: 50,
            walk_timeout_ms: 10_000,
            simhash_near_threshold: crate::fingerprint::SIMHASH_NEAR,
            elastic_radius_min: 200,
            elastic_radius_max: 32_000,
            budget_split_primary: 0.70,
            hide_years_in_tags: false,
            pos_whitelist: vec!["burnout".to_string(), "career".to_string()],
            known_buckets: vec![
                "inbox".to_string(),
                "journal".to_string(),
                "archive".to_string(),
            ],
        }
    }
}

impl AnchorConfig {
    /// Clamp a requested character budget to the configured bounds.
    ///
    /// Zero means "use the default".
    pub fn effective_budget(&self, requested: usize) -> usize {
        if requested == 0 {
            self.max_chars_default
        } else {
            requested.min(self.max_chars_limit)
        }
    }
}
