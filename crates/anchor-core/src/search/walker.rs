//! Physics Tag-Walker
//!
//! Given anchor atoms, discovers associated atoms through the bipartite
//! atom-tag graph. Each candidate is scored against every anchor with the
//! Unified Field Equation
//!
//! ```text
//! W = sharedTags * alpha * exp(-lambda * dt_hours) * (1 - hamming / 64)
//! ```
//!
//! and its gravity is the maximum W across anchors, with the attaining anchor
//! recorded as provenance. The traversal itself is one relational query (see
//! the storage layer); this module owns anchor capping, serendipity sampling,
//! and connection-type labeling.

use crate::config::AnchorConfig;
use crate::fingerprint::SIMHASH_NEAR;
use crate::memory::{Atom, ConnectionType, SearchHit};
use crate::storage::{Storage, StorageError, WalkCandidate, WalkQuery};

/// Default gravity threshold below which candidates are discarded.
pub const GRAVITY_THRESHOLD: f64 = 0.1;

/// Max candidates pulled back per hop.
pub const MAX_PER_HOP: usize = 50;

/// Δt under which a candidate counts as a temporal neighbor (one hour).
const TEMPORAL_NEIGHBOR_MS: i64 = 3_600_000;

// ============================================================================
// WALK OUTCOME
// ============================================================================

/// Output of one walk pass
#[derive(Debug, Default)]
pub struct WalkOutcome {
    /// Candidate results, gravity-ordered
    pub hits: Vec<SearchHit>,
    /// Raw candidate count before sampling/truncation
    pub candidates: usize,
    /// The walk query hit its deadline and was abandoned
    pub timed_out: bool,
    pub errors: Vec<String>,
}

// ============================================================================
// TAG WALKER
// ============================================================================

/// Single-hop gravity walker over the tag graph
pub struct TagWalker<'a> {
    storage: &'a Storage,
    config: &'a AnchorConfig,
}

impl<'a> TagWalker<'a> {
    pub fn new(storage: &'a Storage, config: &'a AnchorConfig) -> Self {
        Self { storage, config }
    }

    /// Walk one hop out from the anchor set.
    ///
    /// `temperature` > 0 trades determinism for serendipity via weighted
    /// reservoir sampling; at 0 the top candidates are taken as ranked. The
    /// sampling stream is seeded from `seed_phrase`, so a given query stays
    /// reproducible even when warm.
    pub fn walk(
        &self,
        anchors: &[Atom],
        limit: usize,
        temperature: f64,
        seed_phrase: &str,
    ) -> WalkOutcome {
        let mut outcome = WalkOutcome::default();
        if anchors.is_empty() {
            return outcome;
        }

        let anchor_ids: Vec<String> = anchors
            .iter()
            .take(self.config.walk_anchor_cap)
            .map(|a| a.atom_id.clone())
            .collect();

        let query = WalkQuery {
            anchor_ids,
            alpha: self.config.walk_damping_alpha,
            lambda: self.config.walk_time_lambda,
            threshold: GRAVITY_THRESHOLD,
            limit: MAX_PER_HOP,
            deadline_ms: self.config.walk_timeout_ms,
        };

        let candidates = match self.storage.tag_walk(&query) {
            Ok(candidates) => candidates,
            Err(StorageError::Timeout) => {
                outcome.timed_out = true;
                outcome.errors.push("walk_timeout".to_string());
                return outcome;
            }
            Err(err) => {
                outcome.errors.push(format!("walk: {err}"));
                return outcome;
            }
        };
        outcome.candidates = candidates.len();

        let selected = if temperature > 0.0 {
            reservoir_sample(candidates, limit, temperature, seed_phrase)
        } else {
            candidates.into_iter().take(limit.max(1)).collect()
        };

        for candidate in selected {
            outcome
                .hits
                .push(self.candidate_to_hit(candidate, temperature));
        }
        outcome
    }

    fn candidate_to_hit(&self, candidate: WalkCandidate, temperature: f64) -> SearchHit {
        let WalkCandidate {
            atom,
            shared_tags,
            best_anchor_id,
            dt_ms,
            bits_apart,
            gravity,
        } = candidate;

        let connection = if bits_apart <= SIMHASH_NEAR as i64 {
            ConnectionType::DirectSimhash
        } else if dt_ms < TEMPORAL_NEIGHBOR_MS {
            ConnectionType::TemporalNeighbor
        } else if temperature > 0.1 && shared_tags <= 1 {
            ConnectionType::Serendipity
        } else {
            ConnectionType::TagWalkNeighbor
        };

        let content = if atom.content.is_empty() {
            atom.label.clone()
        } else {
            atom.content.clone()
        };
        let mut hit = SearchHit::new(atom.atom_id.clone(), content, gravity);
        hit.source = atom.label.clone();
        hit.timestamp = atom.timestamp;
        hit.tags = atom.tags;
        hit.buckets = atom.buckets;
        hit.provenance = atom.provenance;
        hit.molecular_signature = Some(atom.molecular_signature);
        hit.connection_type = Some(connection);
        hit.best_anchor_id = Some(best_anchor_id);
        hit.gravity_score = Some(gravity);

        // Anchor the walked atom back into a compound so the inflator can
        // widen it, and surface its episode/epoch lineage when present.
        if let Ok(Some(position)) = self.storage.first_position_for_label(&atom.label) {
            let label_len = position
                .position
                .atom_label
                .trim_start_matches('#')
                .len() as u64;
            hit.source = position.path.clone();
            hit.compound_id = Some(position.position.compound_id.clone());
            hit.start_byte = Some(position.position.byte_offset);
            hit.end_byte = Some(position.position.byte_offset + label_len);
        }
        if let Ok(epochs) = self.storage.epochs_for_atom(&atom.atom_id) {
            hit.epochs = epochs;
        }

        hit
    }
}

// ============================================================================
// SERENDIPITY SAMPLING
// ============================================================================

/// Weighted reservoir sampling (Efraimidis-Spirakis) over walk candidates.
///
/// The key for candidate i is `u^(1 / (sharedTags_i * (1 / temperature)))`,
/// so hotter temperatures flatten the preference for high-overlap candidates.
/// The PRNG is a xorshift64 stream seeded from the query phrase, keeping the
/// draw deterministic per query.
fn reservoir_sample(
    candidates: Vec<WalkCandidate>,
    limit: usize,
    temperature: f64,
    seed_phrase: &str,
) -> Vec<WalkCandidate> {
    let mut rng = Xorshift64::from_phrase(seed_phrase);
    let mut keyed: Vec<(f64, WalkCandidate)> = candidates
        .into_iter()
        .map(|candidate| {
            let shared = candidate.shared_tags.max(1) as f64;
            let exponent = 1.0 / (shared * (1.0 / temperature));
            let key = rng.next_unit().powf(exponent);
            (key, candidate)
        })
        .collect();

    keyed.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
    keyed
        .into_iter()
        .take(limit.max(1))
        .map(|(_, candidate)| candidate)
        .collect()
}

/// Minimal xorshift64 generator; statistical quality is irrelevant here, the
/// draw only needs to be stable for a given seed.
struct Xorshift64 {
    state: u64,
}

impl Xorshift64 {
    fn from_phrase(phrase: &str) -> Self {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};
        let mut hasher = DefaultHasher::new();
        phrase.hash(&mut hasher);
        let seed = hasher.finish();
        Self {
            state: if seed == 0 { 0x9e3779b97f4a7c15 } else { seed },
        }
    }

    fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state = x;
        x
    }

    /// Uniform draw in (0, 1).
    fn next_unit(&mut self) -> f64 {
        ((self.next_u64() >> 11) as f64 + 1.0) / ((1u64 << 53) as f64 + 2.0)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{AtomType, Provenance};

    fn candidate(id: &str, shared: i64, dt_ms: i64, bits: i64, gravity: f64) -> WalkCandidate {
        WalkCandidate {
            atom: Atom {
                atom_id: id.to_string(),
                label: id.to_string(),
                atom_type: AtomType::Keyword,
                weight: 0.5,
                content: String::new(),
                tags: vec![],
                buckets: vec![],
                timestamp: 0,
                provenance: Provenance::Internal,
                molecular_signature: "0".to_string(),
            },
            shared_tags: shared,
            best_anchor_id: "anchor".to_string(),
            dt_ms,
            bits_apart: bits,
            gravity,
        }
    }

    #[test]
    fn test_field_equation_shape() {
        // The equation itself lives in SQL; verify the Rust rendition of the
        // same expression behaves: more shared tags, closer time, closer
        // fingerprints all raise W.
        let w = |shared: f64, dt_hours: f64, bits: f64| {
            shared * 0.85 * (-1e-5_f64 * dt_hours).exp() * (1.0 - bits / 64.0)
        };
        assert!(w(3.0, 1.0, 0.0) > w(1.0, 1.0, 0.0));
        assert!(w(2.0, 1.0, 0.0) > w(2.0, 10_000.0, 0.0));
        assert!(w(2.0, 1.0, 2.0) > w(2.0, 1.0, 30.0));
        // One shared tag, no decay, identical fingerprints: W = alpha
        assert!((w(1.0, 0.0, 0.0) - 0.85).abs() < 1e-12);
    }

    #[test]
    fn test_reservoir_deterministic_per_seed() {
        let make = || {
            (0..20)
                .map(|i| candidate(&format!("c{i}"), (i % 4) + 1, 0, 32, 1.0))
                .collect::<Vec<_>>()
        };
        let a = reservoir_sample(make(), 5, 0.5, "project aurora");
        let b = reservoir_sample(make(), 5, 0.5, "project aurora");
        let ids_a: Vec<_> = a.iter().map(|c| c.atom.atom_id.clone()).collect();
        let ids_b: Vec<_> = b.iter().map(|c| c.atom.atom_id.clone()).collect();
        assert_eq!(ids_a, ids_b);
    }

    #[test]
    fn test_reservoir_favors_shared_tags_when_cool() {
        // At a low temperature the exponent 1/(shared/temp) shrinks for
        // high-overlap candidates, pushing their keys toward 1.
        let candidates: Vec<WalkCandidate> = (0..40)
            .map(|i| candidate(&format!("c{i}"), if i < 20 { 1 } else { 8 }, 0, 32, 1.0))
            .collect();
        let picked = reservoir_sample(candidates, 10, 0.2, "seed");
        let high_overlap = picked.iter().filter(|c| c.shared_tags == 8).count();
        assert!(high_overlap >= 5, "picked only {high_overlap} high-overlap");
    }

    #[test]
    fn test_connection_labeling_thresholds() {
        // Mirror the labeling rules without a storage round-trip.
        let label = |bits: i64, dt: i64, temp: f64, shared: i64| {
            if bits <= SIMHASH_NEAR as i64 {
                ConnectionType::DirectSimhash
            } else if dt < TEMPORAL_NEIGHBOR_MS {
                ConnectionType::TemporalNeighbor
            } else if temp > 0.1 && shared <= 1 {
                ConnectionType::Serendipity
            } else {
                ConnectionType::TagWalkNeighbor
            }
        };
        assert_eq!(label(2, 999_999_999, 0.0, 5), ConnectionType::DirectSimhash);
        assert_eq!(label(30, 60_000, 0.0, 5), ConnectionType::TemporalNeighbor);
        assert_eq!(label(30, TEMPORAL_NEIGHBOR_MS + 1, 0.5, 1), ConnectionType::Serendipity);
        assert_eq!(label(30, TEMPORAL_NEIGHBOR_MS + 1, 0.0, 5), ConnectionType::TagWalkNeighbor);
    }
}
