//! Anchor Search
//!
//! Finds the initial result set for a query through two parallel strategies:
//! atom-position radial lookups per token, and full-text search over molecule
//! content. The merged set seeds the tag walk and, eventually, the context
//! window. Anchor search never inflates content; it only records where the
//! content lives.

use std::collections::{BTreeMap, HashSet};

use crate::config::AnchorConfig;
use crate::memory::{ConnectionType, Provenance, SearchFilters, SearchHit};
use crate::query::ParsedQuery;
use crate::storage::{MoleculeQuery, Storage};

/// Per-term cap on atom-position hits.
const POSITION_HITS_PER_TERM: usize = 5;

/// Cap on molecule full-text hits per pass.
const FTS_LIMIT: usize = 20;

/// Cap on atom-content full-text hits per pass.
const ATOM_FTS_LIMIT: usize = 5;

// ============================================================================
// DYNAMIC SCALING
// ============================================================================

/// Result-count targets derived from the character budget
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnchorScaling {
    /// Total atoms worth returning for this budget
    pub target_atoms: usize,
    /// Share reserved for direct anchors
    pub anchor_limit: usize,
    /// Share reserved for walk discoveries
    pub walk_limit: usize,
}

/// Derive result-count targets from a character budget: one result per
/// ~200 tokens of budget, split 70/30 between anchors and the walk.
pub fn scaling(char_budget: usize) -> AnchorScaling {
    let target_atoms = (((char_budget as f64 / 4.0) / 200.0).ceil() as usize).max(5);
    let anchor_limit = (0.70 * target_atoms as f64).ceil() as usize;
    let walk_limit = ((0.30 * target_atoms as f64).floor() as usize).max(2);
    AnchorScaling {
        target_atoms,
        anchor_limit,
        walk_limit,
    }
}

/// Build an FTS5 MATCH expression from sanitized tokens: quoted terms joined
/// with AND by default, OR under fuzzy semantics.
pub fn fts_expr(tokens: &[String], fuzzy: bool) -> String {
    let joiner = if fuzzy { " OR " } else { " AND " };
    tokens
        .iter()
        .map(|t| format!("\"{}\"", t.replace('"', "")))
        .collect::<Vec<_>>()
        .join(joiner)
}

// ============================================================================
// ANCHOR SEARCH
// ============================================================================

/// Output of one anchor pass
#[derive(Debug, Default)]
pub struct AnchorOutcome {
    /// Merged, deduplicated seed results
    pub hits: Vec<SearchHit>,
    /// Position/FTS hit counts per query term
    pub hits_per_term: BTreeMap<String, usize>,
    /// Stage diagnostics collected fail-soft
    pub errors: Vec<String>,
}

/// Two-strategy anchor searcher
pub struct AnchorSearch<'a> {
    storage: &'a Storage,
    config: &'a AnchorConfig,
}

impl<'a> AnchorSearch<'a> {
    pub fn new(storage: &'a Storage, config: &'a AnchorConfig) -> Self {
        Self { storage, config }
    }

    /// Run both strategies and merge, deduplicating on
    /// `(compound_id, start_byte)`. Call with the parsed query, never the
    /// raw one.
    pub fn run(
        &self,
        parsed: &ParsedQuery,
        buckets: &[String],
        provenance: Option<Provenance>,
        filters: Option<&SearchFilters>,
        fuzzy: bool,
    ) -> AnchorOutcome {
        let mut outcome = AnchorOutcome::default();

        // Strategy B: molecule full-text. Runs first so the richer molecule
        // rows win the (compound, start) dedupe against position stubs.
        let tokens: Vec<String> = if fuzzy {
            // Fuzzy passes widen with conversational alternates.
            let mut all = parsed.tokens.clone();
            for alternate in &parsed.alternates {
                for token in alternate.split_whitespace() {
                    if !all.contains(&token.to_string()) {
                        all.push(token.to_string());
                    }
                }
            }
            all
        } else {
            parsed.tokens.clone()
        };

        if !tokens.is_empty() {
            let query = MoleculeQuery {
                expr: fts_expr(&tokens, fuzzy),
                provenance,
                buckets: buckets.to_vec(),
                years: parsed.years(),
                molecule_type: filters.and_then(|f| f.molecule_type),
                min_val: filters.and_then(|f| f.min_val),
                max_val: filters.and_then(|f| f.max_val),
                limit: FTS_LIMIT,
            };
            match self.storage.molecule_search(&query) {
                Ok(hits) => {
                    for hit in hits {
                        let mut result = molecule_hit_to_result(hit);
                        result.term = attribute_term(&tokens, &result.content);
                        // Molecule rows carry no tags of their own; they
                        // inherit the compound's tag/bucket sets so dedup can
                        // union metadata across files.
                        if let Some(compound_id) = &result.compound_id {
                            if let Ok((tags, hit_buckets)) =
                                self.storage.compound_tag_sets(compound_id)
                            {
                                result.tags = tags;
                                result.buckets = hit_buckets;
                            }
                        }
                        outcome.hits.push(result);
                    }
                }
                Err(err) => outcome.errors.push(format!("anchor_fts: {err}")),
            }

            // Atom content carries its own full-text signal.
            match self
                .storage
                .atom_search(&fts_expr(&tokens, fuzzy), provenance, ATOM_FTS_LIMIT)
            {
                Ok(hits) => {
                    for (atom, rank) in hits {
                        let mut hit = SearchHit::new(
                            atom.atom_id.clone(),
                            atom.content.clone(),
                            10.0 * rank,
                        );
                        hit.source = atom.label.clone();
                        hit.timestamp = atom.timestamp;
                        hit.tags = atom.tags;
                        hit.buckets = atom.buckets;
                        hit.provenance = atom.provenance;
                        hit.molecular_signature = Some(atom.molecular_signature);
                        hit.connection_type = Some(ConnectionType::DirectFts);
                        hit.term = attribute_term(&tokens, &hit.content);
                        outcome.hits.push(hit);
                    }
                }
                Err(err) => outcome.errors.push(format!("anchor_atom_fts: {err}")),
            }
        }

        // Strategy A: atom-position radial reads, one lookup per token.
        let overfetch = POSITION_HITS_PER_TERM * self.config.fts_window_size.max(1);
        for token in &parsed.tokens {
            if token.len() <= 2 {
                continue;
            }
            match self.storage.position_hits(token, provenance, overfetch) {
                Ok(hits) => {
                    let taken = hits.len().min(POSITION_HITS_PER_TERM);
                    *outcome.hits_per_term.entry(token.clone()).or_insert(0) += taken;
                    for hit in hits.into_iter().take(POSITION_HITS_PER_TERM) {
                        outcome.hits.push(position_hit_to_result(hit, token));
                    }
                }
                Err(err) => outcome.errors.push(format!("anchor_positions({token}): {err}")),
            }
        }

        dedupe_by_window(&mut outcome.hits);

        // A present year range means chronology matters more than rank.
        if !parsed.temporal_tags.is_empty() {
            outcome.hits.sort_by(|a, b| {
                a.timestamp
                    .cmp(&b.timestamp)
                    .then_with(|| a.id.cmp(&b.id))
            });
        } else {
            outcome.hits.sort_by(|a, b| {
                b.score
                    .partial_cmp(&a.score)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.id.cmp(&b.id))
            });
        }

        outcome
    }
}

/// Remove later hits that share a `(compound_id, start_byte)` window with an
/// earlier one. Hits without compound coordinates always survive.
fn dedupe_by_window(hits: &mut Vec<SearchHit>) {
    let mut seen: HashSet<(String, u64)> = HashSet::new();
    hits.retain(|hit| match (&hit.compound_id, hit.start_byte) {
        (Some(compound_id), Some(start)) => seen.insert((compound_id.clone(), start)),
        _ => true,
    });
}

fn molecule_hit_to_result(hit: crate::storage::MoleculeHit) -> SearchHit {
    let m = hit.molecule;
    let mut result = SearchHit::new(m.molecule_id.clone(), m.content, hit.score);
    result.source = hit.path;
    result.timestamp = m.timestamp;
    result.provenance = hit.provenance;
    result.sequence = Some(m.sequence);
    result.molecular_signature = Some(m.molecular_signature);
    result.compound_id = Some(m.compound_id);
    result.start_byte = Some(m.start_byte);
    result.end_byte = Some(m.end_byte);
    result.molecule_type = Some(m.molecule_type);
    result.numeric_value = m.numeric_value;
    result.numeric_unit = m.numeric_unit;
    result.connection_type = Some(ConnectionType::DirectFts);
    result
}

fn position_hit_to_result(hit: crate::storage::PositionHit, term: &str) -> SearchHit {
    let label = hit.position.atom_label.trim_start_matches('#').to_string();
    let id = format!(
        "pos:{}:{}",
        hit.position.compound_id, hit.position.byte_offset
    );
    let mut result = SearchHit::new(id, label.clone(), 1.0);
    result.source = hit.path;
    result.timestamp = hit.timestamp;
    result.provenance = hit.provenance;
    result.compound_id = Some(hit.position.compound_id);
    result.start_byte = Some(hit.position.byte_offset);
    result.end_byte = Some(hit.position.byte_offset + label.len() as u64);
    result.connection_type = Some(ConnectionType::DirectFts);
    result.term = Some(term.to_string());
    result
}

/// Attribute a full-text hit to the first query token its content contains.
fn attribute_term(tokens: &[String], content: &str) -> Option<String> {
    let lowered = content.to_lowercase();
    tokens.iter().find(|t| lowered.contains(t.as_str())).cloned()
}

// ============================================================================
// TESTS
// ============================================================================
