//! Budget Assembler
//!
//! Turns a scored, inflated result set into the final context string under a
//! character budget. Scores are adjusted for provenance preference, molecule
//! type, semantic-category overlap and entity-pair co-occurrence; results are
//! then packed greedily, with the budget split between direct and associative
//! pools and unused room spilling across.

use chrono::DateTime;

use crate::config::AnchorConfig;
use crate::memory::{ConnectionType, ProvenanceFilter, SearchHit};
use crate::query::ParsedQuery;

/// Declared per-result header allowance; the budget invariant is
/// `len(context) <= max_chars * PACK_FILL + HEADER_OVERHEAD * results`.
pub const HEADER_OVERHEAD: usize = 96;

/// Fraction of the budget actually packed with content.
pub const PACK_FILL: f64 = 0.95;

/// Context emitted when nothing survived the pipeline.
pub const EMPTY_CONTEXT: &str = "No results found.";

/// Final assembly output
#[derive(Debug, Default)]
pub struct Assembly {
    pub context: String,
    pub results: Vec<SearchHit>,
}

// ============================================================================
// SCORING ADJUSTMENTS
// ============================================================================

/// Provenance boost relative to the caller's preference. Matches are
/// rewarded, mismatches against a narrowed filter are penalized, and
/// all-mode favors internal content.
fn provenance_boost(filter: ProvenanceFilter, hit: &SearchHit) -> f64 {
    use crate::memory::Provenance::*;
    match (filter, hit.provenance) {
        (ProvenanceFilter::Internal, Internal) => 3.0,
        (ProvenanceFilter::External, External) => 1.5,
        (ProvenanceFilter::Quarantine, Quarantine) => 1.0,
        (ProvenanceFilter::All, Internal) => 2.0,
        (ProvenanceFilter::All, _) => 1.0,
        _ => 0.5,
    }
}

/// Rank used for tie-breaking: preferred provenance sorts first.
fn provenance_rank(filter: ProvenanceFilter, hit: &SearchHit) -> u8 {
    use crate::memory::Provenance::*;
    match filter.narrow() {
        Some(preferred) if hit.provenance == preferred => 0,
        Some(_) => 1,
        None => match hit.provenance {
            Internal => 0,
            External => 1,
            Quarantine => 2,
        },
    }
}

// ============================================================================
// ASSEMBLER
// ============================================================================

/// Budget-aware result packer
pub struct BudgetAssembler<'a> {
    config: &'a AnchorConfig,
}

impl<'a> BudgetAssembler<'a> {
    pub fn new(config: &'a AnchorConfig) -> Self {
        Self { config }
    }

    /// Adjust scores, order deterministically, and pack into `max_chars`.
    pub fn assemble(
        &self,
        hits: Vec<SearchHit>,
        parsed: &ParsedQuery,
        provenance: ProvenanceFilter,
        max_chars: usize,
    ) -> Assembly {
        let mut hits = hits;

        for hit in hits.iter_mut() {
            self.adjust(hit, parsed, provenance);
        }

        // Deterministic order: adjusted score desc, then provenance
        // preference, then arrival order (stable sort), then compound id.
        // A year-ranged query preserves chronology instead.
        if parsed.temporal_tags.is_empty() {
            hits.sort_by(|a, b| {
                b.score
                    .partial_cmp(&a.score)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| {
                        provenance_rank(provenance, a).cmp(&provenance_rank(provenance, b))
                    })
                    .then_with(|| a.compound_id.cmp(&b.compound_id))
            });
        } else {
            hits.sort_by(|a, b| {
                a.timestamp
                    .cmp(&b.timestamp)
                    .then_with(|| {
                        b.score
                            .partial_cmp(&a.score)
                            .unwrap_or(std::cmp::Ordering::Equal)
                    })
                    .then_with(|| a.compound_id.cmp(&b.compound_id))
            });
        }

        let packed = self.pack(hits, max_chars);
        if packed.is_empty() {
            return Assembly {
                context: EMPTY_CONTEXT.to_string(),
                results: vec![],
            };
        }

        let mut entries: Vec<String> = Vec::with_capacity(packed.len());
        let mut results = packed;
        for hit in results.iter_mut() {
            if self.config.hide_years_in_tags {
                hit.tags
                    .retain(|t| !(t.len() == 4 && t.chars().all(|c| c.is_ascii_digit())));
            }
            entries.push(format!("{}\n{}", header(hit), hit.content));
        }

        Assembly {
            context: entries.join("\n\n"),
            results,
        }
    }

    fn adjust(&self, hit: &mut SearchHit, parsed: &ParsedQuery, provenance: ProvenanceFilter) {
        hit.score *= provenance_boost(provenance, hit);

        if let Some(molecule_type) = hit.molecule_type {
            hit.score *= molecule_type.score_multiplier();
        }

        let matching: Vec<String> = parsed
            .scope_tags
            .iter()
            .filter(|scope| {
                hit.tags
                    .iter()
                    .any(|tag| tag.trim_start_matches('#').eq_ignore_ascii_case(scope))
            })
            .cloned()
            .collect();
        if !matching.is_empty() {
            hit.score *= 1.5;
            hit.semantic_categories = Some(matching);
        }

        let content = hit.content.to_lowercase();
        if let Some((x, y)) = parsed
            .entity_pairs
            .iter()
            .find(|(x, y)| content.contains(x.as_str()) && content.contains(y.as_str()))
        {
            hit.score *= 2.0;
            hit.related_entities = Some(vec![x.clone(), y.clone()]);
        }
    }

    /// Greedy pack under the distributed budget: the primary share goes to
    /// direct results and is split evenly across the query terms that
    /// produced them, the rest to associative ones, and unused room in
    /// either pool spills to the other.
    fn pack(&self, hits: Vec<SearchHit>, max_chars: usize) -> Vec<SearchHit> {
        let budget = (max_chars as f64 * PACK_FILL) as usize;
        let primary_budget = (budget as f64 * self.config.budget_split_primary) as usize;
        let associative_budget = budget.saturating_sub(primary_budget);

        let is_primary = |hit: &SearchHit| {
            matches!(hit.connection_type, None | Some(ConnectionType::DirectFts))
        };

        // Every distinct originating term gets an equal slice of the primary
        // share, so one dominant term cannot starve the others. Hits with no
        // attributable term form their own slice.
        let mut terms: Vec<Option<&str>> = Vec::new();
        for hit in hits.iter().filter(|h| is_primary(h)) {
            let term = hit.term.as_deref();
            if !terms.contains(&term) {
                terms.push(term);
            }
        }
        let per_term_budget = primary_budget / terms.len().max(1);

        let mut spent_per_term: Vec<usize> = vec![0; terms.len()];
        let mut associative_used = 0usize;
        let mut picked: Vec<bool> = vec![false; hits.len()];

        // First pass: each term slice and the associative pool fill up
        // independently.
        for (index, hit) in hits.iter().enumerate() {
            let len = hit.content.len();
            if is_primary(hit) {
                let slot = terms
                    .iter()
                    .position(|t| *t == hit.term.as_deref())
                    .unwrap_or(0);
                if spent_per_term[slot] + len <= per_term_budget {
                    spent_per_term[slot] += len;
                    picked[index] = true;
                }
            } else if associative_used + len <= associative_budget {
                associative_used += len;
                picked[index] = true;
            }
        }

        // Spill pass: whatever is left over goes to the best unpacked
        // results regardless of pool or term.
        let primary_used: usize = spent_per_term.iter().sum();
        let mut remaining = budget.saturating_sub(primary_used + associative_used);
        for (index, hit) in hits.iter().enumerate() {
            if picked[index] {
                continue;
            }
            let len = hit.content.len();
            if len <= remaining {
                remaining -= len;
                picked[index] = true;
            }
        }

        hits.into_iter()
            .zip(picked)
            .filter_map(|(hit, keep)| keep.then_some(hit))
            .collect()
    }
}

/// Per-item header: `[{provenance}] {source} ({iso-date}):`
fn header(hit: &SearchHit) -> String {
    let date = DateTime::from_timestamp_millis(hit.timestamp)
        .map(|dt| dt.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| "unknown".to_string());
    let source = if hit.source.is_empty() {
        "unknown"
    } else {
        hit.source.as_str()
    };
    format!("[{}] {} ({}):", hit.provenance, source, date)
}

// ============================================================================
// TESTS
// ============================================================================
