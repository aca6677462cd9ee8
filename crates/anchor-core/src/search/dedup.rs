//! Result Deduplication
//!
//! Merges near-duplicate results by fingerprint Hamming distance while
//! preserving the metadata discovered along the way: tags and buckets are
//! unioned into the surviving result and its frequency counts the cluster
//! size. The first-seen representative of a cluster is the one kept, so the
//! pass is stable and idempotent.

use crate::fingerprint::{self, NO_SIGNATURE};
use crate::memory::SearchHit;

/// Near-duplicate merger keyed on molecular signatures
#[derive(Debug, Clone, Copy)]
pub struct Deduplicator {
    /// Hamming distance below which two results merge
    threshold: u32,
}

impl Deduplicator {
    pub fn new(threshold: u32) -> Self {
        Self { threshold }
    }

    /// Collapse near-duplicates, accumulating frequency and unioning tags
    /// and buckets. Results without a usable signature pass through; every
    /// kept result carries `frequency >= 1` so the cluster sizes always sum
    /// to the input count.
    pub fn dedup(&self, hits: Vec<SearchHit>) -> Vec<SearchHit> {
        let mut unique: Vec<SearchHit> = Vec::with_capacity(hits.len());
        // Parallel to `unique`: the signature each slot was accepted with,
        // None for sentinel/absent signatures.
        let mut accepted: Vec<Option<String>> = Vec::with_capacity(hits.len());

        for mut hit in hits {
            let frequency = hit.frequency.unwrap_or(1);
            hit.frequency = Some(frequency);

            let signature = match hit.molecular_signature.as_deref() {
                Some(sig) if sig != NO_SIGNATURE => sig.to_string(),
                _ => {
                    unique.push(hit);
                    accepted.push(None);
                    continue;
                }
            };

            let closest = accepted
                .iter()
                .enumerate()
                .filter_map(|(i, sig)| {
                    sig.as_deref().map(|s| (i, fingerprint::hamming(s, &signature)))
                })
                .min_by_key(|(_, distance)| *distance);

            match closest {
                Some((index, distance)) if distance < self.threshold => {
                    let survivor = &mut unique[index];
                    survivor.frequency =
                        Some(survivor.frequency.unwrap_or(1) + frequency);
                    merge_unique(&mut survivor.tags, hit.tags);
                    merge_unique(&mut survivor.buckets, hit.buckets);
                }
                _ => {
                    unique.push(hit);
                    accepted.push(Some(signature));
                }
            }
        }

        unique
    }
}

/// Append the elements of `incoming` not already present, preserving
/// insertion order.
fn merge_unique(into: &mut Vec<String>, incoming: Vec<String>) {
    for item in incoming {
        if !into.contains(&item) {
            into.push(item);
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
