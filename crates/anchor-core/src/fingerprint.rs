//! Molecular Signatures
//!
//! 64-bit similarity fingerprints over token shingles, plus Hamming distance.
//! Two texts whose signatures sit within [`SIMHASH_NEAR`] bits of each other
//! are treated as near-duplicates by the deduplicator.
//!
//! The bit layout is load-bearing: signatures are persisted as lowercase hex
//! in the store and compared across store generations, so the shingling and
//! hashing here must stay bit-for-bit stable.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Hamming distance below which two signatures are considered near-duplicates.
pub const SIMHASH_NEAR: u32 = 3;

/// Sentinel signature meaning "no fingerprint available".
pub const NO_SIGNATURE: &str = "0";

/// Minimum token length kept during shingling.
const MIN_TOKEN_LEN: usize = 3;

/// Shingle width (tokens per overlapping n-gram).
const SHINGLE_WIDTH: usize = 3;

// ============================================================================
// SIGNATURE GENERATION
// ============================================================================

/// Compute the 64-bit similarity fingerprint of a text.
///
/// Tokenizes on non-alphanumerics, lowercases, drops tokens shorter than
/// three characters, forms overlapping 3-token shingles, and folds each
/// shingle's 64-bit hash into a signed per-bit accumulator. Output bit i is
/// set iff accumulator\[i\] ended positive.
///
/// Returns the signature as a 16-char lowercase hex string, or [`NO_SIGNATURE`]
/// when the text yields no usable tokens.
pub fn simhash64(text: &str) -> String {
    let tokens = tokenize(text);
    if tokens.is_empty() {
        return NO_SIGNATURE.to_string();
    }

    let mut accumulator = [0i32; 64];
    for shingle_hash in shingle_hashes(&tokens) {
        for (i, slot) in accumulator.iter_mut().enumerate() {
            if shingle_hash >> i & 1 == 1 {
                *slot += 1;
            } else {
                *slot -= 1;
            }
        }
    }

    let mut signature = 0u64;
    for (i, slot) in accumulator.iter().enumerate() {
        if *slot > 0 {
            signature |= 1 << i;
        }
    }

    format!("{:016x}", signature)
}

/// Lowercased alphanumeric tokens of length >= [`MIN_TOKEN_LEN`].
fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() >= MIN_TOKEN_LEN)
        .map(str::to_string)
        .collect()
}

/// Hashes of overlapping token shingles.
///
/// Texts shorter than one full shingle fall back to a single shingle over
/// everything they have, so a two-token note still fingerprints.
fn shingle_hashes(tokens: &[String]) -> Vec<u64> {
    let width = SHINGLE_WIDTH.min(tokens.len());
    tokens
        .windows(width)
        .map(|shingle| {
            let mut hasher = DefaultHasher::new();
            for token in shingle {
                token.hash(&mut hasher);
            }
            hasher.finish()
        })
        .collect()
}

// ============================================================================
// HAMMING DISTANCE
// ============================================================================

/// Hamming distance between two hex-encoded 64-bit signatures.
///
/// Any parse failure returns 64 (maximally different), so malformed rows can
/// never merge with anything.
pub fn hamming(a: &str, b: &str) -> u32 {
    match (parse_signature(a), parse_signature(b)) {
        (Some(a), Some(b)) => (a ^ b).count_ones(),
        _ => 64,
    }
}

/// Parse a lowercase-hex signature into its 64-bit value.
pub fn parse_signature(hex: &str) -> Option<u64> {
    if hex.is_empty() || hex.len() > 16 {
        return None;
    }
    u64::from_str_radix(hex, 16).ok()
}

// ============================================================================
// TESTS
// ============================================================================
