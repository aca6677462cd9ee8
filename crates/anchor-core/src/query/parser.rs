//! Query Parser
//!
//! Turns a free-form natural-language query into the structured form the
//! pipeline searches with: a sanitized token list for full-text matching,
//! temporal year tags, scope tags/buckets, an inferred intent, and entity
//! pairs for relationship boosting. The whole pass is deterministic.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use chrono::{DateTime, Datelike, Days, Months, Utc};
use regex::Regex;

use crate::config::AnchorConfig;
use crate::memory::Intent;
use crate::query::pos;

/// The closed set of semantic categories a hashtag can name.
const SEMANTIC_CATEGORIES: &[&str] = &[
    "causal", "emotional", "industry", "location", "narrative", "relationship", "technical",
    "temporal",
];

/// Tokens that join two entities into a pair worth boosting.
const PAIR_INDICATORS: &[&str] = &[
    "about", "and", "called", "met", "said", "texted", "told", "visited", "with",
];

/// Intent marker lexicons, probed against the raw query.
const EMOTIONAL_MARKERS: &[&str] = &[
    "afraid", "angry", "anxious", "excited", "feel", "feeling", "felt", "grief", "happy", "hate",
    "joy", "lonely", "love", "loved", "mood", "sad",
];
const TEMPORAL_MARKERS: &[&str] = &[
    "after", "ago", "before", "during", "last", "latest", "month", "recent", "timeline", "today",
    "tomorrow", "week", "when", "year", "yesterday",
];
const RELATIONAL_MARKERS: &[&str] = &[
    "brother", "colleague", "family", "father", "friend", "husband", "met", "mother", "partner",
    "relationship", "said", "sister", "talked", "together", "told", "wife",
];
const CREATIVE_MARKERS: &[&str] = &[
    "brainstorm", "compose", "create", "design", "draft", "idea", "ideas", "imagine", "invent",
    "sketch", "story", "write", "writing",
];

static RE_LAST_SPAN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:last|past)\s+(\d{1,3})\s+(days?|months?|years?)\b").expect("valid regex")
});
static RE_YEAR_RANGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:from|between)\s+(20[2-3]\d)\s+(?:to|and)\s+(20[2-3]\d)\b")
        .expect("valid regex")
});
static RE_BARE_YEAR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(20[2-3]\d)\b").expect("valid regex"));

/// Conversational frames rewritten down to their payload. The first match
/// wins; the payload becomes an alternate query form.
static CONVERSATIONAL_FRAMES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"^what is the (?:latest|recent) (.+)$",
        r"^what (?:is|are|was|were) (?:the )?(.+)$",
        r"^tell me about (.+)$",
        r"^do you remember (?:when )?(.+)$",
        r"^remind me (?:about|of) (.+)$",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("valid regex"))
    .collect()
});

// ============================================================================
// PARSED QUERY
// ============================================================================

/// The structured form of a query, ready for the search pipeline
#[derive(Debug, Clone, Default)]
pub struct ParsedQuery {
    /// The query exactly as received
    pub raw: String,
    /// Surviving tokens joined with single spaces; FTS-safe
    pub sanitized: String,
    /// Conversationally-expanded alternates, same sanitization
    pub alternates: Vec<String>,
    /// Surviving tokens, lowercased, deduplicated, insertion-ordered
    pub tokens: Vec<String>,
    /// Four-digit years implicated by the query
    pub temporal_tags: BTreeSet<String>,
    /// Semantic-category and free hashtag scope
    pub scope_tags: BTreeSet<String>,
    /// Recognized bucket names
    pub scope_buckets: BTreeSet<String>,
    pub intent: Intent,
    /// Entity pairs (both orientations) for relationship boosting
    pub entity_pairs: Vec<(String, String)>,
}

impl ParsedQuery {
    /// True when nothing searchable survived parsing.
    pub fn is_empty(&self) -> bool {
        self.sanitized.is_empty()
    }

    /// Years as a sorted vec, for SQL parameter binding.
    pub fn years(&self) -> Vec<String> {
        self.temporal_tags.iter().cloned().collect()
    }
}

// ============================================================================
// PARSER
// ============================================================================

/// Deterministic query parser
pub struct QueryParser {
    pos_whitelist: Vec<String>,
    known_buckets: Vec<String>,
}

impl QueryParser {
    pub fn new(config: &AnchorConfig) -> Self {
        Self {
            pos_whitelist: config.pos_whitelist.iter().map(|w| w.to_lowercase()).collect(),
            known_buckets: config.known_buckets.iter().map(|b| b.to_lowercase()).collect(),
        }
    }

    /// Parse a query against the current wall clock.
    pub fn parse(&self, raw: &str, explicit_tags: &[String]) -> ParsedQuery {
        self.parse_at(raw, explicit_tags, Utc::now())
    }

    /// Parse with an explicit "now", so relative spans are testable.
    pub fn parse_at(
        &self,
        raw: &str,
        explicit_tags: &[String],
        now: DateTime<Utc>,
    ) -> ParsedQuery {
        let mut parsed = ParsedQuery {
            raw: raw.to_string(),
            intent: infer_intent(raw),
            ..Default::default()
        };

        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return parsed;
        }

        // 1. Hashtags route to scope sets; their bare labels stay searchable.
        let mut hashtag_terms: Vec<String> = Vec::new();
        let mut remainder_parts: Vec<&str> = Vec::new();
        for word in trimmed.split_whitespace() {
            if let Some(stripped) = word.strip_prefix('#') {
                let label: String = stripped
                    .trim_matches(|c: char| !c.is_alphanumeric())
                    .to_lowercase();
                if label.is_empty() {
                    continue;
                }
                self.classify_tag(&label, &mut parsed);
                hashtag_terms.push(label);
            } else {
                remainder_parts.push(word);
            }
        }
        for tag in explicit_tags {
            let label = tag.trim_start_matches('#').trim().to_lowercase();
            if !label.is_empty() {
                self.classify_tag(&label, &mut parsed);
            }
        }
        let mut working = remainder_parts.join(" ");

        // 2. Temporal markers become year tags and leave the token stream.
        for caps in RE_LAST_SPAN.captures_iter(&working) {
            if let Ok(n) = caps[1].parse::<u64>() {
                let start = match caps[2].to_lowercase().chars().next() {
                    Some('d') => now.checked_sub_days(Days::new(n)),
                    Some('m') => now.checked_sub_months(Months::new(n as u32)),
                    _ => now.checked_sub_months(Months::new((n as u32).saturating_mul(12))),
                };
                if let Some(start) = start {
                    for year in start.year()..=now.year() {
                        parsed.temporal_tags.insert(year.to_string());
                    }
                }
            }
        }
        working = RE_LAST_SPAN.replace_all(&working, " ").into_owned();

        for caps in RE_YEAR_RANGE.captures_iter(&working) {
            let a: i32 = caps[1].parse().unwrap_or(0);
            let b: i32 = caps[2].parse().unwrap_or(0);
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            for year in lo..=hi {
                parsed.temporal_tags.insert(year.to_string());
            }
        }
        working = RE_YEAR_RANGE.replace_all(&working, " ").into_owned();

        for caps in RE_BARE_YEAR.captures_iter(&working) {
            parsed.temporal_tags.insert(caps[1].to_string());
        }
        working = RE_BARE_YEAR.replace_all(&working, " ").into_owned();

        // 3. Tokenize what's left, original case intact for the POS pass.
        let raw_tokens: Vec<&str> = working
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .collect();

        // 4. Entity pairs: X <indicator> Y over the unfiltered stream.
        for window in raw_tokens.windows(3) {
            let indicator = window[1].to_lowercase();
            if PAIR_INDICATORS.binary_search(&indicator.as_str()).is_ok()
                && is_entity_candidate(window[0])
                && is_entity_candidate(window[2])
            {
                let x = window[0].to_lowercase();
                let y = window[2].to_lowercase();
                parsed.entity_pairs.push((x.clone(), y.clone()));
                parsed.entity_pairs.push((y, x));
            }
        }

        // 5. POS filter + whitelist, then fold the hashtag labels back in.
        let mut tokens: Vec<String> = Vec::new();
        for token in &raw_tokens {
            if token.len() <= 2 {
                continue;
            }
            let lower = token.to_lowercase();
            if self.pos_whitelist.contains(&lower) || pos::keep(token) {
                if !tokens.contains(&lower) {
                    tokens.push(lower);
                }
            }
        }
        for term in hashtag_terms {
            if term.len() > 2 && !tokens.contains(&term) {
                tokens.push(term);
            }
        }

        parsed.sanitized = tokens.join(" ");
        parsed.tokens = tokens;

        // 6. Nothing survived: fall back to the sanitized raw query.
        if parsed.sanitized.is_empty() {
            let fallback = sanitize_text(trimmed);
            parsed.tokens = fallback.split_whitespace().map(str::to_string).collect();
            parsed.sanitized = fallback;
        }

        // 7. Conversational frames yield alternate query forms.
        let lowered = trimmed.to_lowercase();
        let lowered = lowered.trim_end_matches(['?', '.', '!']);
        for frame in CONVERSATIONAL_FRAMES.iter() {
            if let Some(caps) = frame.captures(lowered) {
                let alternate = self.sanitize_tokens(&caps[1]);
                if !alternate.is_empty() && alternate != parsed.sanitized {
                    parsed.alternates.push(alternate);
                }
                break;
            }
        }

        parsed
    }

    /// Route a bare hashtag label to scope tags or buckets.
    fn classify_tag(&self, label: &str, parsed: &mut ParsedQuery) {
        if SEMANTIC_CATEGORIES.binary_search(&label).is_ok() {
            parsed.scope_tags.insert(label.to_string());
        } else if self.known_buckets.iter().any(|b| b == label) {
            parsed.scope_buckets.insert(label.to_string());
        } else {
            parsed.scope_tags.insert(label.to_string());
        }
    }

    /// POS-filter and sanitize an arbitrary phrase.
    fn sanitize_tokens(&self, phrase: &str) -> String {
        phrase
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| t.len() > 2)
            .filter(|t| self.pos_whitelist.contains(&t.to_lowercase()) || pos::keep(t))
            .map(|t| t.to_lowercase())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Replace non-alphanumerics with spaces and collapse runs.
fn sanitize_text(text: &str) -> String {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

fn is_entity_candidate(token: &str) -> bool {
    token.len() > 2
        && !token.chars().all(|c| c.is_ascii_digit())
        && pos::tag(token) != pos::PartOfSpeech::Function
}

/// Count marker-lexicon hits and pick the winning intent; factual scores a
/// baseline 1 and ties resolve in fixed priority order.
fn infer_intent(raw: &str) -> Intent {
    let mut emotional = 0usize;
    let mut temporal = 0usize;
    let mut relational = 0usize;
    let mut creative = 0usize;

    for token in raw.to_lowercase().split(|c: char| !c.is_alphanumeric()) {
        if token.is_empty() {
            continue;
        }
        if EMOTIONAL_MARKERS.binary_search(&token).is_ok() {
            emotional += 1;
        }
        if TEMPORAL_MARKERS.binary_search(&token).is_ok() {
            temporal += 1;
        }
        if RELATIONAL_MARKERS.binary_search(&token).is_ok() {
            relational += 1;
        }
        if CREATIVE_MARKERS.binary_search(&token).is_ok() {
            creative += 1;
        }
    }

    let ranked = [
        (Intent::Emotional, emotional),
        (Intent::Temporal, temporal),
        (Intent::Relational, relational),
        (Intent::Creative, creative),
        (Intent::Factual, 1),
    ];
    let best = ranked.iter().map(|(_, s)| *s).max().unwrap_or(1);
    ranked
        .iter()
        .find(|(_, s)| *s == best)
        .map(|(i, _)| *i)
        .unwrap_or(Intent::Factual)
}

// ============================================================================
// TESTS
// ============================================================================
