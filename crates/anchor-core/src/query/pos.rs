//! Part-of-Speech Filtering
//!
//! A small lexicon-and-suffix tagger used only for query parsing: decide
//! whether a token is worth keeping as a search term. Closed-class function
//! words come from a fixed lexicon; open-class words are classified by
//! capitalization and suffix, defaulting to noun.

/// Coarse part-of-speech classes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartOfSpeech {
    Noun,
    Proper,
    Adjective,
    Verb,
    Adverb,
    /// Determiners, pronouns, prepositions, conjunctions, auxiliaries,
    /// conversational fillers
    Function,
}

/// Closed-class function words and conversational fillers. Lookups are on
/// lowercased tokens; keep the list sorted for the binary search.
const FUNCTION_WORDS: &[&str] = &[
    "about", "above", "after", "again", "against", "all", "also", "although", "am", "an", "and",
    "any", "anyway", "are", "around", "as", "at", "basically", "be", "because", "been", "before",
    "being", "below", "between", "both", "but", "by", "can", "could", "did", "do", "does", "doing",
    "down", "during", "each", "either", "few", "for", "from", "further", "had", "has", "have",
    "having", "he", "her", "here", "hers", "herself", "hey", "hi", "him", "himself", "his", "how",
    "i", "if", "in", "into", "is", "it", "its", "itself", "just", "like", "maybe", "me", "might",
    "more", "most", "must", "my", "myself", "no", "nor", "not", "of", "off", "okay", "on", "once",
    "only", "or", "other", "our", "ours", "ourselves", "out", "over", "own", "perhaps", "please",
    "shall", "she", "should", "so", "some", "such", "than", "that", "the", "their", "theirs",
    "them", "themselves", "then", "there", "these", "they", "this", "those", "through", "to",
    "too", "um", "under", "until", "up", "us", "very", "was", "we", "well", "were", "what", "when",
    "where", "which", "while", "who", "whom", "why", "will", "with", "would", "yeah", "yes", "you",
    "your", "yours", "yourself",
];

/// Suffixes that mark a token as adjectival.
const ADJECTIVE_SUFFIXES: &[&str] = &[
    "able", "al", "ful", "ible", "ic", "ish", "ive", "less", "ous",
];

/// Suffixes that mark a token as verbal.
const VERB_SUFFIXES: &[&str] = &["ate", "ed", "en", "ify", "ing", "ise", "ize"];

/// Tag a single token. `original` carries the pre-lowercasing form so proper
/// nouns can be spotted by capitalization.
pub fn tag(original: &str) -> PartOfSpeech {
    let lower = original.to_lowercase();
    if FUNCTION_WORDS.binary_search(&lower.as_str()).is_ok() {
        return PartOfSpeech::Function;
    }
    if original.chars().next().is_some_and(|c| c.is_uppercase()) {
        return PartOfSpeech::Proper;
    }
    if lower.len() > 4 && lower.ends_with("ly") {
        return PartOfSpeech::Adverb;
    }
    for suffix in ADJECTIVE_SUFFIXES {
        if lower.len() > suffix.len() + 2 && lower.ends_with(suffix) {
            return PartOfSpeech::Adjective;
        }
    }
    for suffix in VERB_SUFFIXES {
        if lower.len() > suffix.len() + 2 && lower.ends_with(suffix) {
            return PartOfSpeech::Verb;
        }
    }
    PartOfSpeech::Noun
}

/// Whether a token survives POS filtering: nouns, propers, adjectives and
/// verbs stay; everything else is query noise.
pub fn keep(original: &str) -> bool {
    matches!(
        tag(original),
        PartOfSpeech::Noun | PartOfSpeech::Proper | PartOfSpeech::Adjective | PartOfSpeech::Verb
    )
}
