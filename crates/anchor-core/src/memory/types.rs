//! Graph entities and the search request/response surface
//!
//! Every entity here is read-mostly from the retrieval core's point of view:
//! compounds, molecules, atoms and positions are minted by the external
//! ingestion pipeline; edges by the background reorganizer. The core only
//! ever writes engrams.

use serde::{Deserialize, Serialize};

// ============================================================================
// PROVENANCE
// ============================================================================

/// Origin classification of ingested content
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Provenance {
    /// Authored inside the notebook (journals, notes)
    #[default]
    Internal,
    /// Imported from outside (clippings, exports)
    External,
    /// Untrusted or unclassified content
    Quarantine,
}

impl Provenance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provenance::Internal => "internal",
            Provenance::External => "external",
            Provenance::Quarantine => "quarantine",
        }
    }

    /// Parse from string name, defaulting unknown values to quarantine.
    pub fn parse_name(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "internal" => Provenance::Internal,
            "external" => Provenance::External,
            _ => Provenance::Quarantine,
        }
    }
}

impl std::fmt::Display for Provenance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Caller-side provenance preference for a search request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProvenanceFilter {
    Internal,
    External,
    Quarantine,
    #[default]
    All,
}

impl ProvenanceFilter {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProvenanceFilter::Internal => "internal",
            ProvenanceFilter::External => "external",
            ProvenanceFilter::Quarantine => "quarantine",
            ProvenanceFilter::All => "all",
        }
    }

    /// The single provenance this filter admits, if it is not `All`.
    pub fn narrow(&self) -> Option<Provenance> {
        match self {
            ProvenanceFilter::Internal => Some(Provenance::Internal),
            ProvenanceFilter::External => Some(Provenance::External),
            ProvenanceFilter::Quarantine => Some(Provenance::Quarantine),
            ProvenanceFilter::All => None,
        }
    }
}

// ============================================================================
// MOLECULE / ATOM TYPES
// ============================================================================

/// Content classification of a molecule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MoleculeType {
    #[default]
    Prose,
    Code,
    Data,
    Log,
}

impl MoleculeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MoleculeType::Prose => "prose",
            MoleculeType::Code => "code",
            MoleculeType::Data => "data",
            MoleculeType::Log => "log",
        }
    }

    pub fn parse_name(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "code" => MoleculeType::Code,
            "data" => MoleculeType::Data,
            "log" => MoleculeType::Log,
            _ => MoleculeType::Prose,
        }
    }

    /// Score multiplier applied during budget assembly.
    pub fn score_multiplier(&self) -> f64 {
        match self {
            MoleculeType::Prose => 1.0,
            MoleculeType::Code => 0.8,
            MoleculeType::Data => 0.6,
            MoleculeType::Log => 0.4,
        }
    }
}

/// Semantic classification of an atom
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AtomType {
    Concept,
    Entity,
    #[default]
    Keyword,
    System,
}

impl AtomType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AtomType::Concept => "concept",
            AtomType::Entity => "entity",
            AtomType::Keyword => "keyword",
            AtomType::System => "system",
        }
    }

    pub fn parse_name(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "concept" => AtomType::Concept,
            "entity" => AtomType::Entity,
            "system" => AtomType::System,
            _ => AtomType::Keyword,
        }
    }
}

// ============================================================================
// GRAPH ENTITIES
// ============================================================================

/// A file-level container of text, addressed by content+path hash
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Compound {
    pub compound_id: String,
    /// Relative (to the notebook root) or absolute path
    pub path: String,
    pub provenance: Provenance,
    /// Milliseconds since the epoch
    pub timestamp: i64,
    /// Full text; optional when the file itself is still on disk
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compound_body: Option<String>,
    /// 64-bit similarity fingerprint as lowercase hex, "0" when absent
    pub molecular_signature: String,
}

/// A sentence- or segment-level unit of retrieval
///
/// `start_byte..end_byte` is a UTF-8-aligned byte range into the compound
/// body. Slicing happens by bytes, never by characters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Molecule {
    pub molecule_id: String,
    pub compound_id: String,
    /// Text content, truncated to 500 KB for full-text indexing
    pub content: String,
    /// Position index within the compound
    pub sequence: i64,
    pub start_byte: u64,
    pub end_byte: u64,
    pub molecule_type: MoleculeType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub numeric_value: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub numeric_unit: Option<String>,
    pub molecular_signature: String,
    pub timestamp: i64,
}

/// An entity/concept/keyword with semantic weight
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Atom {
    pub atom_id: String,
    /// Display label; may carry a leading `#`
    pub label: String,
    pub atom_type: AtomType,
    /// Semantic weight in [0, 1]
    pub weight: f64,
    pub content: String,
    /// No empty strings; four-digit tags are purely temporal
    pub tags: Vec<String>,
    pub buckets: Vec<String>,
    pub timestamp: i64,
    pub provenance: Provenance,
    pub molecular_signature: String,
}

/// Byte-coordinate binding of an atom label to a compound
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AtomPosition {
    pub compound_id: String,
    pub byte_offset: u64,
    pub atom_label: String,
}

/// A weighted relation between graph nodes
///
/// `parent_of` edges form a DAG ascending Atoms -> Episodes -> Epochs; all
/// other relations are undirected association hints.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Edge {
    pub source_id: String,
    pub target_id: String,
    pub relation: String,
    pub weight: f64,
}

/// A hashed phrase bound to the atoms it resolved to: an O(1) lexical shortcut
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Engram {
    pub key_hash: String,
    pub atom_ids: Vec<String>,
    pub updated_at: i64,
}

// ============================================================================
// SEARCH SURFACE
// ============================================================================

/// How a result came to be associated with the query (provenance, not ranking)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionType {
    /// The result itself matched the full-text query
    DirectFts,
    /// Near-identical fingerprint to its best anchor
    DirectSimhash,
    /// Within an hour of its best anchor, not fingerprint-identical
    TemporalNeighbor,
    /// Reached through shared tags
    TagWalkNeighbor,
    /// Low-overlap candidate admitted by temperature sampling
    Serendipity,
}

impl ConnectionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionType::DirectFts => "direct_fts",
            ConnectionType::DirectSimhash => "direct_simhash",
            ConnectionType::TemporalNeighbor => "temporal_neighbor",
            ConnectionType::TagWalkNeighbor => "tag_walk_neighbor",
            ConnectionType::Serendipity => "serendipity",
        }
    }
}

/// Inferred intent of a query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Intent {
    Emotional,
    Temporal,
    Relational,
    Creative,
    #[default]
    Factual,
}

impl Intent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::Emotional => "emotional",
            Intent::Temporal => "temporal",
            Intent::Relational => "relational",
            Intent::Creative => "creative",
            Intent::Factual => "factual",
        }
    }
}

/// Optional structural filters on molecule hits
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SearchFilters {
    /// Restrict to a molecule type (prose/code/data/log)
    #[serde(skip_serializing_if = "Option::is_none", rename = "type")]
    pub molecule_type: Option<MoleculeType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_val: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_val: Option<f64>,
}

/// A search request against the retrieval core
///
/// Uses `deny_unknown_fields` to prevent field injection from transports.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SearchRequest {
    /// Free-form natural-language query
    pub query: String,
    /// Restrict to these buckets (open set)
    #[serde(default)]
    pub buckets: Vec<String>,
    /// Character budget for the assembled context
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
    /// Provenance preference
    #[serde(default)]
    pub provenance: ProvenanceFilter,
    /// Tags supplied explicitly alongside the query text
    #[serde(default)]
    pub explicit_tags: Vec<String>,
    /// Structural filters on molecule hits
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filters: Option<SearchFilters>,
    /// Serendipity temperature; 0 is fully deterministic top-K
    #[serde(default)]
    pub temperature: f64,
}

fn default_max_chars() -> usize {
    20_000
}

impl SearchRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            buckets: vec![],
            max_chars: default_max_chars(),
            provenance: ProvenanceFilter::All,
            explicit_tags: vec![],
            filters: None,
            temperature: 0.0,
        }
    }
}

/// One ranked result in a search response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchHit {
    pub id: String,
    pub content: String,
    /// Originating path or synthetic source label
    pub source: String,
    /// Milliseconds since the epoch
    pub timestamp: i64,
    pub buckets: Vec<String>,
    pub tags: Vec<String>,
    /// Ancestor episode/epoch ids, when the reorganizer has linked them
    #[serde(default)]
    pub epochs: Vec<String>,
    pub provenance: Provenance,
    pub score: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sequence: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub molecular_signature: Option<String>,
    /// Count of near-duplicates merged into this result
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compound_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_byte: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_byte: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none", rename = "type")]
    pub molecule_type: Option<MoleculeType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub numeric_value: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub numeric_unit: Option<String>,
    /// Query term this result answers, when attributable; the assembler
    /// splits the primary budget evenly across these
    #[serde(skip_serializing_if = "Option::is_none")]
    pub term: Option<String>,
    /// Set once the context inflator has replaced the terse content
    #[serde(default)]
    pub is_inflated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub semantic_categories: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub related_entities: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection_type: Option<ConnectionType>,
    /// Anchor that attracted this result during the walk
    #[serde(skip_serializing_if = "Option::is_none")]
    pub best_anchor_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gravity_score: Option<f64>,
}

impl SearchHit {
    /// A bare hit with the fields every pipeline stage relies on.
    pub fn new(id: impl Into<String>, content: impl Into<String>, score: f64) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            source: String::new(),
            timestamp: 0,
            buckets: vec![],
            tags: vec![],
            epochs: vec![],
            provenance: Provenance::Internal,
            score,
            sequence: None,
            molecular_signature: None,
            frequency: None,
            compound_id: None,
            start_byte: None,
            end_byte: None,
            molecule_type: None,
            numeric_value: None,
            numeric_unit: None,
            term: None,
            is_inflated: false,
            semantic_categories: None,
            related_entities: None,
            connection_type: None,
            best_anchor_id: None,
            gravity_score: None,
        }
    }
}

/// Per-request diagnostics carried alongside the results
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchMetadata {
    /// Approximate token budget (chars / 4)
    pub token_budget: usize,
    /// Anchor hits found per surviving query term
    pub hits_per_term: std::collections::BTreeMap<String, usize>,
    /// Radius used by the context inflator, in bytes
    pub elastic_radius: u64,
    /// Whether the OR-semantics fallback pass ran
    pub fuzzy: bool,
    /// Candidates returned by the tag walk
    pub walk_candidates: usize,
    /// Stage-level diagnostics; empty on a clean run
    pub stage_errors: Vec<String>,
    pub elapsed_ms: u64,
}

/// The final envelope returned by [`crate::AnchorEngine::search`]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResponse {
    /// Budget-packed context string, ready for an LLM prompt
    pub context: String,
    pub results: Vec<SearchHit>,
    pub metadata: SearchMetadata,
}

// ============================================================================
// TESTS
// ============================================================================
