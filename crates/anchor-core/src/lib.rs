//! # Anchor Core
//!
//! Local-first personal-memory retrieval engine. Ingested text lives in a
//! knowledge graph of **Compounds -> Molecules -> Atoms**; queries are
//! answered by combining full-text search, tag-graph traversal and
//! byte-precise radial content inflation into a ranked, budget-aware context
//! window ready for an LLM prompt.
//!
//! The pipeline behind [`AnchorEngine::search`]:
//!
//! - **Query parsing**: hashtag scoping, temporal extraction, POS filtering,
//!   conversational expansion, intent inference, entity pairs
//! - **Anchor search**: molecule full-text + atom-position radial seeding,
//!   with an OR-semantics fuzzy retry
//! - **Physics tag-walker**: gravity scoring over shared tags with the
//!   Unified Field Equation `W = sharedTags * alpha * exp(-lambda * dt) *
//!   (1 - hamming/64)`
//! - **Deduplication**: 64-bit similarity fingerprints, Hamming-clustered,
//!   tags and buckets merged, frequency accumulated
//! - **Context inflation**: byte-radial windows read from disk or the stored
//!   compound body, merged and word-trimmed
//! - **Budget assembly**: provenance/type/category/entity boosts, greedy
//!   packing under a character budget
//!
//! The store is a cache over the filesystem. A database that fails to open
//! is wiped and rebuilt (Tabula Rasa); the files remain the source of truth.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use anchor_core::{AnchorConfig, AnchorEngine, SearchRequest};
//!
//! let engine = AnchorEngine::new(AnchorConfig::default())?;
//! let response = engine.search(&SearchRequest::new("what happened with project aurora"));
//! println!("{}", response.context);
//! ```

#![warn(rustdoc::missing_crate_level_docs)]

// ============================================================================
// MODULES
// ============================================================================

pub mod assemble;
pub mod config;
pub mod fingerprint;
pub mod inflate;
pub mod memory;
pub mod query;
pub mod search;
pub mod storage;

mod engine;

// ============================================================================
// PUBLIC API RE-EXPORTS
// ============================================================================

// Engine
pub use engine::{AnchorEngine, AnchorError, ErrorEnvelope};

// Configuration
pub use config::AnchorConfig;

// Memory types
pub use memory::{
    Atom, AtomPosition, AtomType, Compound, ConnectionType, Edge, Engram, Intent, Molecule,
    MoleculeType, Provenance, ProvenanceFilter, SearchFilters, SearchHit, SearchMetadata,
    SearchRequest, SearchResponse,
};

// Storage layer
pub use storage::{
    engram_key, MoleculeHit, MoleculeQuery, PositionHit, Storage, StorageError, WalkCandidate,
    WalkQuery,
};

// Fingerprints
pub use fingerprint::{hamming, simhash64, NO_SIGNATURE, SIMHASH_NEAR};

// Query parsing
pub use query::{ParsedQuery, QueryParser};

// Search stages
pub use search::{
    fts_expr, scaling, AnchorScaling, AnchorSearch, Deduplicator, TagWalker, GRAVITY_THRESHOLD,
    MAX_PER_HOP,
};

// Inflation and assembly
pub use assemble::{BudgetAssembler, EMPTY_CONTEXT, HEADER_OVERHEAD, PACK_FILL};
pub use inflate::{elastic_radius, ContextInflator};

// ============================================================================
// VERSION INFO
// ============================================================================

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// ============================================================================
// PRELUDE
// ============================================================================

/// Convenient imports for common usage
pub mod prelude {
    pub use crate::{
        AnchorConfig, AnchorEngine, AnchorError, Provenance, ProvenanceFilter, SearchHit,
        SearchRequest, SearchResponse, Storage, StorageError,
    };
}
