//! Memory module - Core types and data structures
//!
//! Implements the atomic knowledge model:
//! - Compounds: file-level containers addressed by content+path hash
//! - Molecules: segment-level retrieval units pointing into compounds by byte range
//! - Atoms: entities/concepts/keywords with semantic weight and tag sets
//! - Atom positions: byte coordinates binding atoms to compounds
//! - Edges and engrams: graph hints and lexical shortcuts written around the core

mod types;

pub use types::{
    Atom, AtomPosition, AtomType, Compound, ConnectionType, Edge, Engram, Intent, Molecule,
    MoleculeType, Provenance, ProvenanceFilter, SearchFilters, SearchHit, SearchMetadata,
    SearchRequest, SearchResponse,
};
