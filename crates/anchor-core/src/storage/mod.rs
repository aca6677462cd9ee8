//! Storage module
//!
//! SQLite-backed persistence for the knowledge graph, plus the migration
//! machinery and the Tabula Rasa boot policy.

pub mod migrations;
mod sqlite;

pub use sqlite::{
    engram_key, MoleculeHit, MoleculeQuery, PositionHit, Result, Storage, StorageError,
    WalkCandidate, WalkQuery,
};
