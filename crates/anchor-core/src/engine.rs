//! Retrieval Engine
//!
//! The request pipeline: PARSE -> ENGRAM_LOOKUP -> ANCHOR_SEARCH (with a
//! fuzzy retry) -> WALK -> DEDUP -> INFLATE -> ASSEMBLE. Every stage is
//! fail-soft: errors are recorded in `metadata.stage_errors` and the pipeline
//! continues with whatever partial data it has. Only store initialization is
//! fatal.

use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::assemble::{BudgetAssembler, EMPTY_CONTEXT};
use crate::config::AnchorConfig;
use crate::inflate::{elastic_radius, ContextInflator};
use crate::memory::{
    Atom, ConnectionType, SearchHit, SearchMetadata, SearchRequest, SearchResponse,
};
use crate::query::QueryParser;
use crate::search::{scaling, AnchorSearch, Deduplicator, TagWalker};
use crate::storage::{engram_key, Storage, StorageError};

/// Atom-id cap on engram write-back.
const ENGRAM_BINDING_CAP: usize = 16;

// ============================================================================
// ERRORS
// ============================================================================

/// Fatal engine errors; per-stage failures never surface here
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum AnchorError {
    /// The store could not be opened even after Tabula Rasa
    #[error("Store error: {0}")]
    Store(#[from] StorageError),
}

impl AnchorError {
    /// Stable machine-readable code for the error envelope.
    pub fn code(&self) -> &'static str {
        match self {
            AnchorError::Store(_) => "store_init",
        }
    }
}

/// Wire form of a fatal error
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub ok: bool,
    pub code: String,
    pub message: String,
}

impl From<&AnchorError> for ErrorEnvelope {
    fn from(err: &AnchorError) -> Self {
        Self {
            ok: false,
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

// ============================================================================
// ENGINE
// ============================================================================

/// The retrieval engine: one store, one parser, one entry point
pub struct AnchorEngine {
    storage: Storage,
    config: AnchorConfig,
    parser: QueryParser,
}

impl AnchorEngine {
    /// Open the store (Tabula Rasa on a bad database) and build the engine.
    pub fn new(config: AnchorConfig) -> Result<Self, AnchorError> {
        let storage = Storage::open(&config)?;
        Ok(Self::with_storage(storage, config))
    }

    /// Build the engine over an already-open store (fixtures, tooling).
    pub fn with_storage(storage: Storage, config: AnchorConfig) -> Self {
        let parser = QueryParser::new(&config);
        Self {
            storage,
            config,
            parser,
        }
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub fn config(&self) -> &AnchorConfig {
        &self.config
    }

    /// Answer a search request, best-effort. Partial failures degrade the
    /// response and leave a diagnostic in `metadata.stage_errors`; the
    /// envelope itself always comes back.
    pub fn search(&self, request: &SearchRequest) -> SearchResponse {
        let started = Instant::now();
        let budget = self.config.effective_budget(request.max_chars);
        let mut metadata = SearchMetadata {
            token_budget: budget / 4,
            ..Default::default()
        };

        // PARSE
        let parsed = self
            .parser
            .parse(&request.query, &request.explicit_tags);
        if parsed.is_empty() {
            metadata.stage_errors.push("empty_query".to_string());
            metadata.elapsed_ms = started.elapsed().as_millis() as u64;
            return SearchResponse {
                context: EMPTY_CONTEXT.to_string(),
                results: vec![],
                metadata,
            };
        }

        let provenance = request.provenance.narrow();
        let phrase_key = engram_key(&parsed.sanitized);

        // ENGRAM_LOOKUP: previously bound atoms jump straight in as anchors.
        let mut engram_atoms: Vec<Atom> = Vec::new();
        match self.storage.get_engram(&phrase_key) {
            Ok(Some(engram)) => match self.storage.get_atoms(&engram.atom_ids) {
                Ok(atoms) => engram_atoms = atoms,
                Err(err) => metadata.stage_errors.push(format!("engram_atoms: {err}")),
            },
            Ok(None) => {}
            Err(err) => metadata.stage_errors.push(format!("engram: {err}")),
        }

        let mut buckets = request.buckets.clone();
        for bucket in &parsed.scope_buckets {
            if !buckets.contains(bucket) {
                buckets.push(bucket.clone());
            }
        }

        // ANCHOR_SEARCH, with an OR-semantics retry when AND finds nothing.
        let searcher = AnchorSearch::new(&self.storage, &self.config);
        let mut anchors =
            searcher.run(&parsed, &buckets, provenance, request.filters.as_ref(), false);
        metadata.stage_errors.append(&mut anchors.errors);
        if anchors.hits.is_empty() {
            metadata.fuzzy = true;
            let mut retry =
                searcher.run(&parsed, &buckets, provenance, request.filters.as_ref(), true);
            metadata.stage_errors.append(&mut retry.errors);
            anchors = retry;
        }
        metadata.hits_per_term = anchors.hits_per_term.clone();

        // Dynamic scaling: the anchor share of the budget caps the seed set.
        let plan = scaling(budget);
        anchors.hits.truncate(plan.anchor_limit.max(1));

        let mut hits = anchors.hits;
        for atom in &engram_atoms {
            if hits.iter().any(|h| h.id == atom.atom_id) {
                continue;
            }
            hits.push(engram_hit(atom));
        }

        // WALK: anchors are the atoms behind the query terms plus whatever
        // the engram recalled.
        let mut anchor_atoms = engram_atoms;
        match self
            .storage
            .atoms_by_labels(&parsed.tokens, self.config.walk_anchor_cap)
        {
            Ok(atoms) => {
                for atom in atoms {
                    if !anchor_atoms.iter().any(|a| a.atom_id == atom.atom_id) {
                        anchor_atoms.push(atom);
                    }
                }
            }
            Err(err) => metadata.stage_errors.push(format!("anchor_atoms: {err}")),
        }

        let walker = TagWalker::new(&self.storage, &self.config);
        let mut walk = walker.walk(
            &anchor_atoms,
            plan.walk_limit,
            request.temperature,
            &parsed.sanitized,
        );
        metadata.walk_candidates = walk.candidates;
        metadata.stage_errors.append(&mut walk.errors);
        for hit in walk.hits {
            if !hits.iter().any(|h| h.id == hit.id) {
                hits.push(hit);
            }
        }

        // DEDUP
        let hits = Deduplicator::new(self.config.simhash_near_threshold).dedup(hits);

        // INFLATE
        let inflatable = hits
            .iter()
            .filter(|h| !h.is_inflated && h.compound_id.is_some())
            .count();
        let radius = elastic_radius(budget, inflatable, &self.config);
        metadata.elastic_radius = radius;
        let inflator = ContextInflator::new(&self.storage, &self.config);
        let (hits, mut inflate_errors) = inflator.inflate(hits, radius);
        metadata.stage_errors.append(&mut inflate_errors);

        // ASSEMBLE
        let assembly = BudgetAssembler::new(&self.config).assemble(
            hits,
            &parsed,
            request.provenance,
            budget,
        );

        // A successful search binds the phrase to the atoms it surfaced.
        if !assembly.results.is_empty() {
            let bound: Vec<String> = anchor_atoms
                .iter()
                .map(|a| a.atom_id.clone())
                .chain(
                    assembly
                        .results
                        .iter()
                        .filter(|h| h.gravity_score.is_some())
                        .map(|h| h.id.clone()),
                )
                .take(ENGRAM_BINDING_CAP)
                .collect();
            if !bound.is_empty() {
                if let Err(err) = self.storage.put_engram(&phrase_key, &bound) {
                    metadata.stage_errors.push(format!("engram_write: {err}"));
                }
            }
        }

        metadata.elapsed_ms = started.elapsed().as_millis() as u64;
        SearchResponse {
            context: assembly.context,
            results: assembly.results,
            metadata,
        }
    }
}

/// A result standing in for an engram-recalled atom.
fn engram_hit(atom: &Atom) -> SearchHit {
    let content = if atom.content.is_empty() {
        atom.label.clone()
    } else {
        atom.content.clone()
    };
    let mut hit = SearchHit::new(atom.atom_id.clone(), content, 5.0);
    hit.source = atom.label.clone();
    hit.timestamp = atom.timestamp;
    hit.tags = atom.tags.clone();
    hit.buckets = atom.buckets.clone();
    hit.provenance = atom.provenance;
    hit.molecular_signature = Some(atom.molecular_signature.clone());
    hit.connection_type = Some(ConnectionType::DirectFts);
    hit
}

// ============================================================================
// TESTS
// ============================================================================
